//! Minimal ERC-3009 + ERC-20 ABI surface needed to verify and settle a transfer.

use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

sol!(
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEip3009 {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;

        function balanceOf(address account) external view returns (uint256);
        function name() external view returns (string);
        function version() external view returns (string);
    }
);

sol! {
    #[derive(Debug, Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}
