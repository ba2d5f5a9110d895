//! ERC-3009 settlement for EIP-155 (EVM) chains (C4).

pub mod contract;
pub mod pending_nonce_manager;
pub mod settler;

pub use pending_nonce_manager::PendingNonceManager;
pub use settler::{Eip155Extra, Eip155Settler};
