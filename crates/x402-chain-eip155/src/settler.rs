//! ERC-3009 `transferWithAuthorization` settlement (C4).
//!
//! `settle` runs a fixed state machine: acquire the nonce-ledger guard, recover and check the
//! EIP-712 signature, preflight the facilitator's own gas balance, select a nonce off the
//! `pending` tag, submit with a bounded, gas-bumping retry, and wait for one confirmation.
//! A revert does not release the guard — the nonce was consumed on-chain regardless of the
//! contract's outcome, so the slot must stay claimed.

use std::str::FromStr;
use std::time::Duration;

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use alloy_provider::fillers::{FillProvider, JoinFill, NonceFiller, WalletFiller};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolStruct, eip712_domain};
use regex::Regex;
use tracing::{info, warn};

use x402_nonce_ledger::{AcquireRequest, NonceKey, NonceLedger};
use x402_types::envelope::EvmEnvelope;
use x402_types::proto::PaymentRequirements;
use x402_types::{ChainId, FacilitatorError};

use crate::contract::{IEip3009, TransferWithAuthorization};
use crate::pending_nonce_manager::PendingNonceManager;

type InnerProvider =
    FillProvider<JoinFill<JoinFill<Identity, NonceFiller<PendingNonceManager>>, WalletFiller<EthereumWallet>>, RootProvider>;

const GAS_BUMP_FACTOR: f64 = 1.20;
const MAX_ATTEMPTS: u32 = 3;
const GAS_LIMIT_HEADROOM: u128 = 100_000;

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip155Extra {
    pub name: String,
    pub version: String,
}

pub struct Eip155Settler {
    chain_id: ChainId,
    provider: InnerProvider,
    nonce_manager: PendingNonceManager,
    signer_address: Address,
    facilitator_id: String,
}

impl Eip155Settler {
    pub fn new(chain_id: ChainId, rpc_url: url::Url, signer: PrivateKeySigner, facilitator_id: String) -> Self {
        let signer_address = signer.address();
        let nonce_manager = PendingNonceManager::default();
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::default()
            .filler(NonceFiller::new(nonce_manager.clone()))
            .wallet(wallet)
            .connect_http(rpc_url);
        Self { chain_id, provider, nonce_manager, signer_address, facilitator_id }
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    pub async fn settle(
        &self,
        requirements: &PaymentRequirements,
        envelope: &EvmEnvelope,
        ledger: &dyn NonceLedger,
    ) -> Result<String, FacilitatorError> {
        let from = parse_address(&envelope.authorization.from)?;
        let to = parse_address(&envelope.authorization.to)?;
        let asset = parse_address(&requirements.asset)?;
        let value = U256::from_str_radix(&envelope.authorization.value, 10)
            .map_err(|e| FacilitatorError::BadEnvelope(format!("value is not a decimal integer: {e}")))?;
        let nonce_bytes =
            B256::from_str(&envelope.authorization.nonce).map_err(|e| FacilitatorError::BadEnvelope(format!("malformed nonce: {e}")))?;

        // 1. guard
        let key = NonceKey::new(&envelope.authorization.nonce, &envelope.authorization.from, self.chain_id.clone());
        let acquire = ledger
            .try_acquire(AcquireRequest {
                key: key.clone(),
                facilitator_id: self.facilitator_id.clone(),
                expires_at: envelope.authorization.valid_before.as_secs(),
            })
            .await;
        if !acquire.is_acquired() {
            let reason = match acquire {
                x402_nonce_ledger::AcquireOutcome::Rejected { reason } => reason,
                x402_nonce_ledger::AcquireOutcome::Acquired => unreachable!(),
            };
            return Err(FacilitatorError::DuplicateSubmission(reason));
        }

        match self.try_settle(requirements, envelope, to, from, asset, value, nonce_bytes).await {
            Ok(tx_hash) => {
                ledger.mark_settled(&key, &tx_hash).await;
                Ok(tx_hash)
            }
            Err(err @ FacilitatorError::Reverted(_)) => Err(err),
            Err(err) => {
                ledger.release(&key).await;
                Err(err)
            }
        }
    }

    async fn try_settle(
        &self,
        requirements: &PaymentRequirements,
        envelope: &EvmEnvelope,
        to: Address,
        from: Address,
        asset: Address,
        value: U256,
        nonce_bytes: B256,
    ) -> Result<String, FacilitatorError> {
        let chain_ref: u64 = self
            .chain_id
            .reference()
            .parse()
            .map_err(|_| FacilitatorError::UnsupportedNetwork(self.chain_id.to_string()))?;
        let signature =
            recover_and_check_signature(envelope, &self.provider, requirements, asset, from, to, value, nonce_bytes, chain_ref).await?;

        self.assert_enough_gas_balance().await?;

        let contract = IEip3009::new(asset, &self.provider);
        let mut gas_price = self.provider.get_gas_price().await.map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let call = contract
                .transferWithAuthorization(
                    from,
                    to,
                    value,
                    U256::from(envelope.authorization.valid_after.as_secs()),
                    U256::from(envelope.authorization.valid_before.as_secs()),
                    nonce_bytes,
                    signature.v() as u8 + 27,
                    B256::from(signature.r().to_be_bytes()),
                    B256::from(signature.s().to_be_bytes()),
                )
                .from(self.signer_address)
                .gas_price(gas_price);

            let pending = match call.send().await {
                Ok(pending) => pending,
                Err(err) => {
                    let message = err.to_string();
                    self.nonce_manager.reset(self.signer_address).await;
                    if is_retryable(&message) && attempt < MAX_ATTEMPTS {
                        gas_price = bump(gas_price);
                        warn!(attempt, %message, "resubmitting with bumped gas price");
                        last_error = Some(message);
                        continue;
                    }
                    return Err(FacilitatorError::SettlementError(message));
                }
            };

            let tx_hash = *pending.tx_hash();
            let receipt = match pending.with_required_confirmations(1).with_timeout(Some(Duration::from_secs(60))).get_receipt().await {
                Ok(receipt) => receipt,
                Err(err) => {
                    self.nonce_manager.reset(self.signer_address).await;
                    return Err(FacilitatorError::SettlementError(err.to_string()));
                }
            };

            if receipt.status() {
                info!(tx = %tx_hash, "transferWithAuthorization settled");
                return Ok(tx_hash.to_string());
            }

            let reason = self.dry_call_revert_reason(&contract, from, to, value, envelope, nonce_bytes, &signature).await;
            warn!(tx = %tx_hash, reason = %reason, "transferWithAuthorization reverted");
            return Err(FacilitatorError::Reverted(reason));
        }

        Err(FacilitatorError::SettlementError(last_error.unwrap_or_else(|| "exhausted retries".to_string())))
    }

    async fn assert_enough_gas_balance(&self) -> Result<(), FacilitatorError> {
        let balance = self.provider.get_balance(self.signer_address).await.map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
        let gas_price = self.provider.get_gas_price().await.map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
        let minimum = U256::from(GAS_LIMIT_HEADROOM).saturating_mul(U256::from(gas_price));
        if balance < minimum {
            return Err(FacilitatorError::InsufficientGas);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dry_call_revert_reason<P: Provider>(
        &self,
        contract: &IEip3009::IEip3009Instance<&P>,
        from: Address,
        to: Address,
        value: U256,
        envelope: &EvmEnvelope,
        nonce_bytes: B256,
        signature: &Signature,
    ) -> String {
        let call = contract.transferWithAuthorization(
            from,
            to,
            value,
            U256::from(envelope.authorization.valid_after.as_secs()),
            U256::from(envelope.authorization.valid_before.as_secs()),
            nonce_bytes,
            signature.v() as u8 + 27,
            B256::from(signature.r().to_be_bytes()),
            B256::from(signature.s().to_be_bytes()),
        );
        match call.call().await {
            Ok(_) => "reverted on submission but dry-call succeeded".to_string(),
            Err(err) => extract_revert_reason(&err.to_string()),
        }
    }
}

fn parse_address(raw: &str) -> Result<Address, FacilitatorError> {
    Address::from_str(raw).map_err(|e| FacilitatorError::BadEnvelope(format!("malformed address {raw}: {e}")))
}

fn bump(gas_price: u128) -> u128 {
    ((gas_price as f64) * GAS_BUMP_FACTOR).ceil() as u128
}

fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("underpriced") || lower.contains("nonce")
}

fn extract_revert_reason(message: &str) -> String {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r#"revert(?:ed)?[:\s]+"?([^"\n]+)"?"#).expect("valid regex"));
    re.captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| message.to_string())
}

#[allow(clippy::too_many_arguments)]
async fn recover_and_check_signature<P: Provider>(
    envelope: &EvmEnvelope,
    provider: P,
    requirements: &PaymentRequirements,
    asset: Address,
    from: Address,
    to: Address,
    value: U256,
    nonce_bytes: B256,
    chain_ref: u64,
) -> Result<Signature, FacilitatorError> {
    let sig_bytes = hex_to_bytes(&envelope.signature)?;
    let signature = Signature::from_raw_array(&sig_bytes.try_into().map_err(|_| {
        FacilitatorError::BadSignature("expected a 65-byte (r, s, v) signature".to_string())
    })?)
    .map_err(|e| FacilitatorError::BadSignature(e.to_string()))?;

    let extra: Eip155Extra = requirements
        .extra
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let contract = IEip3009::new(asset, &provider);
    let (name, version) = if !extra.name.is_empty() {
        (extra.name, extra.version)
    } else {
        let name = contract.name().call().await.map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
        let version = contract.version().call().await.map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
        (name, version)
    };
    let domain = eip712_domain! {
        name: name,
        version: version,
        chain_id: chain_ref,
        verifying_contract: asset,
    };
    let typed = TransferWithAuthorization {
        from,
        to,
        value,
        validAfter: U256::from(envelope.authorization.valid_after.as_secs()),
        validBefore: U256::from(envelope.authorization.valid_before.as_secs()),
        nonce: nonce_bytes,
    };
    let hash = typed.eip712_signing_hash(&domain);
    let recovered = signature.recover_address_from_prehash(&hash).map_err(|e| FacilitatorError::BadSignature(e.to_string()))?;
    if recovered != from {
        return Err(FacilitatorError::BadSignature(format!("recovered {recovered} does not match authorization.from {from}")));
    }
    Ok(signature)
}

fn hex_to_bytes(s: &str) -> Result<Vec<u8>, FacilitatorError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(trimmed).map_err(|e| FacilitatorError::BadSignature(format!("signature is not hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_bump_is_twenty_percent() {
        assert_eq!(bump(1_000_000_000), 1_200_000_000);
    }

    #[test]
    fn retryable_errors_match_underpriced_and_nonce() {
        assert!(is_retryable("replacement transaction underpriced"));
        assert!(is_retryable("nonce too low"));
        assert!(!is_retryable("insufficient funds for gas"));
    }

    #[test]
    fn revert_reason_is_extracted_from_error_text() {
        let message = r#"server returned an error response: error code 3: execution reverted: "authorization is used", data: "0x..""#;
        let reason = extract_revert_reason(message);
        assert!(reason.contains("authorization is used"));
    }

    #[test]
    fn parse_address_rejects_garbage() {
        assert!(parse_address("not-an-address").is_err());
    }
}
