//! Protocol engine (C6): `supported`/`verify`/`settle`, dispatching to the chain-appropriate
//! settler by the requirements' resolved chain id.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use x402_chain_eip155::Eip155Settler;
use x402_chain_solana::SolanaSettler;
use x402_nonce_ledger::NonceLedger;
use x402_types::envelope::{self, Envelope};
use x402_types::proto::{PaymentRequirements, SettleResponse, SupportedKind, SupportedResponse, VerifyResponse};
use x402_types::timestamp::UnixTimestamp;
use x402_types::{ChainId, ChainRegistry, FacilitatorError};

/// A chain settler behind a uniform verify/settle surface, keyed by `ChainId` in the engine.
pub enum Settler {
    Eip155(Eip155Settler),
    Solana(SolanaSettler),
}

pub struct Engine {
    registry: ChainRegistry,
    settlers: HashMap<ChainId, Settler>,
    ledger: Arc<dyn NonceLedger>,
}

impl Engine {
    pub fn new(registry: ChainRegistry, settlers: HashMap<ChainId, Settler>, ledger: Arc<dyn NonceLedger>) -> Self {
        Self { registry, settlers, ledger }
    }

    /// Whether `requirements.network` resolves to a chain this engine has configured as EVM.
    /// Lets callers (the HTTP middleware) disambiguate which of several accepted chains an
    /// envelope is meant for, before engine-internal decoding happens.
    pub fn is_evm(&self, requirements: &PaymentRequirements) -> bool {
        self.registry.resolve(&requirements.network).map(|id| id.is_evm()).unwrap_or(false)
    }

    /// One x402Version=1 and one x402Version=2 entry per configured chain, deduplicated by
    /// network rather than by token.
    pub fn supported(&self) -> SupportedResponse {
        let mut kinds = Vec::new();
        for chain_id in self.registry.configured_chain_ids() {
            let Some(settler) = self.settlers.get(chain_id) else { continue };
            let v1_network = chain_id.as_network_name().map(str::to_string).unwrap_or_else(|| chain_id.to_string());
            let v2_network = chain_id.to_string();
            let extra = match settler {
                Settler::Solana(solana) => Some(serde_json::json!({ "feePayer": solana.fee_payer_pubkey().to_string() })),
                Settler::Eip155(_) => None,
            };
            kinds.push(SupportedKind { x402_version: 1, scheme: "exact".to_string(), network: v1_network, asset: None, extra: extra.clone() });
            kinds.push(SupportedKind { x402_version: 2, scheme: "exact".to_string(), network: v2_network, asset: None, extra });
        }
        SupportedResponse { kinds }
    }

    pub async fn verify(&self, payment_payload: &Value, requirements: &PaymentRequirements) -> VerifyResponse {
        match self.resolve(requirements, payment_payload).and_then(|(chain_id, envelope)| self.check(&chain_id, &envelope, requirements)) {
            Ok(payer) => VerifyResponse::valid(payer),
            Err(err) => VerifyResponse::invalid(err.reason()),
        }
    }

    pub async fn settle(&self, payment_payload: &Value, requirements: &PaymentRequirements) -> SettleResponse {
        let network = requirements.network.clone();
        let (chain_id, envelope) = match self.resolve(requirements, payment_payload) {
            Ok(pair) => pair,
            Err(err) => return SettleResponse::error(String::new(), network, err.reason()),
        };
        let payer = match self.check(&chain_id, &envelope, requirements) {
            Ok(payer) => payer,
            Err(err) => return SettleResponse::error(String::new(), network, err.reason()),
        };

        let outcome = match (&envelope, self.settlers.get(&chain_id)) {
            (Envelope::Evm(evm), Some(Settler::Eip155(settler))) => settler.settle(requirements, evm, self.ledger.as_ref()).await,
            (Envelope::Solana(sol), Some(Settler::Solana(settler))) => settler.settle(requirements, &sol.transaction, self.ledger.as_ref()).await,
            _ => unreachable!("resolve/check already matched the envelope shape to a settler of the same kind"),
        };
        match outcome {
            Ok(transaction) => SettleResponse::success(transaction, payer, network),
            Err(err) => SettleResponse::error(payer, network, err.reason()),
        }
    }

    /// Resolves the configured chain and decodes the envelope, without yet validating either.
    fn resolve(&self, requirements: &PaymentRequirements, payment_payload: &Value) -> Result<(ChainId, Envelope), FacilitatorError> {
        let chain_id = self
            .registry
            .resolve(&requirements.network)
            .filter(|id| self.settlers.contains_key(id))
            .ok_or_else(|| FacilitatorError::UnsupportedNetwork(requirements.network.clone()))?;
        let envelope = envelope::from_json(payment_payload.clone()).map_err(|e| FacilitatorError::BadEnvelope(e.to_string()))?;
        Ok((chain_id, envelope))
    }

    /// Shape- and timing-checks the envelope against its settler kind, returning the payer on
    /// success. For Solana this trusts the pre-signed transaction beyond its transfer
    /// instruction; the full check happens in `settle`.
    fn check(&self, chain_id: &ChainId, envelope: &Envelope, requirements: &PaymentRequirements) -> Result<String, FacilitatorError> {
        match envelope {
            Envelope::Evm(evm) => {
                if !matches!(self.settlers.get(chain_id), Some(Settler::Eip155(_))) {
                    return Err(FacilitatorError::UnsupportedNetwork(requirements.network.clone()));
                }
                let now = UnixTimestamp::now();
                if evm.authorization.valid_after > now {
                    return Err(FacilitatorError::NotYetValid);
                }
                if evm.authorization.valid_before < now {
                    return Err(FacilitatorError::Expired);
                }
                let value: u128 =
                    evm.authorization.value.parse().map_err(|_| FacilitatorError::BadEnvelope("value is not an integer".to_string()))?;
                let required: u128 = requirements
                    .max_amount_required
                    .parse()
                    .map_err(|_| FacilitatorError::BadEnvelope("maxAmountRequired is not an integer".to_string()))?;
                if value < required {
                    return Err(FacilitatorError::Insufficient);
                }
                Ok(evm.authorization.from.clone())
            }
            Envelope::Solana(sol) => {
                let Some(Settler::Solana(settler)) = self.settlers.get(chain_id) else {
                    return Err(FacilitatorError::UnsupportedNetwork(requirements.network.clone()));
                };
                if sol.transaction.trim().is_empty() {
                    return Err(FacilitatorError::BadEnvelope("transaction is empty".to_string()));
                }
                settler.verify_payer(requirements, &sol.transaction)
            }
        }
    }
}
