//! Wire types for the x402 HTTP surface: `/supported`, `/verify`, `/settle`, and the 402
//! challenge body.
//!
//! Two source clients disagree on field names for the verify/settle results: one calls the
//! verification flag `valid`, the x402-standard shape calls it `isValid`; one calls the
//! settlement transaction id `transactionHash`, the standard shape calls it `transaction`.
//! This module emits only the standard shape and accepts both on decode.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::chain::ChainId;

/// One entry in the `/supported` response: a (scheme, network) pair this facilitator can
/// verify and settle, tagged with the protocol version it is being advertised under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
}

/// Payment terms set by the resource server. Opaque to the wire beyond its own shape;
/// the facilitator never originates one, only validates against it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Atomic integer amount, as a decimal string.
    pub max_amount_required: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub pay_to: String,
    pub asset: String,
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub x402_version: u8,
    pub payment_payload: serde_json::Value,
    pub payment_requirements: PaymentRequirements,
}

pub type SettleRequest = VerifyRequest;

/// Result of `verify`. Serializes as `{isValid, payer?, invalidReason?}`; accepts the legacy
/// `valid` alias for the boolean field on decode (never emitted).
#[derive(Debug, Clone)]
pub enum VerifyResponse {
    Valid { payer: String },
    Invalid { reason: String, payer: Option<String> },
}

impl VerifyResponse {
    pub fn valid(payer: String) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        VerifyResponse::Invalid { reason: reason.into(), payer: None }
    }

    pub fn invalid_with_payer(reason: impl Into<String>, payer: String) -> Self {
        VerifyResponse::Invalid { reason: reason.into(), payer: Some(payer) }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    #[serde(alias = "valid")]
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            VerifyResponse::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                payer: Some(payer.clone()),
                invalid_reason: None,
            },
            VerifyResponse::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                payer: payer.clone(),
                invalid_reason: Some(reason.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        Ok(if wire.is_valid {
            VerifyResponse::Valid {
                payer: wire.payer.ok_or_else(|| serde::de::Error::missing_field("payer"))?,
            }
        } else {
            VerifyResponse::Invalid {
                reason: wire.invalid_reason.unwrap_or_default(),
                payer: wire.payer,
            }
        })
    }
}

/// Result of `settle`. Serializes as `{success, transaction, payer, network, errorReason?}`;
/// accepts the legacy `transactionHash` alias for `transaction` on decode (never emitted).
/// `transaction` is `""` on failure, never absent.
#[derive(Debug, Clone)]
pub enum SettleResponse {
    Success { transaction: String, payer: String, network: String },
    Error { payer: String, network: String, reason: String },
}

impl SettleResponse {
    pub fn success(transaction: String, payer: String, network: String) -> Self {
        SettleResponse::Success { transaction, payer, network }
    }

    pub fn error(payer: String, network: String, reason: impl Into<String>) -> Self {
        SettleResponse::Error { payer, network, reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SettleResponse::Success { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(alias = "transactionHash")]
    transaction: String,
    payer: String,
    network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
}

impl Serialize for SettleResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            SettleResponse::Success { transaction, payer, network } => SettleResponseWire {
                success: true,
                transaction: transaction.clone(),
                payer: payer.clone(),
                network: network.clone(),
                error_reason: None,
            },
            SettleResponse::Error { payer, network, reason } => SettleResponseWire {
                success: false,
                transaction: String::new(),
                payer: payer.clone(),
                network: network.clone(),
                error_reason: Some(reason.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        Ok(if wire.success {
            SettleResponse::Success { transaction: wire.transaction, payer: wire.payer, network: wire.network }
        } else {
            SettleResponse::Error {
                payer: wire.payer,
                network: wire.network,
                reason: wire.error_reason.unwrap_or_default(),
            }
        })
    }
}

/// HTTP 402 challenge body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u8,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentRequired {
    pub fn new(accepts: Vec<PaymentRequirements>, error: Option<String>) -> Self {
        Self { x402_version: 2, accepts, error }
    }
}

pub fn chain_id_of(requirements: &PaymentRequirements) -> Option<ChainId> {
    ChainId::resolve(&requirements.network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_response_accepts_legacy_valid_alias() {
        let legacy = serde_json::json!({ "valid": true, "payer": "0xabc" });
        let parsed: VerifyResponse = serde_json::from_value(legacy).unwrap();
        assert!(parsed.is_valid());
    }

    #[test]
    fn verify_response_never_emits_legacy_alias() {
        let response = VerifyResponse::valid("0xabc".into());
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("isValid").is_some());
        assert!(json.get("valid").is_none());
    }

    #[test]
    fn settle_response_accepts_legacy_transaction_hash_alias() {
        let legacy = serde_json::json!({
            "success": true,
            "transactionHash": "0xdead",
            "payer": "0xabc",
            "network": "base",
        });
        let parsed: SettleResponse = serde_json::from_value(legacy).unwrap();
        match parsed {
            SettleResponse::Success { transaction, .. } => assert_eq!(transaction, "0xdead"),
            SettleResponse::Error { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn settle_failure_carries_empty_transaction() {
        let response = SettleResponse::error("0xabc".into(), "base".into(), "expired");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["transaction"], "");
        assert_eq!(json["success"], false);
    }
}
