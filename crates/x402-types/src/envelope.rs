//! Base64-JSON `X-PAYMENT` envelope codec (C2).
//!
//! Two on-wire layouts are in circulation and both MUST decode to the same internal shape:
//! `{signature, authorization}` and `{payload: {signature, authorization}}`. Solana carries
//! `{transaction}` instead of `{signature, authorization}`, under the same two layouts.
//! Unknown fields are accepted and ignored.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp::UnixTimestamp;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvelopeError {
    #[error("header is not valid base64")]
    Base64,
    #[error("payload is not valid JSON")]
    Json,
    #[error("envelope is missing both {{signature,authorization}} and {{transaction}} shapes")]
    UnrecognizedShape,
}

/// A decoded `X-PAYMENT` payload, normalized to a single internal shape.
#[derive(Debug, Clone)]
pub enum Envelope {
    Evm(EvmEnvelope),
    Solana(SolanaEnvelope),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmEnvelope {
    pub signature: String,
    pub authorization: EvmAuthorization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmAuthorization {
    pub from: String,
    pub to: String,
    /// Atomic token amount, as a decimal string (may exceed `u64`/`i64` range).
    pub value: String,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    /// 32-byte hex nonce, e.g. `0x11aa...`.
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaEnvelope {
    /// Base64-encoded, at-least-partially-signed `VersionedTransaction`.
    pub transaction: String,
}

/// Decodes and normalizes an `X-PAYMENT` header value.
///
/// Fails with [`EnvelopeError::Base64`]/[`EnvelopeError::Json`] on malformed input, and
/// [`EnvelopeError::UnrecognizedShape`] if neither the EVM nor the Solana shape is present,
/// after unwrapping an optional `{payload: {...}}` wrapper.
pub fn decode(header: &str) -> Result<Envelope, EnvelopeError> {
    let bytes = STANDARD.decode(header.trim()).map_err(|_| EnvelopeError::Base64)?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|_| EnvelopeError::Json)?;
    from_json(value)
}

/// Normalizes an already-decoded JSON payload to the same internal shape `decode` produces.
/// Used by the `/verify` and `/settle` HTTP handlers, whose `paymentPayload` field carries the
/// envelope as a JSON object rather than a base64 string.
pub fn from_json(value: Value) -> Result<Envelope, EnvelopeError> {
    let unwrapped = match value {
        Value::Object(ref map) if map.contains_key("payload") => map["payload"].clone(),
        other => other,
    };

    if unwrapped.get("transaction").is_some() {
        let solana: SolanaEnvelope =
            serde_json::from_value(unwrapped).map_err(|_| EnvelopeError::UnrecognizedShape)?;
        return Ok(Envelope::Solana(solana));
    }
    if unwrapped.get("authorization").is_some() && unwrapped.get("signature").is_some() {
        let evm: EvmEnvelope =
            serde_json::from_value(unwrapped).map_err(|_| EnvelopeError::UnrecognizedShape)?;
        return Ok(Envelope::Evm(evm));
    }
    Err(EnvelopeError::UnrecognizedShape)
}

/// Encodes an envelope back into the base64-JSON wire form, using the flat
/// (non-`payload`-wrapped) layout. Used by tests and by the refund-claim payout path,
/// which builds its own envelopes to hand to the settlers.
pub fn encode(envelope: &Envelope) -> String {
    let json = match envelope {
        Envelope::Evm(evm) => serde_json::to_value(evm).expect("EvmEnvelope always serializes"),
        Envelope::Solana(sol) => serde_json::to_value(sol).expect("SolanaEnvelope always serializes"),
    };
    STANDARD.encode(serde_json::to_vec(&json).expect("Value always serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_evm_json(wrapped: bool) -> Value {
        let inner = serde_json::json!({
            "signature": "0xdeadbeef",
            "authorization": {
                "from": "0xPayer",
                "to": "0xPayee",
                "value": "1000000",
                "validAfter": "100",
                "validBefore": "700",
                "nonce": "0x11",
            }
        });
        if wrapped {
            serde_json::json!({ "payload": inner })
        } else {
            inner
        }
    }

    #[test]
    fn decodes_flat_and_nested_layouts_identically() {
        let flat = STANDARD.encode(serde_json::to_vec(&sample_evm_json(false)).unwrap());
        let nested = STANDARD.encode(serde_json::to_vec(&sample_evm_json(true)).unwrap());

        let Envelope::Evm(a) = decode(&flat).unwrap() else {
            panic!("expected evm envelope")
        };
        let Envelope::Evm(b) = decode(&nested).unwrap() else {
            panic!("expected evm envelope")
        };
        assert_eq!(a.authorization.from, b.authorization.from);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn decodes_solana_transaction_shape() {
        let json = serde_json::json!({ "payload": { "transaction": "base64tx" } });
        let header = STANDARD.encode(serde_json::to_vec(&json).unwrap());
        let envelope = decode(&header).unwrap();
        assert!(matches!(envelope, Envelope::Solana(SolanaEnvelope { transaction }) if transaction == "base64tx"));
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(matches!(decode("not-base64!!!"), Err(EnvelopeError::Base64)));
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let header = STANDARD.encode(b"{\"foo\":\"bar\"}");
        assert!(matches!(decode(&header), Err(EnvelopeError::UnrecognizedShape)));
    }

    #[test]
    fn encode_decode_roundtrips() {
        let original = Envelope::Evm(EvmEnvelope {
            signature: "0xsig".into(),
            authorization: EvmAuthorization {
                from: "0xfrom".into(),
                to: "0xto".into(),
                value: "42".into(),
                valid_after: UnixTimestamp::from_secs(1),
                valid_before: UnixTimestamp::from_secs(2),
                nonce: "0xaa".into(),
            },
        });
        let header = encode(&original);
        let decoded = decode(&header).unwrap();
        let Envelope::Evm(decoded) = decoded else {
            panic!("expected evm envelope")
        };
        let Envelope::Evm(original) = original else {
            unreachable!()
        };
        assert_eq!(decoded.signature, original.signature);
        assert_eq!(decoded.authorization.nonce, original.authorization.nonce);
    }
}
