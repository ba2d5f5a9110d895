//! Error kinds surfaced to callers of `verify`/`settle` (§7 of the failure-semantics design).
//!
//! These are the facilitator's own vocabulary, not a transliteration of whatever a chain RPC
//! or the database driver happened to say. Each kind maps to exactly one HTTP status so the
//! middleware layer never has to re-derive it.

use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FacilitatorError {
    #[error("malformed payment envelope: {0}")]
    BadEnvelope(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Payment is not yet valid")]
    NotYetValid,

    #[error("Payment has expired")]
    Expired,

    #[error("payment value is less than required")]
    Insufficient,

    #[error("duplicate submission: {0}")]
    DuplicateSubmission(String),

    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("facilitator lacks gas to submit this transaction")]
    InsufficientGas,

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("settlement error: {0}")]
    SettlementError(String),
}

impl FacilitatorError {
    /// The HTTP status this error kind is reported under.
    pub fn http_status(&self) -> u16 {
        match self {
            FacilitatorError::InsufficientGas => 500,
            FacilitatorError::SettlementError(_) => 502,
            _ => 402,
        }
    }

    /// The human-readable reason carried in `invalidReason` / `errorReason`.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
