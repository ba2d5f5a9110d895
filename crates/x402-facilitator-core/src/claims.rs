//! Refund-claim intake (C8): authenticates a registered server's API key, de-dups by the
//! original on-chain transaction hash, and records a claim for an operator to pay out later.
//!
//! Key resolution is abstracted behind [`ServerDirectory`], the same way settlement abstracts
//! RPC access and key material behind a chain gateway and a key resolver — the dashboard's
//! server/API-key records live outside this core.

use sqlx::PgPool;
use uuid::Uuid;

use x402_types::ChainId;
use x402_types::money::{MoneyAmount, MoneyAmountError};

#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub server_id: String,
    pub resource_owner_id: String,
    pub active: bool,
}

#[async_trait::async_trait]
pub trait ServerDirectory: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Option<ServerRecord>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefundConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ReportFailureRequest {
    pub original_tx_hash: String,
    pub user_wallet: String,
    pub amount: String,
    pub asset: String,
    pub network: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
}

impl ClaimStatus {
    fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Paid => "paid",
            ClaimStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("unknown or inactive API key")]
    Unauthorized,
    #[error("refund protection is not enabled for this facilitator")]
    RefundsDisabled,
    #[error("a claim already exists for this transaction")]
    Duplicate,
    #[error("malformed amount: {0}")]
    BadAmount(#[from] MoneyAmountError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// `eip155:8453` -> `base`, `solana:5eykt...` -> `solana`. Falls back to the input unchanged
/// if it isn't a CAIP-2 id the registry recognizes (e.g. it's already a bare network name).
pub fn normalize_network(network: &str) -> String {
    match ChainId::resolve(network) {
        Some(chain_id) => chain_id.as_network_name().map(str::to_string).unwrap_or_else(|| network.to_string()),
        None => network.to_string(),
    }
}

#[derive(Clone)]
pub struct ClaimStore {
    pool: PgPool,
}

impl ClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a pending claim unless `original_tx_hash` is already claimed.
    async fn insert(&self, resource_owner_id: &str, server_id: &str, request: &ReportFailureRequest) -> Result<Uuid, ClaimError> {
        let id = Uuid::new_v4();
        let network = normalize_network(&request.network);
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO claims (id, resource_owner_id, server_id, original_tx_hash, user_wallet, amount, asset, network, reason, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending')
            ON CONFLICT (original_tx_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(resource_owner_id)
        .bind(server_id)
        .bind(&request.original_tx_hash)
        .bind(&request.user_wallet)
        .bind(&request.amount)
        .bind(&request.asset)
        .bind(&network)
        .bind(&request.reason)
        .fetch_optional(&self.pool)
        .await?;
        inserted.ok_or(ClaimError::Duplicate)
    }

    /// `approved -> rejected` is permitted alongside the happy path; nothing transitions out
    /// of `paid`.
    pub async fn transition(&self, claim_id: Uuid, to: ClaimStatus) -> Result<(), ClaimError> {
        sqlx::query("UPDATE claims SET status = $1, updated_at = now() WHERE id = $2 AND status != 'paid'")
            .bind(to.as_str())
            .bind(claim_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Ties the server directory, the claim store, and the facilitator's refund toggle together
/// into the single `report_failure` entry point C7 and the claims HTTP route call into.
pub struct ClaimIntake<D: ServerDirectory> {
    directory: D,
    store: ClaimStore,
    config: RefundConfig,
}

impl<D: ServerDirectory> ClaimIntake<D> {
    pub fn new(directory: D, store: ClaimStore, config: RefundConfig) -> Self {
        Self { directory, store, config }
    }

    pub async fn report_failure(&self, api_key: &str, request: ReportFailureRequest) -> Result<Uuid, ClaimError> {
        if !self.config.enabled {
            return Err(ClaimError::RefundsDisabled);
        }
        let server = self.directory.resolve(api_key).await.filter(|s| s.active).ok_or(ClaimError::Unauthorized)?;
        let _amount: MoneyAmount = request.amount.parse()?;
        self.store.insert(&server.resource_owner_id, &server.server_id, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_caip2_to_legacy_network_name() {
        assert_eq!(normalize_network("eip155:8453"), "base");
        assert_eq!(normalize_network("solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp"), "solana");
    }

    #[test]
    fn passes_through_unrecognized_network() {
        assert_eq!(normalize_network("mystery-chain"), "mystery-chain");
    }
}
