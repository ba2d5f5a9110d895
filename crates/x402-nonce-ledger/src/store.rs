//! Postgres-backed persistence for the nonce ledger's `used_nonces` table.

use sqlx::PgPool;
use sqlx::types::chrono::{DateTime, Utc};

use crate::{AcquireRequest, NonceKey};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub enum InsertOutcome {
    Inserted,
    AlreadyExists { transaction_hash: Option<String> },
}

#[derive(Clone)]
pub struct PgNonceStore {
    pool: PgPool,
}

impl PgNonceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await.map_err(sqlx::Error::from)?;
        Ok(())
    }

    /// Inserts a new row, unless one already exists for the same `(nonce, from_address,
    /// chain_id)`, in which case the existing row's `transaction_hash` is returned. The
    /// uniqueness constraint is the actual atomicity guarantee; this never retries on
    /// conflict.
    pub async fn insert_if_absent(&self, request: &AcquireRequest) -> Result<InsertOutcome, StoreError> {
        let expires_at = DateTime::<Utc>::from_timestamp(request.expires_at as i64, 0)
            .unwrap_or_else(Utc::now);

        let inserted = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO used_nonces (nonce, from_address, chain_id, facilitator_id, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (nonce, from_address, chain_id) DO NOTHING
            RETURNING 1
            "#,
        )
        .bind(&request.key.nonce)
        .bind(&request.key.from)
        .bind(request.key.chain_id.to_string())
        .bind(&request.facilitator_id)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(InsertOutcome::Inserted);
        }

        let transaction_hash: Option<String> = sqlx::query_scalar(
            r#"
            SELECT transaction_hash FROM used_nonces
            WHERE nonce = $1 AND from_address = $2 AND chain_id = $3
            "#,
        )
        .bind(&request.key.nonce)
        .bind(&request.key.from)
        .bind(request.key.chain_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        Ok(InsertOutcome::AlreadyExists { transaction_hash })
    }

    /// Sets `transaction_hash` once (NULL → value). Tolerates and ignores repeat calls with
    /// the same hash, since settlement confirmation can be observed more than once.
    pub async fn mark_settled(&self, key: &NonceKey, tx_hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE used_nonces
            SET transaction_hash = $1, used_at = now()
            WHERE nonce = $2 AND from_address = $3 AND chain_id = $4
              AND transaction_hash IS NULL
            "#,
        )
        .bind(tx_hash)
        .bind(&key.nonce)
        .bind(&key.from)
        .bind(key.chain_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes rows whose `expires_at` is in the past. Idempotent; safe under concurrent
    /// cleanup ticks since `DELETE ... WHERE` is itself atomic per row.
    pub async fn delete_expired(&self) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM used_nonces WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
