//! Two-tier replay-uniqueness guard over `(nonce, from, chain_id)` (C3).
//!
//! The in-memory cache (a sharded [`DashMap`]) catches concurrent requests against the same
//! key within a single process without a database round trip; the Postgres-backed store is
//! the actual source of truth, enforced by a unique constraint on `(nonce, from_address,
//! chain_id)`. Both layers are consulted on every `try_acquire`: the cache first (fast local
//! rejection), the store second (authoritative). Any store error other than the unique
//! violation is treated as a rejection — this tracker is fail-closed by design.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};
use x402_types::ChainId;

pub mod store;

pub use store::{PgNonceStore, StoreError};

/// In-memory cache TTL, independent of the authorization's own `validBefore` expiry.
pub const CACHE_TTL: Duration = Duration::from_secs(10 * 60);
/// Interval the background sweep (C10) should use.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonceKey {
    pub nonce: String,
    pub from: String,
    pub chain_id: ChainId,
}

impl NonceKey {
    /// Normalizes `nonce` and `from` to lower-case so a case-variant of a used nonce cannot
    /// sidestep the uniqueness check.
    pub fn new(nonce: &str, from: &str, chain_id: ChainId) -> Self {
        Self {
            nonce: nonce.to_lowercase(),
            from: from.to_lowercase(),
            chain_id,
        }
    }

    fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.chain_id, self.from, self.nonce)
    }
}

#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub key: NonceKey,
    pub facilitator_id: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    Rejected { reason: String },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired)
    }
}

/// The C3 contract, independent of any specific storage backend.
#[async_trait::async_trait]
pub trait NonceLedger: Send + Sync {
    async fn try_acquire(&self, request: AcquireRequest) -> AcquireOutcome;
    async fn release(&self, key: &NonceKey);
    async fn mark_settled(&self, key: &NonceKey, tx_hash: &str);
    async fn cleanup_expired(&self) -> usize;
}

/// Production [`NonceLedger`]: Postgres-backed persistence behind a process-wide in-memory
/// cache. Cheap to clone; internally `Arc`-wrapped.
#[derive(Clone)]
pub struct TieredNonceLedger {
    inner: Arc<Inner>,
}

struct Inner {
    store: PgNonceStore,
    cache: DashMap<String, Instant>,
}

impl TieredNonceLedger {
    pub fn new(store: PgNonceStore) -> Self {
        Self {
            inner: Arc::new(Inner { store, cache: DashMap::new() }),
        }
    }
}

#[async_trait::async_trait]
impl NonceLedger for TieredNonceLedger {
    async fn try_acquire(&self, request: AcquireRequest) -> AcquireOutcome {
        let cache_key = request.key.cache_key();

        // Atomic w.r.t. other callers in this process: DashMap::insert on a given shard is a
        // single locked operation, so only the first concurrent caller sees `None` back.
        if self.inner.cache.insert(cache_key.clone(), Instant::now()).is_some() {
            return AcquireOutcome::Rejected {
                reason: "nonce already being processed (concurrent request)".to_string(),
            };
        }

        match self.inner.store.insert_if_absent(&request).await {
            Ok(store::InsertOutcome::Inserted) => AcquireOutcome::Acquired,
            Ok(store::InsertOutcome::AlreadyExists { transaction_hash }) => {
                self.inner.cache.remove(&cache_key);
                let reason = match transaction_hash {
                    Some(hash) => format!("nonce already settled as {hash}"),
                    None => "nonce already acquired".to_string(),
                };
                AcquireOutcome::Rejected { reason }
            }
            Err(err) => {
                self.inner.cache.remove(&cache_key);
                warn!(error = %err, "nonce ledger store error during try_acquire, rejecting for safety");
                AcquireOutcome::Rejected {
                    reason: "failed to validate uniqueness — rejecting for safety".to_string(),
                }
            }
        }
    }

    async fn release(&self, key: &NonceKey) {
        self.inner.cache.remove(&key.cache_key());
    }

    async fn mark_settled(&self, key: &NonceKey, tx_hash: &str) {
        if let Err(err) = self.inner.store.mark_settled(key, tx_hash).await {
            warn!(error = %err, nonce = %key.nonce, "failed to backfill transaction hash onto nonce row");
        }
    }

    async fn cleanup_expired(&self) -> usize {
        let deleted = match self.inner.store.delete_expired().await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "nonce cleanup sweep failed, will retry next tick");
                0
            }
        };
        let before = self.inner.cache.len();
        self.inner.cache.retain(|_, inserted_at| inserted_at.elapsed() < CACHE_TTL);
        let cache_swept = before - self.inner.cache.len();
        if deleted > 0 || cache_swept > 0 {
            info!(deleted_rows = deleted, cache_entries_swept = cache_swept, "nonce ledger cleanup");
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_normalizes_case() {
        let chain_id = ChainId::new("eip155", "8453");
        let a = NonceKey::new("0xAA", "0xFrom", chain_id.clone());
        let b = NonceKey::new("0xaa", "0xfrom", chain_id);
        assert_eq!(a.cache_key(), b.cache_key());
    }
}
