//! Transaction-counter nonce selection using the `pending` block tag.
//!
//! Fetches `eth_getTransactionCount(address, "pending")` on the first use of an address and
//! caches it locally, incrementing on every subsequent call. `pending` (rather than `latest`)
//! picks up transactions already sitting in the mempool, which matters across process
//! restarts. [`reset`] forces a fresh query, used when a submission's outcome is uncertain.

use std::sync::Arc;

use alloy_network::Network;
use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use dashmap::DashMap;
use tokio::sync::Mutex;

const UNSET: u64 = u64::MAX;

#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[async_trait::async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: Network,
    {
        let slot = {
            let entry = self.nonces.entry(address).or_insert_with(|| Arc::new(Mutex::new(UNSET)));
            Arc::clone(entry.value())
        };
        let mut nonce = slot.lock().await;
        let next = if *nonce == UNSET {
            provider.get_transaction_count(address).pending().await?
        } else {
            *nonce + 1
        };
        *nonce = next;
        Ok(next)
    }
}

impl PendingNonceManager {
    /// Forces the next `get_next_nonce` call for `address` to requery the chain instead of
    /// trusting the local cache. Call after any submission whose outcome is unknown.
    pub async fn reset(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address) {
            *slot.lock().await = UNSET;
        }
    }
}
