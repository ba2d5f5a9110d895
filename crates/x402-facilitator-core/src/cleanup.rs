//! Background expired-nonce purge (C10): a single long-lived task ticking on
//! [`SWEEP_INTERVAL`], independent of any particular authorization's own expiry.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use x402_nonce_ledger::{NonceLedger, SWEEP_INTERVAL};

/// Spawns the sweep loop. Errors inside a single tick are logged and swallowed by the ledger
/// itself (`cleanup_expired` never returns an `Err`); this task must survive them indefinitely.
pub fn spawn(ledger: Arc<dyn NonceLedger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let deleted = ledger.cleanup_expired().await;
            if deleted > 0 {
                info!(deleted, "nonce cleanup sweep");
            }
        }
    })
}
