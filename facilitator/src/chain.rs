//! Builds the chain registry and per-chain settlers from configuration.

use std::collections::HashMap;
use std::str::FromStr;

use alloy_signer_local::PrivateKeySigner;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_keypair::Keypair;

use x402_chain_eip155::Eip155Settler;
use x402_chain_solana::SolanaSettler;
use x402_facilitator_core::Settler;
use x402_types::chain::{ChainEntry, ChainId, ChainRegistry};

use crate::config::{ChainSecret, Eip155Secret, SolanaSecret};

#[derive(Debug, thiserror::Error)]
pub enum ChainBuildError {
    #[error("invalid private key for {0}: {1}")]
    BadPrivateKey(ChainId, String),
    #[error("invalid fee-payer keypair for {0}: {1}")]
    BadKeypair(ChainId, String),
    #[error("could not connect to Solana pubsub endpoint for {0}: {1}")]
    Pubsub(ChainId, String),
}

pub struct Chains {
    pub registry: ChainRegistry,
    pub settlers: HashMap<ChainId, Settler>,
}

/// Constructs the registry entries and settlers for every chain in the config file. One RPC
/// client (and, for Solana, one optional pubsub client) is created per chain at startup and
/// held for the facilitator's lifetime.
pub async fn build(chains: &[(ChainId, ChainSecret)]) -> Result<Chains, ChainBuildError> {
    let mut entries = Vec::with_capacity(chains.len());
    let mut settlers = HashMap::with_capacity(chains.len());

    for (chain_id, secret) in chains {
        match secret {
            ChainSecret::Eip155(eip155) => {
                let settler = build_eip155(chain_id, eip155)?;
                entries.push(ChainEntry { chain_id: chain_id.clone(), rpc_endpoint: eip155.rpc_url.clone(), fee_payer_address: None });
                settlers.insert(chain_id.clone(), Settler::Eip155(settler));
            }
            ChainSecret::Solana(solana) => {
                let settler = build_solana(chain_id, solana).await?;
                let fee_payer = settler.fee_payer_pubkey().to_string();
                entries.push(ChainEntry { chain_id: chain_id.clone(), rpc_endpoint: solana.rpc_url.clone(), fee_payer_address: Some(fee_payer) });
                settlers.insert(chain_id.clone(), Settler::Solana(settler));
            }
        }
    }

    Ok(Chains { registry: ChainRegistry::new(entries), settlers })
}

fn build_eip155(chain_id: &ChainId, secret: &Eip155Secret) -> Result<Eip155Settler, ChainBuildError> {
    let key = secret.private_key.trim().trim_start_matches("0x");
    let signer = PrivateKeySigner::from_str(key).map_err(|e| ChainBuildError::BadPrivateKey(chain_id.clone(), e.to_string()))?;
    Ok(Eip155Settler::new(chain_id.clone(), secret.rpc_url.clone(), signer, secret.facilitator_id.clone()))
}

async fn build_solana(chain_id: &ChainId, secret: &SolanaSecret) -> Result<SolanaSettler, ChainBuildError> {
    let bytes = bs58::decode(secret.fee_payer_keypair.trim())
        .into_vec()
        .map_err(|e| ChainBuildError::BadKeypair(chain_id.clone(), e.to_string()))?;
    let fee_payer = Keypair::from_bytes(&bytes).map_err(|e| ChainBuildError::BadKeypair(chain_id.clone(), e.to_string()))?;

    let rpc_client = RpcClient::new(secret.rpc_url.to_string());
    let pubsub_client = match &secret.ws_url {
        Some(ws_url) => Some(PubsubClient::new(ws_url.as_str()).await.map_err(|e| ChainBuildError::Pubsub(chain_id.clone(), e.to_string()))?),
        None => None,
    };

    Ok(SolanaSettler::new(chain_id.clone(), rpc_client, pubsub_client, fee_payer, secret.facilitator_id.clone(), secret.settler.clone()))
}
