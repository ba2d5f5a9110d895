//! CAIP-2 chain identifiers and the canonical chain registry (C1).
//!
//! A CAIP-2 chain id is `namespace:reference`, e.g. `eip155:8453` for Base or
//! `solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp` for Solana mainnet. Lookups also accept
//! the human-readable network name used by older x402 clients (`"base"`, `"solana"`).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use url::Url;

/// A CAIP-2 compliant blockchain identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    pub namespace: String,
    pub reference: String,
}

impl ChainId {
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn is_evm(&self) -> bool {
        self.namespace == "eip155"
    }

    /// Looks up a chain id by its well-known network name (`"base"`, `"solana-devnet"`, ...).
    pub fn from_network_name(name: &str) -> Option<Self> {
        NAME_TO_CHAIN_ID.get(name).cloned()
    }

    /// Reverse of [`ChainId::from_network_name`].
    pub fn as_network_name(&self) -> Option<&'static str> {
        CHAIN_ID_TO_NAME.get(self).copied()
    }

    /// Resolves either a CAIP-2 string (`eip155:8453`) or a network name (`base`).
    pub fn resolve(network_or_caip2: &str) -> Option<Self> {
        if let Some(chain_id) = Self::from_network_name(network_or_caip2) {
            return Some(chain_id);
        }
        ChainId::from_str(network_or_caip2).ok()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid chain id format: {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s.split_once(':').ok_or_else(|| ChainIdFormatError(s.into()))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        Ok(ChainId::new(namespace, reference))
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}

/// A well-known network: CAIP-2 chain id plus its legacy (v1) network name.
#[derive(Debug, Clone, Copy)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub namespace: &'static str,
    pub reference: &'static str,
    /// Number of decimals the native quote asset (USDC) uses on this chain.
    pub usdc_decimals: u8,
    /// USDC contract/mint address on this chain, lower-cased.
    pub usdc_address: &'static str,
}

impl NetworkInfo {
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "base",
        namespace: "eip155",
        reference: "8453",
        usdc_decimals: 6,
        usdc_address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
    },
    NetworkInfo {
        name: "base-sepolia",
        namespace: "eip155",
        reference: "84532",
        usdc_decimals: 6,
        usdc_address: "0x036cbd53842c5426634e7929541ec2318f3dcf7e",
    },
    NetworkInfo {
        name: "polygon",
        namespace: "eip155",
        reference: "137",
        usdc_decimals: 6,
        usdc_address: "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359",
    },
    NetworkInfo {
        name: "polygon-amoy",
        namespace: "eip155",
        reference: "80002",
        usdc_decimals: 6,
        usdc_address: "0x41e94eb019c0762f9bfcf9fb1e58725bfb0e7582",
    },
    NetworkInfo {
        name: "avalanche",
        namespace: "eip155",
        reference: "43114",
        usdc_decimals: 6,
        usdc_address: "0xb97ef9ef8734c71904d8002f8b6bc66dd9c48a6e",
    },
    NetworkInfo {
        name: "avalanche-fuji",
        namespace: "eip155",
        reference: "43113",
        usdc_decimals: 6,
        usdc_address: "0x5425890298aed601595a70ab815c96711a31bc65",
    },
    NetworkInfo {
        name: "solana",
        namespace: "solana",
        reference: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
        usdc_decimals: 6,
        usdc_address: "epjfwdd5aufqssqem2qn1xzybapc8g4weggkzwytdt1v",
    },
    NetworkInfo {
        name: "solana-devnet",
        namespace: "solana",
        reference: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
        usdc_decimals: 6,
        usdc_address: "4zmc4qyzbxue7vimpj2nqobkugbukcagag61yuww6beg",
    },
];

static NAME_TO_CHAIN_ID: LazyLock<HashMap<&'static str, ChainId>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.name, n.chain_id())).collect());

static CHAIN_ID_TO_NAME: LazyLock<HashMap<ChainId, &'static str>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.chain_id(), n.name)).collect());

static CHAIN_ID_TO_INFO: LazyLock<HashMap<ChainId, &'static NetworkInfo>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.chain_id(), n)).collect());

/// Per-chain configuration the registry is built from: the RPC endpoint and any
/// facilitator-specific overrides of the token/decimals table.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub chain_id: ChainId,
    pub rpc_endpoint: Url,
    pub fee_payer_address: Option<String>,
}

/// Canonical table of chain identifiers, RPC endpoints, and token/decimals metadata (C1).
///
/// Built once at startup from [`KNOWN_NETWORKS`] filtered down to the chains this facilitator
/// was configured with, plus environment-provided RPC URLs. Immutable after construction.
#[derive(Debug)]
pub struct ChainRegistry {
    entries: HashMap<ChainId, ChainEntry>,
}

impl ChainRegistry {
    pub fn new(entries: Vec<ChainEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.chain_id.clone(), e)).collect(),
        }
    }

    /// Resolves either a network name or a CAIP-2 string to a configured chain.
    pub fn resolve(&self, network_or_caip2: &str) -> Option<ChainId> {
        let chain_id = ChainId::resolve(network_or_caip2)?;
        self.entries.contains_key(&chain_id).then_some(chain_id)
    }

    pub fn caip2(&self, chain_id: &ChainId) -> Option<String> {
        self.entries.contains_key(chain_id).then(|| chain_id.to_string())
    }

    pub fn is_evm(&self, chain_id: &ChainId) -> bool {
        chain_id.is_evm()
    }

    pub fn is_configured(&self, chain_id: &ChainId) -> bool {
        self.entries.contains_key(chain_id)
    }

    pub fn rpc_endpoint(&self, chain_id: &ChainId) -> Option<&Url> {
        self.entries.get(chain_id).map(|e| &e.rpc_endpoint)
    }

    pub fn fee_payer_address(&self, chain_id: &ChainId) -> Option<&str> {
        self.entries.get(chain_id).and_then(|e| e.fee_payer_address.as_deref())
    }

    /// Decimals for the quote asset on `chain_id`. Addresses/mints are compared
    /// case-insensitively, as required for EVM hex addresses.
    pub fn token_decimals(&self, chain_id: &ChainId, asset: &str) -> Option<u8> {
        let info = CHAIN_ID_TO_INFO.get(chain_id)?;
        (info.usdc_address.eq_ignore_ascii_case(asset)).then_some(info.usdc_decimals)
    }

    pub fn configured_chain_ids(&self) -> impl Iterator<Item = &ChainId> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_string() {
        let chain_id = ChainId::new("eip155", "8453");
        let s: String = chain_id.clone().into();
        assert_eq!(s, "eip155:8453");
        assert_eq!(ChainId::from_str(&s).unwrap(), chain_id);
    }

    #[test]
    fn resolves_network_name_and_caip2() {
        assert_eq!(ChainId::resolve("base"), Some(ChainId::new("eip155", "8453")));
        assert_eq!(ChainId::resolve("eip155:8453"), Some(ChainId::new("eip155", "8453")));
        assert_eq!(ChainId::resolve("nonsense"), None);
    }

    #[test]
    fn rejects_malformed_string() {
        assert!(ChainId::from_str("nocolon").is_err());
        assert!(ChainId::from_str(":8453").is_err());
    }

    #[test]
    fn registry_filters_to_configured_chains() {
        let registry = ChainRegistry::new(vec![ChainEntry {
            chain_id: ChainId::new("eip155", "8453"),
            rpc_endpoint: Url::parse("https://base.example").unwrap(),
            fee_payer_address: None,
        }]);
        assert_eq!(registry.resolve("base"), Some(ChainId::new("eip155", "8453")));
        assert_eq!(registry.resolve("polygon"), None);
    }

    #[test]
    fn token_decimals_is_case_insensitive() {
        let registry = ChainRegistry::new(vec![ChainEntry {
            chain_id: ChainId::new("eip155", "8453"),
            rpc_endpoint: Url::parse("https://base.example").unwrap(),
            fee_payer_address: None,
        }]);
        let chain_id = ChainId::new("eip155", "8453");
        assert_eq!(
            registry.token_decimals(&chain_id, "0x833589FCD6eDb6E08f4c7C32D4f71b54BdA02913"),
            Some(6)
        );
    }
}
