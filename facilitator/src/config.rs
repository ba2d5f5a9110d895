//! Configuration for the x402 facilitator server.
//!
//! A JSON config file (`--config`/`CONFIG`, default `config.json`) supplies most settings;
//! fields absent from the file fall back to environment variables, then hardcoded defaults.

use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use x402_chain_solana::config::SolanaSettlerConfig;
use x402_types::ChainId;

/// CLI arguments for the x402 facilitator server.
#[derive(Parser, Debug)]
#[command(name = "x402-facilitator")]
#[command(about = "x402 Facilitator HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default = "config_defaults::default_database_url")]
    database_url: String,
    #[serde(default = "config_defaults::default_refund_enabled")]
    refund_enabled: bool,
    #[serde(default)]
    chains: ChainsConfig,
}

/// Per-chain RPC endpoint and signing key, keyed by CAIP-2 chain id on the wire.
#[derive(Debug, Clone)]
pub enum ChainSecret {
    Eip155(Eip155Secret),
    Solana(SolanaSecret),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip155Secret {
    pub rpc_url: Url,
    /// Hex-encoded secp256k1 private key (with or without a `0x` prefix).
    pub private_key: String,
    pub facilitator_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaSecret {
    pub rpc_url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<Url>,
    /// Base58-encoded 64-byte keypair, the format `solana-keygen` prints.
    pub fee_payer_keypair: String,
    pub facilitator_id: String,
    #[serde(default, flatten)]
    pub settler: SolanaSettlerConfig,
}

/// Wrapper around `Vec<(ChainId, ChainSecret)>` serialized as a map keyed by CAIP-2 id.
#[derive(Debug, Clone, Default)]
pub struct ChainsConfig(pub Vec<(ChainId, ChainSecret)>);

impl Deref for ChainsConfig {
    type Target = Vec<(ChainId, ChainSecret)>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ChainsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{MapAccess, Visitor};
        use std::fmt;

        struct ChainsVisitor;

        impl<'de> Visitor<'de> for ChainsVisitor {
            type Value = ChainsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of CAIP-2 chain identifiers to chain secrets")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut chains = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(chain_id) = access.next_key::<ChainId>()? {
                    let secret = match chain_id.namespace() {
                        "eip155" => ChainSecret::Eip155(access.next_value::<Eip155Secret>()?),
                        "solana" => ChainSecret::Solana(access.next_value::<SolanaSecret>()?),
                        other => {
                            return Err(serde::de::Error::custom(format!("unsupported chain namespace: {other}")));
                        }
                    };
                    chains.push((chain_id, secret));
                }
                Ok(ChainsConfig(chains))
            }
        }

        deserializer.deserialize_map(ChainsVisitor)
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/x402_facilitator";

    pub fn default_port() -> u16 {
        env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_PORT)
    }

    pub fn default_host() -> IpAddr {
        env::var("HOST").ok().and_then(|s| s.parse().ok()).unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    pub fn default_database_url() -> String {
        env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
    }

    pub fn default_refund_enabled() -> bool {
        env::var("REFUNDS_ENABLED").ok().and_then(|s| s.parse().ok()).unwrap_or(false)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn refund_enabled(&self) -> bool {
        self.refund_enabled
    }

    pub fn chains(&self) -> &[(ChainId, ChainSecret)] {
        &self.chains
    }

    /// Loads configuration from the `--config`/`CONFIG` JSON file. Missing fields fall back to
    /// environment variables at deserialization time (see `config_defaults`).
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config).canonicalize().map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::FileRead(config_path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
