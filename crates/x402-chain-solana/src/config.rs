//! Per-chain policy knobs for the Solana settler: compute-budget ceilings and the
//! additional-instruction allow/block lists third-party wallets (Phantom's Lighthouse guard)
//! tend to inject ahead of the transfer.

use serde::{Deserialize, Serialize};
use solana_pubkey::{Pubkey, pubkey};

/// Phantom wallet's security-guard program, injected on mainnet transactions it originates.
/// Allowed by default so payments from Phantom users aren't rejected outright.
pub static PHANTOM_LIGHTHOUSE_PROGRAM: Pubkey = pubkey!("L2TExMFKdjpN9kozasaurPirfHy9P8sbXoAN1qA3S95");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaSettlerConfig {
    #[serde(default = "default_true")]
    pub allow_additional_instructions: bool,
    #[serde(default = "default_max_instruction_count")]
    pub max_instruction_count: usize,
    #[serde(default = "default_allowed_program_ids")]
    pub allowed_program_ids: Vec<String>,
    #[serde(default)]
    pub blocked_program_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub require_fee_payer_not_in_instructions: bool,
    #[serde(default = "default_max_compute_unit_limit")]
    pub max_compute_unit_limit: u32,
    #[serde(default = "default_max_compute_unit_price")]
    pub max_compute_unit_price: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_instruction_count() -> usize {
    10
}

fn default_allowed_program_ids() -> Vec<String> {
    vec![PHANTOM_LIGHTHOUSE_PROGRAM.to_string()]
}

fn default_max_compute_unit_limit() -> u32 {
    1_400_000
}

fn default_max_compute_unit_price() -> u64 {
    1_000_000
}

impl Default for SolanaSettlerConfig {
    fn default() -> Self {
        Self {
            allow_additional_instructions: default_true(),
            max_instruction_count: default_max_instruction_count(),
            allowed_program_ids: default_allowed_program_ids(),
            blocked_program_ids: Vec::new(),
            require_fee_payer_not_in_instructions: default_true(),
            max_compute_unit_limit: default_max_compute_unit_limit(),
            max_compute_unit_price: default_max_compute_unit_price(),
        }
    }
}

impl SolanaSettlerConfig {
    pub fn is_blocked(&self, program_id: &Pubkey) -> bool {
        self.blocked_program_ids.iter().any(|p| p == &program_id.to_string())
    }

    /// Programs not on the allow list are rejected; an empty list allows nothing.
    pub fn is_allowed(&self, program_id: &Pubkey) -> bool {
        self.allowed_program_ids.iter().any(|p| p == &program_id.to_string())
    }
}
