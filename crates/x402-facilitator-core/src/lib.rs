//! The facilitator's blockchain-agnostic core: the protocol engine (C6), refund-claim intake
//! (C8), and the background nonce-cleanup task (C10). Sits on top of `x402-chain-eip155`,
//! `x402-chain-solana`, and `x402-nonce-ledger`.

pub mod claims;
pub mod cleanup;
pub mod engine;

pub use claims::{ClaimError, ClaimIntake, ClaimStatus, ClaimStore, RefundConfig, ReportFailureRequest, ServerDirectory, ServerRecord};
pub use engine::{Engine, Settler};
