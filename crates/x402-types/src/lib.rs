//! Shared wire types for the x402 payment protocol.
//!
//! This crate is blockchain-agnostic: chain identifiers, the payment envelope codec, the
//! HTTP wire types, and the facilitator error vocabulary. Chain-specific settlement lives in
//! `x402-chain-eip155` and `x402-chain-solana`.

pub mod chain;
pub mod envelope;
pub mod error;
pub mod money;
pub mod proto;
pub mod timestamp;

pub use chain::{ChainEntry, ChainId, ChainRegistry};
pub use envelope::Envelope;
pub use error::FacilitatorError;
