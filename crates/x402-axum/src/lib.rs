//! Tower/axum middleware enforcing x402 payments on the facilitator's own protected routes (C7).
//!
//! Distinct from a resource server's outbound client to a remote facilitator: this middleware
//! calls the local [`x402_facilitator_core::Engine`] directly, since the facilitator is what it
//! protects.

pub mod middleware;

pub use middleware::{PaymentContext, RefundHook, RequirementsProvider, X402Middleware, X402MiddlewareService};
