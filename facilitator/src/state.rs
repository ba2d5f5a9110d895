//! Shared axum application state.

use std::sync::Arc;

use x402_facilitator_core::{ClaimIntake, Engine};

use crate::directory::PgServerDirectory;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub claims: Arc<ClaimIntake<PgServerDirectory>>,
}
