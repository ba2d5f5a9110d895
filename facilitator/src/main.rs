//! x402 Facilitator HTTP entrypoint.
//!
//! Endpoints:
//! - `GET /supported` – list supported payment kinds (version/scheme/network)
//! - `POST /verify` – verify a payment payload against requirements
//! - `POST /settle` – settle an accepted payment payload on-chain
//! - `POST /claims/report-failure` – record a refund claim for a failed downstream delivery
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT`, `DATABASE_URL` control the server binding and persistence

mod chain;
mod config;
mod directory;
mod handlers;
mod run;
mod state;
mod util;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        process::exit(1);
    }
}
