//! x402 Facilitator HTTP entrypoint.
//!
//! Launches an Axum server exposing `/supported`, `/verify`, `/settle`, and
//! `/claims/report-failure`, backed by a Postgres-persisted nonce ledger and claims store, and
//! runs the background nonce-cleanup sweep (C10) alongside it.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT`, `DATABASE_URL`, `REFUNDS_ENABLED` control the defaults `config.json`
//!   doesn't override
//! - `OTEL_EXPORTER_OTLP_*` enables tracing/metrics export when built with `--features telemetry`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_facilitator_core::{ClaimIntake, ClaimStore, Engine, RefundConfig, cleanup};
use x402_nonce_ledger::{PgNonceStore, TieredNonceLedger};

use crate::chain;
use crate::config::Config;
use crate::directory::PgServerDirectory;
use crate::handlers;
use crate::state::AppState;
use crate::util::{SigDown, Telemetry};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider()).expect("failed to initialize rustls crypto provider");

    dotenv().ok();
    let _telemetry = Telemetry::new();

    let config = Config::load()?;

    let pool = PgPoolOptions::new().connect(config.database_url()).await?;
    let nonce_store = PgNonceStore::new(pool.clone());
    nonce_store.migrate().await?;
    let ledger = Arc::new(TieredNonceLedger::new(nonce_store));

    let chains = chain::build(config.chains()).await?;
    let engine = Arc::new(Engine::new(chains.registry, chains.settlers, ledger.clone()));

    let directory = PgServerDirectory::new(pool.clone());
    let claim_store = ClaimStore::new(pool);
    let claims = Arc::new(ClaimIntake::new(directory, claim_store, RefundConfig { enabled: config.refund_enabled() }));

    cleanup::spawn(ledger);

    let state = AppState { engine, claims };
    let http_endpoints = Router::new().merge(handlers::routes().with_state(state)).layer(TraceLayer::new_for_http()).layer(
        cors::CorsLayer::new().allow_origin(cors::Any).allow_methods([Method::GET, Method::POST]).allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("starting server at http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.inspect_err(|e| tracing::error!("failed to bind to {addr}: {e}"))?;

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    axum::serve(listener, http_endpoints).with_graceful_shutdown(async move { cancellation_token.cancelled().await }).await?;

    Ok(())
}
