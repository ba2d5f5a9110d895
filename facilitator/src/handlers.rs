//! HTTP endpoints exposed by the facilitator: `/supported`, `/verify`, `/settle`, and
//! `/claims/report-failure`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use x402_facilitator_core::{ClaimError, ReportFailureRequest};
use x402_types::proto::{self, SettleResponse, VerifyResponse};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/supported", get(get_supported))
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/claims/report-failure", post(post_report_failure))
}

#[instrument(skip_all)]
async fn get_root() -> impl IntoResponse {
    (StatusCode::OK, format!("Hello from {}!", env!("CARGO_PKG_NAME")))
}

#[instrument(skip_all)]
async fn get_supported(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.supported())
}

#[instrument(skip_all)]
async fn post_verify(State(state): State<AppState>, Json(body): Json<proto::VerifyRequest>) -> impl IntoResponse {
    let response = state.engine.verify(&body.payment_payload, &body.payment_requirements).await;
    let status = if response.is_valid() { StatusCode::OK } else { StatusCode::BAD_REQUEST };
    if let VerifyResponse::Invalid { reason, .. } = &response {
        tracing::warn!(reason, network = %body.payment_requirements.network, "verification failed");
    }
    (status, Json(response))
}

#[instrument(skip_all)]
async fn post_settle(State(state): State<AppState>, Json(body): Json<proto::SettleRequest>) -> impl IntoResponse {
    let response = state.engine.settle(&body.payment_payload, &body.payment_requirements).await;
    let status = if response.is_success() { StatusCode::OK } else { StatusCode::BAD_REQUEST };
    if let SettleResponse::Error { reason, .. } = &response {
        tracing::warn!(reason, network = %body.payment_requirements.network, "settlement failed");
    }
    (status, Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportFailureBody {
    original_tx_hash: String,
    user_wallet: String,
    amount: String,
    asset: String,
    network: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportFailureAccepted {
    claim_id: Uuid,
}

#[instrument(skip_all)]
async fn post_report_failure(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ReportFailureBody>) -> Response {
    let Some(api_key) = headers.get("X-Server-Api-Key").and_then(|h| h.to_str().ok()) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "missing X-Server-Api-Key header" }))).into_response();
    };
    let request = ReportFailureRequest {
        original_tx_hash: body.original_tx_hash,
        user_wallet: body.user_wallet,
        amount: body.amount,
        asset: body.asset,
        network: body.network,
        reason: body.reason,
    };
    match state.claims.report_failure(api_key, request).await {
        Ok(claim_id) => (StatusCode::CREATED, Json(ReportFailureAccepted { claim_id })).into_response(),
        Err(err) => claim_error_response(err).into_response(),
    }
}

fn claim_error_response(err: ClaimError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        ClaimError::Unauthorized => StatusCode::UNAUTHORIZED,
        ClaimError::RefundsDisabled => StatusCode::SERVICE_UNAVAILABLE,
        ClaimError::Duplicate => StatusCode::CONFLICT,
        ClaimError::BadAmount(_) => StatusCode::BAD_REQUEST,
        ClaimError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}
