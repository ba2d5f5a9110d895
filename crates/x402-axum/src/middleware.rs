//! Tower `Layer`/`Service` enforcing x402 payment on whatever it wraps (C7).
//!
//! No `X-PAYMENT` header -> `402` with the route's `accepts`. Header present -> decode, verify,
//! settle; on any failure, `402` with the reason; on success, attach a [`PaymentContext`] to
//! the request and call the wrapped service exactly once. If that service answers with a 5xx
//! and a refund hook is configured, a refund-claim is enqueued best-effort and does not affect
//! the response already on its way back to the caller.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use base64::Engine as _;
use http::StatusCode;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use x402_facilitator_core::Engine;
use x402_types::envelope::Envelope;
use x402_types::proto::{PaymentRequired, PaymentRequirements};

/// Per-route (and, if the implementation wants, per-request) set of accepted payment terms.
pub trait RequirementsProvider: Send + Sync + 'static {
    fn requirements(&self, request: &Request) -> Vec<PaymentRequirements>;
}

impl RequirementsProvider for Vec<PaymentRequirements> {
    fn requirements(&self, _request: &Request) -> Vec<PaymentRequirements> {
        self.clone()
    }
}

/// Context attached to the request extensions once a payment has settled, for the wrapped
/// handler (or anything downstream of it) to read back.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub transaction: String,
    pub payer: String,
    pub network: String,
}

/// Invoked, best-effort, when a settled request's downstream handler answers with a 5xx.
#[async_trait::async_trait]
pub trait RefundHook: Send + Sync + 'static {
    async fn on_downstream_failure(&self, context: &PaymentContext, requirements: &PaymentRequirements);
}

#[derive(Clone)]
pub struct X402Middleware<P> {
    engine: Arc<Engine>,
    requirements: Arc<P>,
    refund_hook: Option<Arc<dyn RefundHook>>,
}

impl<P: RequirementsProvider> X402Middleware<P> {
    pub fn new(engine: Arc<Engine>, requirements: P) -> Self {
        Self { engine, requirements: Arc::new(requirements), refund_hook: None }
    }

    pub fn with_refund_hook(mut self, hook: Arc<dyn RefundHook>) -> Self {
        self.refund_hook = Some(hook);
        self
    }
}

impl<S, P> Layer<S> for X402Middleware<P>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    P: RequirementsProvider,
{
    type Service = X402MiddlewareService<P>;

    fn layer(&self, inner: S) -> Self::Service {
        X402MiddlewareService {
            engine: self.engine.clone(),
            requirements: self.requirements.clone(),
            refund_hook: self.refund_hook.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

#[derive(Clone)]
pub struct X402MiddlewareService<P> {
    engine: Arc<Engine>,
    requirements: Arc<P>,
    refund_hook: Option<Arc<dyn RefundHook>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<P: RequirementsProvider> Service<Request> for X402MiddlewareService<P> {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let accepts = self.requirements.requirements(&req);
        let engine = self.engine.clone();
        let refund_hook = self.refund_hook.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let header = match req.headers().get("X-PAYMENT").and_then(|h| h.to_str().ok()) {
                Some(h) => h.to_string(),
                None => return Ok(payment_required(accepts, None)),
            };

            let Some(bytes) = base64::engine::general_purpose::STANDARD.decode(header.trim()).ok() else {
                return Ok(payment_required(accepts, Some("Invalid or malformed payment header".to_string())));
            };
            let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
                return Ok(payment_required(accepts, Some("Invalid or malformed payment header".to_string())));
            };
            let Ok(envelope) = x402_types::envelope::from_json(payload.clone()) else {
                return Ok(payment_required(accepts, Some("Invalid or malformed payment header".to_string())));
            };
            let is_evm_payload = matches!(envelope, Envelope::Evm(_));
            let Some(requirements) = accepts.iter().find(|r| engine.is_evm(r) == is_evm_payload).cloned() else {
                return Ok(payment_required(accepts, Some("Unable to find matching payment requirements".to_string())));
            };

            let verification = engine.verify(&payload, &requirements).await;
            if !verification.is_valid() {
                let reason = match verification {
                    x402_types::proto::VerifyResponse::Invalid { reason, .. } => reason,
                    x402_types::proto::VerifyResponse::Valid { .. } => unreachable!(),
                };
                return Ok(payment_required(accepts, Some(reason)));
            }

            let settlement = engine.settle(&payload, &requirements).await;
            let context = match settlement {
                x402_types::proto::SettleResponse::Error { reason, .. } => {
                    return Ok(payment_required(accepts, Some(reason)));
                }
                x402_types::proto::SettleResponse::Success { transaction, payer, network } => {
                    PaymentContext { transaction, payer, network }
                }
            };

            req.extensions_mut().insert(context.clone());
            let response = inner.call(req).await?;

            if response.status().is_server_error() {
                if let Some(hook) = refund_hook {
                    let requirements = requirements.clone();
                    tokio::spawn(async move {
                        hook.on_downstream_failure(&context, &requirements).await;
                    });
                }
            }

            Ok(response)
        })
    }
}

fn payment_required(accepts: Vec<PaymentRequirements>, error: Option<String>) -> Response {
    let body = PaymentRequired::new(accepts, Some(error.unwrap_or_else(|| "Payment Required".to_string())));
    let bytes = serde_json::to_vec(&body).expect("PaymentRequired always serializes");
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .expect("response builder invariants are all satisfied above")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum_core::body::Body;
    use http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use tower::{Service, ServiceExt};
    use x402_nonce_ledger::{AcquireOutcome, AcquireRequest, NonceKey, NonceLedger};
    use x402_types::ChainRegistry;

    use super::*;

    struct NeverAcquires;

    #[async_trait::async_trait]
    impl NonceLedger for NeverAcquires {
        async fn try_acquire(&self, _request: AcquireRequest) -> AcquireOutcome {
            AcquireOutcome::Rejected { reason: "not reachable in these tests".to_string() }
        }
        async fn release(&self, _key: &NonceKey) {}
        async fn mark_settled(&self, _key: &NonceKey, _tx_hash: &str) {}
        async fn cleanup_expired(&self) -> usize {
            0
        }
    }

    fn empty_engine() -> Arc<Engine> {
        Arc::new(Engine::new(ChainRegistry::new(vec![]), HashMap::new(), Arc::new(NeverAcquires)))
    }

    fn sample_requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: "base".to_string(),
            max_amount_required: "1000000".to_string(),
            resource: "https://example.com/paid".to_string(),
            description: None,
            pay_to: "0xA0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string(),
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            max_timeout_seconds: 60,
            output_schema: None,
            extra: None,
        }
    }

    async fn echo_ok(_req: Request) -> Result<Response, Infallible> {
        Ok(Response::builder().status(StatusCode::OK).body(Body::empty()).unwrap())
    }

    #[tokio::test]
    async fn missing_header_returns_402_with_accepts() {
        let requirements = vec![sample_requirements()];
        let middleware = X402Middleware::new(empty_engine(), requirements.clone());
        let mut service = middleware.layer(tower::service_fn(echo_ok));

        let request = HttpRequest::builder().uri("/paid").body(Body::empty()).unwrap();
        let response = service.ready().await.unwrap().call(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: PaymentRequired = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.accepts.len(), 1);
        assert_eq!(body.accepts[0].network, "base");
    }

    #[tokio::test]
    async fn malformed_payment_header_returns_402() {
        let requirements = vec![sample_requirements()];
        let middleware = X402Middleware::new(empty_engine(), requirements);
        let mut service = middleware.layer(tower::service_fn(echo_ok));

        let request = HttpRequest::builder().uri("/paid").header("X-PAYMENT", "not-base64!!!").body(Body::empty()).unwrap();
        let response = service.ready().await.unwrap().call(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: PaymentRequired = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error.as_deref(), Some("Invalid or malformed payment header"));
    }

    #[test]
    fn vec_requirements_provider_returns_clone() {
        let requirements = vec![sample_requirements()];
        let request = HttpRequest::builder().uri("/paid").body(Body::empty()).unwrap();
        assert_eq!(requirements.requirements(&request).len(), 1);
    }
}
