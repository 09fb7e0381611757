// src/api.rs
//
// HTTP surface: POST /quote and GET /health. Error taxonomy maps onto
// status codes here and nowhere else.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::engine::QuoteEngine;
use crate::error::QuoterError;
use crate::types::SwapRequest;

pub fn router(engine: Arc<QuoteEngine>) -> Router {
    Router::new()
        .route("/quote", post(post_quote))
        .route("/health", get(get_health))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

async fn post_quote(
    State(engine): State<Arc<QuoteEngine>>,
    Json(req): Json<SwapRequest>,
) -> Response {
    match engine.quote(req).await {
        Ok(quote) => (StatusCode::OK, Json(quote)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_health(State(engine): State<Arc<QuoteEngine>>) -> Response {
    (StatusCode::OK, Json(engine.health())).into_response()
}

fn error_response(e: QuoterError) -> Response {
    let (status, reason) = match &e {
        QuoterError::NoValidRoute(_) => (StatusCode::UNPROCESSABLE_ENTITY, "NoValidRoute"),
        QuoterError::InvalidAmount(_) => (StatusCode::UNPROCESSABLE_ENTITY, "InvalidAmount"),
        QuoterError::UnsupportedPair(_) => (StatusCode::UNPROCESSABLE_ENTITY, "UnsupportedPair"),
        QuoterError::DeadlineExceeded(_) => (StatusCode::GATEWAY_TIMEOUT, "DeadlineExceeded"),
        other => {
            error!("unhandled quote error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal")
        }
    };
    (
        status,
        Json(json!({ "reason": reason, "detail": e.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Result;
    use crate::rpc::{ChainClient, ChainClients};
    use crate::source::SourceAdapter;
    use crate::types::{LocalCurve, PoolSnapshot, ProtocolFamily, SourceId, SourceQuote, TxDraft};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::util::ServiceExt;

    struct StaticGasClient;

    #[async_trait]
    impl ChainClient for StaticGasClient {
        async fn call(&self, _m: &str, _p: Value, _t: Duration) -> Result<Value> {
            Ok(json!("100000"))
        }
    }

    struct FixedAdapter(SourceId);

    #[async_trait]
    impl SourceAdapter for FixedAdapter {
        fn id(&self) -> &SourceId {
            &self.0
        }
        fn supports(&self, req: &SwapRequest) -> bool {
            req.chain_id == 1
        }
        async fn fetch_quote(&self, req: &SwapRequest) -> Result<SourceQuote> {
            let out = crate::source::math::cpmm::swap_output(
                req.amount_in,
                1_000_000,
                2_000_000,
                30,
            )
            .map_err(|e| QuoterError::AdapterProtocolError(e.to_string()))?;
            Ok(SourceQuote {
                source: self.0.clone(),
                amount_out: out.amount_out,
                price_impact_bps: out.price_impact_bps,
                confidence: 95,
                pool: PoolSnapshot::default(),
                curve: LocalCurve {
                    reserve_in: 1_000_000,
                    reserve_out: 2_000_000,
                    fee_bps: 30,
                },
                tx_draft: TxDraft::default(),
                degraded: false,
            })
        }
    }

    fn app() -> Router {
        let config = Arc::new(Config::test_default());
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(1, Arc::new(StaticGasClient));
        let chains = Arc::new(ChainClients::from_clients(clients));
        let adapter: Arc<dyn SourceAdapter> = Arc::new(FixedAdapter(SourceId::new(
            "mock",
            ProtocolFamily::ConstantProduct,
        )));
        router(Arc::new(QuoteEngine::with_adapters(
            config,
            chains,
            vec![adapter],
        )))
    }

    fn quote_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/quote")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_quote_happy_path() {
        let response = app()
            .oneshot(quote_request(json!({
                "chainId": 1,
                "tokenIn": "WETH",
                "tokenOut": "USDC",
                "amountIn": "10000",
                "maxSlippageBps": 50,
                "deadlineMs": 2000,
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["bestRoute"][0]["percentage"], 100);
        assert!(body["amountOut"].is_string());
    }

    #[tokio::test]
    async fn test_quote_without_deadline_uses_default() {
        // deadlineMs is optional on the wire.
        let response = app()
            .oneshot(quote_request(json!({
                "chainId": 1,
                "tokenIn": "WETH",
                "tokenOut": "USDC",
                "amountIn": "10000",
                "maxSlippageBps": 50,
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["bestRoute"][0]["percentage"], 100);
    }

    #[tokio::test]
    async fn test_zero_amount_maps_to_422() {
        let response = app()
            .oneshot(quote_request(json!({
                "chainId": 1,
                "tokenIn": "WETH",
                "tokenOut": "USDC",
                "amountIn": "0",
                "maxSlippageBps": 50,
                "deadlineMs": 2000,
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "InvalidAmount");
    }

    #[tokio::test]
    async fn test_unsupported_chain_maps_to_422() {
        let response = app()
            .oneshot(quote_request(json!({
                "chainId": 999,
                "tokenIn": "WETH",
                "tokenOut": "USDC",
                "amountIn": "10000",
                "maxSlippageBps": 50,
                "deadlineMs": 2000,
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "UnsupportedPair");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["quoteCache"].is_object());
        assert!(body["gasCache"].is_object());
    }
}
