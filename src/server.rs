use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::{LogLevel, RequestLogger, SharedLogger};
use crate::models::ModelSelector;
use crate::proxy;
use crate::tokens::{self, TokenInput};
use crate::translate::anthropic_types::{
    MessagesRequest, TokenCountRequest, TokenCountResponse,
};
use crate::upstream::UpstreamClient;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Long-lived, read-only service state. Per-request conversion state never
/// lives here.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub selector: ModelSelector,
    pub upstream: UpstreamClient,
    pub logger: SharedLogger,
}

impl AppState {
    pub fn new(config: GatewayConfig, api_key: impl Into<String>, logger: SharedLogger) -> Result<Self> {
        let selector = ModelSelector::new(&config.models, &config.cache);
        let upstream = UpstreamClient::new(&config.upstream, api_key)?;
        Ok(Self {
            config,
            selector,
            upstream,
            logger,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::validation(format!("Invalid request body: {}", e)))
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let logger = state
        .logger
        .for_request(uuid::Uuid::new_v4().simple().to_string());

    match messages(&state, &logger, &body).await {
        Ok(response) => response,
        Err(e) => {
            logger.error("server", format!("Request failed: {}", e));
            e.into_response()
        }
    }
}

async fn messages(state: &AppState, logger: &RequestLogger, body: &Bytes) -> Result<Response> {
    let req: MessagesRequest = parse_body(body)?;

    // Fail fast: nothing below this point runs for a rejected model.
    state.selector.validate(&req.model)?;
    let estimated = tokens::validate_limits(TokenInput::from(&req))?;

    let resolved = state.selector.select(&req.model);

    logger.with_context(
        LogLevel::Info,
        "server",
        "Request",
        serde_json::json!({
            "model": req.model,
            "upstream_model": resolved.name,
            "tier": resolved.tier.as_str(),
            "recognized": resolved.recognized,
            "streaming": req.is_streaming(),
            "messages": req.messages.len(),
            "estimated_input_tokens": estimated,
        }),
    );

    if req.is_streaming() {
        let events = proxy::proxy_streaming(
            &req,
            &resolved,
            &state.upstream,
            state.config.upstream.stream_idle_timeout(),
            logger,
        )
        .await?;

        let events = events.map(|e| -> std::result::Result<Event, Infallible> {
            Ok(Event::default().event(e.event).data(e.data))
        });

        Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let resp = proxy::proxy_non_streaming(&req, &resolved, &state.upstream, logger).await?;
        Ok(Json(resp).into_response())
    }
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: TokenCountRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(e) => {
            state.logger.warn("server", format!("count_tokens: {}", e));
            return e.into_response();
        }
    };

    let input_tokens = tokens::count_request_tokens(TokenInput::from(&req));
    state.logger.debug(
        "server",
        format!("count_tokens model={} input_tokens={}", req.model, input_tokens),
    );

    Json(TokenCountResponse { input_tokens }).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .selector
        .available_models()
        .into_iter()
        .map(|(tier, name)| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "tier": tier.as_str(),
                "owned_by": state.config.upstream.app_name,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}
