//! HTTP routes for the MCP endpoint

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::config::ServerConfig;
use crate::mcp::{JsonRpcRequest, JsonRpcResponse, McpServer, INVALID_REQUEST, PARSE_ERROR};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub mcp: Arc<McpServer>,
    pub version: String,
}

impl AppState {
    pub fn new(mcp: McpServer) -> Self {
        Self {
            mcp: Arc::new(mcp),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub authenticated: bool,
    pub key_rotated: bool,
}

/// Create the bridge router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route(&config.mcp_path, post(mcp_endpoint))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// One JSON-RPC message per POST. Notifications are acknowledged with 202.
async fn mcp_endpoint(State(state): State<AppState>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return rejection(Value::Null, PARSE_ERROR, format!("Parse error: {}", e));
        }
    };

    if value.is_array() {
        return rejection(Value::Null, INVALID_REQUEST, "batch requests are not supported");
    }

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => return rejection(id, INVALID_REQUEST, format!("Invalid request: {}", e)),
    };

    match state.mcp.handle(request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn rejection(id: Value, code: i64, message: impl Into<String>) -> Response {
    let message = message.into();
    debug!(code, %message, "Rejected MCP message");
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::failure(id, code, message)),
    )
        .into_response()
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let session = state.mcp.bridge().session().status();
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        authenticated: session.authenticated,
        key_rotated: session.key_rotated,
    })
}
