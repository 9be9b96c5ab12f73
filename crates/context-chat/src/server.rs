//! Chat HTTP server.
//!
//! Exposes the [`Orchestrator`] over a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/chat/history/{session_id}` | Persisted turns (empty when absent/expired) |
//! | `POST` | `/chat/query/{session_id}` | Answer a message and record the exchange |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "message required" }
//! ```
//!
//! `400` for a missing or empty message, `500` for generation or session
//! store failures. Retrieval failures never produce an error response.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients on
//! any origin can call the API.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use context_chat_core::error::{ChatError, GenerationError};
use context_chat_core::models::Turn;

use crate::backends::Backends;
use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Connects the configured backends and serves until Ctrl-C.
///
/// Binds to `[server].bind`. This is the entry point used by `ctx-chat serve`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backends = Backends::connect(config).await?;
    let orchestrator = Arc::new(backends.into_orchestrator(config));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!("chat server listening on http://{}", listener.local_addr()?);

    serve(listener, orchestrator, shutdown_signal()).await
}

/// Serves the API on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    orchestrator: Arc<Orchestrator>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("chat server stopped");
    Ok(())
}

/// Builds the route table around an orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat/history/{session_id}", get(handle_history))
        .route("/chat/query/{session_id}", post(handle_query))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { orchestrator })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidRequest(message) => bad_request(message),
            ChatError::GenerationFailed(GenerationError::Upstream { message, .. }) => {
                internal(message)
            }
            ChatError::GenerationFailed(e) => {
                tracing::error!("generation failed: {}", e);
                internal(e.to_string())
            }
            ChatError::StoreUnavailable(e) => {
                tracing::error!("session store failure: {}", e);
                internal(e.to_string())
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /chat/history/{session_id} ============

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<Turn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let history = state.orchestrator.history(&session_id).await?;
    Ok(Json(HistoryResponse { history }))
}

// ============ POST /chat/query/{session_id} ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
}

/// A body that is absent, not JSON, or lacks `message` is the same client
/// error as an empty message.
async fn handle_query(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let message = match payload {
        Ok(Json(QueryRequest {
            message: Some(message),
        })) => message,
        Ok(_) => return Err(bad_request("message required")),
        Err(rejection) => {
            tracing::debug!("rejected query body: {}", rejection.body_text());
            return Err(bad_request("message required"));
        }
    };

    let answer = state.orchestrator.handle(&session_id, &message).await?;
    Ok(Json(QueryResponse { answer }))
}
