//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question through the agent loop |
//! | `GET`  | `/documents` | The document catalog |
//! | `POST` | `/search` | Run a retrieval directly |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Failures of `/ask` also carry the `request_id` the request was logged under.
//!
//! Error codes: `bad_request` (400), `agent_error` (500), `internal` (500).
//! Internal failures are logged; the response carries only a generic message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser chat
//! client can call the API from another origin.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docent_core::agent::AgentError;
use docent_core::models::{Document, SearchHit};
use docent_core::search::SearchMode;
use docent_core::store::Store;

use crate::ask::{answer, AskError, AskResponse};
use crate::config::Config;
use crate::search::{search_documents, SearchOptions};
use crate::services::Services;

const INTERNAL_MESSAGE: &str = "An internal error occurred. Please try again later.";
const AGENT_MESSAGE: &str = "The assistant could not process this request. Please try again.";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    services: Arc<Services>,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

/// Build the router with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/documents", get(handle_documents))
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let services = Arc::new(Services::connect(config.clone()).await?);
    let app = router(AppState::new(services));

    tracing::info!(bind = %bind_addr, "server starting");
    println!("Docent server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                request_id: self.request_id,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        request_id: None,
    }
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: INTERNAL_MESSAGE.to_string(),
        request_id: None,
    }
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::UnknownAction(_) => {
                tracing::error!(error = %err, "agent error");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "agent_error".to_string(),
                    message: AGENT_MESSAGE.to_string(),
                    request_id: None,
                }
            }
            other => internal(other),
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        AppError {
            request_id: Some(err.request_id),
            ..AppError::from(err.source)
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

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    request: String,
    #[serde(default)]
    history: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(body): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if body.request.trim().is_empty() {
        return Err(bad_request("request must not be empty"));
    }
    let response = answer(&state.services, &body.request, &body.history).await?;
    Ok(Json(response))
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<Document>,
}

async fn handle_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let documents = Store::list_documents(state.services.store.as_ref())
        .await
        .map_err(internal)?;
    Ok(Json(DocumentsResponse { documents }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    keywords: Option<String>,
    #[serde(default)]
    docs: Vec<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if body.limit == Some(0) {
        return Err(bad_request("limit must be >= 1"));
    }
    let mode = match body.mode.as_deref() {
        Some(m) => Some(
            m.parse::<SearchMode>()
                .map_err(|e| bad_request(e.to_string()))?,
        ),
        None => None,
    };

    let opts = SearchOptions {
        query: body.query,
        keywords: body.keywords,
        docs: body.docs,
        mode,
        limit: body.limit,
    };
    let results = search_documents(&state.services, &opts)
        .await
        .map_err(internal)?;
    Ok(Json(SearchResponse { results }))
}
