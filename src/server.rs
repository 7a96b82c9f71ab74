//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Greeting |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/md-to-txt` | Normalize the vault into the text mirror |
//! | `POST` | `/search` | Answer a question from the notes (`{"answer": "<question>"}`) |
//! | `POST` | `/ingest` | Chunk, embed, and index the normalized notes |
//!
//! `/search` responds with the answer as plain text. Every failure responds
//! with `{"error": ..., "details": ...}`: `400` for a missing or blank
//! question, `500` for anything that goes wrong while answering.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::pipeline::{IngestReport, RagPipeline};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<RagPipeline>,
}

/// Build the router around an existing pipeline.
pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/md-to-txt", get(handle_md_to_txt))
        .route("/search", post(handle_search))
        .route("/ingest", post(handle_ingest))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { pipeline })
}

/// Start the server on `[server].bind` and run until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(RagPipeline::from_config(config)?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(address = %bind_addr, "server listening");
    println!("Server listening on http://{}", bind_addr);

    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    details: String,
}

struct AppError {
    status: StatusCode,
    error: String,
    details: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(details: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        error: "Bad request".to_string(),
        details: details.into(),
    }
}

fn internal(details: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        error: "Internal error".to_string(),
        details: details.into(),
    }
}

// ============ GET / ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "notes-rag is running" }))
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

// ============ GET /md-to-txt ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NormalizeResponse {
    message: String,
    files_converted: usize,
    failures: Vec<FailureEntry>,
}

#[derive(Serialize)]
struct FailureEntry {
    path: String,
    error: String,
}

async fn handle_md_to_txt(
    State(state): State<AppState>,
) -> Result<Json<NormalizeResponse>, AppError> {
    let report = state.pipeline.normalize().await.map_err(|e| {
        error!(error = %e, "normalization failed");
        internal(format!("{:#}", e))
    })?;

    Ok(Json(NormalizeResponse {
        message: "Conversion complete".to_string(),
        files_converted: report.files_converted,
        failures: report
            .failures
            .iter()
            .map(|f| FailureEntry {
                path: f.path().to_string(),
                error: f.to_string(),
            })
            .collect(),
    }))
}

// ============ POST /search ============

/// The question travels in the `answer` field.
#[derive(Deserialize)]
struct SearchRequest {
    answer: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<String, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let question = request
        .answer
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("answer must be a non-empty question"))?;

    let result = state.pipeline.ask(&question).await.map_err(|e| {
        error!(stage = e.stage(), error = %e, "search failed");
        internal(e.to_string())
    })?;

    Ok(result.answer)
}

// ============ POST /ingest ============

#[derive(Serialize)]
struct IngestResponse {
    message: String,
    #[serde(flatten)]
    report: IngestReport,
}

async fn handle_ingest(State(state): State<AppState>) -> Result<Json<IngestResponse>, AppError> {
    let report = state.pipeline.ingest().await.map_err(|e| {
        error!(error = %e, "ingestion failed");
        internal(format!("{:#}", e))
    })?;

    Ok(Json(IngestResponse {
        message: "Ingestion complete".to_string(),
        report,
    }))
}
