//! HTTP API over [`RagService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Liveness check with crate version |
//! | `GET`    | `/files` | Base ids of uploaded documents |
//! | `POST`   | `/files` | Upload `{filename, content_base64}` |
//! | `DELETE` | `/files/{base_id}` | Remove a document |
//! | `POST`   | `/query` | Retrieve `{query, k?, keywords?}` |
//! | `POST`   | `/sync/push` | Push unsynced chunks to the remote |
//! | `POST`   | `/sync/pull` | Import chunks from the remote |
//! | `GET`    | `/sync/status` | Last sync and a fresh availability probe |
//!
//! Errors use `{ "error": { "code": ..., "message": ... } }` with codes
//! `bad_request` (400), `not_found` (404) and `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::models::{SyncReport, SyncStatusReport};
use crate::service::RagService;

type AppState = Arc<RagService>;

/// Bind to `[server].bind` and serve until the process exits.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let service = Arc::new(RagService::from_config(config).await?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("ragsync listening on http://{}", listener.local_addr()?);
    tracing::info!(addr = %bind_addr, "server started");

    axum::serve(listener, router(service)).await?;
    Ok(())
}

pub fn router(service: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/files", get(handle_list_files).post(handle_upload))
        .route("/files/{base_id}", delete(handle_remove))
        .route("/query", post(handle_query))
        .route("/sync/push", post(handle_push))
        .route("/sync/pull", post(handle_pull))
        .route("/sync/status", get(handle_status))
        .layer(cors)
        .with_state(service)
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
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::Parse(msg) => bad_request(msg),
            other => {
                tracing::error!(error = %other, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: other.to_string(),
                }
            }
        }
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<String>,
}

async fn handle_list_files(State(service): State<AppState>) -> Result<Json<FilesResponse>, AppError> {
    let files = service.get_uploaded_files().await?;
    Ok(Json(FilesResponse {
        files: files.into_iter().collect(),
    }))
}

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    content_base64: String,
}

#[derive(Serialize)]
struct UploadResponse {
    base_id: String,
    chunks: Vec<String>,
}

async fn handle_upload(
    State(service): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    if req.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;

    let chunks = service.process_bytes(&bytes, &req.filename).await?;
    Ok(Json(UploadResponse {
        base_id: crate::models::base_id_for(&req.filename),
        chunks,
    }))
}

#[derive(Serialize)]
struct RemoveResponse {
    removed: bool,
}

async fn handle_remove(
    State(service): State<AppState>,
    Path(base_id): Path<String>,
) -> Result<Json<RemoveResponse>, AppError> {
    if service.remove_file(&base_id).await? {
        Ok(Json(RemoveResponse { removed: true }))
    } else {
        Err(not_found(format!("no chunks stored for {}", base_id)))
    }
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<String>,
}

async fn handle_query(
    State(service): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = req.k.unwrap_or_else(|| service.default_k());
    let results = if req.keywords.is_empty() {
        service.query_similar(&req.query, k).await
    } else {
        service.query_keywords(&req.query, &req.keywords, k).await
    };
    Ok(Json(QueryResponse { results }))
}

async fn handle_push(State(service): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    Ok(Json(service.sync_to_remote().await?))
}

async fn handle_pull(State(service): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    Ok(Json(service.import_from_remote().await?))
}

async fn handle_status(State(service): State<AppState>) -> Result<Json<SyncStatusReport>, AppError> {
    Ok(Json(service.get_sync_status().await?))
}
