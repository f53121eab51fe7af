//! HTTP front end for the query and ingestion pipelines.
//!
//! | Method   | Path                       | Body / result                         |
//! |----------|----------------------------|---------------------------------------|
//! | `POST`   | `/chat`                    | `QueryRequest` → `QueryResponse`      |
//! | `PUT`    | `/documents`               | `{locations}` → ingestion reports     |
//! | `GET`    | `/documents`               | indexed documents                     |
//! | `DELETE` | `/documents/{document_id}` | number of removed chunks              |
//! | `POST`   | `/summary`                 | `{document_ids}` → `QueryResponse`    |
//! | `GET`    | `/health`                  | status and version                    |
//!
//! Query outcomes, including rejections, are always `200` with a structured
//! status. Non-2xx responses use `{"error": {"code", "message"}}`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use pdf_rag_core::{
    DocumentSource, IndexedDocument, IngestionPipeline, IngestionReport, QueryPipeline,
    QueryRequest, QueryResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryPipeline>,
    pub ingestion: Arc<IngestionPipeline>,
    pub source: Arc<dyn DocumentSource>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handle_chat))
        .route("/documents", put(handle_ingest).get(handle_list))
        .route("/documents/{document_id}", delete(handle_delete))
        .route("/summary", post(handle_summary))
        .route("/health", get(handle_health))
        .with_state(state)
}

pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "pdf-rag listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    fn index(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            code: "index_error",
            message: error.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {"code": self.code, "message": self.message}
        });
        (self.status, Json(body)).into_response()
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    Json(state.query.answer(&request).await)
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    locations: Vec<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<Vec<IngestionReport>>, AppError> {
    if request.locations.is_empty() {
        return Err(AppError::bad_request("locations must not be empty"));
    }
    let reports = state
        .ingestion
        .ingest_from(state.source.as_ref(), &request.locations)
        .await;
    Ok(Json(reports))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    document_id: String,
    deleted: u64,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state
        .ingestion
        .delete_document(&document_id)
        .await
        .map_err(AppError::index)?;
    Ok(Json(DeleteResponse {
        document_id,
        deleted,
    }))
}

async fn handle_list(
    State(state): State<AppState>,
) -> Result<Json<Vec<IndexedDocument>>, AppError> {
    let documents = state
        .ingestion
        .list_documents()
        .await
        .map_err(AppError::index)?;
    Ok(Json(documents))
}

#[derive(Debug, Deserialize)]
struct SummaryRequest {
    document_ids: Vec<String>,
}

async fn handle_summary(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if request.document_ids.is_empty() {
        return Err(AppError::bad_request("document_ids must not be empty"));
    }
    Ok(Json(state.query.summarize(&request.document_ids).await))
}

#[derive(Debug, Serialize)]
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
