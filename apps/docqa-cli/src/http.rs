//! `/api/rag/*` routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use docqa_core::Error as CoreError;
use docqa_pipeline::{AskResponse, PipelineContext, Status};

use crate::error::{ApiError, ApiResult};

const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PipelineContext>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub fragment_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub question: Option<String>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rag/upload", post(upload))
        .route("/api/rag/chat", post(chat))
        .route("/api/rag/status", get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .and_then(|n| Path::new(n).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::BadRequest("no file selected".into()))?;
        let bytes = field.bytes().await?;
        tracing::info!(file = %file_name, bytes = bytes.len(), "upload received");

        let report = state.pipeline.ingest(&file_name, &bytes).await?;
        return Ok(Json(UploadResponse {
            message: format!("Document '{}' uploaded and indexed", report.file_name),
            fragment_count: report.fragment_count,
        }));
    }
    Err(ApiError::BadRequest(format!("multipart field '{FILE_FIELD}' is missing")))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<AskResponse>> {
    let Json(request) = payload?;
    let question = request
        .question
        .ok_or_else(|| CoreError::Validation("question is required".into()))?;
    Ok(Json(state.pipeline.ask(&question).await?))
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(state.pipeline.status().await)
}
