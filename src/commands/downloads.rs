use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use relayget_core::core::events::{MediaKind, TaskSnapshot, TaskStatus};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::error::DownloadError;
use crate::core::filename;
use crate::models::download::{Deliverable, DownloadRequest};
use crate::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadParams {
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub task_id: Option<String>,
}

impl DownloadParams {
    /// Query string values win over body values.
    fn merged_with(self, body: DownloadParams) -> DownloadParams {
        DownloadParams {
            url: self.url.or(body.url),
            kind: self.kind.or(body.kind),
            task_id: self.task_id.or(body.task_id),
        }
    }
}

pub struct ApiError {
    pub task_id: Option<Uuid>,
    pub error: DownloadError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            DownloadError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DownloadError::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.error.to_string(),
            "task_id": self.task_id,
        });
        (status, Json(body)).into_response()
    }
}

pub async fn download_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadParams>,
) -> Response {
    start_download(state, params).await
}

pub async fn download_post(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadParams>,
    body: Option<Json<DownloadParams>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    start_download(state, params.merged_with(body)).await
}

async fn start_download(state: Arc<AppState>, params: DownloadParams) -> Response {
    let task_id = match params.task_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => id,
            Err(_) => {
                return ApiError {
                    task_id: None,
                    error: DownloadError::InvalidInput(format!("task_id '{}' is not a UUID", raw)),
                }
                .into_response();
            }
        },
        None => Uuid::new_v4(),
    };

    let url = params.url.unwrap_or_default();
    let Some(kind) = MediaKind::parse(params.kind.as_deref().unwrap_or("")) else {
        let error = DownloadError::InvalidInput(format!(
            "type must be 'video' or 'audio', got '{}'",
            params.kind.unwrap_or_default()
        ));
        reject_task(&state, task_id, &url, &error);
        return ApiError {
            task_id: Some(task_id),
            error,
        }
        .into_response();
    };

    let request = DownloadRequest { task_id, url, kind };
    let cancel = CancellationToken::new();
    // Dropping this handler (client went away) cancels the task.
    let guard = cancel.clone().drop_guard();

    let orchestrator = state.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.run(request, cancel).await });
    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Err(DownloadError::Extraction(format!("download task aborted: {}", e))),
    };
    guard.disarm();

    match outcome {
        Ok(deliverable) => {
            let chunk_bytes = state.settings.server.stream_chunk_bytes;
            match stream_deliverable(deliverable, chunk_bytes).await {
                Ok(response) => response,
                Err(error) => ApiError {
                    task_id: Some(task_id),
                    error,
                }
                .into_response(),
            }
        }
        Err(error) => ApiError {
            task_id: Some(task_id),
            error,
        }
        .into_response(),
    }
}

/// Reports a request rejected before orchestration to any progress observer.
fn reject_task(state: &AppState, task_id: Uuid, url: &str, error: &DownloadError) {
    let mut snapshot = TaskSnapshot::new(task_id, url, MediaKind::Video);
    snapshot.status = TaskStatus::Error;
    snapshot.message = error.to_string();
    state.hub.publish(snapshot);
    state.hub.close(task_id);
}

async fn stream_deliverable(
    deliverable: Deliverable,
    chunk_bytes: usize,
) -> Result<Response, DownloadError> {
    let Deliverable {
        task_id,
        title,
        kind,
        path,
        size,
        work_dir,
        ..
    } = deliverable;

    let name = filename::download_name(&title, kind, &path);
    let disposition = format!("attachment; filename=\"{}\"", filename::ascii_fallback(&name));
    let mime = filename::mime_type(&path, kind);

    let file = tokio::fs::File::open(&path).await?;
    let stream = ReaderStream::with_capacity(file, chunk_bytes.max(1024)).map(move |chunk| {
        // The work directory must outlive the stream.
        let _keep = &work_dir;
        chunk
    });
    tracing::info!("[http] streaming {} ({} bytes) for {}", name, size, task_id);

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&task_id.to_string()) {
        headers.insert("x-task-id", value);
    }
    Ok(response)
}
