use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use uuid::Uuid;

use super::downloads::ApiError;
use crate::core::error::DownloadError;
use crate::AppState;

/// Relays a task's snapshots as `data: <json>` events until a terminal one.
pub async fn progress_stream(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let task_id = Uuid::parse_str(task_id.trim()).map_err(|_| ApiError {
        task_id: None,
        error: DownloadError::InvalidInput(format!("task_id '{}' is not a UUID", task_id)),
    })?;
    tracing::debug!("[http] progress subscriber attached to {}", task_id);

    let stream = state.hub.subscribe(task_id).map(|snapshot| {
        let event = Event::default()
            .json_data(&snapshot)
            .unwrap_or_else(|_| Event::default().comment("snapshot unavailable"));
        Ok(event)
    });
    Ok(Sse::new(stream))
}
