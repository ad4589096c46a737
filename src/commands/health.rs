use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "environment": state.environment.to_string(),
        "strategies": state.orchestrator.catalog().names(),
        "active_mailboxes": state.hub.active_mailboxes(),
    }))
}
