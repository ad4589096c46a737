use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

pub mod downloads;
pub mod health;
pub mod progress;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route(
            "/download",
            get(downloads::download_get).post(downloads::download_post),
        )
        .route("/progress/:task_id", get(progress::progress_stream))
        .route("/health", get(health::health))
        .layer(cors)
        .with_state(state)
}
