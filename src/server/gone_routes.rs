//! "410 Gone" lookup for products removed with gone tracking enabled.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::warn;

use crate::server::state::{GuardedStatusStore, ServerState};

/// GET /gone/{slug}
async fn get_gone(State(store): State<GuardedStatusStore>, Path(slug): Path<String>) -> Response {
    match tokio::task::spawn_blocking(move || store.find_deleted_item(&slug)).await {
        Ok(Ok(Some(record))) => (StatusCode::GONE, Json(record)).into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            warn!("Failed to look up deleted product: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            warn!("Gone lookup task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn gone_routes() -> Router<ServerState> {
    Router::new().route("/{slug}", get(get_gone))
}
