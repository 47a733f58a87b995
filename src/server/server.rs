use anyhow::Result;
use std::time::Duration;

use axum::{
    extract::State, middleware, response::IntoResponse, routing::get, Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::cleanup_routes::cleanup_routes;
use super::gone_routes::gone_routes;
use super::jobs_routes::jobs_routes;
use super::{log_requests, state::ServerState};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: state.version.clone(),
    };
    Json(stats)
}

pub fn make_app(state: ServerState) -> Router {
    let admin_routes: Router<ServerState> = Router::new()
        .nest("/cleanup", cleanup_routes(state.clone()))
        .nest("/jobs", jobs_routes());

    Router::new()
        .route("/", get(home))
        .nest("/v1/admin", admin_routes)
        .nest("/v1/gone", gone_routes())
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub async fn run_server(state: ServerState, shutdown_token: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await?;
    Ok(())
}
