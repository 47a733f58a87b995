//! Cleanup HTTP routes.
//!
//! Provides endpoints for:
//! - The admin page payload (settings, status and action tokens)
//! - Starting a run and polling its status
//! - Reading the run log and changing settings

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::cleanup::{
    CleanupError, CleanupSettings, EnsureOutcome, FallbackSource, RunOutcome, SettingsUpdate,
    StatusSnapshot,
};
use crate::server::action_token::{
    ACTION_CLEANUP_LOG, ACTION_CLEANUP_RUN, ACTION_CLEANUP_SETTINGS, ACTION_CLEANUP_STATUS,
    ALL_ACTIONS,
};
use crate::server::state::{GuardedCoordinator, ServerState};
use crate::status_store::{RunLogEntry, RunState};

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminPageQuery {
    /// Set by the polling client after it displayed a finished run.
    pub deleted: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AcknowledgedOutcome {
    pub state: &'static str,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct AdminPageResponse {
    pub settings: CleanupSettings,
    pub status: StatusSnapshot,
    pub acknowledged: Option<AcknowledgedOutcome>,
    /// Set when this page load executed a pending run.
    pub fallback_deleted: Option<u64>,
    pub action_tokens: HashMap<&'static str, String>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub entries: Vec<RunLogEntry>,
}

/// Response extension telling the end-of-request fallback that the run
/// started by this request is still pending.
#[derive(Debug, Clone, Copy)]
struct PendingRunMarker;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn forbidden() -> Response {
    error_response(StatusCode::FORBIDDEN, "invalid or missing action token")
}

fn cleanup_error_response(err: CleanupError) -> Response {
    match err {
        CleanupError::AlreadyRunning { started_at } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "already_running", "started_at": started_at })),
        )
            .into_response(),
        CleanupError::TooMany { eligible, limit } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "too_many", "eligible": eligible, "limit": limit })),
        )
            .into_response(),
        CleanupError::Settings(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        CleanupError::Store(e) => {
            error!("Cleanup store error: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "cleanup state unavailable")
        }
    }
}

fn join_error_response(e: tokio::task::JoinError) -> Response {
    error!("Cleanup task failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "cleanup task failed")
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /cleanup - Admin page payload. Runs the next-page-load fallback and
/// acknowledges a displayed outcome. A refused run is acknowledged on any
/// load, a completed one only on the `?deleted=N` redirect.
async fn admin_page(
    State(state): State<ServerState>,
    Query(query): Query<AdminPageQuery>,
) -> Response {
    let coordinator = state.coordinator.clone();
    let status_service = state.status_service.clone();

    let result = tokio::task::spawn_blocking(move || {
        let fallback = coordinator.check_pending_fallback()?;
        // A result produced by this load has not been shown yet.
        let acknowledged = match (fallback, query.deleted) {
            (Some(EnsureOutcome::Executed { .. }), _) => None,
            (_, Some(_)) => coordinator.acknowledge()?,
            (_, None) => coordinator.acknowledge_too_many()?,
        };
        let status = status_service.snapshot()?;
        Ok::<_, CleanupError>((coordinator.settings(), fallback, acknowledged, status))
    })
    .await;

    let (settings, fallback, acknowledged, status) = match result {
        Ok(Ok(values)) => values,
        Ok(Err(e)) => return cleanup_error_response(e),
        Err(e) => return join_error_response(e),
    };

    let acknowledged = acknowledged.and_then(|outcome| match outcome {
        RunState::Completed { deleted } => Some(AcknowledgedOutcome {
            state: outcome.as_str(),
            count: deleted,
        }),
        RunState::TooMany { eligible } => Some(AcknowledgedOutcome {
            state: outcome.as_str(),
            count: eligible,
        }),
        _ => None,
    });
    let fallback_deleted = match fallback {
        Some(EnsureOutcome::Executed { deleted }) => Some(deleted),
        _ => None,
    };
    let action_tokens = ALL_ACTIONS
        .iter()
        .map(|action| (*action, state.action_tokens.token_for(action)))
        .collect();

    Json(AdminPageResponse {
        settings,
        status,
        acknowledged,
        fallback_deleted,
        action_tokens,
    })
    .into_response()
}

/// POST /cleanup/run - Start a manual run.
async fn start_run(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if !state
        .action_tokens
        .verify_headers(ACTION_CLEANUP_RUN, &headers)
    {
        return forbidden();
    }

    let coordinator = state.coordinator.clone();
    match tokio::task::spawn_blocking(move || coordinator.start_manual_run()).await {
        Ok(Ok(outcome @ RunOutcome::Completed { .. })) => Json(outcome).into_response(),
        Ok(Ok(outcome @ RunOutcome::Deferred { .. })) => {
            let mut response = (StatusCode::ACCEPTED, Json(outcome)).into_response();
            response.extensions_mut().insert(PendingRunMarker);
            response
        }
        Ok(Err(e)) => cleanup_error_response(e),
        Err(e) => join_error_response(e),
    }
}

/// GET /cleanup/status - Snapshot for the polling client.
async fn get_status(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if !state
        .action_tokens
        .verify_headers(ACTION_CLEANUP_STATUS, &headers)
    {
        return forbidden();
    }

    let status_service = state.status_service.clone();
    match tokio::task::spawn_blocking(move || status_service.snapshot()).await {
        Ok(Ok(snapshot)) => Json(snapshot).into_response(),
        Ok(Err(e)) => {
            warn!("Failed to read cleanup status: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "cleanup state unavailable")
        }
        Err(e) => join_error_response(e),
    }
}

/// GET /cleanup/log - Most recent run log lines, oldest first.
async fn get_log(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<LogQuery>,
) -> Response {
    if !state
        .action_tokens
        .verify_headers(ACTION_CLEANUP_LOG, &headers)
    {
        return forbidden();
    }

    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let run_log = state.coordinator.run_log().clone();
    match tokio::task::spawn_blocking(move || run_log.recent(limit)).await {
        Ok(Ok(entries)) => Json(LogResponse { entries }).into_response(),
        Ok(Err(e)) => {
            warn!("Failed to read cleanup log: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "cleanup log unavailable")
        }
        Err(e) => join_error_response(e),
    }
}

/// PUT /cleanup/settings - Update operator settings.
async fn put_settings(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    if !state
        .action_tokens
        .verify_headers(ACTION_CLEANUP_SETTINGS, &headers)
    {
        return forbidden();
    }

    let coordinator = state.coordinator.clone();
    match tokio::task::spawn_blocking(move || coordinator.configure(&update)).await {
        Ok(Ok(settings)) => Json(settings).into_response(),
        Ok(Err(e)) => cleanup_error_response(e),
        Err(e) => join_error_response(e),
    }
}

/// Second fallback for deferred runs: once the start request's response is
/// produced, complete the run unless another fallback already did.
async fn end_of_request_fallback(
    State(coordinator): State<GuardedCoordinator>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    if response.extensions().get::<PendingRunMarker>().is_some() {
        tokio::task::spawn_blocking(move || {
            match coordinator.ensure_run_completes(FallbackSource::EndOfRequest) {
                Ok(EnsureOutcome::Executed { deleted }) => {
                    info!("End-of-request fallback completed run, {} deleted", deleted)
                }
                Ok(outcome) => debug!("End-of-request fallback: {:?}", outcome),
                Err(e) => error!("End-of-request fallback failed: {}", e),
            }
        });
    }

    response
}

// =============================================================================
// Router Construction
// =============================================================================

/// Build the cleanup routes.
///
/// - GET / - Admin page payload (no action token)
/// - POST /run - Start a run (`cleanup_run`)
/// - GET /status - Run status (`cleanup_status`)
/// - GET /log - Run log (`cleanup_log`)
/// - PUT /settings - Update settings (`cleanup_settings`)
pub fn cleanup_routes(state: ServerState) -> Router<ServerState> {
    let run_route = Router::new()
        .route("/run", post(start_run))
        .layer(middleware::from_fn_with_state(
            state.coordinator.clone(),
            end_of_request_fallback,
        ));

    Router::new()
        .route("/", get(admin_page))
        .route("/status", get(get_status))
        .route("/log", get(get_log))
        .route("/settings", put(put_settings))
        .merge(run_route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::server::tests::{test_state, TestState};
    use crate::server::ActionTokens;
    use crate::status_store::{StatusKey, StatusStore};
    use tower::ServiceExt;

    fn app(t: &TestState) -> Router {
        cleanup_routes(t.state.clone()).with_state(t.state.clone())
    }

    fn tokens() -> ActionTokens {
        ActionTokens::new("test-secret")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request(method: &str, uri: &str, action: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(action) = action {
            builder = builder.header("X-Action-Token", tokens().token_for(action));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let t = test_state().await;
        for (method, uri) in [
            ("POST", "/run"),
            ("GET", "/status"),
            ("GET", "/log"),
        ] {
            let response = app(&t).oneshot(request(method, uri, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{} {}", method, uri);
        }

        // A token for another action is rejected too
        let response = app(&t)
            .oneshot(request("POST", "/run", Some(ACTION_CLEANUP_STATUS)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(t.catalog.products_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_admin_page_hands_out_tokens() {
        let t = test_state().await;
        let response = app(&t).oneshot(request("GET", "/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(
            body["action_tokens"]["cleanup_run"],
            tokens().token_for(ACTION_CLEANUP_RUN)
        );
        assert_eq!(body["status"]["state"], "idle");
        assert_eq!(body["settings"]["age_threshold_months"], 12);
    }

    #[tokio::test]
    async fn test_inline_run_then_acknowledge() {
        let t = test_state().await;
        t.add_stale_products(2);

        let response = app(&t)
            .oneshot(request("POST", "/run", Some(ACTION_CLEANUP_RUN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["outcome"], "completed");
        assert_eq!(body["deleted"], 2);

        let response = app(&t)
            .oneshot(request("GET", "/status", Some(ACTION_CLEANUP_STATUS)))
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["is_completed"], true);
        assert_eq!(status["last_result_count"], 2);

        let response = app(&t)
            .oneshot(request("GET", "/?deleted=2", None))
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["acknowledged"]["state"], "completed");
        assert_eq!(page["acknowledged"]["count"], 2);
        assert_eq!(page["status"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_run_while_running_conflicts() {
        let t = test_state().await;
        t.status
            .save_run_state(&RunState::Running { started_at: 77 })
            .unwrap();

        let response = app(&t)
            .oneshot(request("POST", "/run", Some(ACTION_CLEANUP_RUN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "already_running");
        assert_eq!(body["started_at"], 77);
    }

    #[tokio::test]
    async fn test_too_many_is_unprocessable() {
        let t = test_state().await;
        t.add_stale_products(201);

        let response = app(&t)
            .oneshot(request("POST", "/run", Some(ACTION_CLEANUP_RUN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "too_many");
        assert_eq!(body["eligible"], 201);
        assert_eq!(t.catalog.products_count().unwrap(), 201);

        let response = app(&t).oneshot(request("GET", "/", None)).await.unwrap();
        let page = body_json(response).await;
        assert_eq!(page["acknowledged"]["state"], "too_many");
        assert_eq!(page["acknowledged"]["count"], 201);
        assert_eq!(page["status"]["state"], "idle");

        let response = app(&t).oneshot(request("GET", "/", None)).await.unwrap();
        let page = body_json(response).await;
        assert!(page["acknowledged"].is_null());
        assert_eq!(page["status"]["state"], "idle");
        assert_eq!(page["status"]["too_many"], false);
    }

    #[tokio::test]
    async fn test_page_load_without_redirect_keeps_completed_result() {
        let t = test_state().await;
        t.add_stale_products(1);
        t.coordinator.start_manual_run().unwrap();

        let response = app(&t).oneshot(request("GET", "/", None)).await.unwrap();
        let page = body_json(response).await;
        assert!(page["acknowledged"].is_null());
        assert_eq!(page["status"]["state"], "completed");
    }

    #[tokio::test]
    async fn test_page_load_completing_pending_run_shows_result() {
        let t = test_state().await;
        t.add_stale_products(5);
        t.status
            .save_run_state(&RunState::Running { started_at: 1 })
            .unwrap();
        t.status
            .set_slot(StatusKey::PendingFallbackAt, "1")
            .unwrap();

        // A stale redirect from an earlier run must not hide this result
        let response = app(&t)
            .oneshot(request("GET", "/?deleted=3", None))
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["fallback_deleted"], 5);
        assert!(page["acknowledged"].is_null());
        assert_eq!(page["status"]["state"], "completed");
        assert_eq!(page["status"]["last_result_count"], 5);

        let response = app(&t)
            .oneshot(request("GET", "/?deleted=5", None))
            .await
            .unwrap();
        let page = body_json(response).await;
        assert_eq!(page["acknowledged"]["state"], "completed");
        assert_eq!(page["acknowledged"]["count"], 5);
    }

    #[tokio::test]
    async fn test_deferred_run_completes_after_response() {
        let t = test_state().await;
        t.add_stale_products(120);

        let response = app(&t)
            .oneshot(request("POST", "/run", Some(ACTION_CLEANUP_RUN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["outcome"], "deferred");
        assert_eq!(body["eligible"], 120);

        // No scheduler runs in this test: only the end-of-request fallback
        // can complete the run.
        let mut completed = false;
        for _ in 0..100 {
            if !t.coordinator.current_state().unwrap().is_running() {
                completed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(completed);
        assert_eq!(t.catalog.products_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settings_update_and_validation() {
        let t = test_state().await;

        let response = app(&t)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/settings")
                    .header("X-Action-Token", tokens().token_for(ACTION_CLEANUP_SETTINGS))
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"age_threshold_months": 6, "delete_images": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["age_threshold_months"], 6);
        assert_eq!(body["delete_images"], true);

        let response = app(&t)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/settings")
                    .header("X-Action-Token", tokens().token_for(ACTION_CLEANUP_SETTINGS))
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"age_threshold_months": 0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(t.coordinator.settings().age_threshold_months, 6);
    }

    #[tokio::test]
    async fn test_log_returns_recent_lines() {
        let t = test_state().await;
        t.add_stale_products(1);
        t.coordinator.start_manual_run().unwrap();

        let response = app(&t)
            .oneshot(request("GET", "/log?limit=500", Some(ACTION_CLEANUP_LOG)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let entries = body["entries"].as_array().unwrap();
        assert!(!entries.is_empty());
        assert!(entries[0]["line"]
            .as_str()
            .unwrap()
            .contains("Cleanup run started"));
    }
}
