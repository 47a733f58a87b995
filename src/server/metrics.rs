use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metric name prefix for all catalog pruner metrics
const PREFIX: &str = "catalog_pruner";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Cleanup Metrics
    pub static ref CLEANUP_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cleanup_runs_total"), "Cleanup run attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create cleanup_runs_total metric");

    pub static ref CLEANUP_ITEMS_DELETED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_cleanup_items_deleted_total"),
        "Total products deleted by cleanup runs"
    ).expect("Failed to create cleanup_items_deleted_total metric");

    pub static ref CLEANUP_ASSETS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cleanup_assets_total"), "Asset handling during cleanup runs"),
        &["result"]
    ).expect("Failed to create cleanup_assets_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 1.0, 10.0, 60.0, 300.0, 1800.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CLEANUP_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CLEANUP_ITEMS_DELETED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CLEANUP_ASSETS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record the outcome of a cleanup run attempt:
/// "completed", "failed", "too_many" or "deferred".
pub fn record_cleanup_run(outcome: &str) {
    CLEANUP_RUNS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_item_deleted() {
    CLEANUP_ITEMS_DELETED_TOTAL.inc();
}

/// Record what happened to one asset: "deleted", "skipped" or "failed".
pub fn record_asset_outcome(result: &str) {
    CLEANUP_ASSETS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();

    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Serve `/metrics` on its own port until `shutdown_token` is cancelled.
pub async fn run_metrics_server(port: u16, shutdown_token: CancellationToken) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_metric(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_http_request() {
        init_metrics();

        record_http_request("GET", "/v1/admin/cleanup/status", 200, Duration::from_millis(50));

        assert!(has_metric("catalog_pruner_http_requests_total"));
    }

    #[test]
    fn test_record_cleanup_metrics() {
        init_metrics();

        record_cleanup_run("completed");
        record_item_deleted();
        record_asset_outcome("skipped");

        assert!(has_metric("catalog_pruner_cleanup_runs_total"));
        assert!(has_metric("catalog_pruner_cleanup_items_deleted_total"));
        assert!(has_metric("catalog_pruner_cleanup_assets_total"));
        assert!(CLEANUP_ITEMS_DELETED_TOTAL.get() >= 1.0);
    }

    #[test]
    fn test_background_job_metrics() {
        init_metrics();

        set_background_job_running("housekeeping", true);
        assert_eq!(
            BACKGROUND_JOB_RUNNING
                .with_label_values(&["housekeeping"])
                .get(),
            1.0
        );
        record_background_job_execution("housekeeping", "success", Duration::from_millis(5));
        set_background_job_running("housekeeping", false);
        assert_eq!(
            BACKGROUND_JOB_RUNNING
                .with_label_values(&["housekeeping"])
                .get(),
            0.0
        );
        assert!(has_metric("catalog_pruner_background_job_executions_total"));
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        init_metrics();
        record_cleanup_run("deferred");

        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
