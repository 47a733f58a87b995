//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own databases, media directory
//! and running job scheduler.

use super::constants::*;
use catalog_pruner::app::CleanupApp;
use catalog_pruner::catalog_store::SqliteCatalogStore;
use catalog_pruner::config::{AppConfig, CleanupConfig};
use catalog_pruner::server::{make_app, RequestsLoggingLevel, ServerConfig};
use catalog_pruner::status_store::SqliteStatusStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with isolated stores
///
/// When dropped, the server and the scheduler shut down and temp resources
/// are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Catalog store for seeding and inspecting products
    pub catalog: Arc<SqliteCatalogStore>,

    /// Status store for direct database access in tests
    pub status: Arc<SqliteStatusStore>,

    pub media_path: PathBuf,

    shutdown_token: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the stores cannot be created, the port cannot be bound or
    /// the server doesn't become ready within timeout.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let media_path = temp_dir.path().join("media");

        let config = AppConfig {
            db_dir: temp_dir.path().to_path_buf(),
            media_path: media_path.clone(),
            port: 0,
            metrics_port: 0,
            logging_level: RequestsLoggingLevel::None,
            cleanup: CleanupConfig {
                action_token_secret: Some(TEST_TOKEN_SECRET.to_string()),
                ..Default::default()
            },
        };

        let shutdown_token = CancellationToken::new();
        let app = CleanupApp::build(&config, shutdown_token.clone())
            .await
            .expect("Failed to build app");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = app.server_state(ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
        });
        let router = make_app(state);
        let catalog = app.catalog_store.clone();
        let status = app.status_store.clone();

        let mut scheduler = app.scheduler;
        tokio::spawn(async move {
            scheduler.run().await;
        });

        let server_token = shutdown_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(server_token.cancelled_owned())
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            catalog,
            status,
            media_path,
            shutdown_token,
            _temp_dir: temp_dir,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
