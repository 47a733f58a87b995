//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per endpoint. When API routes or request
//! formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const ACTION_TOKEN_HEADER: &str = "X-Action-Token";

/// HTTP test client holding the action tokens handed out by the admin page
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    tokens: HashMap<String, String>,
}

impl TestClient {
    /// Creates a client without any action token
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            tokens: HashMap::new(),
        }
    }

    /// Creates a client and loads its tokens from the admin page, the way
    /// the browser page does.
    ///
    /// # Panics
    ///
    /// Panics if the admin page cannot be loaded.
    pub async fn with_tokens(base_url: String) -> Self {
        let mut client = Self::new(base_url);

        let response = client.admin_page(None).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let page: Value = response.json().await.expect("Invalid admin page body");
        client.tokens = page["action_tokens"]
            .as_object()
            .expect("Admin page has no action tokens")
            .iter()
            .map(|(action, token)| (action.clone(), token.as_str().unwrap_or_default().to_string()))
            .collect();

        client
    }

    fn token(&self, action: &str) -> String {
        self.tokens.get(action).cloned().unwrap_or_default()
    }

    // ========================================================================
    // Cleanup Endpoints
    // ========================================================================

    /// GET /v1/admin/cleanup
    pub async fn admin_page(&self, deleted: Option<u64>) -> Response {
        let mut url = format!("{}/v1/admin/cleanup", self.base_url);
        if let Some(deleted) = deleted {
            url.push_str(&format!("?deleted={}", deleted));
        }
        self.client
            .get(url)
            .send()
            .await
            .expect("Admin page request failed")
    }

    /// POST /v1/admin/cleanup/run
    pub async fn start_run(&self) -> Response {
        self.client
            .post(format!("{}/v1/admin/cleanup/run", self.base_url))
            .header(ACTION_TOKEN_HEADER, self.token("cleanup_run"))
            .send()
            .await
            .expect("Start run request failed")
    }

    /// GET /v1/admin/cleanup/status
    pub async fn get_status(&self) -> Response {
        self.client
            .get(format!("{}/v1/admin/cleanup/status", self.base_url))
            .header(ACTION_TOKEN_HEADER, self.token("cleanup_status"))
            .send()
            .await
            .expect("Status request failed")
    }

    /// GET /v1/admin/cleanup/log
    pub async fn get_log(&self, limit: Option<usize>) -> Response {
        let mut url = format!("{}/v1/admin/cleanup/log", self.base_url);
        if let Some(limit) = limit {
            url.push_str(&format!("?limit={}", limit));
        }
        self.client
            .get(url)
            .header(ACTION_TOKEN_HEADER, self.token("cleanup_log"))
            .send()
            .await
            .expect("Log request failed")
    }

    /// PUT /v1/admin/cleanup/settings
    pub async fn update_settings(&self, body: Value) -> Response {
        self.client
            .put(format!("{}/v1/admin/cleanup/settings", self.base_url))
            .header(ACTION_TOKEN_HEADER, self.token("cleanup_settings"))
            .json(&body)
            .send()
            .await
            .expect("Settings request failed")
    }

    /// Poll the status endpoint until no run is in progress.
    ///
    /// # Panics
    ///
    /// Panics if the run does not finish within the timeout.
    pub async fn wait_for_run_to_finish(&self) -> Value {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(RUN_COMPLETION_TIMEOUT_MS);
        loop {
            let status: Value = self
                .get_status()
                .await
                .json()
                .await
                .expect("Invalid status body");
            if status["is_running"] == false {
                return status;
            }
            if start.elapsed() > timeout {
                panic!("Run did not finish within {}ms", RUN_COMPLETION_TIMEOUT_MS);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // ========================================================================
    // Gone and Jobs Endpoints
    // ========================================================================

    /// GET /v1/gone/{slug}
    pub async fn get_gone(&self, slug: &str) -> Response {
        self.client
            .get(format!("{}/v1/gone/{}", self.base_url, slug))
            .send()
            .await
            .expect("Gone request failed")
    }

    /// GET /v1/admin/jobs
    pub async fn list_jobs(&self) -> Response {
        self.client
            .get(format!("{}/v1/admin/jobs", self.base_url))
            .send()
            .await
            .expect("Jobs request failed")
    }

    /// GET /v1/admin/jobs/{id}/history
    pub async fn get_job_history(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/v1/admin/jobs/{}/history", self.base_url, job_id))
            .send()
            .await
            .expect("Job history request failed")
    }
}
