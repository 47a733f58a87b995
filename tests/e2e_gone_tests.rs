//! End-to-end tests for gone tracking and the jobs endpoints

mod common;

use common::{stale_product, TestClient, TestServer, RUN_COMPLETION_TIMEOUT_MS};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_deleted_products_answer_gone_when_tracked() {
    let server = TestServer::spawn().await;
    server.catalog.insert_product(&stale_product("old-lamp")).unwrap();
    server.catalog.insert_product(&stale_product("old-desk")).unwrap();
    let client = TestClient::with_tokens(server.base_url.clone()).await;

    let response = client.update_settings(json!({"gone_tracking": true})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = client.start_run().await.json().await.unwrap();
    assert_eq!(body["deleted"], 2);

    let response = client.get_gone("old-lamp").await;
    assert_eq!(response.status(), StatusCode::GONE);
    let record: Value = response.json().await.unwrap();
    assert_eq!(record["slug"], "old-lamp");
    assert_eq!(record["url"], "https://shop.example/product/old-lamp/");

    assert_eq!(client.get_gone("never-existed").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_untracked_deletions_are_not_found() {
    let server = TestServer::spawn().await;
    server.catalog.insert_product(&stale_product("old-lamp")).unwrap();
    let client = TestClient::with_tokens(server.base_url.clone()).await;

    let body: Value = client.start_run().await.json().await.unwrap();
    assert_eq!(body["deleted"], 1);

    assert_eq!(client.get_gone("old-lamp").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_jobs_are_registered_and_startup_hook_runs() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.list_jobs().await;
    assert_eq!(response.status(), StatusCode::OK);
    let jobs: Value = response.json().await.unwrap();
    let ids: Vec<&str> = jobs
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec!["housekeeping", "pending_cleanup_run", "stale_stock_cleanup"]
    );

    let start = std::time::Instant::now();
    loop {
        let history: Value = client
            .get_job_history("pending_cleanup_run")
            .await
            .json()
            .await
            .unwrap();
        if !history.as_array().unwrap().is_empty() {
            break;
        }
        assert!(
            start.elapsed() < Duration::from_millis(RUN_COMPLETION_TIMEOUT_MS),
            "startup hook never ran"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
