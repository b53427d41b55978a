//! Control-surface tests: request validation and error shaping, exercised
//! without any remote repository.

use std::sync::Arc;
use std::time::Duration;

use amber_core::Daemon;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app(store: &std::path::Path) -> Router {
    let daemon = Daemon::builder(store)
        .poll_interval(Duration::from_secs(3600))
        .start()
        .await
        .unwrap();
    amber_daemon::routes::create_api_router()
        .with_state(Arc::new(daemon))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn sources_start_empty() {
    let store = tempfile::tempdir().unwrap();
    let app = test_app(store.path()).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/sources")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn add_source_rejects_invalid_config() {
    let store = tempfile::tempdir().unwrap();
    let app = test_app(store.path()).await;

    // No root keys.
    let config = json!({
        "id": "bad",
        "repo_url": "http://repo.test/repo",
        "blob_url": "http://repo.test/repo",
        "root_keys": [],
        "status": {"enabled": true},
    });
    let response = app
        .oneshot(json_request("POST", "/v1/sources", config))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "invalid_config");
}

#[tokio::test]
async fn remove_unknown_source_is_not_found() {
    let store = tempfile::tempdir().unwrap();
    let app = test_app(store.path()).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v1/sources/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn get_update_rejects_empty_name_and_bad_merkle() {
    let store = tempfile::tempdir().unwrap();
    let app = test_app(store.path()).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/packages/get_update",
            json!({"name": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/packages/get_update",
            json!({"name": "fortune", "merkle": "abc123"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_blob_rejects_malformed_hash() {
    let store = tempfile::tempdir().unwrap();
    let app = test_app(store.path()).await;

    let response = app
        .oneshot(json_request("POST", "/v1/blobs/nothex", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn check_system_update_reports_auto_update_off() {
    let store = tempfile::tempdir().unwrap();
    let app = test_app(store.path()).await;

    let response = app
        .oneshot(json_request("POST", "/v1/system/check_update", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"checking": false}));
}
