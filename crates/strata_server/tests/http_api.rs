//! REST surface tests driven through the router.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use strata_server::http::router;
use strata_server::{ServerConfig, StorageService};

const ADMIN_KEY: &str = "admin_test_key";

fn app() -> (tempfile::TempDir, axum::Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new(dir.path(), ADMIN_KEY);
    let service = StorageService::open_for_tests(config).unwrap();
    (dir, router(service))
}

fn post_json(path: &str, token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_token_is_unauthenticated() {
    let (_dir, app) = app();
    let request = Request::builder()
        .method("GET")
        .uri("/projects")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test(flavor = "multi_thread")]
async fn project_create_returns_key_and_404_maps() {
    let (_dir, app) = app();

    let response = app
        .clone()
        .oneshot(post_json("/projects", ADMIN_KEY, r#"{"id":"p1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert!(body["api_key"]
        .as_str()
        .unwrap()
        .starts_with("proj_p1_admin_"));

    let request = Request::builder()
        .method("GET")
        .uri("/projects/nope")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_KEY}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn idempotency_key_replays_response() {
    let (_dir, app) = app();

    let mut first = post_json("/projects", ADMIN_KEY, r#"{"id":"p1"}"#);
    first
        .headers_mut()
        .insert("x-idempotency-key", "abc".parse().unwrap());
    let response = app.clone().oneshot(first).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let first_body = body_json(response).await;

    // Replay: same key and body return the identical response (including
    // the one-time api key), even though the project now exists.
    let mut replay = post_json("/projects", ADMIN_KEY, r#"{"id":"p1"}"#);
    replay
        .headers_mut()
        .insert("x-idempotency-key", "abc".parse().unwrap());
    let response = app.clone().oneshot(replay).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get("x-idempotent-replay").unwrap(),
        "true"
    );
    let replay_body = body_json(response).await;
    assert_eq!(first_body, replay_body);

    // Without the key the duplicate is a conflict.
    let response = app
        .oneshot(post_json("/projects", ADMIN_KEY, r#"{"id":"p1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_endpoint_serves_prometheus_text() {
    let (_dir, app) = app();
    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("strata_table_locks_held"));
    assert!(text.contains("strata_imports_completed_total"));
}
