//! API integration tests.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

mod common;
use common::test_app;

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, hub) = test_app().await;

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    hub.shutdown().await;
}

#[tokio::test]
async fn test_health_reports_stopping_after_shutdown() {
    let (app, hub) = test_app().await;
    hub.shutdown().await;

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "stopping");
}

#[tokio::test]
async fn test_stats_endpoint_on_empty_hub() {
    let (app, hub) = test_app().await;

    let (status, json) = get_json(app, "/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_connections"], 0);
    assert_eq!(json["unique_identities"], 0);
    assert_eq!(json["active_rooms"], 0);
    assert!(json["rooms"].as_object().unwrap().is_empty());
    assert_eq!(json["running"], true);
    assert!(json["timestamp"].is_string());
    hub.shutdown().await;
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (app, hub) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    hub.shutdown().await;
}
