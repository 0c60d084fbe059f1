//! API integration tests
//!
//! Drive the full router (request tracking included) with `oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pulse::api;
use pulse::config::Config;
use pulse::context::AppContext;
use pulse::storage;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn create_test_app() -> (Router, Arc<AppContext>) {
    let config = Config::for_tests();
    let storage = storage::connect(&config.database).await.unwrap();
    storage.init().await.unwrap();
    let ctx = AppContext::new(config, storage);
    (api::create_api_router(Arc::clone(&ctx)), ctx)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn db_down() -> Value {
    json!({
        "category": "system",
        "priority": "high",
        "title": "DB down",
        "message": "Primary database is unreachable",
        "metadata": { "host": "db-1" }
    })
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = create_test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_notification_lifecycle() {
    let (app, _) = create_test_app().await;

    let (status, created) = send(&app, "POST", "/api/notifications", Some(db_down())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["type"], "alert");
    assert_eq!(created["isRead"], false);
    assert_eq!(created["isGlobal"], true);
    assert_eq!(created["metadata"]["host"], "db-1");
    assert_eq!(created["updatedAt"], Value::Null);
    let id = created["id"].as_i64().unwrap();

    let (status, count) = send(&app, "GET", "/api/notifications/unread-count", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count["count"], 1);

    let (status, list) = send(&app, "GET", "/api/notifications?isRead=false", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, read) = send(&app, "PATCH", &format!("/api/notifications/{id}/read"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["isRead"], true);
    assert!(read["updatedAt"].is_string());

    let (_, list) = send(&app, "GET", "/api/notifications?isRead=false", None).await;
    assert!(list.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "DELETE", &format!("/api/notifications/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "DELETE", &format!("/api/notifications/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_mark_all_read() {
    let (app, _) = create_test_app().await;
    for _ in 0..3 {
        send(&app, "POST", "/api/notifications", Some(db_down())).await;
    }

    let (status, body) = send(&app, "PATCH", "/api/notifications/read-all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 3);

    let (_, count) = send(&app, "GET", "/api/notifications/unread-count", None).await;
    assert_eq!(count["count"], 0);
}

#[tokio::test]
async fn test_invalid_notification_payloads() {
    let (app, _) = create_test_app().await;

    let mut empty_title = db_down();
    empty_title["title"] = json!("  ");
    let (status, _) = send(&app, "POST", "/api/notifications", Some(empty_title)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut bad_category = db_down();
    bad_category["category"] = json!("billing");
    let (status, _) = send(&app, "POST", "/api/notifications", Some(bad_category)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "PATCH", "/api/notifications/4242/read", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_survey_responses_and_analytics() {
    let (app, ctx) = create_test_app().await;

    let (status, _) = send(&app, "GET", "/api/surveys/s1/analytics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for i in 0..5 {
        let (status, _) = send(
            &app,
            "POST",
            "/api/surveys/s1/responses",
            Some(json!({
                "respondentId": format!("r{i}"),
                "status": if i == 0 { "in_progress" } else { "completed" },
                "rating": 4.5,
                "demographics": { "ageGroup": "25-34", "region": "NA" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, cached) = send(&app, "GET", "/api/surveys/s1/analytics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cached["surveyId"], "s1");
    assert_eq!(cached["totalResponses"], 5);
    assert_eq!(cached["activeRespondents"], 1);
    assert_eq!(cached["completionRate"], 80.0);
    assert_eq!(cached["demographics"]["age"]["25-34"], 5);

    let (status, realtime) = send(&app, "GET", "/api/surveys/s1/analytics/realtime", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(realtime["totalResponses"], 5);

    assert_eq!(ctx.metrics.surveys().recent_responses("s1").len(), 5);

    let (status, _) = send(
        &app,
        "POST",
        "/api/surveys/s1/responses",
        Some(json!({ "respondentId": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_requests_are_tracked_by_matched_route() {
    let (app, _) = create_test_app().await;

    send(&app, "POST", "/api/notifications", Some(db_down())).await;
    send(&app, "PATCH", "/api/notifications/77/read", None).await;
    send(&app, "PATCH", "/api/notifications/78/read", None).await;

    let (status, metrics) = send(&app, "GET", "/api/metrics/performance", None).await;
    assert_eq!(status, StatusCode::OK);

    let created = &metrics["endpoints"]["POST /api/notifications"];
    assert_eq!(created["count"], 1);
    assert_eq!(created["errors"], 0);

    let read = &metrics["endpoints"]["PATCH /api/notifications/{id}/read"];
    assert_eq!(read["count"], 2);
    assert_eq!(read["errors"], 2);

    assert_eq!(metrics["overall"]["totalRequests"], 3);
    assert_eq!(metrics["overall"]["failedRequests"], 2);
    assert_eq!(metrics["overall"]["successfulRequests"], 1);
    // The performance request itself is still in flight
    assert_eq!(metrics["activeRequests"], 1);
    assert_eq!(metrics["recentRequests"].as_array().unwrap().len(), 3);

    let (status, _) = send(&app, "POST", "/api/metrics/reset", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, metrics) = send(&app, "GET", "/api/metrics/performance", None).await;
    // Only the reset call itself completed after the reset
    assert_eq!(metrics["overall"]["totalRequests"], 1);
}

#[tokio::test]
async fn test_request_id_header() {
    let (app, _) = create_test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/hub/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_system_health_and_hub_stats() {
    let (app, _) = create_test_app().await;

    let (status, health) = send(&app, "GET", "/api/metrics/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let verdict = health["status"].as_str().unwrap();
    assert!(verdict == "healthy" || verdict == "degraded");
    assert_eq!(health["loadAverage"].as_array().unwrap().len(), 3);

    let (status, stats) = send(&app, "GET", "/api/hub/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["registry"]["connections"], 0);
    assert_eq!(stats["registry"]["capacity"], 1000);
    assert_eq!(stats["limiter"]["trackedIps"], 0);
}
