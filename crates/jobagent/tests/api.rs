mod common;

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::harness;
use jobagent::api::{self, ApiState};
use jobagent::broker::{TaskBroker, AUTOMATION_SERVICE};
use jobagent::hitl::WebhookValidator;

const API_KEY: &str = "test-api-key";
const WEBHOOK_TOKEN: &str = "webhook-token";

async fn test_router(h: &common::Harness) -> axum::Router {
    let state = ApiState::new(
        h.dispatcher.clone(),
        std::sync::Arc::new(jobagent::hitl::HitlController::new(h.dispatcher.clone())),
        API_KEY.to_string(),
        Some(WebhookValidator::new(WEBHOOK_TOKEN)),
    );
    api::router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn apply_requires_the_api_key() {
    let h = harness().await;
    let app = test_router(&h).await;

    let response = app
        .oneshot(
            Request::post(format!("/jobs/apply/{}", h.role_id))
                .header("x-api-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn apply_returns_task_and_application_ids() {
    let h = harness().await;
    let app = test_router(&h).await;

    let response = app
        .oneshot(
            Request::post(format!("/jobs/apply/{}", h.role_id))
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert!(body["task_id"].as_str().unwrap().starts_with("job_application_"));
    assert!(body["application_id"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn applications_filter_is_validated_against_the_enum() {
    let h = harness().await;
    let app = test_router(&h).await;

    let response = app
        .oneshot(
            Request::get("/applications?status=definitely-bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ingest_profile_rate_limits_per_caller() {
    let h = harness().await;

    let payload = json!({
        "headline": "Engineer",
        "summary": "Summary",
        "preferences": {"email": "ada@example.com"},
    })
    .to_string();

    let app = test_router(&h).await;
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let response = app
            .clone()
            .oneshot(
                Request::post("/ingest/profile")
                    .header("x-api-key", API_KEY)
                    .header("x-forwarded-for", "203.0.113.10")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        statuses.push(response.status());
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::OK));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn health_degrades_without_an_automation_heartbeat() {
    let h = harness().await;
    let app = test_router(&h).await;

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = body_json(response).await;
    assert_eq!(body["services"]["automation"], "unhealthy");

    // A fresh heartbeat brings it back to 200.
    h.broker
        .heartbeat(AUTOMATION_SERVICE, json!({"status": "idle"}))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn webhook_rejects_bad_signatures_and_accepts_good_ones() {
    let h = harness().await;
    let app = test_router(&h).await;

    let form = "From=%2B15550001111&Body=help";

    let response = app
        .clone()
        .oneshot(
            Request::post("/webhooks/sms")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::HOST, "agent.test")
                .header("x-twilio-signature-256", "bm90LWEtc2lnbmF0dXJl")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let validator = WebhookValidator::new(WEBHOOK_TOKEN);
    let params = BTreeMap::from([
        ("From".to_string(), "+15550001111".to_string()),
        ("Body".to_string(), "help".to_string()),
    ]);
    let signature = validator.sign("https://agent.test/webhooks/sms", &params);

    let response = app
        .oneshot(
            Request::post("/webhooks/sms")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::HOST, "agent.test")
                .header("x-twilio-signature-256", signature)
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The command produced a queued reply.
    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Job Agent Commands"));
}
