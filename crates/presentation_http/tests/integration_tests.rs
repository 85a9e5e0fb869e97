//! Admin API integration tests
//!
//! Exercise the HTTP surface over the assembled engine with an in-memory
//! database and a wiremock delivery target.

use std::sync::Arc;

use axum_test::TestServer;
use infrastructure::persistence::AsyncDatabase;
use infrastructure::tasks::TaskRunner;
use infrastructure::{GatewayConfig, OutboundClientConfig, ReqwestTransport};
use presentation_http::{create_router, state::AppState};
use serde_json::json;

async fn server() -> TestServer {
    let db = AsyncDatabase::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let transport = Arc::new(ReqwestTransport::new(&OutboundClientConfig::default()).unwrap());
    let tasks = Arc::new(TaskRunner::new().await.unwrap());
    let state = AppState::assemble(db, GatewayConfig::default(), transport, tasks);
    TestServer::new(create_router(state)).unwrap()
}

fn integration_body() -> serde_json::Value {
    json!({
        "orgId": 84,
        "name": "emr-sync",
        "eventType": "PATIENT_REGISTERED",
        "targetUrl": "http://svc.example/hook",
        "retryCount": 3
    })
}

#[tokio::test]
async fn health_and_readiness() {
    let server = server().await;

    let health = server.get("/health").await;
    health.assert_status_ok();
    health.assert_json_contains(&json!({"status": "ok"}));

    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    ready.assert_json_contains(&json!({"database": "up"}));
}

#[tokio::test]
async fn push_event_is_accepted() {
    let server = server().await;

    let response = server
        .post("/events")
        .json(&json!({
            "orgId": 84,
            "eventType": "PATIENT_REGISTERED",
            "payload": {"patientRid": 59071145},
            "source": "partner-api"
        }))
        .await;

    response.assert_status(axum::http::StatusCode::ACCEPTED);
    response.assert_json_contains(&json!({"status": "pending"}));
}

#[tokio::test]
async fn push_event_validation() {
    let server = server().await;

    // org id must be positive
    let bad_org = server
        .post("/events")
        .json(&json!({
            "orgId": 0,
            "eventType": "X",
            "payload": {}
        }))
        .await;
    bad_org.assert_status(axum::http::StatusCode::BAD_REQUEST);

    // event type must not contain whitespace
    let bad_type = server
        .post("/events")
        .json(&json!({
            "orgId": 84,
            "eventType": "TWO WORDS",
            "payload": {}
        }))
        .await;
    bad_type.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn integration_crud_roundtrip() {
    let server = server().await;

    // Create
    let created = server.post("/v1/integrations").json(&integration_body()).await;
    created.assert_status(axum::http::StatusCode::CREATED);
    let id = created.json::<serde_json::Value>()["id"]
        .as_str()
        .unwrap()
        .to_string();

    // List
    let listed = server.get("/v1/integrations").add_query_param("orgId", 84).await;
    listed.assert_status_ok();
    assert_eq!(listed.json::<Vec<serde_json::Value>>().len(), 1);

    // Get
    let fetched = server
        .get(&format!("/v1/integrations/{id}"))
        .add_query_param("orgId", 84)
        .await;
    fetched.assert_status_ok();
    fetched.assert_json_contains(&json!({
        "name": "emr-sync",
        "circuitState": "CLOSED",
        "isActive": true
    }));

    // Update
    let mut update = integration_body();
    update["name"] = json!("renamed");
    update["isActive"] = json!(false);
    let updated = server
        .put(&format!("/v1/integrations/{id}"))
        .json(&update)
        .await;
    updated.assert_status_ok();
    updated.assert_json_contains(&json!({"name": "renamed", "isActive": false}));

    // Delete
    let deleted = server
        .delete(&format!("/v1/integrations/{id}"))
        .add_query_param("orgId", 84)
        .await;
    deleted.assert_status(axum::http::StatusCode::NO_CONTENT);

    let gone = server
        .get(&format!("/v1/integrations/{id}"))
        .add_query_param("orgId", 84)
        .await;
    gone.assert_status_not_found();
}

#[tokio::test]
async fn integration_tenant_scope_is_enforced() {
    let server = server().await;
    let created = server.post("/v1/integrations").json(&integration_body()).await;
    let id = created.json::<serde_json::Value>()["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Another tenant cannot see it.
    let foreign = server
        .get(&format!("/v1/integrations/{id}"))
        .add_query_param("orgId", 85)
        .await;
    foreign.assert_status_not_found();
}

#[tokio::test]
async fn integration_validation_rules() {
    let server = server().await;

    // Bad URL
    let mut bad_url = integration_body();
    bad_url["targetUrl"] = json!("not a url");
    let response = server.post("/v1/integrations").json(&bad_url).await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);

    // Delayed mode without a schedule
    let mut no_schedule = integration_body();
    no_schedule["deliveryMode"] = json!("DELAYED");
    let response = server.post("/v1/integrations").json(&no_schedule).await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);

    // Signing without a secret
    let mut no_secret = integration_body();
    no_secret["signingEnabled"] = json!(true);
    let response = server.post("/v1/integrations").json(&no_secret).await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signing_secret_is_write_only() {
    let server = server().await;
    let mut body = integration_body();
    body["signingEnabled"] = json!(true);
    body["signingSecret"] = json!("topsecret");

    let created = server.post("/v1/integrations").json(&body).await;
    created.assert_status(axum::http::StatusCode::CREATED);

    let json_body = created.json::<serde_json::Value>();
    assert_eq!(json_body["signingEnabled"], json!(true));
    assert_eq!(json_body["hasSigningSecret"], json!(true));
    assert!(json_body.get("signingSecret").is_none());
}

#[tokio::test]
async fn logs_listing_and_bulk_retry() {
    let server = server().await;

    let empty = server
        .get("/v1/logs")
        .add_query_param("orgId", 84)
        .await;
    empty.assert_status_ok();
    assert!(empty.json::<Vec<serde_json::Value>>().is_empty());

    // Bulk retry with unknown traces reports them as failed.
    let retry = server
        .post("/v1/logs/retry")
        .json(&json!({
            "orgId": 84,
            "traceIds": ["00000000-0000-0000-0000-000000000001", "garbage"]
        }))
        .await;
    retry.assert_status_ok();
    let body = retry.json::<serde_json::Value>();
    assert_eq!(body["requeued"], json!(0));
    assert_eq!(body["failed"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn scheduled_cancel_by_match_with_no_entries() {
    let server = server().await;
    let response = server
        .post("/v1/scheduled/cancel-by-match")
        .json(&json!({
            "orgId": 84,
            "patientRid": 59071145,
            "scheduledDateTime": "2026-08-02T10:00:00Z"
        }))
        .await;
    response.assert_status_ok();
    response.assert_json_contains(&json!({"cancelled": 0}));
}

#[tokio::test]
async fn dlq_listing_and_missing_entry() {
    let server = server().await;

    let empty = server.get("/v1/dlq").await;
    empty.assert_status_ok();
    assert!(empty.json::<Vec<serde_json::Value>>().is_empty());

    let missing = server
        .post("/v1/dlq/00000000-0000-0000-0000-000000000001/resolve")
        .json(&json!({"orgId": 84, "note": "n/a"}))
        .await;
    missing.assert_status_not_found();
}

#[tokio::test]
async fn stats_snapshot_shape() {
    let server = server().await;
    let response = server.get("/v1/stats").await;
    response.assert_status_ok();

    let body = response.json::<serde_json::Value>();
    assert!(body.get("executionsByStatus").is_some());
    assert!(body.get("processingTimeMs").is_some());
    assert!(body.get("checkpoints").is_some());
    assert!(body.get("dlqByStatus").is_some());
    assert!(body.get("tasks").is_some());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let server = server().await;
    let response = server.get("/health").await;
    assert!(response.headers().contains_key("X-Request-Id"));

    let echoed = server
        .get("/health")
        .add_header("X-Request-Id", "my-correlation-id")
        .await;
    assert_eq!(
        echoed.headers().get("X-Request-Id").unwrap(),
        "my-correlation-id"
    );
}
