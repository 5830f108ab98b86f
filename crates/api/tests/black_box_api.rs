use std::sync::Arc;

use nexuscrm_core::{ProjectId, UserId};
use nexuscrm_infra::CrossModuleConfig;
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory collaborators, ephemeral port.
        let services = nexuscrm_api::app::services::build_services(&CrossModuleConfig::default())
            .expect("failed to wire services");
        let app = nexuscrm_api::app::build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn dispatched_event_is_processed_and_counted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/cross-module/events"))
        .json(&json!({
            "event_type": "user.created",
            "payload": {"user_id": "u-1", "name": "Ana"},
            "user_id": UserId::new(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["event_type"], "user.created");
    assert!(body["event_id"].is_string());

    let stats: serde_json::Value = client
        .get(srv.url("/cross-module/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let services = &stats["services"];
    assert_eq!(services["module_integration"]["events_processed"], 1);
    assert_eq!(services["event_dispatcher"]["queue_size"], 0);
    assert_eq!(services["event_dispatcher"]["max_retries"], 3);
}

#[tokio::test]
async fn malformed_events_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let empty = client
        .post(srv.url("/cross-module/events"))
        .json(&json!({"event_type": "user.created", "payload": {}, "user_id": UserId::new()}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = empty.json().await.unwrap();
    assert_eq!(body["error"], "invalid_event");

    let unknown = client
        .post(srv.url("/cross-module/events"))
        .json(&json!({"event_type": "invoice.paid", "payload": {"a": 1}, "user_id": UserId::new()}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = unknown.json().await.unwrap();
    assert_eq!(body["error"], "unknown_event_type");
}

#[tokio::test]
async fn batch_orchestration_then_relationship_lookup() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user_id = UserId::new();

    let res = client
        .post(srv.url("/cross-module/orchestrate/batch"))
        .json(&json!({
            "operations": [
                {"type": "user_creation", "data": {"user": {"id": user_id, "name": "Ana", "email": "ana@example.com"}}},
                {"type": "invoice_creation", "data": {}},
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["user"]["success"], true);
    assert_eq!(results[0]["aura_chat"]["success"], true);
    assert_eq!(results[1]["error"], "unsupported operation type");

    let related: serde_json::Value = client
        .get(srv.url(&format!("/cross-module/relationships/user/{user_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(related["user"]["id"], json!(user_id));
    assert_eq!(related["projects"].as_array().map(Vec::len), Some(1));
    assert_eq!(related["leads"].as_array().map(Vec::len), Some(1));

    let stats: serde_json::Value = client
        .get(srv.url(&format!("/cross-module/users/{user_id}/statistics")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_projects"], 1);
    assert_eq!(stats["total_email_campaigns"], 0);
}

#[tokio::test]
async fn relationship_lookup_rejects_unknown_roots() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url(&format!(
        "/cross-module/relationships/invoice/{}",
        UserId::new()
    )))
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_root_type");
}

#[tokio::test]
async fn validation_reports_rule_errors_and_caches_them() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let rule = json!({
        "rule": "user_project_association",
        "user_id": UserId::new(),
        "project_id": ProjectId::new(),
    });
    let body: serde_json::Value = client
        .post(srv.url("/cross-module/validate"))
        .json(&rule)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"], json!(["user does not exist"]));

    let cleared: serde_json::Value = client
        .delete(srv.url("/cross-module/validation-cache"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["cleared"], 1);
}

#[tokio::test]
async fn dispatcher_settings_and_queue_admin() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let stats: serde_json::Value = client
        .put(srv.url("/cross-module/dispatcher/config"))
        .json(&json!({"max_retries": 5}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["max_retries"], 5);
    assert_eq!(stats["retry_delay"], 5);

    let cleared: serde_json::Value = client
        .delete(srv.url("/cross-module/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["cleared"], 0);

    let drained: serde_json::Value = client
        .post(srv.url("/cross-module/events/process"))
        .json(&json!({"limit": 10}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(drained, json!({"processed": 0, "remaining": 0}));

    let res = client
        .post(srv.url(&format!(
            "/cross-module/dead-letters/{}/redrive",
            UserId::new()
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_mappings_can_be_edited_at_runtime() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .put(srv.url("/cross-module/event-mappings/invoice.paid"))
        .json(&json!({"listeners": ["activity.feed"], "actions": ["analytics.track_payment"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let mappings: serde_json::Value = client
        .get(srv.url("/cross-module/event-mappings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mappings["invoice.paid"]["listeners"], json!(["activity.feed"]));
    assert!(mappings["user.created"].is_object());

    let res = client
        .post(srv.url("/cross-module/events"))
        .json(&json!({"event_type": "invoice.paid", "payload": {"amount": 10}, "user_id": UserId::new()}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client
        .delete(srv.url("/cross-module/event-mappings/invoice.paid"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .delete(srv.url("/cross-module/event-mappings/invoice.paid"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
