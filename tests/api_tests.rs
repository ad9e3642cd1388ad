mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use dispatch_service::api::{build_router, AppState, CORRELATION_ID_HEADER};
use dispatch_service::clients::health::HealthChecker;
use dispatch_service::config::Config;
use dispatch_service::models::message::Channel;
use dispatch_service::queue::memory::MemoryQueue;
use dispatch_service::queue::DispatchQueue;
use dispatch_service::router::NotificationRouter;
use dispatch_service::store::{MemoryStatusStore, StatusStore};

use common::{user, StubUserDirectory};

struct TestServer {
    addr: SocketAddr,
    queue: Arc<MemoryQueue>,
}

async fn start_server(user_id: Uuid) -> TestServer {
    let queue = Arc::new(MemoryQueue::default());
    let store = Arc::new(MemoryStatusStore::new());

    let router = NotificationRouter::new(
        Arc::clone(&queue) as Arc<dyn DispatchQueue>,
        Arc::clone(&store) as Arc<dyn StatusStore>,
        Arc::new(StubUserDirectory::new().with_user(user(user_id))),
    );

    let config: Config = envy::from_iter(Vec::<(String, String)>::new()).unwrap();

    let state = Arc::new(AppState {
        router,
        store,
        health_checker: HealthChecker::new(config, HashMap::new()),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, queue }
}

fn submission_body(user_id: Uuid, idempotency_key: &str) -> serde_json::Value {
    json!({
        "channel": "email",
        "user_id": user_id,
        "template_code": "welcome",
        "variables": { "name": "Ada" },
        "idempotency_key": idempotency_key,
        "priority": 5
    })
}

#[tokio::test]
async fn correlation_id_header_reaches_queued_message() {
    let user_id = Uuid::new_v4();
    let server = start_server(user_id).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/notifications", server.addr))
        .header(CORRELATION_ID_HEADER, "corr-abc")
        .json(&submission_body(user_id, "k1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    assert_eq!(
        response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some("corr-abc")
    );

    let delivery = server.queue.dequeue(Channel::Email).await.unwrap().unwrap();
    assert_eq!(delivery.message.correlation_id.as_deref(), Some("corr-abc"));
}

#[tokio::test]
async fn missing_correlation_id_is_minted_and_echoed() {
    let user_id = Uuid::new_v4();
    let server = start_server(user_id).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/notifications", server.addr))
        .json(&submission_body(user_id, "k1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let echoed = response
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap();
    assert!(Uuid::parse_str(&echoed).is_ok());

    let delivery = server.queue.dequeue(Channel::Email).await.unwrap().unwrap();
    assert_eq!(delivery.message.correlation_id.as_deref(), Some(echoed.as_str()));
}

#[tokio::test]
async fn status_endpoint_reports_queued_notification() {
    let user_id = Uuid::new_v4();
    let server = start_server(user_id).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/api/v1/notifications", server.addr))
        .json(&submission_body(user_id, "k1"))
        .send()
        .await
        .unwrap();

    let body: serde_json::Value = response.json().await.unwrap();
    let notification_id = body["data"]["notification_id"].as_str().unwrap().to_string();

    let status = client
        .get(format!(
            "http://{}/api/v1/notifications/{}",
            server.addr, notification_id
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(status.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = status.json().await.unwrap();
    assert_eq!(body["data"]["status"], "pending");

    let missing = client
        .get(format!(
            "http://{}/api/v1/notifications/notif_000000000000",
            server.addr
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}
