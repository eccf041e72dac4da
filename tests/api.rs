use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use storefront_chat::{
    build_app,
    clock::ManualClock,
    config::ChatConfig,
    services::ChatEngine,
    storage::memory::{MemoryEphemeralStore, MemoryStore},
    timer::ManualTimers,
    AppState,
};

fn app() -> Router {
    let clock = Arc::new(ManualClock::default());
    let engine = ChatEngine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryEphemeralStore::new()),
        Arc::new(ManualTimers::new(clock.clone())),
        clock,
        &ChatConfig::default(),
    )
    .unwrap();
    build_app(AppState {
        engine: Arc::new(engine),
        attachments: None,
    })
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
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
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn open_conversation(app: &Router) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/v1/conversations",
        Some(json!({
            "store_id": "store-1",
            "customer_id": "cust-1",
            "customer": { "name": "Alice" },
            "store_admin_id": "admin-1",
            "admin": { "name": "Bob" },
            "initial_message": {
                "sender_type": "customer",
                "content": "Hi, is this in stock?"
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_check_responds() {
    let app = app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn conversation_lifecycle_over_http() {
    let app = app();
    let id = open_conversation(&app).await;

    let (_, conversation) = call(&app, Method::GET, &format!("/api/v1/conversations/{}", id), None).await;
    assert_eq!(conversation["unread_count"]["admin"], 1);
    assert_eq!(conversation["last_message"]["content"], "Hi, is this in stock?");

    let (status, reply) = call(
        &app,
        Method::POST,
        &format!("/api/v1/conversations/{}/messages", id),
        Some(json!({
            "sender_id": "admin-1",
            "sender_type": "store_admin",
            "sender_name": "Bob",
            "content": "Yes!"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["status"], "sent");

    let (status, read) = call(
        &app,
        Method::POST,
        &format!("/api/v1/conversations/{}/read", id),
        Some(json!({ "reader_id": "admin-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["message_ids"].as_array().unwrap().len(), 1);

    let (_, messages) = call(
        &app,
        Method::GET,
        &format!("/api/v1/conversations/{}/messages?limit=10", id),
        None,
    )
    .await;
    let contents: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["Hi, is this in stock?", "Yes!"]);

    let (_, listed) = call(&app, Method::GET, "/api/v1/stores/store-1/conversations", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["unread_count"]["admin"], 0);
    assert_eq!(listed[0]["unread_count"]["customer"], 1);
}

#[tokio::test]
async fn reactions_and_deletes_over_http() {
    let app = app();
    let id = open_conversation(&app).await;
    let (_, messages) = call(
        &app,
        Method::GET,
        &format!("/api/v1/conversations/{}/messages", id),
        None,
    )
    .await;
    let message_id = messages[0]["id"].as_str().unwrap().to_string();

    for emoji in ["👍", "😂"] {
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/v1/messages/{}/reactions", message_id),
            Some(json!({ "user_id": "admin-1", "user_name": "Bob", "emoji": emoji })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, reactions) = call(
        &app,
        Method::GET,
        &format!("/api/v1/messages/{}/reactions", message_id),
        None,
    )
    .await;
    assert_eq!(reactions.as_array().unwrap().len(), 1);
    assert_eq!(reactions[0]["emoji"], "😂");

    let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/messages/{}", message_id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, message) = call(&app, Method::GET, &format!("/api/v1/messages/{}", message_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!message["deleted_at"].is_null());

    let (status, body) = call(
        &app,
        Method::PUT,
        &format!("/api/v1/messages/{}", message_id),
        Some(json!({ "content": "edited" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let app = app();
    let missing = uuid::Uuid::new_v4();

    let (status, body) = call(&app, Method::GET, &format!("/api/v1/conversations/{}", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let id = open_conversation(&app).await;
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/v1/conversations/{}/messages", id),
        Some(json!({
            "sender_id": "cust-1",
            "sender_type": "customer",
            "sender_name": "Alice",
            "content": "   "
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/v1/conversations/{}/read", id),
        Some(json!({ "reader_id": "stranger" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/v1/conversations/{}/read", id),
        Some(json!({ "reader_id": "admin-1", "reader_role": "customer" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, conversation) = call(&app, Method::GET, &format!("/api/v1/conversations/{}", id), None).await;
    assert_eq!(conversation["unread_count"]["admin"], 1);
}

#[tokio::test]
async fn typing_and_presence_over_http() {
    let app = app();
    let id = open_conversation(&app).await;

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/v1/conversations/{}/typing", id),
        Some(json!({ "user_id": "cust-1", "user_name": "Alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, typers) = call(&app, Method::GET, &format!("/api/v1/conversations/{}/typing", id), None).await;
    assert_eq!(typers[0]["user_id"], "cust-1");

    let (status, _) = call(
        &app,
        Method::DELETE,
        &format!("/api/v1/conversations/{}/typing?user_id=cust-1&user_name=Alice", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, typers) = call(&app, Method::GET, &format!("/api/v1/conversations/{}/typing", id), None).await;
    assert!(typers.as_array().unwrap().is_empty());

    let (_, status_before) = call(&app, Method::GET, "/api/v1/presence/cust-1", None).await;
    assert_eq!(status_before["is_online"], false);
    call(&app, Method::POST, "/api/v1/presence/cust-1/heartbeat", None).await;
    let (_, status_after) = call(&app, Method::GET, "/api/v1/presence/cust-1", None).await;
    assert_eq!(status_after["is_online"], true);
}

#[tokio::test]
async fn uploads_are_rejected_when_disabled() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/attachments")
        .header("content-type", "multipart/form-data; boundary=X")
        .body(Body::from(
            "--X\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--X--\r\n",
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
