//! HTTP API tests driving the router in-process.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use ragchat::server::{router, AppState, SESSION_HEADER};
use ragchat::sqlite_store::{SqliteAccounts, SqliteConversations};
use ragchat::{db, migrate};
use ragchat_core::completion::{CompletionProvider, CompletionRequest};
use ragchat_core::error::CompletionError;
use ragchat_core::pipeline::ChatPipeline;
use ragchat_core::store::memory::InMemoryIndex;

struct Echo;

#[async_trait]
impl CompletionProvider for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let query = request.prompt.rsplit('\n').next().unwrap_or_default();
        Ok(format!("echo: {}", query))
    }
}

async fn app() -> (TempDir, Router) {
    app_with_idle(ragchat::server::DEFAULT_SESSION_IDLE).await
}

async fn app_with_idle(idle: Duration) -> (TempDir, Router) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("app.sqlite")).await.unwrap();
    migrate::migrate_app(&pool).await.unwrap();

    let conversations = Arc::new(SqliteConversations::new(pool.clone(), 0));
    let pipeline = ChatPipeline::new(
        Arc::new(InMemoryIndex::default()),
        Arc::new(Echo),
        conversations,
        "gpt-4",
    );
    let state = AppState::new(Arc::new(pipeline), Arc::new(SqliteAccounts::new(pool, 0)))
        .with_session_idle(idle);
    (tmp, router(state))
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    session: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(id) = session {
        req = req.header(SESSION_HEADER, id);
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn new_session(app: &Router) -> String {
    let (status, body) = call(app, "POST", "/api/session", None, None).await;
    assert_eq!(status, StatusCode::OK);
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let (_tmp, app) = app().await;
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_serves_ui() {
    let (_tmp, app) = app().await;
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Signed in as: "));
}

#[tokio::test]
async fn test_full_chat_flow() {
    let (_tmp, app) = app().await;
    let sid = new_session(&app).await;

    let creds = json!({"email": "ada@example.com", "password": "secret1"});
    let (status, body) = call(&app, "POST", "/api/sign-up", Some(&sid), Some(creds.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["history"], json!([]));

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(&sid),
        Some(json!({"message": "  hello there  "})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "echo: hello there");
    assert_eq!(body["history"][0], json!({"role": "user", "content": "hello there"}));
    assert_eq!(body["history"][1]["role"], "assistant");

    let (status, _) = call(&app, "POST", "/api/sign-out", Some(&sid), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "GET", "/api/history", Some(&sid), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "not_signed_in");

    // A fresh session sees the stored history after signing in.
    let other = new_session(&app).await;
    let (status, body) = call(&app, "POST", "/api/sign-in", Some(&other), Some(creds)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_auth_errors_keep_session_usable() {
    let (_tmp, app) = app().await;
    let sid = new_session(&app).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/sign-in",
        Some(&sid),
        Some(json!({"email": "", "password": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_credentials");

    let (status, body) = call(
        &app,
        "POST",
        "/api/sign-in",
        Some(&sid),
        Some(json!({"email": "ghost@example.com", "password": "secret1"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "account_not_found");

    let (status, body) = call(
        &app,
        "POST",
        "/api/sign-up",
        Some(&sid),
        Some(json!({"email": "ghost@example.com", "password": "123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "account_rejected");

    let (status, _) = call(
        &app,
        "POST",
        "/api/sign-up",
        Some(&sid),
        Some(json!({"email": "ghost@example.com", "password": "123456"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        "/api/chat",
        Some(&sid),
        Some(json!({"message": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_query");
}

#[tokio::test]
async fn test_session_header_required() {
    let (_tmp, app) = app().await;

    let (status, body) = call(&app, "GET", "/api/history", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_session");

    let (status, body) = call(&app, "GET", "/api/history", Some("not-a-session"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_session");
}

#[tokio::test]
async fn test_active_sessions_are_kept() {
    let (_tmp, app) = app().await;
    for _ in 0..3 {
        new_session(&app).await;
    }
    let (_, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(body["sessions"], 3);
}

#[tokio::test]
async fn test_idle_sessions_are_dropped_on_new_session() {
    let (_tmp, app) = app_with_idle(Duration::ZERO).await;
    let first = new_session(&app).await;
    for _ in 0..50 {
        new_session(&app).await;
    }
    let (_, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(body["sessions"], 1);

    let (status, body) = call(&app, "GET", "/api/history", Some(&first), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_session");
}
