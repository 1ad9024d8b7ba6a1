//! Chat UI server.
//!
//! Serves the single-page UI and a small JSON API over the chat pipeline.
//! Each browser tab creates a session with `POST /api/session` and sends
//! the returned id in the `x-session-id` header on every later call. The
//! server keeps one [`Session`] per id; requests on the same session run
//! one at a time. Sessions left idle longer than the configured timeout are
//! dropped whenever a new one is created.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Single-page UI |
//! | `GET` | `/health` | Health check |
//! | `POST` | `/api/session` | New signed-out session |
//! | `POST` | `/api/sign-up` | Create account and sign in |
//! | `POST` | `/api/sign-in` | Sign in to an existing account |
//! | `POST` | `/api/sign-out` | Sign out |
//! | `GET` | `/api/history` | Current conversation |
//! | `POST` | `/api/chat` | Run one exchange |
//!
//! Errors use the shape `{"error": {"code": "...", "message": "..."}}` and
//! never end the session.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use ragchat_core::models::Message;
use ragchat_core::pipeline::ChatPipeline;
use ragchat_core::session::Session;
use ragchat_core::store::AccountStore;
use ragchat_core::Error;

use crate::completion::create_completion;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::index::SqliteIndex;
use crate::migrate;
use crate::sqlite_store::{SqliteAccounts, SqliteConversations};

const INDEX_HTML: &str = include_str!("../frontend/index.html");

pub const SESSION_HEADER: &str = "x-session-id";

pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(3600);

struct SessionSlot {
    session: Arc<Mutex<Session>>,
    last_used: std::sync::Mutex<Instant>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new())),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ChatPipeline>,
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<RwLock<HashMap<String, SessionSlot>>>,
    session_idle: Duration,
}

impl AppState {
    pub fn new(pipeline: Arc<ChatPipeline>, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            pipeline,
            accounts,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_idle: DEFAULT_SESSION_IDLE,
        }
    }

    /// How long a session may go unused before it is dropped.
    pub fn with_session_idle(mut self, idle: Duration) -> Self {
        self.session_idle = idle;
        self
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop idle sessions, then register a fresh signed-out one.
    async fn open_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.idle_for() < self.session_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, live = sessions.len(), "dropped idle sessions");
        }
        sessions.insert(id.clone(), SessionSlot::new());
        id
    }

    async fn session(&self, headers: &HeaderMap) -> Result<Arc<Mutex<Session>>, AppError> {
        let id = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError {
                status: StatusCode::BAD_REQUEST,
                code: "missing_session".to_string(),
                message: format!("missing {} header", SESSION_HEADER),
            })?;

        let sessions = self.sessions.read().await;
        let slot = sessions.get(id).ok_or_else(|| AppError {
            status: StatusCode::NOT_FOUND,
            code: "unknown_session".to_string(),
            message: format!("unknown session: {}", id),
        })?;
        slot.touch();
        Ok(slot.session.clone())
    }
}

/// Build the router. Split from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/session", post(handle_new_session))
        .route("/api/sign-up", post(handle_sign_up))
        .route("/api/sign-in", post(handle_sign_in))
        .route("/api/sign-out", post(handle_sign_out))
        .route("/api/history", get(handle_history))
        .route("/api/chat", post(handle_chat))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Wire the SQLite stores and hosted clients, then serve until killed.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let index_pool = db::connect(&config.index.path).await?;
    migrate::migrate_index(&index_pool).await?;
    let app_pool = db::connect(&config.db.path).await?;
    migrate::migrate_app(&app_pool).await?;

    let embedder = create_embedder(&config.embedding)?;
    let completion = create_completion(&config.completion)?;
    let index = SqliteIndex::open(index_pool, embedder).await?;
    if index.is_empty().await? {
        tracing::warn!("vector index is empty; run `ragchat index` first");
    }

    let retries = config.conversation.max_retries;
    let accounts = Arc::new(SqliteAccounts::new(app_pool.clone(), retries));
    let conversations = Arc::new(SqliteConversations::new(app_pool, retries));

    let pipeline = ChatPipeline::new(
        Arc::new(index),
        completion,
        conversations,
        config.completion.model.clone(),
    )
    .with_composer(config.prompt.composer()?)
    .with_top_k(config.index.top_k)
    .with_write_mode(config.conversation.write_mode());

    let state = AppState::new(Arc::new(pipeline), accounts)
        .with_session_idle(Duration::from_secs(config.server.session_idle_secs));
    let app = router(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "chat server listening");
    println!("RAG Chat listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NoInput(_)
            | Error::InvalidQuery(_)
            | Error::MissingCredentials
            | Error::AccountRejected(_) => StatusCode::BAD_REQUEST,
            Error::NotSignedIn => StatusCode::UNAUTHORIZED,
            Error::AccountNotFound { .. } => StatusCode::NOT_FOUND,
            Error::AccountExists { .. } | Error::AlreadySignedIn { .. } => StatusCode::CONFLICT,
            Error::Completion(ragchat_core::error::CompletionError::Timeout(_)) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            Error::Completion(_) | Error::Embedding(_) => StatusCode::BAD_GATEWAY,
            Error::Persistence(ragchat_core::error::PersistenceError::Conflict { .. }) => {
                StatusCode::CONFLICT
            }
            Error::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Handlers ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    sessions: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.session_count().await,
    })
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
}

async fn handle_new_session(State(state): State<AppState>) -> Json<SessionResponse> {
    let id = state.open_session().await;
    Json(SessionResponse { session_id: id })
}

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct SignedInResponse {
    email: String,
    uid: String,
    history: Vec<Message>,
}

fn signed_in_response(session: &Session) -> Result<SignedInResponse, AppError> {
    let user = session.user().ok_or(Error::NotSignedIn)?;
    Ok(SignedInResponse {
        email: user.email.clone(),
        uid: user.uid.clone(),
        history: session
            .conversation()
            .map(|c| c.messages.clone())
            .unwrap_or_default(),
    })
}

async fn handle_sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(creds): Json<Credentials>,
) -> Result<Json<SignedInResponse>, AppError> {
    let session = state.session(&headers).await?;
    let mut session = session.lock().await;
    let conversations = state.pipeline.conversations();
    session
        .sign_up(
            state.accounts.as_ref(),
            conversations.as_ref(),
            &creds.email,
            &creds.password,
        )
        .await?;
    Ok(Json(signed_in_response(&session)?))
}

async fn handle_sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(creds): Json<Credentials>,
) -> Result<Json<SignedInResponse>, AppError> {
    let session = state.session(&headers).await?;
    let mut session = session.lock().await;
    let conversations = state.pipeline.conversations();
    session
        .sign_in(
            state.accounts.as_ref(),
            conversations.as_ref(),
            &creds.email,
            &creds.password,
        )
        .await?;
    Ok(Json(signed_in_response(&session)?))
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
}

async fn handle_sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    let session = state.session(&headers).await?;
    session.lock().await.sign_out();
    Ok(Json(StatusResponse {
        status: "signed_out".to_string(),
    }))
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<Message>,
}

async fn handle_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = state.session(&headers).await?;
    let session = session.lock().await;
    let conversation = session.conversation().ok_or(Error::NotSignedIn)?;
    Ok(Json(HistoryResponse {
        messages: conversation.messages.clone(),
    }))
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    history: Vec<Message>,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let session = state.session(&headers).await?;
    let mut session = session.lock().await;
    let reply = state.pipeline.send(&mut session, &req.message).await?;
    let history = session
        .conversation()
        .map(|c| c.messages.clone())
        .unwrap_or_default();
    Ok(Json(ChatResponse {
        reply: reply.content,
        history,
    }))
}
