//! HTTP API server.
//!
//! One axum router carries the chat endpoint, account management, and the
//! editor completion protocol.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/` | none | Service info |
//! | `GET`  | `/health` | none | Health check (returns version) |
//! | `POST` | `/v1/chat/completions` | `x-api-key` | OpenAI-style chat |
//! | `POST` | `/register` | none | Create a user |
//! | `POST` | `/login` | none | Check credentials |
//! | `POST` | `/api-keys` | Basic | Issue an API key |
//! | `GET`  | `/api-keys` | Basic | List the caller's keys |
//! | `DELETE` | `/api-keys/{id}` | Basic | Revoke a key |
//! | `GET`  | `/profile` | Basic | The caller's profile |
//! | `POST` | `/v1/initialize` | none | Completion-protocol capabilities |
//! | `POST` | `/v1/completions` | none | Inline code completion |
//!
//! # Error Contract
//!
//! Errors are rendered by [`crate::error::Error`]:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "No user message found." } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based editors
//! can call the completion endpoints.

use axum::{
    body::Bytes,
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::accounts::Accounts;
use crate::auth_routes;
use crate::chat::{ChatMessage, ChatService};
use crate::completion_routes;
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::db;
use crate::error::{Error, Result};
use crate::rag::RagEngine;
use crate::store::SqliteVectorStore;

/// Shared application state passed to all route handlers via axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rag: Arc<RagEngine>,
    pub accounts: Accounts,
    pub chat: ChatService,
}

impl AppState {
    pub fn new(config: Arc<Config>, rag: Arc<RagEngine>, pool: SqlitePool) -> Self {
        let accounts = Accounts::new(pool.clone(), config.auth.bcrypt_cost);
        let chat = ChatService::new(rag.clone(), ConversationStore::new(pool));
        Self {
            config,
            rag,
            accounts,
            chat,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/v1/chat/completions", post(handle_chat))
        .route("/register", post(auth_routes::handle_register))
        .route("/login", post(auth_routes::handle_login))
        .route(
            "/api-keys",
            post(auth_routes::handle_create_key).get(auth_routes::handle_list_keys),
        )
        .route("/api-keys/{id}", delete(auth_routes::handle_revoke_key))
        .route("/profile", get(auth_routes::handle_profile))
        .route("/v1/initialize", post(completion_routes::handle_initialize))
        .route("/v1/completions", post(completion_routes::handle_completions))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteVectorStore::new(pool.clone()));
    let rag = Arc::new(RagEngine::from_config(config, store)?);
    let config = Arc::new(config.clone());
    let state = AppState::new(config.clone(), rag, pool.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "HTTP server listening");
    println!("Listening on http://{}", config.server.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "service": "Motoko RAG API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "chat": "/v1/chat/completions",
            "register": "/register",
            "login": "/login",
            "api_keys": "/api-keys",
            "profile": "/profile",
            "completions": "/v1/completions",
        },
        "authentication": "x-api-key header required for chat; HTTP Basic for key management",
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ API key extractor ============

/// The owner of the `x-api-key` presented with the request.
pub struct ApiKeyUser(pub i64);

impl FromRequestParts<AppState> for ApiKeyUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Auth("missing x-api-key header".to_string()))?;
        let user_id = state.accounts.validate_api_key(key).await?;
        Ok(ApiKeyUser(user_id))
    }
}

// ============ POST /v1/chat/completions ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    /// Echoed back in the response; the configured model always answers.
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    conversation_id: Option<i64>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

/// Authentication runs before the body is read, so a bad key never costs
/// a parse, a retrieval, or a write.
async fn handle_chat(
    State(state): State<AppState>,
    ApiKeyUser(user_id): ApiKeyUser,
    body: Bytes,
) -> Result<Json<Value>> {
    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("invalid request body: {}", e)))?;

    let mut params = state.rag.settings().generation;
    if let Some(t) = request.temperature {
        params.temperature = t;
    }
    if let Some(p) = request.top_p {
        params.top_p = p;
    }
    if let Some(m) = request.max_tokens {
        params.max_output_tokens = m;
    }
    params.check().map_err(|e| Error::Validation(e.to_string()))?;

    let outcome = state
        .chat
        .complete(user_id, &request.messages, request.conversation_id, &params)
        .await?;
    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(outcome.model);

    Ok(Json(json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": outcome.answer },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": null,
            "completion_tokens": null,
            "total_tokens": null,
        },
        "conversation_id": outcome.conversation_id,
    })))
}
