//! Account routes: registration, login, API key management, and profile.
//!
//! Key management and profile use HTTP Basic credentials; registration and
//! login take JSON bodies.

use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    http::{header, request::Parts},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::server::AppState;

/// A user authenticated with HTTP Basic credentials.
pub struct BasicUser(pub i64);

impl FromRequestParts<AppState> for BasicUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Auth("missing credentials".to_string()))?;
        let (username, password) = parse_basic(header_value)
            .ok_or_else(|| Error::Auth("malformed Basic credentials".to_string()))?;
        let user = state.accounts.authenticate(&username, &password).await?;
        Ok(BasicUser(user.id))
    }
}

/// A JSON body whose rejection renders as a `bad_request` error body.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

/// A path parameter whose rejection renders as a `bad_request` error body.
pub struct PathParam<T>(pub T);

impl<T, S> FromRequestParts<S> for PathParam<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(PathParam(value))
    }
}

/// Decode `Basic <base64(user:pass)>`.
fn parse_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?.trim();
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

// ============ POST /register ============

#[derive(Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: String,
    #[serde(default)]
    email: Option<String>,
}

pub async fn handle_register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<Json<Value>> {
    let user = state
        .accounts
        .create_user(&req.username, &req.password, req.email.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "User registered successfully",
        "user_id": user.id,
    })))
}

// ============ POST /login ============

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

pub async fn handle_login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<Value>> {
    let user = state.accounts.authenticate(&req.username, &req.password).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Login successful",
        "user_id": user.id,
        "username": user.username,
    })))
}

// ============ /api-keys ============

#[derive(Deserialize, Default)]
pub struct CreateKeyRequest {
    #[serde(default)]
    name: Option<String>,
}

pub async fn handle_create_key(
    State(state): State<AppState>,
    BasicUser(user_id): BasicUser,
    body: Bytes,
) -> Result<Json<Value>> {
    // The body is optional; an empty one means no label.
    let req: CreateKeyRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateKeyRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| Error::Validation(format!("invalid request body: {}", e)))?
    };
    let issued = state
        .accounts
        .create_api_key(user_id, req.name.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "API key created. Store it now; it will not be shown again.",
        "id": issued.key.id,
        "api_key": issued.secret,
        "name": issued.key.label,
    })))
}

#[derive(Serialize)]
pub struct ApiKeyView {
    id: i64,
    name: String,
    key_prefix: String,
    created_at: String,
    last_used: Option<String>,
}

pub async fn handle_list_keys(
    State(state): State<AppState>,
    BasicUser(user_id): BasicUser,
) -> Result<Json<Vec<ApiKeyView>>> {
    let keys = state.accounts.list_api_keys(user_id).await?;
    Ok(Json(
        keys.into_iter()
            .map(|k| ApiKeyView {
                id: k.id,
                name: k.label,
                key_prefix: k.key_prefix,
                created_at: format_ts(k.created_at),
                last_used: k.last_used_at.map(format_ts),
            })
            .collect(),
    ))
}

pub async fn handle_revoke_key(
    State(state): State<AppState>,
    BasicUser(user_id): BasicUser,
    PathParam(key_id): PathParam<i64>,
) -> Result<Json<Value>> {
    state.accounts.revoke_api_key(user_id, key_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "API key revoked",
    })))
}

// ============ GET /profile ============

pub async fn handle_profile(
    State(state): State<AppState>,
    BasicUser(user_id): BasicUser,
) -> Result<Json<Value>> {
    let user = state.accounts.get_user(user_id).await?;
    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "created_at": format_ts(user.created_at),
    })))
}
