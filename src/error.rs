//! Request-scoped error taxonomy.
//!
//! Infrastructure and CLI code returns `anyhow::Result`. Anything that can
//! fail while serving a single request is mapped into [`Error`], which knows
//! its HTTP status and its JSON-RPC code.
//!
//! HTTP error bodies look like:
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "invalid API key" } }
//! ```

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::reply::FormatError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid API key or credentials.
    #[error("{0}")]
    Auth(String),

    /// Malformed request, e.g. no user message.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector store query failed: {0}")]
    StoreQuery(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Embedding(_) | Error::StoreQuery(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Generation(_) | Error::Format(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(_) => "unauthorized",
            Error::Validation(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Embedding(_) | Error::StoreQuery(_) => "retrieval_unavailable",
            Error::Generation(_) => "generation_failed",
            Error::Format(_) => "format_error",
            Error::Database(_) | Error::Internal(_) => "internal",
        }
    }

    /// JSON-RPC 2.0 error code.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            Error::Validation(_) => -32602,
            Error::NotFound(_) => -32601,
            _ => -32603,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }

        // Internal details stay in the log.
        let message = match &self {
            Error::Database(_) | Error::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = Json(ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        });

        if matches!(self, Error::Auth(_)) {
            (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"mrag\"")],
                body,
            )
                .into_response()
        } else {
            (status, body).into_response()
        }
    }
}
