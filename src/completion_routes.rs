//! Editor completion protocol: `/v1/initialize` and `/v1/completions`.
//!
//! These endpoints never surface generation failures to the editor; a
//! failed or empty completion is an empty list.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use crate::server::AppState;

const DISPLAY_CHARS: usize = 50;

fn parse_body(body: &Bytes) -> Result<Value, Response> {
    serde_json::from_slice(body).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid JSON" })),
        )
            .into_response()
    })
}

pub async fn handle_initialize(body: Bytes) -> Response {
    if let Err(rejection) = parse_body(&body) {
        return rejection;
    }
    tracing::info!("completion client initialized");
    Json(json!({
        "result": {
            "name": "Motoko Assistant",
            "version": "1.0",
            "capabilities": {
                "completions": true,
                "completionsInline": true,
                "dynamicRegistration": true,
            }
        }
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    language_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    text: String,
    display_text: String,
    uuid: String,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    completions: Vec<CompletionItem>,
}

pub async fn handle_completions(State(state): State<AppState>, body: Bytes) -> Response {
    let value = match parse_body(&body) {
        Ok(v) => v,
        Err(rejection) => return rejection,
    };
    let request: CompletionRequest = serde_json::from_value(value).unwrap_or_default();
    let empty = || {
        Json(CompletionResponse {
            completions: Vec::new(),
        })
        .into_response()
    };

    if !request.language_id.eq_ignore_ascii_case("motoko") {
        return empty();
    }

    let started = Instant::now();
    let text = match state.rag.complete_code(&request.prompt).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::info!("empty completion");
            return empty();
        }
        Err(e) => {
            tracing::warn!(error = %e, "completion failed");
            return empty();
        }
    };

    tracing::info!(
        latency_ms = started.elapsed().as_millis() as u64,
        prompt = %request.prompt.chars().take(DISPLAY_CHARS).collect::<String>(),
        "completion served"
    );

    Json(CompletionResponse {
        completions: vec![CompletionItem {
            display_text: display_text(&text),
            text,
            uuid: uuid::Uuid::new_v4().to_string(),
        }],
    })
    .into_response()
}

/// First line, cut to 50 chars with `...`, when the completion is long;
/// otherwise the whole completion.
fn display_text(text: &str) -> String {
    if text.chars().count() > DISPLAY_CHARS {
        let first_line = text.split('\n').next().unwrap_or_default();
        let head: String = first_line.chars().take(DISPLAY_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_completion_shown_whole() {
        assert_eq!(display_text("let x = 1;\nx"), "let x = 1;\nx");
    }

    #[test]
    fn long_completion_uses_first_line() {
        let text = format!("public func go() : async () {{\n{}\n}}", "  x += 1;\n".repeat(10));
        assert_eq!(display_text(&text), "public func go() : async () {...");

        let long_line = "a".repeat(80);
        assert_eq!(display_text(&long_line), format!("{}...", "a".repeat(50)));
    }
}
