//! HTTP API tests against an in-process server with a keyword embedder,
//! a scripted generator, an in-memory vector store, and a temp SQLite
//! database.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;

use motoko_rag::config::Config;
use motoko_rag::conversation::ConversationStore;
use motoko_rag::db;
use motoko_rag::embedding::Embedder;
use motoko_rag::generation::{GenerationParams, Generator};
use motoko_rag::migrate::apply_schema;
use motoko_rag::models::{CollectionEntry, Metadata};
use motoko_rag::rag::{RagEngine, RagSettings};
use motoko_rag::retriever::ContextRetriever;
use motoko_rag::server::{router, AppState};
use motoko_rag::store::{InMemoryVectorStore, VectorStore};

struct KeywordEmbedder;

const AXES: [&str; 3] = ["actor", "stable", "async"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        AXES.len()
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                AXES.iter()
                    .map(|w| lower.matches(w).count() as f32 + 0.01)
                    .collect()
            })
            .collect())
    }
}

/// Returns a fixed reply (or fails) and records prompts.
struct ScriptedGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted-model"
    }
    async fn complete(&self, prompt: &str, _params: &GenerationParams) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Some(r) => Ok(r.clone()),
            None => bail!("upstream quota exceeded"),
        }
    }
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    pool: SqlitePool,
    generator: Arc<ScriptedGenerator>,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn conversation_count(&self) -> i64 {
        ConversationStore::new(self.pool.clone()).count().await.unwrap()
    }

    /// Register `name` and issue an API key for them.
    async fn user_with_key(&self, name: &str) -> (String, String) {
        let resp = self
            .client
            .post(self.url("/register"))
            .json(&json!({"username": name, "password": "password123"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let auth = basic(name, "password123");
        let resp: Value = self
            .client
            .post(self.url("/api-keys"))
            .header("authorization", &auth)
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        (auth, resp["api_key"].as_str().unwrap().to_string())
    }
}

fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
}

async fn spawn(reply: Option<&str>) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("api.sqlite")).await.unwrap();
    apply_schema(&pool).await.unwrap();

    let store = Arc::new(InMemoryVectorStore::new());
    let samples = ["actor Counter { }", "stable var count = 0;", "async func tick() {}"];
    let mut entries = Vec::new();
    for (i, text) in samples.iter().enumerate() {
        let embedding = KeywordEmbedder
            .embed(&[text.to_string()])
            .await
            .unwrap()
            .remove(0);
        entries.push(CollectionEntry {
            id: format!("motoko_sample_{i}"),
            text: text.to_string(),
            metadata: Metadata::new(),
            embedding,
        });
    }
    store.add("motoko_code_samples", &entries).await.unwrap();

    let mut config = Config::minimal();
    config.db.path = tmp.path().join("api.sqlite");
    config.auth.bcrypt_cost = 4;

    let generator = Arc::new(ScriptedGenerator {
        reply: reply.map(str::to_string),
        prompts: Mutex::new(Vec::new()),
    });
    let retriever = ContextRetriever::new(
        Arc::new(KeywordEmbedder),
        store,
        config.collections.code.clone(),
        config.collections.docs.clone(),
    );
    let rag = RagEngine::new(retriever, generator.clone(), RagSettings::from_config(&config));
    let state = AppState::new(Arc::new(config), Arc::new(rag), pool.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        _tmp: tmp,
        base: format!("http://{}", addr),
        pool,
        generator,
        client: reqwest::Client::new(),
    }
}

const REPLY: &str = "Use an actor with a stable var.\n<<<HISTORY>>>\nUser asked how to keep a counter.";

#[tokio::test]
async fn health_and_root() {
    let server = spawn(Some(REPLY)).await;
    let health: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let root: Value = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["endpoints"]["chat"], "/v1/chat/completions");
}

#[tokio::test]
async fn account_and_key_management() {
    let server = spawn(Some(REPLY)).await;
    let c = &server.client;

    let resp = c
        .post(server.url("/register"))
        .json(&json!({"username": "alice", "password": "password123", "email": "a@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let dup = c
        .post(server.url("/register"))
        .json(&json!({"username": "alice", "password": "password123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let login = c
        .post(server.url("/login"))
        .json(&json!({"username": "alice", "password": "wrong-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::UNAUTHORIZED);

    let login: Value = c
        .post(server.url("/login"))
        .json(&json!({"username": "alice", "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(login["success"], true);
    assert_eq!(login["username"], "alice");

    let auth = basic("alice", "password123");
    let created: Value = c
        .post(server.url("/api-keys"))
        .header("authorization", &auth)
        .json(&json!({"name": "laptop"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let secret = created["api_key"].as_str().unwrap();
    assert!(secret.starts_with("mk_"));
    assert_eq!(created["name"], "laptop");

    let keys: Value = c
        .get(server.url("/api-keys"))
        .header("authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let keys = keys.as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["key_prefix"], &secret[..8]);
    assert!(!keys[0].to_string().contains(secret));

    let profile: Value = c
        .get(server.url("/profile"))
        .header("authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["username"], "alice");
    assert_eq!(profile["email"], "a@example.com");

    let no_auth = c.get(server.url("/profile")).send().await.unwrap();
    assert_eq!(no_auth.status(), StatusCode::UNAUTHORIZED);
    assert!(no_auth.headers().contains_key("www-authenticate"));

    let key_id = keys[0]["id"].as_i64().unwrap();
    let revoked = c
        .delete(server.url(&format!("/api-keys/{}", key_id)))
        .header("authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(revoked.status(), StatusCode::OK);

    let again = c
        .delete(server.url(&format!("/api-keys/{}", key_id)))
        .header("authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_account_requests_are_bad_request() {
    let server = spawn(Some(REPLY)).await;
    let c = &server.client;

    let missing_field = c
        .post(server.url("/register"))
        .json(&json!({"username": "alice"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_field.status(), StatusCode::BAD_REQUEST);
    let body: Value = missing_field.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let not_json = c
        .post(server.url("/login"))
        .header("content-type", "application/json")
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
    let body: Value = not_json.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let (auth, _) = server.user_with_key("alice").await;

    let no_body = c
        .post(server.url("/api-keys"))
        .header("authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(no_body.status(), StatusCode::OK);

    let bad_body = c
        .post(server.url("/api-keys"))
        .header("authorization", &auth)
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_body.status(), StatusCode::BAD_REQUEST);

    let bad_id = c
        .delete(server.url("/api-keys/abc"))
        .header("authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
    let body: Value = bad_id.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn chat_requires_api_key_and_persists_nothing() {
    let server = spawn(Some(REPLY)).await;

    let missing = server
        .client
        .post(server.url("/v1/chat/completions"))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    // A bad key is rejected before the (invalid) body is looked at.
    let bad = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", "mk_notarealkey")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);
    let body: Value = bad.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    assert_eq!(server.conversation_count().await, 0);
    assert!(server.generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_answers_and_continues_conversation() {
    let server = spawn(Some(REPLY)).await;
    let (_, key) = server.user_with_key("bob").await;

    let first: Value = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", &key)
        .json(&json!({
            "model": "motoko-assistant",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "How do I keep a stable counter in an actor?"}
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["object"], "chat.completion");
    assert!(first["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(first["model"], "motoko-assistant");
    assert_eq!(first["choices"][0]["index"], 0);
    assert_eq!(first["choices"][0]["message"]["role"], "assistant");
    assert_eq!(
        first["choices"][0]["message"]["content"],
        "Use an actor with a stable var."
    );
    assert_eq!(first["choices"][0]["finish_reason"], "stop");
    assert!(first["usage"]["total_tokens"].is_null());
    let conversation_id = first["conversation_id"].as_i64().unwrap();

    {
        let prompts = server.generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("User Question: How do I keep a stable counter in an actor?"));
        assert!(prompts[0].contains("stable var count = 0;"));
    }

    let second: Value = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", &key)
        .json(&json!({
            "conversation_id": conversation_id,
            "messages": [{"role": "user", "content": "And async?"}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["conversation_id"].as_i64(), Some(conversation_id));
    assert_eq!(second["model"], "scripted-model");

    let prompts = server.generator.prompts.lock().unwrap();
    assert!(prompts[1].contains("User asked how to keep a counter."));
    assert!(prompts[1].contains("User Question: And async?"));
    drop(prompts);

    assert_eq!(server.conversation_count().await, 1);
}

#[tokio::test]
async fn chat_rejects_missing_user_message() {
    let server = spawn(Some(REPLY)).await;
    let (_, key) = server.user_with_key("carol").await;

    let resp = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", &key)
        .json(&json!({"messages": [{"role": "assistant", "content": "hello"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "No user message found.");
    assert_eq!(server.conversation_count().await, 0);
}

#[tokio::test]
async fn chat_rejects_out_of_range_sampling() {
    let server = spawn(Some(REPLY)).await;
    let (_, key) = server.user_with_key("gina").await;

    for overrides in [
        json!({"temperature": 3.5}),
        json!({"temperature": -0.1}),
        json!({"top_p": 0.0}),
        json!({"top_p": 1.5}),
        json!({"max_tokens": 0}),
    ] {
        let mut body = json!({"messages": [{"role": "user", "content": "hi"}]});
        body.as_object_mut()
            .unwrap()
            .extend(overrides.as_object().unwrap().clone());
        let resp = server
            .client
            .post(server.url("/v1/chat/completions"))
            .header("x-api-key", &key)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", overrides);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    assert!(server.generator.prompts.lock().unwrap().is_empty());
    assert_eq!(server.conversation_count().await, 0);
}

#[tokio::test]
async fn chat_reply_without_separator_is_format_error() {
    let server = spawn(Some("An answer with no history note.")).await;
    let (_, key) = server.user_with_key("hank").await;

    let resp = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", &key)
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "format_error");
    assert_eq!(server.conversation_count().await, 0);
}

#[tokio::test]
async fn chat_generation_failure_is_bad_gateway() {
    let server = spawn(None).await;
    let (_, key) = server.user_with_key("dave").await;

    let resp = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", &key)
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "generation_failed");
    assert_eq!(server.conversation_count().await, 0);
}

#[tokio::test]
async fn chat_cannot_continue_another_users_conversation() {
    let server = spawn(Some(REPLY)).await;
    let (_, erin) = server.user_with_key("erin").await;
    let (_, frank) = server.user_with_key("frank").await;

    let first: Value = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", &erin)
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let conversation_id = first["conversation_id"].as_i64().unwrap();

    let resp = server
        .client
        .post(server.url("/v1/chat/completions"))
        .header("x-api-key", &frank)
        .json(&json!({
            "conversation_id": conversation_id,
            "messages": [{"role": "user", "content": "hijack"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completion_protocol() {
    let server = spawn(Some("```motoko\nstable var total : Nat = 0;\n```")).await;
    let c = &server.client;

    let init: Value = c
        .post(server.url("/v1/initialize"))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(init["result"]["name"], "Motoko Assistant");
    assert_eq!(init["result"]["capabilities"]["completionsInline"], true);

    let other: Value = c
        .post(server.url("/v1/completions"))
        .json(&json!({"prompt": "fn main", "languageId": "rust"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(other["completions"], json!([]));

    let done: Value = c
        .post(server.url("/v1/completions"))
        .json(&json!({"prompt": "stable var", "languageId": "Motoko"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let item = &done["completions"][0];
    assert_eq!(item["text"], "stable var total : Nat = 0;");
    assert_eq!(item["displayText"], "stable var total : Nat = 0;");
    assert!(item["uuid"].as_str().is_some());

    let bad = c
        .post(server.url("/v1/completions"))
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    let body: Value = bad.json().await.unwrap();
    assert_eq!(body, json!({"error": "Invalid JSON"}));
}

#[tokio::test]
async fn completion_generation_failure_is_empty_list() {
    let server = spawn(None).await;
    let resp: Value = server
        .client
        .post(server.url("/v1/completions"))
        .json(&json!({"prompt": "actor", "languageId": "motoko"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["completions"], json!([]));
}
