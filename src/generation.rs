//! Hosted LLM backends.
//!
//! [`Generator::complete`] makes exactly one HTTP attempt. Transport errors
//! and non-2xx statuses are returned to the caller, which decides what to
//! do with them.
//!
//! | `provider` | Endpoint | Key variable |
//! |------------|----------|--------------|
//! | `gemini` | `POST /v1beta/models/{model}:generateContent` | `GEMINI_API_KEY` |
//! | `openai` | `POST /v1/chat/completions` | `OPENAI_API_KEY` |
//! | `anthropic` | `POST /v1/messages` | `ANTHROPIC_API_KEY` |
//! | `ollama` | `POST /api/generate` | none |
//! | `disabled` | always errors | none |

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 64,
            max_output_tokens: 8192,
        }
    }
}

impl GenerationParams {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
        }
    }

    /// Reject values no provider accepts.
    pub fn check(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("temperature must be in [0.0, 2.0]");
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            bail!("top_p must be in (0.0, 1.0]");
        }
        if self.max_output_tokens == 0 {
            bail!("max_output_tokens must be > 0");
        }
        Ok(())
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

/// Shared plumbing for the HTTP backends.
struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpBackend {
    fn new(config: &GenerationConfig, default_url: &str, default_model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            api_key: None,
        })
    }

    fn with_key(mut self, config: &GenerationConfig, default_env: &str) -> Result<Self> {
        let var = config.api_key_env.as_deref().unwrap_or(default_env);
        let key = std::env::var(var)
            .map_err(|_| anyhow!("{} environment variable not set", var))?;
        self.api_key = Some(key);
        Ok(self)
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    async fn post(&self, label: &str, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{} request failed", label))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} API error {}: {}", label, status, body);
        }
        response
            .json()
            .await
            .with_context(|| format!("{} returned invalid JSON", label))
    }
}

// ============ Gemini ============

pub struct GeminiGenerator {
    http: HttpBackend,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let http = HttpBackend::new(
            config,
            "https://generativelanguage.googleapis.com",
            "models/gemini-2.5-flash",
        )?
        .with_key(config, "GEMINI_API_KEY")?;
        Ok(Self { http })
    }

    fn endpoint(&self) -> String {
        let model = if self.http.model.starts_with("models/") {
            self.http.model.clone()
        } else {
            format!("models/{}", self.http.model)
        };
        format!("{}/v1beta/{}:generateContent", self.http.base_url, model)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": params.temperature,
                "topP": params.top_p,
                "topK": params.top_k,
                "maxOutputTokens": params.max_output_tokens,
            }
        });
        let request = self
            .http
            .client
            .post(self.endpoint())
            .query(&[("key", self.http.key())])
            .json(&body);
        let json = self.http.post("Gemini", request).await?;
        parse_gemini_response(&json)
    }
}

fn parse_gemini_response(json: &Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow!("Invalid Gemini response: missing candidates[0].content.parts"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text)
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    http: HttpBackend,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let http = HttpBackend::new(config, "https://api.openai.com", "gpt-4o-mini")?
            .with_key(config, "OPENAI_API_KEY")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = json!({
            "model": self.http.model,
            "messages": [
                { "role": "system", "content": "You are a Motoko expert." },
                { "role": "user", "content": prompt }
            ],
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_output_tokens,
        });
        let request = self
            .http
            .client
            .post(format!("{}/v1/chat/completions", self.http.base_url))
            .bearer_auth(self.http.key())
            .json(&body);
        let json = self.http.post("OpenAI", request).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

// ============ Anthropic ============

pub struct AnthropicGenerator {
    http: HttpBackend,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let http = HttpBackend::new(config, "https://api.anthropic.com", "claude-3-haiku-20240307")?
            .with_key(config, "ANTHROPIC_API_KEY")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = json!({
            "model": self.http.model,
            "max_tokens": params.max_output_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "top_k": params.top_k,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .http
            .client
            .post(format!("{}/v1/messages", self.http.base_url))
            .header("x-api-key", self.http.key())
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        let json = self.http.post("Anthropic", request).await?;
        parse_anthropic_response(&json)
    }
}

fn parse_anthropic_response(json: &Value) -> Result<String> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid Anthropic response: missing content"))?;
    Ok(content
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect())
}

// ============ Ollama ============

pub struct OllamaGenerator {
    http: HttpBackend,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let http = HttpBackend::new(config, "http://localhost:11434", "llama3.1")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = json!({
            "model": self.http.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "top_p": params.top_p,
                "top_k": params.top_k,
                "num_predict": params.max_output_tokens,
            }
        });
        let request = self
            .http
            .client
            .post(format!("{}/api/generate", self.http.base_url))
            .json(&body);
        let json = self.http.post("Ollama", request).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response"))
    }
}

/// Build the generator selected by `[generation].provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Drop a surrounding ```` ```motoko ```` (or bare ```` ``` ````) fence.
pub fn strip_code_fence(text: &str) -> String {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Skip the info string on the opening line.
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches("motoko"),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}
