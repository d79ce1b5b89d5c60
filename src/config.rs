//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a config file can be as
//! small as:
//!
//! ```toml
//! [db]
//! path = "./data/mrag.sqlite"
//! ```
//!
//! API secrets never live in the file. Providers read them from the
//! environment (`GEMINI_API_KEY`, `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`),
//! optionally via a `.env` file loaded at start-up.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::generation::GenerationParams;
use crate::prompt::DEFAULT_SYSTEM_MESSAGE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub repos: ReposConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Names of the two logical vector collections.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectionsConfig {
    #[serde(default = "default_code_collection")]
    pub code: String,
    #[serde(default = "default_docs_collection")]
    pub docs: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            code: default_code_collection(),
            docs: default_docs_collection(),
        }
    }
}

fn default_code_collection() -> String {
    "motoko_code_samples".to_string()
}
fn default_docs_collection() -> String {
    "motoko_docs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Matches requested from the code collection.
    #[serde(default = "default_code_results")]
    pub code_results: usize,
    /// Matches requested from the documentation collection.
    #[serde(default = "default_doc_results")]
    pub doc_results: usize,
    /// Code matches kept in the rendered prompt.
    #[serde(default = "default_code_display_limit")]
    pub code_display_limit: usize,
    /// Documentation matches kept in the rendered prompt.
    #[serde(default = "default_doc_display_limit")]
    pub doc_display_limit: usize,
    /// Per-chunk character budget for the main prompt. `None` keeps chunks whole.
    #[serde(default)]
    pub chunk_char_budget: Option<usize>,
    /// Per-sample character budget for MCP context output.
    #[serde(default = "default_mcp_char_budget")]
    pub mcp_char_budget: usize,
    /// Default `max_results` for the MCP tools.
    #[serde(default = "default_mcp_results")]
    pub mcp_default_results: usize,
    /// Code matches used as references by the completion protocol.
    #[serde(default = "default_completion_contexts")]
    pub completion_contexts: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            code_results: default_code_results(),
            doc_results: default_doc_results(),
            code_display_limit: default_code_display_limit(),
            doc_display_limit: default_doc_display_limit(),
            chunk_char_budget: None,
            mcp_char_budget: default_mcp_char_budget(),
            mcp_default_results: default_mcp_results(),
            completion_contexts: default_completion_contexts(),
        }
    }
}

fn default_code_results() -> usize {
    5
}
fn default_doc_results() -> usize {
    8
}
fn default_code_display_limit() -> usize {
    3
}
fn default_doc_display_limit() -> usize {
    5
}
fn default_mcp_char_budget() -> usize {
    2000
}
fn default_mcp_results() -> usize {
    5
}
fn default_completion_contexts() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_system_message")]
    pub system_message: String,
    /// Literal the chat model is asked to place between its answer and the
    /// history note.
    #[serde(default = "default_reply_separator")]
    pub reply_separator: String,
    /// Reject chat replies that lack the separator. When false, the whole
    /// reply is used for both halves.
    #[serde(default = "default_strict_separator")]
    pub strict_separator: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_message: default_system_message(),
            reply_separator: default_reply_separator(),
            strict_separator: default_strict_separator(),
        }
    }
}

fn default_system_message() -> String {
    DEFAULT_SYSTEM_MESSAGE.to_string()
}
fn default_reply_separator() -> String {
    "<<<HISTORY>>>".to_string()
}
fn default_strict_separator() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `gemini`, `openai`, `anthropic`, `ollama` or `disabled`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    /// Defaults per provider when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Overrides the provider's default API key variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            api_key_env: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "gemini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    64
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Reference repositories cloned by `mrag clone`.
#[derive(Debug, Deserialize, Clone)]
pub struct ReposConfig {
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    /// `.gitignore` that receives an entry per cloned repository. `None`
    /// leaves ignore files alone.
    #[serde(default)]
    pub gitignore: Option<PathBuf>,
    #[serde(default = "default_shallow")]
    pub shallow: bool,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            target_dir: default_target_dir(),
            gitignore: None,
            shallow: default_shallow(),
            urls: Vec::new(),
        }
    }
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("motoko_code_samples")
}
fn default_shallow() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Root scanned for Motoko sources. Defaults to `repos.target_dir`.
    #[serde(default)]
    pub code_root: Option<PathBuf>,
    #[serde(default = "default_code_globs")]
    pub code_globs: Vec<String>,
    /// Root scanned for Markdown documentation. Docs ingestion is skipped
    /// when unset.
    #[serde(default)]
    pub docs_root: Option<PathBuf>,
    #[serde(default = "default_docs_globs")]
    pub docs_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            code_root: None,
            code_globs: default_code_globs(),
            docs_root: None,
            docs_globs: default_docs_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_code_globs() -> Vec<String> {
    vec!["**/*.mo".to_string()]
}
fn default_docs_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.mdx".to_string()]
}

impl IngestConfig {
    pub fn code_root<'a>(&'a self, repos: &'a ReposConfig) -> &'a Path {
        self.code_root.as_deref().unwrap_or(&repos.target_dir)
    }
}

impl Config {
    /// Defaults for every section with the database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/mrag.sqlite"),
            },
            collections: CollectionsConfig::default(),
            retrieval: RetrievalConfig::default(),
            prompt: PromptConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingConfig::default(),
            auth: AuthConfig::default(),
            server: ServerConfig::default(),
            repos: ReposConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.code_display_limit == 0 || r.doc_display_limit == 0 {
        bail!("retrieval display limits must be >= 1");
    }
    if r.mcp_default_results == 0 || r.completion_contexts == 0 {
        bail!("retrieval.mcp_default_results and retrieval.completion_contexts must be >= 1");
    }
    if r.chunk_char_budget == Some(0) || r.mcp_char_budget == 0 {
        bail!("retrieval character budgets must be > 0");
    }

    if config.collections.code.is_empty() || config.collections.docs.is_empty() {
        bail!("collection names must not be empty");
    }
    if config.collections.code == config.collections.docs {
        bail!("collections.code and collections.docs must differ");
    }

    if config.prompt.reply_separator.trim().is_empty() {
        bail!("prompt.reply_separator must not be empty");
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    let g = &config.generation;
    match g.provider.as_str() {
        "disabled" | "gemini" | "openai" | "anthropic" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, gemini, openai, anthropic, or ollama.",
            other
        ),
    }
    GenerationParams::from_config(g)
        .check()
        .map_err(|e| anyhow!("generation.{}", e))?;

    if !(4..=31).contains(&config.auth.bcrypt_cost) {
        bail!("auth.bcrypt_cost must be in [4, 31]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let config = parse("[db]\npath = \"./data/x.sqlite\"\n").unwrap();
        assert_eq!(config.collections.code, "motoko_code_samples");
        assert_eq!(config.collections.docs, "motoko_docs");
        assert_eq!(config.retrieval.code_results, 5);
        assert_eq!(config.retrieval.doc_results, 8);
        assert_eq!(config.retrieval.code_display_limit, 3);
        assert_eq!(config.retrieval.doc_display_limit, 5);
        assert!(config.retrieval.chunk_char_budget.is_none());
        assert_eq!(config.generation.top_k, 64);
        assert_eq!(config.generation.max_output_tokens, 8192);
        assert!(config.prompt.strict_separator);
        assert_eq!(
            config.ingest.code_root(&config.repos),
            Path::new("motoko_code_samples")
        );
    }

    #[test]
    fn unknown_generation_provider_rejected() {
        let err = parse("[db]\npath = \"x\"\n[generation]\nprovider = \"bard\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn remote_embedding_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn empty_separator_rejected() {
        let err = parse("[db]\npath = \"x\"\n[prompt]\nreply_separator = \"  \"\n").unwrap_err();
        assert!(err.to_string().contains("reply_separator"));
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let err = parse("[db]\npath = \"x\"\n[generation]\ntemperature = 3.5\n").unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn repo_list_parses() {
        let config = parse(
            "[db]\npath = \"x\"\n[repos]\ntarget_dir = \"samples\"\nurls = [\"https://github.com/dfinity/motoko.git\"]\n",
        )
        .unwrap();
        assert_eq!(config.repos.urls.len(), 1);
        assert!(config.repos.shallow);
    }
}
