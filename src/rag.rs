//! The retrieval, prompt, and generation pipeline shared by every shell.
//!
//! A [`RagEngine`] is built once at start-up and handed to the HTTP router,
//! the MCP handler, and the CLI commands.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::generation::{create_generator, strip_code_fence, GenerationParams, Generator};
use crate::models::{Conversation, RetrievedContext};
use crate::prompt::{self, CodeContextItem, PromptOptions};
use crate::reply::{split_reply, split_reply_lenient, GeneratedReply};
use crate::retriever::ContextRetriever;
use crate::store::VectorStore;

/// Tunables resolved from configuration.
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub code_results: usize,
    pub doc_results: usize,
    pub prompt: PromptOptions,
    pub system_message: String,
    pub reply_separator: String,
    pub strict_separator: bool,
    pub generation: GenerationParams,
    pub mcp_char_budget: usize,
    pub completion_contexts: usize,
}

impl RagSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            code_results: config.retrieval.code_results,
            doc_results: config.retrieval.doc_results,
            prompt: PromptOptions::from_config(&config.retrieval),
            system_message: config.prompt.system_message.clone(),
            reply_separator: config.prompt.reply_separator.clone(),
            strict_separator: config.prompt.strict_separator,
            generation: GenerationParams::from_config(&config.generation),
            mcp_char_budget: config.retrieval.mcp_char_budget,
            completion_contexts: config.retrieval.completion_contexts,
        }
    }
}

pub struct RagEngine {
    retriever: ContextRetriever,
    generator: Arc<dyn Generator>,
    settings: RagSettings,
}

/// A one-shot answer together with the context it was built from.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub context: RetrievedContext,
}

impl RagEngine {
    pub fn new(retriever: ContextRetriever, generator: Arc<dyn Generator>, settings: RagSettings) -> Self {
        Self {
            retriever,
            generator,
            settings,
        }
    }

    /// Wire up embedder, store, and generator from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn VectorStore>) -> anyhow::Result<Self> {
        let embedder: Arc<dyn Embedder> = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let retriever = ContextRetriever::new(
            embedder,
            store,
            config.collections.code.clone(),
            config.collections.docs.clone(),
        );
        Ok(Self::new(retriever, generator, RagSettings::from_config(config)))
    }

    pub fn retriever(&self) -> &ContextRetriever {
        &self.retriever
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        tracing::debug!(chars = prompt.len(), model = self.model_name(), "calling generator");
        self.generator
            .complete(prompt, params)
            .await
            .map_err(|e| Error::Generation(e.to_string()))
    }

    /// Answer a standalone question from both collections.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        let context = self
            .retriever
            .retrieve(query, self.settings.code_results, self.settings.doc_results)
            .await?;
        let prompt = prompt::build_prompt_with(
            &context,
            query,
            &self.settings.system_message,
            &self.settings.prompt,
        );
        let text = self.generate(&prompt, &self.settings.generation).await?;
        Ok(Answer { text, context })
    }

    /// Context for a chat turn. Retrieval problems never fail the turn.
    pub async fn chat_context(&self, query: &str) -> RetrievedContext {
        self.retriever
            .retrieve_or_empty(query, self.settings.code_results, self.settings.doc_results)
            .await
    }

    /// Generate the next chat reply and split it into answer and history note.
    pub async fn generate_reply(
        &self,
        conversation: &Conversation,
        context: &RetrievedContext,
        params: &GenerationParams,
    ) -> Result<GeneratedReply> {
        let prompt = prompt::build_chat_prompt(
            context,
            conversation,
            &self.settings.system_message,
            &self.settings.reply_separator,
            &self.settings.prompt,
        );
        let reply = self.generate(&prompt, params).await?;
        if self.settings.strict_separator {
            Ok(split_reply(&reply, &self.settings.reply_separator)?)
        } else {
            Ok(split_reply_lenient(&reply, &self.settings.reply_separator))
        }
    }

    /// Inline completion for an editor prompt. Empty when nothing usable
    /// came back.
    pub async fn complete_code(&self, prompt_text: &str) -> Result<String> {
        let context = self
            .retriever
            .retrieve_or_empty(prompt_text, self.settings.completion_contexts, 0)
            .await;
        let references = prompt::ranked(&context.code_matches, self.settings.completion_contexts);
        let prompt = prompt::build_completion_prompt(&references, prompt_text);
        let raw = self.generate(&prompt, &self.settings.generation).await?;
        Ok(strip_code_fence(&raw))
    }

    /// Ranked code samples for the MCP context tool.
    pub async fn code_context(&self, query: &str, max_results: usize) -> Vec<CodeContextItem> {
        let context = self.retriever.retrieve_or_empty(query, max_results, 0).await;
        prompt::code_context_items(&context.code_matches, self.settings.mcp_char_budget)
    }

    /// Retrieve samples and ask the model to write code for `query`.
    pub async fn generate_code(&self, query: &str, max_results: usize) -> Result<String> {
        let items = self.code_context(query, max_results).await;
        let prompt = prompt::build_codegen_prompt(query, &items);
        self.generate(&prompt, &self.settings.generation).await
    }
}
