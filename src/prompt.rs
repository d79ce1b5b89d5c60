//! Prompt assembly.
//!
//! Every renderer ranks each match group ascending by distance (stable, so
//! equal distances keep store order) and keeps a fixed number per group
//! before formatting. The relevance shown next to a match comes from
//! [`similarity_score`] and is display-only.
//!
//! Layout of the main prompt:
//!
//! ```text
//! <instruction template>
//!
//! === MOTOKO DOCUMENTATION ===
//! [DOC 1] <chunk_title> (Relevance: 0.912)
//! Source: <source_file>
//! Context: <parent_context>
//! <chunk text>
//!
//! === MOTOKO CODE EXAMPLES ===
//! [CODE 1] <filename> (Relevance: 0.874)
//! Path: <rel_path>
//! <code>
//!
//!
//! User Question: <query>
//!
//! Instructions:
//! ...
//!
//! Answer:
//! ```

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::models::{sort_by_distance, ContextMatch, Conversation, RetrievedContext, Role};

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are an expert Motoko programmer and teacher. \
Use the provided documentation and code examples to answer the user's question accurately and comprehensively.";

const INSTRUCTIONS: &str = "Instructions:
- Provide a clear, accurate answer based on the documentation and code examples above
- Include relevant code snippets when helpful
- Reference the documentation sources when appropriate
- If the question can't be fully answered from the provided context, mention what additional information might be needed";

const DOCS_HEADER: &str = "=== MOTOKO DOCUMENTATION ===";
const CODE_HEADER: &str = "=== MOTOKO CODE EXAMPLES ===";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptOptions {
    pub doc_display_limit: usize,
    pub code_display_limit: usize,
    /// Truncate each inserted chunk to this many characters.
    pub chunk_char_budget: Option<usize>,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            doc_display_limit: 5,
            code_display_limit: 3,
            chunk_char_budget: None,
        }
    }
}

impl PromptOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            doc_display_limit: config.doc_display_limit,
            code_display_limit: config.code_display_limit,
            chunk_char_budget: config.chunk_char_budget,
        }
    }
}

/// `1 - distance` for distances up to 1, otherwise 0.
pub fn similarity_score(distance: f32) -> f32 {
    if distance <= 1.0 {
        1.0 - distance
    } else {
        0.0
    }
}

/// The best `limit` matches, ascending by distance.
pub fn ranked(matches: &[ContextMatch], limit: usize) -> Vec<ContextMatch> {
    let mut sorted = matches.to_vec();
    sort_by_distance(&mut sorted);
    sorted.truncate(limit);
    sorted
}

/// Keep at most `budget` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

fn chunk_text(text: &str, budget: Option<usize>) -> String {
    match budget {
        Some(b) => truncate_chars(text, b),
        None => text.to_string(),
    }
}

/// Render the documentation and code sections. Empty when both groups are.
pub fn render_context(context: &RetrievedContext, opts: &PromptOptions) -> String {
    let mut parts: Vec<String> = Vec::new();

    let docs = ranked(&context.doc_matches, opts.doc_display_limit);
    if !docs.is_empty() {
        parts.push(DOCS_HEADER.to_string());
        for (i, doc) in docs.iter().enumerate() {
            parts.push(format!(
                "[DOC {}] {} (Relevance: {:.3})",
                i + 1,
                doc.meta_or("chunk_title", "Untitled"),
                similarity_score(doc.distance)
            ));
            parts.push(format!("Source: {}", doc.meta_or("source_file", "Unknown")));
            if let Some(parent) = doc.meta("parent_context") {
                parts.push(format!("Context: {}", parent));
            }
            parts.push(chunk_text(&doc.text, opts.chunk_char_budget));
            parts.push(String::new());
        }
    }

    let code = ranked(&context.code_matches, opts.code_display_limit);
    if !code.is_empty() {
        parts.push(CODE_HEADER.to_string());
        for (i, sample) in code.iter().enumerate() {
            parts.push(format!(
                "[CODE {}] {} (Relevance: {:.3})",
                i + 1,
                sample.meta_or("filename", "Unknown"),
                similarity_score(sample.distance)
            ));
            parts.push(format!("Path: {}", sample.meta_or("rel_path", "Unknown")));
            parts.push(chunk_text(&sample.text, opts.chunk_char_budget));
            parts.push(String::new());
        }
    }

    parts.join("\n")
}

/// Build the question-answering prompt with default display limits.
pub fn build_prompt(context: &RetrievedContext, query: &str, instruction_template: &str) -> String {
    build_prompt_with(context, query, instruction_template, &PromptOptions::default())
}

pub fn build_prompt_with(
    context: &RetrievedContext,
    query: &str,
    instruction_template: &str,
    opts: &PromptOptions,
) -> String {
    let rendered = render_context(context, opts);
    format!(
        "{instruction_template}\n\n{rendered}\n\nUser Question: {query}\n\n{INSTRUCTIONS}\n\nAnswer:"
    )
}

/// Chat variant: prior turns are included, and the model is told to close
/// with `separator` followed by a note for the conversation history.
pub fn build_chat_prompt(
    context: &RetrievedContext,
    conversation: &Conversation,
    instruction_template: &str,
    separator: &str,
    opts: &PromptOptions,
) -> String {
    let rendered = render_context(context, opts);

    let mut history = String::new();
    if !conversation.turns().is_empty() {
        history.push_str("Conversation so far:\n");
        for turn in conversation.turns() {
            let speaker = match turn.role {
                Role::User => "User",
                Role::System => "Assistant (summary)",
            };
            history.push_str(&format!("{}: {}\n", speaker, turn.content));
        }
        history.push('\n');
    }

    format!(
        "{instruction_template}\n\n{rendered}\n\n{history}User Question: {query}\n\n{INSTRUCTIONS}\n\
         - After the answer, write {separator} on its own line, then a short note summarising this exchange for future turns\n\n\
         Answer:",
        query = conversation.pending_message,
    )
}

/// Prompt for the editor completion protocol.
pub fn build_completion_prompt(references: &[ContextMatch], prompt: &str) -> String {
    let context = references
        .iter()
        .enumerate()
        .map(|(i, m)| format!("// Reference {}:\n{}", i + 1, m.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an expert Motoko developer. Below are relevant code snippets:\n\n\
         {context}\n\n\
         Provide a concise code completion for:\n{prompt}\n\n\
         Return ONLY the completion code without explanations."
    )
}

/// A code sample as exposed by the MCP tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeContextItem {
    pub index: usize,
    pub filename: String,
    pub project: String,
    pub file_type: String,
    pub has_toml: bool,
    pub content: String,
    pub full_path: String,
}

impl CodeContextItem {
    pub fn from_match(index: usize, m: &ContextMatch, char_budget: usize) -> Self {
        Self {
            index,
            filename: m.meta_or("filename", "unknown"),
            project: m.meta_or("folders", "unknown"),
            file_type: m.meta_or("file_type", "unknown"),
            has_toml: m.meta_bool("has_toml"),
            content: truncate_chars(&m.text, char_budget),
            full_path: m.meta_or("rel_path", "unknown"),
        }
    }
}

/// Ranked code matches as MCP items, numbered from 1.
pub fn code_context_items(matches: &[ContextMatch], char_budget: usize) -> Vec<CodeContextItem> {
    ranked(matches, matches.len())
        .iter()
        .enumerate()
        .map(|(i, m)| CodeContextItem::from_match(i + 1, m, char_budget))
        .collect()
}

fn fenced_samples(items: &[CodeContextItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "**{}** ({}):\n```motoko\n{}\n```\n\n",
                item.filename, item.project, item.content
            )
        })
        .collect()
}

/// Text returned by the `get_motoko_context` tool.
pub fn format_code_context(query: &str, items: &[CodeContextItem]) -> String {
    let text = format!(
        "Retrieved {} relevant Motoko code samples for: '{}'\n\n{}",
        items.len(),
        query,
        fenced_samples(items)
    );
    text.trim().to_string()
}

/// Prompt used by the `generate_motoko_code` tool.
pub fn build_codegen_prompt(query: &str, items: &[CodeContextItem]) -> String {
    let context_text = if items.is_empty() {
        "No specific context found, but I'll help you with Motoko code generation.\n\n".to_string()
    } else {
        format!(
            "Here are relevant Motoko code examples:\n\n{}",
            fenced_samples(items)
        )
    };

    format!(
        "You are an expert Motoko developer. Use the following context to help generate high-quality Motoko code.\n\n\
         {context_text}\n\n\
         User Request: {query}\n\n\
         Please provide:\n\
         1. A clear explanation of the solution\n\
         2. Complete, compilable Motoko code\n\
         3. Any important notes about the implementation\n\n\
         Focus on writing idiomatic Motoko code that follows best practices."
    )
}
