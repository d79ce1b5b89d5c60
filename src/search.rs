//! `mrag context` and `mrag ask`: retrieval and one-shot answers from the
//! command line.

use anyhow::Result;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::models::ContextMatch;
use crate::prompt::{ranked, similarity_score, truncate_chars};
use crate::rag::RagEngine;
use crate::store::SqliteVectorStore;

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CollectionFilter {
    Code,
    Docs,
    All,
}

async fn engine(config: &Config) -> Result<(sqlx::SqlitePool, RagEngine)> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteVectorStore::new(pool.clone()));
    let rag = RagEngine::from_config(config, store)?;
    Ok((pool, rag))
}

/// Print retrieval results with scores, distances, and categories.
pub async fn run_context(
    config: &Config,
    query: &str,
    filter: CollectionFilter,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let (pool, rag) = engine(config).await?;
    let retriever = rag.retriever();
    for (name, count) in [
        (retriever.code_collection(), retriever.store().count(retriever.code_collection()).await?),
        (retriever.docs_collection(), retriever.store().count(retriever.docs_collection()).await?),
    ] {
        println!("{}: {} entries", name, count);
    }

    let code_limit = match filter {
        CollectionFilter::Docs => 0,
        _ => limit.unwrap_or(config.retrieval.code_results),
    };
    let doc_limit = match filter {
        CollectionFilter::Code => 0,
        _ => limit.unwrap_or(config.retrieval.doc_results),
    };

    let context = retriever.retrieve(query, code_limit, doc_limit).await?;
    println!();
    println!("Query: '{}'", query);

    if code_limit > 0 {
        print!("{}", render_matches("CODE", &ranked(&context.code_matches, code_limit)));
    }
    if doc_limit > 0 {
        print!("{}", render_matches("DOC", &ranked(&context.doc_matches, doc_limit)));
    }
    if context.is_empty() {
        println!("No results.");
    }

    pool.close().await;
    Ok(())
}

fn render_matches(label: &str, matches: &[ContextMatch]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{} RESULTS ({} found)", label, matches.len());
    for (i, m) in matches.iter().enumerate() {
        let title = m
            .meta("chunk_title")
            .or_else(|| m.meta("filename"))
            .unwrap_or_else(|| m.id.clone());
        let _ = writeln!(
            out,
            "{}. [{:.3}] {}",
            i + 1,
            similarity_score(m.distance),
            title
        );
        if let Some(source) = m.meta("source_file").or_else(|| m.meta("rel_path")) {
            let _ = writeln!(out, "    source: {}", source);
        }
        if let Some(category) = m.meta("doc_category") {
            let _ = writeln!(out, "    category: {}", category);
        }
        if let Some(section) = m.meta("section_type") {
            let _ = writeln!(out, "    section: {}", section);
        }
        if let Some(parent) = m.meta("parent_context") {
            let _ = writeln!(out, "    context: {}", parent);
        }
        let _ = writeln!(out, "    distance: {:.4}", m.distance);
        let excerpt = truncate_chars(&m.text, EXCERPT_CHARS).replace('\n', " ");
        let _ = writeln!(out, "    excerpt: \"{}\"", excerpt.trim());
        let _ = writeln!(out, "    id: {}", m.id);
    }
    out
}

/// Print a one-shot RAG answer.
pub async fn run_ask(config: &Config, query: &str) -> Result<()> {
    let (pool, rag) = engine(config).await?;
    let answer = rag.ask(query).await?;
    tracing::info!(
        code = answer.context.code_matches.len(),
        docs = answer.context.doc_matches.len(),
        model = rag.model_name(),
        "answered"
    );
    println!("{}", answer.text.trim());
    pool.close().await;
    Ok(())
}
