//! Ingestion of Motoko sources and Markdown docs into vector collections.
//!
//! Flow: walk the tree → build entries with metadata → embed in batches →
//! upsert into the store → drop stored entries the walk no longer produced.
//! Entry ids derive from the relative path, so re-running ingestion
//! replaces entries instead of duplicating them, and chunks of shrunken or
//! deleted files disappear.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::chunk_markdown;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::models::{CollectionEntry, Metadata};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::{SqliteVectorStore, VectorStore};

/// Directories never worth indexing.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/.vessel/**",
    "**/.mops/**",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum IngestTarget {
    Code,
    Docs,
    All,
}

/// An entry ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

pub struct IngestOptions {
    pub rebuild: bool,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

pub async fn run_ingest(
    config: &Config,
    target: IngestTarget,
    opts: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let mut jobs: Vec<(&str, Vec<PendingEntry>)> = Vec::new();

    if matches!(target, IngestTarget::Code | IngestTarget::All) {
        let collection = config.collections.code.as_str();
        progress.report(ProgressEvent::Discovering {
            collection: collection.to_string(),
        });
        let root = config.ingest.code_root(&config.repos);
        let mut entries = collect_code_entries(root, &config.ingest.code_globs, &config.ingest.exclude_globs)?;
        apply_limit(&mut entries, opts.limit);
        jobs.push((collection, entries));
    }

    if matches!(target, IngestTarget::Docs | IngestTarget::All) {
        let collection = config.collections.docs.as_str();
        match &config.ingest.docs_root {
            Some(root) => {
                progress.report(ProgressEvent::Discovering {
                    collection: collection.to_string(),
                });
                let mut entries = collect_doc_entries(
                    root,
                    &config.ingest.docs_globs,
                    &config.ingest.exclude_globs,
                    config.chunking.max_tokens,
                )?;
                apply_limit(&mut entries, opts.limit);
                jobs.push((collection, entries));
            }
            None => println!("ingest {}: skipped, [ingest].docs_root is not set", collection),
        }
    }

    if opts.dry_run {
        for (collection, entries) in &jobs {
            println!("ingest {} (dry-run)", collection);
            println!("  entries found: {}", entries.len());
        }
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteVectorStore::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;

    for (collection, entries) in &jobs {
        println!("ingest {}", collection);
        println!("  entries found: {}", entries.len());
        if opts.rebuild {
            let removed = store.clear(collection).await?;
            println!("  removed (rebuild): {}", removed);
        }
        let written = store_entries(
            &embedder,
            &store,
            collection,
            entries,
            config.embedding.batch_size,
            progress,
        )
        .await?;
        println!("  entries written: {}", written);
        // A limited run sees only part of the tree.
        if opts.limit.is_none() {
            let stale = prune_stale(&store, collection, entries).await?;
            println!("  removed (stale): {}", stale);
        }
        println!("  collection size: {}", store.count(collection).await?);
        println!("ok");
    }

    pool.close().await;
    Ok(())
}

fn apply_limit(entries: &mut Vec<PendingEntry>, limit: Option<usize>) {
    if let Some(n) = limit {
        entries.truncate(n);
    }
}

/// Embed `entries` in batches and upsert them. Returns the count written.
pub async fn store_entries(
    embedder: &Arc<dyn Embedder>,
    store: &dyn VectorStore,
    collection: &str,
    entries: &[PendingEntry],
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    let total = entries.len() as u64;
    let mut written = 0u64;

    for batch in entries.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|e| e.text.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed batch for {}", collection))?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            );
        }

        let rows: Vec<CollectionEntry> = batch
            .iter()
            .zip(vectors)
            .map(|(e, embedding)| CollectionEntry {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                embedding,
            })
            .collect();
        store.add(collection, &rows).await?;

        written += rows.len() as u64;
        progress.report(ProgressEvent::Embedding {
            collection: collection.to_string(),
            n: written,
            total,
        });
    }

    tracing::info!(collection, written, "ingested");
    Ok(written)
}

/// Remove entries of `collection` that are not in `entries`, i.e. chunks
/// of files that shrank or no longer exist.
pub async fn prune_stale(
    store: &dyn VectorStore,
    collection: &str,
    entries: &[PendingEntry],
) -> Result<u64> {
    let keep: HashSet<String> = entries.iter().map(|e| e.id.clone()).collect();
    let removed = store.retain(collection, &keep).await?;
    if removed > 0 {
        tracing::info!(collection, removed, "removed stale entries");
    }
    Ok(removed)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Files under `root` matching `include` and not excluded, sorted by
/// relative path (with `/` separators).
fn walk_matching(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        anyhow::bail!("Ingest root does not exist: {}", root.display());
    }
    let include = build_globset(include)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let rel_str = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if include.is_match(&rel_str) && !exclude.is_match(&rel_str) {
            files.push((entry.path().to_path_buf(), rel_str));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn read_text(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
            None
        }
    }
}

fn path_hash(rel_path: &str) -> String {
    hex::encode(Sha256::digest(rel_path.as_bytes()))[..16].to_string()
}

/// One entry per non-empty Motoko source file.
pub fn collect_code_entries(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<PendingEntry>> {
    let mut entries = Vec::new();
    for (path, rel) in walk_matching(root, include, exclude)? {
        let Some(text) = read_text(&path) else { continue };
        if text.trim().is_empty() {
            continue;
        }

        let (folders, filename) = match rel.rsplit_once('/') {
            Some((dir, file)) => (dir.to_string(), file.to_string()),
            None => (String::new(), rel.clone()),
        };
        let project_dir = match rel.split_once('/') {
            Some((first, _)) => root.join(first),
            None => root.to_path_buf(),
        };

        let mut metadata = Metadata::new();
        metadata.insert("folders".into(), Value::String(folders));
        metadata.insert("filename".into(), Value::String(filename));
        metadata.insert("rel_path".into(), Value::String(rel.clone()));
        metadata.insert("file_type".into(), Value::String("motoko".into()));
        metadata.insert(
            "has_toml".into(),
            Value::Bool(project_dir.join("mops.toml").is_file()),
        );

        entries.push(PendingEntry {
            id: format!("motoko_sample_{}", path_hash(&rel)),
            text,
            metadata,
        });
    }
    Ok(entries)
}

/// Heading-scoped chunks of every Markdown file.
pub fn collect_doc_entries(
    root: &Path,
    include: &[String],
    exclude: &[String],
    max_tokens: usize,
) -> Result<Vec<PendingEntry>> {
    let mut entries = Vec::new();
    for (path, rel) in walk_matching(root, include, exclude)? {
        let Some(text) = read_text(&path) else { continue };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| rel.clone());
        let category = match rel.split_once('/') {
            Some((first, _)) => first.to_string(),
            None => "general".to_string(),
        };
        let hash = path_hash(&rel);

        for (i, chunk) in chunk_markdown(&text, &stem, max_tokens).into_iter().enumerate() {
            let mut metadata = Metadata::new();
            metadata.insert("source_file".into(), Value::String(rel.clone()));
            metadata.insert("chunk_title".into(), Value::String(chunk.title));
            metadata.insert("parent_context".into(), Value::String(chunk.parent_context));
            metadata.insert("doc_category".into(), Value::String(category.clone()));
            metadata.insert("section_type".into(), Value::String(chunk.section_type.into()));
            metadata.insert("chunk_index".into(), Value::from(i as u64));

            entries.push(PendingEntry {
                id: format!("motoko_doc_{}_{}", hash, i),
                text: chunk.text,
                metadata,
            });
        }
    }
    Ok(entries)
}
