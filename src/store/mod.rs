//! Vector store abstraction.
//!
//! A store holds named collections. Each entry is `(id, text, metadata,
//! embedding)` and collections are queried by nearest neighbour over the
//! embeddings, ranked by cosine distance (`1 - cosine similarity`, clamped
//! at zero).
//!
//! Two backends:
//! - [`sqlite::SqliteVectorStore`]: persisted alongside the relational data.
//! - [`memory::InMemoryVectorStore`]: process-local, used by tests.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{CollectionEntry, ContextMatch};

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace entries by id, creating the collection if needed.
    async fn add(&self, collection: &str, entries: &[CollectionEntry]) -> Result<()>;

    /// Up to `limit` nearest entries, ascending by distance.
    ///
    /// Errors when the collection does not exist. Entries whose dimension
    /// differs from `query_vec` are skipped.
    async fn query(&self, collection: &str, query_vec: &[f32], limit: usize)
        -> Result<Vec<ContextMatch>>;

    async fn count(&self, collection: &str) -> Result<u64>;

    async fn has_collection(&self, collection: &str) -> Result<bool>;

    /// Remove every entry in the collection. Returns the number removed.
    async fn clear(&self, collection: &str) -> Result<u64>;

    /// Remove every entry whose id is not in `keep`. Returns the number
    /// removed.
    async fn retain(&self, collection: &str, keep: &HashSet<String>) -> Result<u64>;
}

/// Rank scored candidates and keep the best `limit`.
pub(crate) fn top_k(mut matches: Vec<ContextMatch>, limit: usize) -> Vec<ContextMatch> {
    crate::models::sort_by_distance(&mut matches);
    matches.truncate(limit);
    matches
}
