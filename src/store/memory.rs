//! In-memory [`VectorStore`] for tests.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Queries are a
//! brute-force cosine scan.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{CollectionEntry, ContextMatch};

use super::{top_k, VectorStore};

/// Entries keep insertion order so ties resolve deterministically.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<CollectionEntry>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, collection: &str, entries: &[CollectionEntry]) -> Result<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let stored = collections.entry(collection.to_string()).or_default();
        for entry in entries {
            match stored.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => stored.push(entry.clone()),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<ContextMatch>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let Some(stored) = collections.get(collection) else {
            bail!("collection not found: {}", collection);
        };

        let matches = stored
            .iter()
            .filter(|e| e.embedding.len() == query_vec.len())
            .map(|e| ContextMatch {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                distance: cosine_distance(query_vec, &e.embedding),
            })
            .collect();

        Ok(top_k(matches, limit))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(collection).map(|c| c.len() as u64).unwrap_or(0))
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.contains_key(collection))
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        Ok(collections
            .get_mut(collection)
            .map(|c| {
                let n = c.len() as u64;
                c.clear();
                n
            })
            .unwrap_or(0))
    }

    async fn retain(&self, collection: &str, keep: &HashSet<String>) -> Result<u64> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let Some(stored) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|e| keep.contains(&e.id));
        Ok((before - stored.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn entry(id: &str, embedding: Vec<f32>) -> CollectionEntry {
        CollectionEntry {
            id: id.to_string(),
            text: format!("text of {id}"),
            metadata: Metadata::new(),
            embedding,
        }
    }

    #[tokio::test]
    async fn query_ranks_by_distance() {
        let store = InMemoryVectorStore::new();
        store
            .add(
                "code",
                &[
                    entry("far", vec![0.0, 1.0]),
                    entry("near", vec![1.0, 0.1]),
                    entry("exact", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.query("code", &[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits.iter().all(|h| h.distance >= 0.0));
    }

    #[tokio::test]
    async fn fewer_entries_than_limit() {
        let store = InMemoryVectorStore::new();
        store.add("docs", &[entry("only", vec![1.0])]).await.unwrap();
        assert_eq!(store.query("docs", &[1.0], 8).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_collection_errors() {
        let store = InMemoryVectorStore::new();
        assert!(store.query("nope", &[1.0], 3).await.is_err());
        assert!(!store.has_collection("nope").await.unwrap());
    }

    #[tokio::test]
    async fn add_upserts_and_clear_empties() {
        let store = InMemoryVectorStore::new();
        store.add("c", &[entry("a", vec![1.0, 0.0])]).await.unwrap();
        store.add("c", &[entry("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
        let hits = store.query("c", &[0.0, 1.0], 1).await.unwrap();
        assert!(hits[0].distance < 1e-6);

        assert_eq!(store.clear("c").await.unwrap(), 1);
        assert_eq!(store.count("c").await.unwrap(), 0);
        assert!(store.has_collection("c").await.unwrap());
    }

    #[tokio::test]
    async fn retain_drops_unlisted_ids() {
        let store = InMemoryVectorStore::new();
        store
            .add("c", &[entry("a", vec![1.0]), entry("b", vec![1.0]), entry("c", vec![1.0])])
            .await
            .unwrap();
        let keep: HashSet<String> = ["b".to_string()].into_iter().collect();
        assert_eq!(store.retain("c", &keep).await.unwrap(), 2);
        let hits = store.query("c", &[1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(store.retain("missing", &keep).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mismatched_dimensions_skipped() {
        let store = InMemoryVectorStore::new();
        store
            .add("c", &[entry("short", vec![1.0]), entry("ok", vec![1.0, 0.0])])
            .await
            .unwrap();
        let hits = store.query("c", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "ok");
    }
}
