//! Context retrieval: one embedding call, then one nearest-neighbour query
//! per collection.
//!
//! A missing collection or a failed store query only empties that group;
//! answers can still be built from the other one. Groups come back in store
//! order. Ranking for display happens in [`crate::prompt`].

use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::models::{ContextMatch, RetrievedContext};
use crate::store::VectorStore;

#[derive(Clone)]
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    code_collection: String,
    docs_collection: String,
}

impl ContextRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        code_collection: impl Into<String>,
        docs_collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            code_collection: code_collection.into(),
            docs_collection: docs_collection.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn code_collection(&self) -> &str {
        &self.code_collection
    }

    pub fn docs_collection(&self) -> &str {
        &self.docs_collection
    }

    /// Retrieve up to `code_limit` code matches and `doc_limit` doc matches.
    ///
    /// Fails only when the query cannot be embedded.
    pub async fn retrieve(
        &self,
        query: &str,
        code_limit: usize,
        doc_limit: usize,
    ) -> Result<RetrievedContext> {
        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let code_matches = self
            .query_group(&self.code_collection, &query_vec, code_limit)
            .await;
        let doc_matches = self
            .query_group(&self.docs_collection, &query_vec, doc_limit)
            .await;

        tracing::debug!(
            code = code_matches.len(),
            docs = doc_matches.len(),
            "retrieved context"
        );

        Ok(RetrievedContext {
            code_matches,
            doc_matches,
        })
    }

    /// [`retrieve`](Self::retrieve), with an embedding failure also degraded
    /// to an empty context.
    pub async fn retrieve_or_empty(
        &self,
        query: &str,
        code_limit: usize,
        doc_limit: usize,
    ) -> RetrievedContext {
        match self.retrieve(query, code_limit, doc_limit).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "answering without retrieved context");
                RetrievedContext::default()
            }
        }
    }

    async fn query_group(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Vec<ContextMatch> {
        if limit == 0 {
            return Vec::new();
        }
        match self.store.query(collection, query_vec, limit).await {
            Ok(matches) => matches,
            Err(e) => {
                let err = Error::StoreQuery(e.to_string());
                tracing::warn!(collection, error = %err, "context group unavailable");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CollectionEntry, Metadata};
    use crate::store::InMemoryVectorStore;
    use anyhow::bail;
    use async_trait::async_trait;

    /// Embeds by keyword: each axis counts one of a few fixed words.
    pub(crate) struct KeywordEmbedder;

    pub(crate) const AXES: [&str; 3] = ["actor", "stable", "async"];

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

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            bail!("model unavailable")
        }
    }

    pub(crate) async fn seeded_store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = KeywordEmbedder;
        let code = ["actor Counter", "stable var x", "async func f"];
        let mut entries = Vec::new();
        for (i, text) in code.iter().enumerate() {
            let embedding = embedder.embed(&[text.to_string()]).await.unwrap().remove(0);
            entries.push(CollectionEntry {
                id: format!("code-{i}"),
                text: text.to_string(),
                metadata: Metadata::new(),
                embedding,
            });
        }
        store.add("motoko_code_samples", &entries).await.unwrap();
        store
    }

    #[tokio::test]
    async fn missing_docs_collection_degrades_to_empty() {
        let store = seeded_store().await;
        let retriever = ContextRetriever::new(
            Arc::new(KeywordEmbedder),
            store,
            "motoko_code_samples",
            "motoko_docs",
        );
        let ctx = retriever.retrieve("actor", 5, 8).await.unwrap();
        assert_eq!(ctx.code_matches.len(), 3);
        assert!(ctx.doc_matches.is_empty());
        assert_eq!(ctx.code_matches[0].text, "actor Counter");
    }

    #[tokio::test]
    async fn limits_respected_and_zero_skips() {
        let store = seeded_store().await;
        let retriever = ContextRetriever::new(
            Arc::new(KeywordEmbedder),
            store,
            "motoko_code_samples",
            "motoko_docs",
        );
        let ctx = retriever.retrieve("stable", 1, 0).await.unwrap();
        assert_eq!(ctx.code_matches.len(), 1);
        let ctx = retriever.retrieve("stable", 0, 0).await.unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_is_typed() {
        let retriever = ContextRetriever::new(
            Arc::new(FailingEmbedder),
            seeded_store().await,
            "motoko_code_samples",
            "motoko_docs",
        );
        let err = retriever.retrieve("actor", 5, 8).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(retriever.retrieve_or_empty("actor", 5, 8).await.is_empty());
    }
}
