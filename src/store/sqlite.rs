//! SQLite-backed [`VectorStore`].
//!
//! Embeddings are stored as little-endian `f32` BLOBs in `vector_entries`
//! and scanned brute-force at query time. Collection membership is tracked
//! in `vector_collections` so an empty collection is distinguishable from
//! a missing one.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::{CollectionEntry, ContextMatch, Metadata};

use super::{top_k, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, collection: &str, entries: &[CollectionEntry]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO vector_collections (name, created_at) VALUES (?, ?)")
            .bind(collection)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            let metadata_json = serde_json::to_string(&entry.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO vector_entries (collection, id, text, metadata_json, embedding, dims, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(collection)
            .bind(&entry.id)
            .bind(&entry.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&entry.embedding))
            .bind(entry.embedding.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<ContextMatch>> {
        if !self.has_collection(collection).await? {
            bail!("collection not found: {}", collection);
        }

        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM vector_entries WHERE collection = ? AND dims = ?",
        )
        .bind(collection)
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .with_context(|| format!("corrupt metadata for entry {}", id))?;
            let distance = cosine_distance(query_vec, &blob_to_vec(&blob));
            matches.push(ContextMatch {
                id,
                text: row.get("text"),
                metadata,
                distance,
            });
        }

        Ok(top_k(matches, limit))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_entries WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_collections WHERE name = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n > 0)
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vector_entries WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn retain(&self, collection: &str, keep: &HashSet<String>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM vector_entries WHERE collection = ?")
            .bind(collection)
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = 0u64;
        for id in ids.iter().filter(|id| !keep.contains(*id)) {
            removed += sqlx::query("DELETE FROM vector_entries WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }
}
