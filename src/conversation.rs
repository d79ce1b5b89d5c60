//! Persistence of multi-turn chat conversations.

use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{Conversation, ConversationTurn, Role};

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a conversation for `user_id`. Conversations owned by another
    /// user are reported as missing.
    pub async fn load(&self, id: i64, user_id: i64) -> Result<Conversation> {
        let row = sqlx::query(
            "SELECT id, user_id, pending_message FROM conversations WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("conversation {} not found", id)))?;

        let turn_rows = sqlx::query(
            "SELECT role, content FROM conversation_turns WHERE conversation_id = ? ORDER BY turn_index",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(turn_rows.len());
        for r in &turn_rows {
            let role: String = r.get("role");
            turns.push(ConversationTurn {
                role: role.parse::<Role>()?,
                content: r.get("content"),
            });
        }

        Ok(Conversation::restore(
            row.get("id"),
            row.get("user_id"),
            turns,
            row.get("pending_message"),
        ))
    }

    /// Write the conversation and all of its turns in one transaction,
    /// assigning an id on first save. Returns the id.
    pub async fn save(&self, conversation: &mut Conversation) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let id = match conversation.id {
            Some(id) => {
                let result = sqlx::query(
                    "UPDATE conversations SET pending_message = ?, updated_at = ? WHERE id = ? AND user_id = ?",
                )
                .bind(&conversation.pending_message)
                .bind(now)
                .bind(id)
                .bind(conversation.user_id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(Error::NotFound(format!("conversation {} not found", id)));
                }
                sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                id
            }
            None => sqlx::query(
                "INSERT INTO conversations (user_id, pending_message, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(conversation.user_id)
            .bind(&conversation.pending_message)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid(),
        };

        for (i, turn) in conversation.turns().iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_turns (conversation_id, turn_index, role, content) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(i as i64)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        conversation.id = Some(id);
        tracing::debug!(conversation_id = id, turns = conversation.turns().len(), "conversation saved");
        Ok(id)
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?)
    }
}
