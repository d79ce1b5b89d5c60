//! The chat pipeline: pick the user's question, ground it, answer it, and
//! remember a short note about the exchange.

use std::sync::Arc;

use serde::Deserialize;

use crate::conversation::ConversationStore;
use crate::error::{Error, Result};
use crate::generation::GenerationParams;
use crate::models::{Conversation, Role};
use crate::rag::RagEngine;

/// One message of an OpenAI-style chat request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub answer: String,
    pub conversation_id: i64,
    pub model: String,
}

#[derive(Clone)]
pub struct ChatService {
    rag: Arc<RagEngine>,
    conversations: ConversationStore,
}

impl ChatService {
    pub fn new(rag: Arc<RagEngine>, conversations: ConversationStore) -> Self {
        Self { rag, conversations }
    }

    /// Run one chat turn. Nothing is persisted unless generation succeeds.
    pub async fn complete(
        &self,
        user_id: i64,
        messages: &[ChatMessage],
        conversation_id: Option<i64>,
        params: &GenerationParams,
    ) -> Result<ChatOutcome> {
        let query = latest_user_message(messages)
            .ok_or_else(|| Error::Validation("No user message found.".to_string()))?;

        let mut conversation = match conversation_id {
            Some(id) => self.conversations.load(id, user_id).await?,
            None => Conversation::new(user_id),
        };
        conversation.set_pending_message(query);

        let context = self.rag.chat_context(query).await;
        let reply = self.rag.generate_reply(&conversation, &context, params).await?;

        conversation.add_turn(Role::User, query);
        conversation.add_turn(Role::System, reply.history_note);
        let conversation_id = self.conversations.save(&mut conversation).await?;

        tracing::info!(
            user_id,
            conversation_id,
            context = context.len(),
            "chat turn answered"
        );

        Ok(ChatOutcome {
            answer: reply.visible_answer,
            conversation_id,
            model: self.rag.model_name().to_string(),
        })
    }
}

/// Content of the last `user` message, if it has any text.
fn latest_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .filter(|c| !c.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn picks_last_user_message() {
        let messages = vec![
            msg("system", "be nice"),
            msg("user", "first"),
            msg("assistant", "ok"),
            msg("user", "second"),
            msg("assistant", "trailing"),
        ];
        assert_eq!(latest_user_message(&messages), Some("second"));
    }

    #[test]
    fn no_user_message() {
        assert_eq!(latest_user_message(&[msg("system", "x")]), None);
        assert_eq!(latest_user_message(&[msg("user", "   ")]), None);
        assert_eq!(latest_user_message(&[]), None);
    }
}
