//! Core data models shared by retrieval, prompting, and persistence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metadata attached to a vector store entry. Values are JSON scalars.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// An entry written into a vector collection.
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// One nearest-neighbour hit. Lives for a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMatch {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Store-reported distance, `>= 0`.
    pub distance: f32,
}

impl ContextMatch {
    /// A metadata value rendered as text. Missing keys, nulls, and empty
    /// strings yield `None`.
    pub fn meta(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Like [`meta`](Self::meta), but a present empty string is kept as
    /// is; only missing keys and nulls fall back to `default`.
    pub fn meta_or(&self, key: &str, default: &str) -> String {
        match self.metadata.get(key) {
            None | Some(serde_json::Value::Null) => default.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn meta_bool(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        }
    }
}

/// Raw matches from both collections.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub code_matches: Vec<ContextMatch>,
    pub doc_matches: Vec<ContextMatch>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.code_matches.is_empty() && self.doc_matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.code_matches.len() + self.doc_matches.len()
    }
}

/// Stable ascending sort by distance.
pub fn sort_by_distance(matches: &mut [ContextMatch]) {
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "system" => Ok(Role::System),
            other => anyhow::bail!("unknown conversation role: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// A multi-turn exchange. Turns are append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Assigned when first persisted.
    pub id: Option<i64>,
    pub user_id: i64,
    turns: Vec<ConversationTurn>,
    pub pending_message: String,
}

impl Conversation {
    pub fn new(user_id: i64) -> Self {
        Self {
            id: None,
            user_id,
            turns: Vec::new(),
            pending_message: String::new(),
        }
    }

    /// Rebuild a persisted conversation.
    pub fn restore(
        id: i64,
        user_id: i64,
        turns: Vec<ConversationTurn>,
        pending_message: String,
    ) -> Self {
        Self {
            id: Some(id),
            user_id,
            turns,
            pending_message,
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn add_turn(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role,
            content: content.into(),
        });
    }

    pub fn set_pending_message(&mut self, message: impl Into<String>) {
        self.pending_message = message.into();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub created_at: i64,
}

/// An API key as listed to its owner. The secret itself is never stored.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: i64,
    pub owner_user_id: i64,
    pub key_prefix: String,
    pub label: String,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

/// A freshly created key together with its one-time secret.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub key: ApiKey,
    pub secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(distance: f32) -> ContextMatch {
        ContextMatch {
            id: format!("id-{distance}"),
            text: String::new(),
            metadata: Metadata::new(),
            distance,
        }
    }

    #[test]
    fn sort_is_stable_and_ascending() {
        let mut v = vec![hit(0.5), hit(0.1), hit(0.5), hit(0.0)];
        v[0].id = "first-half".into();
        v[2].id = "second-half".into();
        sort_by_distance(&mut v);
        let ids: Vec<_> = v.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["id-0", "id-0.1", "first-half", "second-half"]);
    }

    #[test]
    fn meta_renders_scalars() {
        let mut m = hit(0.1);
        m.metadata.insert("title".into(), json!("Actors"));
        m.metadata.insert("empty".into(), json!(""));
        m.metadata.insert("flag".into(), json!(true));
        m.metadata.insert("n".into(), json!(3));
        assert_eq!(m.meta("title").as_deref(), Some("Actors"));
        assert_eq!(m.meta("empty"), None);
        assert_eq!(m.meta("n").as_deref(), Some("3"));
        assert_eq!(m.meta_or("missing", "Unknown"), "Unknown");
        assert_eq!(m.meta_or("empty", "Untitled"), "");
        assert_eq!(m.meta_or("n", "0"), "3");
        assert!(m.meta_bool("flag"));
        assert!(!m.meta_bool("missing"));
    }

    #[test]
    fn role_parses() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::System.to_string(), "system");
        assert!("assistant".parse::<Role>().is_err());
    }

    #[test]
    fn conversation_appends() {
        let mut c = Conversation::new(7);
        c.add_turn(Role::User, "hi");
        c.add_turn(Role::System, "greeted");
        assert_eq!(c.turns().len(), 2);
        assert_eq!(c.turns()[0].role, Role::User);
        assert!(c.id.is_none());
    }
}
