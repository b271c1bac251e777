//! ConversationStore trait: the append-only message log the chat flow
//! persists into.
//!
//! Ordering contract: `list_messages` returns ascending creation time, ties
//! broken by write order.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
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
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Conversation row plus the computed fields the sidebar list shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: i64,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub pair_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub metadata: Value,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub pair_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub metadata: Value,
}

/// What a pair-aware delete actually removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDeletion {
    Pair { pair_id: String, removed: u64 },
    Single { id: String },
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        title: Option<String>,
        metadata: Value,
    ) -> Result<Conversation, StoreError>;

    /// Most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    async fn update_title(&self, id: &str, title: &str) -> Result<Conversation, StoreError>;

    /// Removes the conversation and every message in it.
    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError>;

    /// Appends a message. Fails with `NotFound` when the conversation does not
    /// exist, without writing anything.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Deletes a message; when it belongs to a pair the whole pair goes.
    async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<MessageDeletion, StoreError>;

    async fn delete_message_pair(
        &self,
        conversation_id: &str,
        pair_id: &str,
    ) -> Result<u64, StoreError>;
}
