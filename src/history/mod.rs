//! Conversation persistence.
//!
//! - `ConversationStore`: append-only message log keyed by conversation
//! - `SqliteConversationStore`: the `sqlx` SQLite implementation

mod sqlite;
mod store;

pub use sqlite::SqliteConversationStore;
pub use store::{
    Conversation, ConversationStore, ConversationSummary, Message, MessageDeletion, NewMessage,
    Role, StoreError,
};
