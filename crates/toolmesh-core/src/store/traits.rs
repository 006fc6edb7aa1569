//! Conversation store abstraction

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Conversation, ConversationMessage};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only persistence of conversation messages
///
/// Messages are keyed by id: saving an id that is already stored is a no-op,
/// so a turn may be re-saved safely.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create an empty conversation; `None` title gets the default
    async fn create(&self, title: Option<&str>, model_provider: Option<&str>) -> StoreResult<Conversation>;

    async fn get(&self, id: &str) -> StoreResult<Option<Conversation>>;

    /// Append the messages whose ids this conversation has not stored yet,
    /// creating the conversation if missing
    ///
    /// Returns how many messages were added. Last activity is bumped only
    /// when that is non-zero.
    async fn save(
        &self,
        conversation_id: &str,
        model_provider: Option<&str>,
        messages: &[ConversationMessage],
    ) -> StoreResult<usize>;

    /// Messages in insertion order; empty for an unknown id
    async fn load(&self, id: &str) -> StoreResult<Vec<ConversationMessage>>;

    /// All conversations, most recently active first
    async fn list(&self) -> StoreResult<Vec<Conversation>>;

    /// Remove a conversation and its messages; returns whether it existed
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn rename(&self, id: &str, title: &str) -> StoreResult<Conversation>;
}
