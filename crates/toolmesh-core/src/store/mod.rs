//! Conversation persistence
//!
//! - `MemoryConversationStore`: process memory, for tests and ephemeral runs
//! - `SqliteConversationStore`: a SQLite file via rusqlite

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryConversationStore;
pub use sqlite::SqliteConversationStore;
pub use traits::{ConversationStore, StoreError, StoreResult};
