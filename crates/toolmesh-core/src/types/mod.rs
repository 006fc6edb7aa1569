//! Core types shared across providers, tools, the orchestrator and the store

mod message;
mod conversation;
mod tool;
mod stream;
mod event;

pub use message::{ChatMessage, ContentPart, MessageRole, MessageContent};
pub use conversation::{
    Conversation, ConversationMessage, ConversationRole, MessagePart, ToolCallPart,
    default_title, generate_message_id,
};
pub use tool::{Tool, ToolCall, ToolDefinition};
pub use stream::StreamChunk;
pub use event::ChatEvent;
pub use tokio_util::sync::{CancellationToken, DropGuard};
