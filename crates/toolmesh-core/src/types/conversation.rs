//! Persisted conversation types
//!
//! A [`ConversationMessage`] is the unit handed to the store. Once saved it is
//! never mutated; re-saving the same id is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
}

impl ConversationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationRole::User => "user",
            ConversationRole::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(ConversationRole::User),
            "assistant" => Some(ConversationRole::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation as recorded in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(rename = "errorText", skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolCallPart {
    pub fn is_error(&self) -> bool {
        self.error_text.is_some()
    }

    /// Text fed back to the model for this call
    pub fn result_text(&self) -> &str {
        self.error_text
            .as_deref()
            .or(self.output.as_deref())
            .unwrap_or_default()
    }
}

/// One ordered content part of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    /// Reference to an uploaded file
    File {
        url: String,
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    ToolCall(ToolCallPart),
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Stable identity; the store persists each id at most once
    pub id: String,
    pub role: ConversationRole,
    pub parts: Vec<MessagePart>,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: ConversationRole, parts: Vec<MessagePart>) -> Self {
        Self {
            id: generate_message_id(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(ConversationRole::User, vec![MessagePart::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(ConversationRole::Assistant, vec![MessagePart::text(text)])
    }

    /// All text parts concatenated in order
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(|p| match p {
            MessagePart::ToolCall(call) => Some(call),
            _ => None,
        })
    }
}

/// Conversation metadata as listed by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(rename = "modelProvider", skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
}

/// Generate a globally unique message id
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Default title for a new conversation: the local wall-clock time
pub fn default_title() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}
