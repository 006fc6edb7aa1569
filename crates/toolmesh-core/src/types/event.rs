//! Events streamed to the caller during a chat turn

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conversation::ConversationMessage;

/// One incremental event of a chat turn, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The turn was accepted
    ///
    /// Carries the conversation id, the id of the user message being answered
    /// and the id the assistant message will be stored under. Clients echo
    /// these ids back when they resend the transcript.
    TurnStarted {
        #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(rename = "userMessageId", skip_serializing_if = "Option::is_none")]
        user_message_id: Option<String>,
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// A model generation round began (1-based)
    StepStarted { step: usize },
    TextDelta { text: String },
    ToolCallRequested {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolCallResult {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        output: String,
    },
    ToolCallError {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "errorText")]
        error_text: String,
    },
    /// The step bound was reached while the model still requested tools
    Truncated {
        #[serde(rename = "maxSteps")]
        max_steps: usize,
    },
    TurnCompleted {
        message: ConversationMessage,
        truncated: bool,
    },
    TurnFailed { error: String },
}

impl ChatEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::TurnStarted { .. } => "turn_started",
            ChatEvent::StepStarted { .. } => "step_started",
            ChatEvent::TextDelta { .. } => "text_delta",
            ChatEvent::ToolCallRequested { .. } => "tool_call_requested",
            ChatEvent::ToolCallResult { .. } => "tool_call_result",
            ChatEvent::ToolCallError { .. } => "tool_call_error",
            ChatEvent::Truncated { .. } => "truncated",
            ChatEvent::TurnCompleted { .. } => "turn_completed",
            ChatEvent::TurnFailed { .. } => "turn_failed",
        }
    }

    /// Whether this event ends the turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::TurnCompleted { .. } | ChatEvent::TurnFailed { .. })
    }
}
