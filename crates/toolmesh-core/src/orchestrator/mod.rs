//! Conversation orchestration
//!
//! ```text
//! TurnRequest ─► resolve model ─► connect_all ─► merge tools
//!                                                    │
//!        ┌───────────── step 1..=max_steps ◄─────────┘
//!        │  stream model ─► text_delta / tool_call_requested
//!        │  invoke tools ─► tool_call_result / tool_call_error
//!        └─ no tool calls? ─► persist ─► turn_completed
//! ```

mod context;
mod error;
mod turn;

pub use context::{build_context, to_chat_messages};
pub use error::{OrchestratorError, OrchestratorResult};
pub use turn::{
    EventSender, Orchestrator, OrchestratorSettings, TurnInput, TurnOutcome, TurnRequest, TurnState,
};
