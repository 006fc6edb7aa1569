//! toolmesh core
//!
//! Tool orchestration for LLM chat turns. Tool providers run as stdio
//! subprocesses speaking MCP; their catalogs are merged with built-in local
//! tools and offered to a streaming model in a bounded generate/execute loop.
//! Finished turns land in a conversation store.
//!
//! ```rust,ignore
//! use toolmesh_core::{ConnectionManager, Orchestrator, TurnRequest};
//!
//! let manager = Arc::new(ConnectionManager::new(Arc::new(StdioConnector::new(logger.clone())), logger.clone()));
//! manager.register_all(&config.mcp_servers);
//!
//! let orchestrator = Arc::new(Orchestrator::new(models, manager, store, logger));
//! let (mut events, _guard) = orchestrator.spawn_turn(TurnRequest::transcript(messages));
//! while let Some(event) = events.recv().await {
//!     // forward to the client
//! }
//! ```

pub mod types;
pub mod logging;
pub mod config;
pub mod schema;
pub mod mcp;
pub mod tools;
pub mod providers;
pub mod orchestrator;
pub mod store;

pub use types::{
    CancellationToken, ChatEvent, ChatMessage, ContentPart, Conversation, ConversationMessage,
    ConversationRole, MessagePart, MessageRole, StreamChunk, Tool, ToolCall, ToolCallPart,
    ToolDefinition,
};

pub use logging::{ConsoleLogger, Logger, NoOpLogger, SharedLogger, TracingLogger};

pub use config::{AppConfig, ConfigProvider, FileConfigProvider, LaunchSpec, MemoryConfigProvider};

pub use schema::{ToolSchema, ValidationError};

pub use mcp::{ConnectionManager, ConnectionState, McpError, McpResult, ProviderStatus, StdioConnector};

pub use tools::{LocalTool, ToolOutcome, ToolRegistry};

pub use providers::{ModelResolver, Provider, ProviderError};

pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorSettings, TurnRequest};

pub use store::{
    ConversationStore, MemoryConversationStore, SqliteConversationStore, StoreError,
};
