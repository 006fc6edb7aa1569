//! Connection manager errors

use std::time::Duration;

use thiserror::Error;

/// Tool-provider connection and invocation errors
///
/// `Clone` so a single in-flight connect outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Provider '{0}' is not connected")]
    NotConnected(String),

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("{operation} timed out after {}s", .after.as_secs_f32())]
    Timeout { operation: String, after: Duration },

    #[error("Provider '{0}' was disconnected while connecting")]
    Superseded(String),
}

impl McpError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
