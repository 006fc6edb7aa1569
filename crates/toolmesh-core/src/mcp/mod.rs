//! Tool-provider connections over MCP
//!
//! Each configured provider is an external process speaking MCP over stdio,
//! launched through the official rmcp SDK. The [`ConnectionManager`] keeps at
//! most one live session per provider and caches its tool catalog.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolmesh_core::mcp::{ConnectionManager, StdioConnector};
//!
//! let manager = ConnectionManager::new(Arc::new(StdioConnector::new(logger.clone())), logger);
//! manager.register("git", LaunchSpec::new("uvx").with_args(["mcp-server-git"]));
//! manager.connect_all().await;
//!
//! let result = manager.call_tool("git", "git_status", json!({ "repo_path": "." })).await?;
//! ```

mod client;
mod error;
mod manager;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{McpClient, StdioConnector};
pub use error::{McpError, McpResult};
pub use manager::{CatalogTool, ConnectionManager, ConnectionState, ProviderStatus};
pub use session::{ProviderConnector, ProviderSession, RemoteContent, RemoteContentKind, RemoteToolResult};
