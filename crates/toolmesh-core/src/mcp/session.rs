//! Session and connector seams between the manager and a transport

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LaunchSpec;
use crate::types::ToolDefinition;

use super::error::McpResult;

/// Kind of a remote result entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteContentKind {
    Text,
    Image,
    Resource,
    Other,
}

impl RemoteContentKind {
    fn parse(value: &str) -> Self {
        match value {
            "text" => RemoteContentKind::Text,
            "image" => RemoteContentKind::Image,
            "resource" => RemoteContentKind::Resource,
            _ => RemoteContentKind::Other,
        }
    }
}

/// One typed entry of a remote tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteContent {
    #[serde(rename = "type")]
    pub kind: RemoteContentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl RemoteContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: RemoteContentKind::Text,
            text: Some(text.into()),
            data: None,
            mime_type: None,
        }
    }

    /// Read an entry from its protocol JSON; embedded resources are flattened
    pub fn from_wire(value: &Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(RemoteContentKind::parse)
            .unwrap_or(RemoteContentKind::Other);
        let body = match kind {
            RemoteContentKind::Resource => value.get("resource").unwrap_or(value),
            _ => value,
        };
        let field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            kind,
            text: field("text"),
            data: field("data").or_else(|| field("blob")),
            mime_type: field("mimeType"),
        }
    }
}

/// Result of a remote tool invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolResult {
    pub content: Vec<RemoteContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl RemoteToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![RemoteContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![RemoteContent::text(text)],
            is_error: true,
        }
    }

    /// Text entries only, joined by a newline
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.kind == RemoteContentKind::Text)
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A live connection to one tool provider
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Fetch the full tool catalog
    async fn list_tools(&self) -> McpResult<Vec<ToolDefinition>>;

    /// Invoke a tool by its provider-local name
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<RemoteToolResult>;

    /// Close the transport; further calls fail
    async fn close(&self) -> McpResult<()>;
}

/// Opens sessions from launch specs
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Launch the provider and complete the protocol handshake
    async fn connect(&self, name: &str, spec: &LaunchSpec) -> McpResult<Arc<dyn ProviderSession>>;
}
