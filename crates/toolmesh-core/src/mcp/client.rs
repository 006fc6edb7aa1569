//! MCP client using the official rmcp SDK
//!
//! Launches a tool provider as a child process and speaks MCP over its stdio.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rmcp::{
    model::{CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation, RawContent, Tool},
    service::{Peer, RunningService},
    transport::{ConfigureCommandExt, TokioChildProcess},
    RoleClient, ServiceExt,
};
use serde_json::Value;

use crate::config::LaunchSpec;
use crate::logging::SharedLogger;
use crate::types::ToolDefinition;
use crate::{log_debug, log_info};

use super::error::{McpError, McpResult};
use super::session::{ProviderConnector, ProviderSession, RemoteContent, RemoteToolResult};

fn client_info() -> ClientInfo {
    ClientInfo {
        meta: None,
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "toolmesh".to_string(),
            title: Some("Toolmesh".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            website_url: None,
            icons: None,
        },
    }
}

/// MCP client session for one subprocess tool provider
pub struct McpClient {
    name: String,
    /// Request handle; cheap to clone and usable concurrently
    peer: Peer<RoleClient>,
    /// Owns the transport task; taken on close
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    logger: SharedLogger,
}

impl McpClient {
    /// Spawn the provider process and perform the handshake
    pub async fn spawn(name: &str, spec: &LaunchSpec, logger: SharedLogger) -> McpResult<Self> {
        log_info!(logger, "[McpClient:{}] Launching: {} {}", name, spec.command, spec.args.join(" "));

        let command = tokio::process::Command::new(&spec.command).configure(|cmd| {
            cmd.args(&spec.args)
                .envs(spec.env.iter())
                .stderr(Stdio::null());
            if let Some(cwd) = &spec.cwd {
                cmd.current_dir(cwd);
            }
        });

        let transport = TokioChildProcess::new(command).map_err(|e| {
            McpError::ConnectionFailed(format!("failed to launch '{}': {}", spec.command, e))
        })?;

        let service = client_info()
            .serve(transport)
            .await
            .map_err(|e| McpError::InitializationFailed(e.to_string()))?;

        if let Some(info) = service.peer_info() {
            log_info!(
                logger,
                "[McpClient:{}] Connected to {} {}",
                name,
                info.server_info.name,
                info.server_info.version
            );
        }

        Ok(Self {
            name: name.to_string(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            logger,
        })
    }

    fn definition(tool: Tool) -> ToolDefinition {
        ToolDefinition {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()),
            // input_schema is Arc<JsonObject>; a failed conversion adapts to accept-all
            input_schema: serde_json::to_value(tool.input_schema.as_ref()).unwrap_or(Value::Null),
        }
    }
}

#[async_trait]
impl ProviderSession for McpClient {
    async fn list_tools(&self) -> McpResult<Vec<ToolDefinition>> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| McpError::Protocol(e.to_string()))?;

        log_info!(self.logger, "[McpClient:{}] Listed {} tools", self.name, tools.len());
        Ok(tools.into_iter().map(Self::definition).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<RemoteToolResult> {
        log_debug!(self.logger, "[McpClient:{}] Calling tool: {}", self.name, name);

        let params = CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments: arguments.as_object().cloned(),
            task: None,
        };

        let result = self
            .peer
            .call_tool(params)
            .await
            .map_err(|e| McpError::ToolCallFailed(e.to_string()))?;

        // Content is Annotated<RawContent>; .raw holds the entry
        let content = result
            .content
            .iter()
            .map(|c| match &c.raw {
                RawContent::Text(t) => RemoteContent::text(t.text.clone()),
                other => RemoteContent::from_wire(&serde_json::to_value(other).unwrap_or(Value::Null)),
            })
            .collect();

        Ok(RemoteToolResult {
            content,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn close(&self) -> McpResult<()> {
        let service = self.service.lock().take();
        if let Some(service) = service {
            log_info!(self.logger, "[McpClient:{}] Closing connection", self.name);
            service
                .cancel()
                .await
                .map_err(|e| McpError::Protocol(e.to_string()))?;
        }
        Ok(())
    }
}

/// Connector that launches providers as stdio subprocesses
pub struct StdioConnector {
    logger: SharedLogger,
}

impl StdioConnector {
    pub fn new(logger: SharedLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl ProviderConnector for StdioConnector {
    async fn connect(&self, name: &str, spec: &LaunchSpec) -> McpResult<Arc<dyn ProviderSession>> {
        let client = McpClient::spawn(name, spec, Arc::clone(&self.logger)).await?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoOpLogger;

    #[tokio::test]
    async fn test_nonexistent_command_fails_to_launch() {
        let connector = StdioConnector::new(Arc::new(NoOpLogger));
        let spec = LaunchSpec::new("/nonexistent/toolmesh-provider-binary");

        let err = connector.connect("ghost", &spec).await.err().unwrap();
        assert!(matches!(err, McpError::ConnectionFailed(_)), "{:?}", err);
        assert!(err.to_string().contains("/nonexistent/toolmesh-provider-binary"));
    }

    #[test]
    fn test_definition_conversion() {
        let schema: rmcp::model::JsonObject = serde_json::from_value(serde_json::json!({
            "type": "object",
            "properties": {}
        }))
        .unwrap();
        let tool = Tool::new("status", "Show the working tree status", Arc::new(schema));

        let def = McpClient::definition(tool);
        assert_eq!(def.name, "status");
        assert_eq!(def.description.as_deref(), Some("Show the working tree status"));
        assert_eq!(def.input_schema["type"], "object");
    }
}
