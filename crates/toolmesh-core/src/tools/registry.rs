//! Merged tool registry
//!
//! Built per turn from the local tool set and the cached catalogs of every
//! connected provider. Remote tools are named `<provider>_<tool>`. Every
//! failure mode of an invocation becomes error text for the model; nothing
//! here aborts a turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::logging::SharedLogger;
use crate::mcp::{ConnectionManager, McpError};
use crate::schema::ToolSchema;
use crate::types::{Tool, ToolCall};
use crate::{log_debug, log_info, log_warn};

use super::local::LocalTool;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one tool invocation as fed back to the model
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Succeeded(String),
    Failed(String),
}

impl ToolOutcome {
    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Succeeded(text) | ToolOutcome::Failed(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Failed(_))
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutcome::Succeeded(text) | ToolOutcome::Failed(text) => text,
        }
    }
}

/// Where a merged tool executes
#[derive(Clone)]
pub enum ToolSource {
    Local(Arc<dyn LocalTool>),
    Remote { provider: String, tool: String },
}

impl std::fmt::Debug for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolSource::Local(tool) => f.debug_tuple("Local").field(&tool.name()).finish(),
            ToolSource::Remote { provider, tool } => f
                .debug_struct("Remote")
                .field("provider", provider)
                .field("tool", tool)
                .finish(),
        }
    }
}

/// A tool definition plus the executor behind it
#[derive(Debug, Clone)]
pub struct MergedTool {
    pub name: String,
    pub description: Option<String>,
    pub schema: Arc<ToolSchema>,
    pub source: ToolSource,
}

impl MergedTool {
    pub fn remote_name(provider: &str, tool: &str) -> String {
        format!("{}_{}", provider, tool)
    }

    /// Tool as advertised to the model
    pub fn to_tool(&self) -> Tool {
        Tool::new(&self.name, self.description.clone().unwrap_or_default()).with_schema(self.schema.to_json_schema())
    }
}

/// Unique-by-name view over local and remote tools for one turn
pub struct ToolRegistry {
    tools: Vec<MergedTool>,
    index: HashMap<String, usize>,
    connections: Option<Arc<ConnectionManager>>,
    timeout: Duration,
    logger: SharedLogger,
}

impl ToolRegistry {
    /// Registry holding only local tools
    pub fn local(locals: &[Arc<dyn LocalTool>], logger: SharedLogger) -> Self {
        let mut registry = Self {
            tools: Vec::new(),
            index: HashMap::new(),
            connections: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
            logger,
        };
        for tool in locals {
            registry.insert(MergedTool {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                schema: Arc::new(tool.schema()),
                source: ToolSource::Local(Arc::clone(tool)),
            });
        }
        registry
    }

    /// Merge local tools with the cached catalogs of every connected provider
    ///
    /// Local names win; a remote tool whose merged name is already taken is
    /// skipped with a warning.
    pub fn merge(locals: &[Arc<dyn LocalTool>], connections: Arc<ConnectionManager>, logger: SharedLogger) -> Self {
        let mut registry = Self::local(locals, logger);

        for (provider, catalog) in connections.get_all_tools() {
            for entry in catalog.iter() {
                let name = MergedTool::remote_name(&provider, &entry.definition.name);
                if registry.index.contains_key(&name) {
                    log_warn!(
                        registry.logger,
                        "[ToolRegistry] Skipping '{}' from '{}': name already registered",
                        name,
                        provider
                    );
                    continue;
                }
                registry.insert(MergedTool {
                    name,
                    description: entry.definition.description.clone(),
                    schema: Arc::clone(&entry.schema),
                    source: ToolSource::Remote {
                        provider: provider.clone(),
                        tool: entry.definition.name.clone(),
                    },
                });
            }
        }

        log_info!(
            registry.logger,
            "[ToolRegistry] {} tools available ({} local)",
            registry.tools.len(),
            locals.len()
        );
        registry.connections = Some(connections);
        registry
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn insert(&mut self, tool: MergedTool) {
        if self.index.contains_key(&tool.name) {
            log_warn!(self.logger, "[ToolRegistry] Duplicate tool '{}' ignored", tool.name);
            return;
        }
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&MergedTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool list in registration order, with JSON Schemas rendered from the adapted schemas
    pub fn tools_for_model(&self) -> Vec<Tool> {
        self.tools.iter().map(MergedTool::to_tool).collect()
    }

    /// Validate and execute one call, bounded by the tool timeout
    pub async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        let Some(tool) = self.get(&call.name) else {
            log_warn!(self.logger, "[ToolRegistry] Model requested unknown tool '{}'", call.name);
            return ToolOutcome::Failed(format!("Error: unknown tool {}", call.name));
        };

        let args = match tool.schema.validate(&call.input) {
            Ok(args) => args,
            Err(e) => {
                return ToolOutcome::Failed(format!("Error: invalid arguments for {}: {}", tool.name, e));
            }
        };

        log_debug!(self.logger, "[ToolRegistry] Executing '{}' ({})", tool.name, call.id);
        match tokio::time::timeout(self.timeout, self.execute(tool, args)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = McpError::timeout(format!("tool '{}'", tool.name), self.timeout);
                ToolOutcome::Failed(format!("Error executing tool: {}", err))
            }
        }
    }

    async fn execute(&self, tool: &MergedTool, args: Value) -> ToolOutcome {
        match &tool.source {
            ToolSource::Local(local) => match local.execute(args).await {
                Ok(text) => ToolOutcome::Succeeded(text),
                Err(e) => ToolOutcome::Failed(format!("Error executing tool: {}", e)),
            },
            ToolSource::Remote { provider, tool: remote } => {
                let Some(connections) = &self.connections else {
                    return ToolOutcome::Failed(format!(
                        "Error executing tool: {}",
                        McpError::NotConnected(provider.clone())
                    ));
                };
                match connections.call_tool(provider, remote, args).await {
                    Ok(result) if result.is_error => ToolOutcome::Failed(format!("Error: {}", result.joined_text())),
                    Ok(result) => ToolOutcome::Succeeded(result.joined_text()),
                    Err(e) => {
                        log_warn!(self.logger, "[ToolRegistry] '{}' failed: {}", tool.name, e);
                        ToolOutcome::Failed(format!("Error executing tool: {}", e))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchSpec;
    use crate::logging::NoOpLogger;
    use crate::mcp::testing::FakeConnector;
    use crate::mcp::RemoteToolResult;
    use crate::tools::builtin_tools;
    use crate::types::ToolDefinition;
    use async_trait::async_trait;
    use serde_json::json;

    fn logger() -> SharedLogger {
        Arc::new(NoOpLogger)
    }

    fn git_catalog() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("status", json!({ "type": "object", "properties": {} })),
            ToolDefinition::new(
                "log",
                json!({
                    "type": "object",
                    "properties": {
                        "repo_path": { "type": "string" },
                        "max_count": { "type": "number" }
                    },
                    "required": ["repo_path"]
                }),
            ),
        ]
    }

    async fn connected(connector: Arc<FakeConnector>) -> Arc<ConnectionManager> {
        let manager = Arc::new(ConnectionManager::new(connector, logger()));
        manager.register("git", LaunchSpec::new("uvx"));
        manager.connect_all().await;
        manager
    }

    struct Shadow;

    #[async_trait]
    impl LocalTool for Shadow {
        fn name(&self) -> &str {
            "git_status"
        }
        fn description(&self) -> &str {
            "local shadow"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok("local".into())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl LocalTool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "never answers in time"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_remote_tools_are_prefixed_and_routed() {
        let connector = Arc::new(FakeConnector::new().with_provider("git", git_catalog()));
        let manager = connected(Arc::clone(&connector)).await;
        let registry = ToolRegistry::merge(&builtin_tools(), manager, logger());

        assert_eq!(
            registry.names(),
            ["getWeather", "getCurrentTime", "calculate", "searchInfo", "git_status", "git_log"]
        );

        // Empty-properties schema accepts zero arguments
        let outcome = registry.invoke(&ToolCall::new("c1", "git_status", Value::Null)).await;
        assert_eq!(outcome, ToolOutcome::Succeeded("status called with {}".into()));

        let calls = connector.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].provider, "git");
        assert_eq!(calls[0].tool, "status");
    }

    #[tokio::test]
    async fn test_local_name_wins_on_collision() {
        let connector = Arc::new(FakeConnector::new().with_provider("git", git_catalog()));
        let manager = connected(connector).await;
        let locals: Vec<Arc<dyn LocalTool>> = vec![Arc::new(Shadow)];
        let registry = ToolRegistry::merge(&locals, manager, logger());

        assert_eq!(registry.names(), ["git_status", "git_log"]);
        assert!(matches!(registry.get("git_status").unwrap().source, ToolSource::Local(_)));
        let outcome = registry.invoke(&ToolCall::new("c1", "git_status", json!({}))).await;
        assert_eq!(outcome.text(), "local");
    }

    #[tokio::test]
    async fn test_failure_texts() {
        let connector = Arc::new(FakeConnector::new().with_provider("git", git_catalog()));
        connector.respond("status", RemoteToolResult::error("not a git repository"));
        let manager = connected(Arc::clone(&connector)).await;
        let registry = ToolRegistry::merge(&builtin_tools(), Arc::clone(&manager), logger());

        let unknown = registry.invoke(&ToolCall::new("c1", "git_push", json!({}))).await;
        assert_eq!(unknown, ToolOutcome::Failed("Error: unknown tool git_push".into()));

        let invalid = registry.invoke(&ToolCall::new("c2", "git_log", json!({ "max_count": "ten" }))).await;
        assert!(invalid.is_error());
        assert!(invalid.text().starts_with("Error: invalid arguments for git_log: "));
        assert!(connector.calls().is_empty());

        let flagged = registry.invoke(&ToolCall::new("c3", "git_status", json!({}))).await;
        assert_eq!(flagged, ToolOutcome::Failed("Error: not a git repository".into()));

        // Provider went away after the merge
        manager.disconnect("git").await;
        let gone = registry.invoke(&ToolCall::new("c4", "git_status", json!({}))).await;
        assert_eq!(gone, ToolOutcome::Failed("Error executing tool: Provider 'git' is not connected".into()));
    }

    #[tokio::test]
    async fn test_unknown_keys_are_stripped_before_remote_call() {
        let connector = Arc::new(FakeConnector::new().with_provider("git", git_catalog()));
        let manager = connected(Arc::clone(&connector)).await;
        let registry = ToolRegistry::merge(&[], manager, logger());

        let outcome = registry
            .invoke(&ToolCall::new("c1", "git_log", json!({ "repo_path": ".", "color": true })))
            .await;
        assert!(!outcome.is_error());
        assert_eq!(connector.calls()[0].arguments, json!({ "repo_path": "." }));
    }

    #[tokio::test]
    async fn test_local_tool_timeout() {
        let locals: Vec<Arc<dyn LocalTool>> = vec![Arc::new(Sleepy)];
        let registry = ToolRegistry::local(&locals, logger()).with_timeout(Duration::from_millis(20));

        let outcome = registry.invoke(&ToolCall::new("c1", "sleepy", json!({}))).await;
        assert!(outcome.is_error());
        assert!(outcome.text().starts_with("Error executing tool: tool 'sleepy' timed out"));
    }

    #[test]
    fn test_tools_for_model_renders_schemas() {
        let registry = ToolRegistry::local(&builtin_tools(), logger());
        let tools = registry.tools_for_model();
        let calculate = tools.iter().find(|t| t.name == "calculate").unwrap();
        assert_eq!(calculate.description, "Perform basic mathematical calculations");
        assert_eq!(
            calculate.input_schema.as_ref().unwrap()["required"],
            json!(["expression"])
        );
    }
}
