//! Configuration provider trait

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::settings::{AppConfig, LaunchSpec};

/// Configuration provider abstraction
///
/// Implementations:
/// - `MemoryConfigProvider`: In-memory for testing
/// - `FileConfigProvider`: YAML file (~/.config/toolmesh/config.yaml)
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the full configuration
    async fn load(&self) -> ConfigResult<AppConfig>;

    /// Configured tool providers by name
    async fn get_servers(&self) -> ConfigResult<BTreeMap<String, LaunchSpec>> {
        Ok(self.load().await?.mcp_servers)
    }

    /// Add a new tool provider
    async fn add_server(&self, name: &str, spec: LaunchSpec) -> ConfigResult<()>;

    /// Replace an existing tool provider's launch spec
    async fn update_server(&self, name: &str, spec: LaunchSpec) -> ConfigResult<()>;

    /// Remove a tool provider
    async fn remove_server(&self, name: &str) -> ConfigResult<()>;
}

/// Errors that can occur during configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Server already exists: {0}")]
    ServerExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Shared edit logic for providers that hold an [`AppConfig`]
pub(crate) fn insert_server(config: &mut AppConfig, name: &str, spec: LaunchSpec) -> ConfigResult<()> {
    if config.mcp_servers.contains_key(name) {
        return Err(ConfigError::ServerExists(name.to_string()));
    }
    config.mcp_servers.insert(name.to_string(), spec);
    Ok(())
}

pub(crate) fn replace_server(config: &mut AppConfig, name: &str, spec: LaunchSpec) -> ConfigResult<()> {
    match config.mcp_servers.get_mut(name) {
        Some(existing) => {
            *existing = spec;
            Ok(())
        }
        None => Err(ConfigError::ServerNotFound(name.to_string())),
    }
}

pub(crate) fn delete_server(config: &mut AppConfig, name: &str) -> ConfigResult<()> {
    config
        .mcp_servers
        .remove(name)
        .map(|_| ())
        .ok_or_else(|| ConfigError::ServerNotFound(name.to_string()))
}
