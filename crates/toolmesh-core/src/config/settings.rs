//! Application settings loaded from YAML

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::traits::{ConfigError, ConfigResult};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to various tools. \
Use the tools when appropriate to provide accurate and helpful information.";

/// How to launch a tool-provider subprocess
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A model provider entry, keyed by the id callers request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProviderConfig {
    /// Backend adapter (openai, gemini, anthropic, ollama, mock, ...)
    pub backend: String,
    /// Model identifier as used by the backend's API
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl ModelProviderConfig {
    pub fn new(backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
            api_key: None,
            api_base: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Model provider id used when a request names none or an unknown one
    pub model_provider: String,
    /// Maximum generate/execute rounds per turn
    pub max_steps: usize,
    pub system_prompt: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            model_provider: "openai".to_string(),
            max_steps: 5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub connect_secs: u64,
    pub tool_call_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            tool_call_secs: 60,
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn tool_call(&self) -> Duration {
        Duration::from_secs(self.tool_call_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database file; in-memory storage when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub defaults: Defaults,
    pub model_providers: BTreeMap<String, ModelProviderConfig>,
    /// Tool providers by name; the name prefixes every tool they expose
    pub mcp_servers: BTreeMap<String, LaunchSpec>,
    pub timeouts: Timeouts,
    pub storage: StorageSettings,
    pub server: ServerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            model_providers: default_model_providers(),
            mcp_servers: default_mcp_servers(),
            timeouts: Timeouts::default(),
            storage: StorageSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Config with no tool providers, handy as a starting point in tests
    pub fn without_servers() -> Self {
        Self {
            mcp_servers: BTreeMap::new(),
            ..Self::default()
        }
    }

    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.defaults.max_steps == 0 {
            return Err(ConfigError::Invalid("defaults.max_steps must be at least 1".to_string()));
        }
        if !self.model_providers.contains_key(&self.defaults.model_provider) {
            return Err(ConfigError::Invalid(format!(
                "default model provider '{}' is not configured",
                self.defaults.model_provider
            )));
        }
        if let Some((name, _)) = self.mcp_servers.iter().find(|(_, spec)| spec.command.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("mcp server '{}' has an empty command", name)));
        }
        Ok(())
    }
}

fn default_model_providers() -> BTreeMap<String, ModelProviderConfig> {
    BTreeMap::from([
        ("openai".to_string(), ModelProviderConfig::new("openai", "gpt-4o-mini")),
        ("google".to_string(), ModelProviderConfig::new("gemini", "gemini-2.0-flash-exp")),
    ])
}

fn default_mcp_servers() -> BTreeMap<String, LaunchSpec> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    BTreeMap::from([
        ("git".to_string(), LaunchSpec::new("uvx").with_args(["mcp-server-git"])),
        (
            "filesystem".to_string(),
            LaunchSpec::new("npx").with_args([
                "-y".to_string(),
                "@modelcontextprotocol/server-filesystem".to_string(),
                cwd.to_string_lossy().into_owned(),
            ]),
        ),
    ])
}
