//! File-based configuration provider (YAML)
//!
//! Supports user-level (~/.config/toolmesh/config.yaml) and workspace-level
//! (.config/toolmesh/config.yaml) config. A missing file yields the built-in
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::settings::{AppConfig, LaunchSpec};
use super::traits::{delete_server, insert_server, replace_server, ConfigProvider, ConfigResult};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TOOLMESH_CONFIG";

/// Config level (user or workspace)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLevel {
    /// User-level config (~/.config/toolmesh/config.yaml)
    User,
    /// Workspace-level config (.config/toolmesh/config.yaml in workspace root)
    Workspace,
    /// A path given on the command line or via `TOOLMESH_CONFIG`
    Explicit,
}

impl ConfigLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigLevel::User => "user",
            ConfigLevel::Workspace => "workspace",
            ConfigLevel::Explicit => "explicit",
        }
    }
}

/// File-based configuration provider
///
/// # Example
///
/// ```no_run
/// use toolmesh_core::config::FileConfigProvider;
///
/// // User-level config
/// let user_config = FileConfigProvider::user();
///
/// // Workspace-level config
/// let workspace_config = FileConfigProvider::workspace("/path/to/workspace");
/// ```
pub struct FileConfigProvider {
    path: PathBuf,
    level: ConfigLevel,
    cache: RwLock<Option<AppConfig>>,
}

impl FileConfigProvider {
    /// Create a new file config provider for a specific path
    pub fn new(path: impl Into<PathBuf>, level: ConfigLevel) -> Self {
        Self {
            path: path.into(),
            level,
            cache: RwLock::new(None),
        }
    }

    /// Create a user-level config provider (~/.config/toolmesh/config.yaml)
    pub fn user() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config"));
        let path = config_dir.join("toolmesh").join("config.yaml");
        Self::new(path, ConfigLevel::User)
    }

    /// Create a workspace-level config provider (.config/toolmesh/config.yaml)
    pub fn workspace(workspace_root: impl AsRef<Path>) -> Self {
        let path = workspace_root.as_ref().join(".config").join("toolmesh").join("config.yaml");
        Self::new(path, ConfigLevel::Workspace)
    }

    /// Pick the config file: explicit path, then `TOOLMESH_CONFIG`, then the
    /// workspace file if present, then the user file
    pub fn discover(explicit: Option<PathBuf>, workspace_root: impl AsRef<Path>) -> Self {
        if let Some(path) = explicit {
            return Self::new(path, ConfigLevel::Explicit);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::new(PathBuf::from(path), ConfigLevel::Explicit);
        }
        let workspace = Self::workspace(workspace_root);
        if workspace.exists() {
            workspace
        } else {
            Self::user()
        }
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the config level
    pub fn level(&self) -> ConfigLevel {
        self.level
    }

    /// Check if the config file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read_file(&self) -> ConfigResult<AppConfig> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }
        let content = fs::read_to_string(&self.path)?;
        AppConfig::from_yaml(&content)
    }

    fn write_file(&self, config: &AppConfig) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, config.to_yaml()?)?;
        *self.cache.write() = Some(config.clone());
        Ok(())
    }

    /// Get cached or load config
    fn get_config(&self) -> ConfigResult<AppConfig> {
        if let Some(config) = self.cache.read().as_ref() {
            return Ok(config.clone());
        }
        self.reload()
    }

    /// Reload config from disk (invalidate cache)
    pub fn reload(&self) -> ConfigResult<AppConfig> {
        let config = self.read_file()?;
        *self.cache.write() = Some(config.clone());
        Ok(config)
    }

    fn edit(&self, f: impl FnOnce(&mut AppConfig) -> ConfigResult<()>) -> ConfigResult<()> {
        let mut config = self.get_config()?;
        f(&mut config)?;
        self.write_file(&config)
    }
}

impl std::fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .field("level", &self.level)
            .field("exists", &self.exists())
            .finish()
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load(&self) -> ConfigResult<AppConfig> {
        self.get_config()
    }

    async fn add_server(&self, name: &str, spec: LaunchSpec) -> ConfigResult<()> {
        self.edit(|config| insert_server(config, name, spec))
    }

    async fn update_server(&self, name: &str, spec: LaunchSpec) -> ConfigResult<()> {
        self.edit(|config| replace_server(config, name, spec))
    }

    async fn remove_server(&self, name: &str) -> ConfigResult<()> {
        self.edit(|config| delete_server(config, name))
    }
}
