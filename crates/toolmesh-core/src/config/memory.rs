//! In-memory configuration provider

use async_trait::async_trait;
use parking_lot::RwLock;

use super::settings::{AppConfig, LaunchSpec};
use super::traits::{delete_server, insert_server, replace_server, ConfigProvider, ConfigResult};

/// In-memory configuration provider for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryConfigProvider {
    config: RwLock<AppConfig>,
}

impl MemoryConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the whole configuration
    pub fn set(&self, config: AppConfig) {
        *self.config.write() = config;
    }
}

#[async_trait]
impl ConfigProvider for MemoryConfigProvider {
    async fn load(&self) -> ConfigResult<AppConfig> {
        Ok(self.config.read().clone())
    }

    async fn add_server(&self, name: &str, spec: LaunchSpec) -> ConfigResult<()> {
        insert_server(&mut self.config.write(), name, spec)
    }

    async fn update_server(&self, name: &str, spec: LaunchSpec) -> ConfigResult<()> {
        replace_server(&mut self.config.write(), name, spec)
    }

    async fn remove_server(&self, name: &str) -> ConfigResult<()> {
        delete_server(&mut self.config.write(), name)
    }
}
