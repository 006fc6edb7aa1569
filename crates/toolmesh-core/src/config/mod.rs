//! Configuration provider abstractions
//!
//! Supports multiple configuration sources:
//! - `MemoryConfigProvider`: In-memory for testing
//! - `FileConfigProvider`: YAML file-based (explicit/workspace/user level)

mod traits;
mod settings;
mod memory;
mod file;

pub use traits::{ConfigProvider, ConfigError, ConfigResult};
pub use settings::{
    AppConfig, Defaults, LaunchSpec, ModelProviderConfig, ServerSettings, StorageSettings,
    Timeouts, DEFAULT_SYSTEM_PROMPT,
};
pub use memory::MemoryConfigProvider;
pub use file::{FileConfigProvider, ConfigLevel, CONFIG_ENV_VAR};
