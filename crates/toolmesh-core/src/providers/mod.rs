//! Model provider implementations
//!
//! Real backends go through the `genai` crate, which handles streaming,
//! per-backend protocols and tool calling. OpenAI-compatible services genai
//! has no native adapter for are routed through its `ServiceTargetResolver`.
//!
//! The `MockProvider` serves tests and offline runs.

mod traits;
mod error;
mod genai_adapter;
mod genai_provider;
mod mock;

pub use traits::{Provider, ProviderModelConfig, StreamChatOptions, StreamResponse};
pub use error::{ProviderError, ProviderResult};

pub use genai_provider::GenaiProvider;
pub use genai_adapter::{is_genai_native, is_genai_supported, ProviderConfig};

pub use mock::{MockConfig, MockMode, MockProvider, MockTurn};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::logging::SharedLogger;
use crate::{log_info, log_warn};

/// Create a provider for the given backend id
///
/// Unknown backends get a `GenaiProvider`, so custom OpenAI-compatible
/// endpoints configured with an `api_base` still work.
pub fn create_provider(backend: &str, logger: SharedLogger) -> Arc<dyn Provider> {
    match backend.to_lowercase().as_str() {
        "mock" => Arc::new(MockProvider::echo(logger)),
        _ => Arc::new(GenaiProvider::new(backend, logger)),
    }
}

/// List all supported backend ids
pub fn supported_providers() -> Vec<&'static str> {
    vec![
        "openai",
        "anthropic",
        "gemini",
        "ollama",
        "groq",
        "xai",
        "deepseek",
        "cohere",
        "fireworks",
        "together",
        "azure",
        "openrouter",
        "mistral",
        "openai_compat",
        "mock",
    ]
}

/// A callable model: backend plus the model config to send with each request
#[derive(Clone)]
pub struct ModelHandle {
    /// Model-provider id the handle was resolved from
    pub id: String,
    pub provider: Arc<dyn Provider>,
    pub model: ProviderModelConfig,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("model", &self.model.model)
            .finish()
    }
}

/// Maps model-provider ids to model handles
pub struct ModelResolver {
    default_id: String,
    handles: BTreeMap<String, ModelHandle>,
    logger: SharedLogger,
}

impl ModelResolver {
    pub fn new(default_id: impl Into<String>, logger: SharedLogger) -> Self {
        Self {
            default_id: default_id.into(),
            handles: BTreeMap::new(),
            logger,
        }
    }

    /// One handle per configured model provider
    pub fn from_config(config: &AppConfig, logger: SharedLogger) -> Self {
        let mut resolver = Self::new(config.defaults.model_provider.clone(), Arc::clone(&logger));
        for (id, entry) in &config.model_providers {
            let mut model = ProviderModelConfig::new(&entry.model);
            model.api_key = entry.api_key.clone();
            model.api_base = entry.api_base.clone();
            resolver = resolver.with_handle(id, create_provider(&entry.backend, Arc::clone(&logger)), model);
        }
        log_info!(
            logger,
            "[ModelResolver] {} model providers, default '{}'",
            resolver.handles.len(),
            resolver.default_id
        );
        resolver
    }

    pub fn with_handle(mut self, id: impl Into<String>, provider: Arc<dyn Provider>, model: ProviderModelConfig) -> Self {
        let id = id.into();
        self.handles.insert(
            id.clone(),
            ModelHandle {
                id,
                provider,
                model,
            },
        );
        self
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn ids(&self) -> Vec<&str> {
        self.handles.keys().map(String::as_str).collect()
    }

    /// Handle for `requested`, falling back to the default for missing or unknown ids
    pub fn resolve(&self, requested: Option<&str>) -> ProviderResult<ModelHandle> {
        if let Some(id) = requested {
            if let Some(handle) = self.handles.get(id) {
                return Ok(handle.clone());
            }
            log_warn!(
                self.logger,
                "[ModelResolver] Unknown model provider '{}', using '{}'",
                id,
                self.default_id
            );
        }
        self.handles
            .get(&self.default_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(self.default_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelProviderConfig;
    use crate::logging::NoOpLogger;

    fn logger() -> SharedLogger {
        Arc::new(NoOpLogger)
    }

    #[test]
    fn test_create_provider() {
        assert_eq!(create_provider("mock", logger()).name(), "mock");
        assert_eq!(create_provider("gemini", logger()).name(), "gemini");
        assert_eq!(create_provider("my-local-llm", logger()).name(), "my-local-llm");
    }

    #[test]
    fn test_resolver_falls_back_to_default() {
        let resolver = ModelResolver::from_config(&AppConfig::default(), logger());

        let google = resolver.resolve(Some("google")).unwrap();
        assert_eq!(google.provider.name(), "gemini");
        assert_eq!(google.model.model, "gemini-2.0-flash-exp");

        let fallback = resolver.resolve(Some("nope")).unwrap();
        assert_eq!(fallback.id, "openai");
        assert_eq!(fallback.model.model, "gpt-4o-mini");

        assert_eq!(resolver.resolve(None).unwrap().id, "openai");
    }

    #[test]
    fn test_missing_default_is_an_error() {
        let mut config = AppConfig::default();
        config.model_providers.clear();
        config
            .model_providers
            .insert("local".into(), ModelProviderConfig::new("mock", "mock-echo"));

        let resolver = ModelResolver::from_config(&config, logger());
        assert!(resolver.resolve(Some("local")).is_ok());
        assert!(matches!(resolver.resolve(None), Err(ProviderError::UnknownProvider(_))));
    }
}
