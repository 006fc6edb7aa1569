//! GenaiProvider - model backend built on the genai crate
//!
//! Handles genai's native backends (OpenAI, Gemini, Anthropic, ...) and
//! OpenAI-compatible endpoints routed through the ServiceTargetResolver.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::sync::Arc;

use genai::chat::{ChatRequest, ChatStreamEvent};

use crate::logging::SharedLogger;
use crate::types::{CancellationToken, ChatMessage, StreamChunk};
use crate::{log_debug, log_error, log_info};

use super::error::{ProviderError, ProviderResult};
use super::genai_adapter::{
    create_client, from_genai_event, is_genai_supported, to_genai_messages, to_genai_options, to_genai_tools,
    ProviderConfig,
};
use super::traits::{Provider, ProviderModelConfig, StreamChatOptions, StreamResponse};

pub struct GenaiProvider {
    /// Backend identifier
    provider_id: String,
    logger: SharedLogger,
}

impl GenaiProvider {
    pub fn new(provider_id: impl Into<String>, logger: SharedLogger) -> Self {
        Self {
            provider_id: provider_id.into(),
            logger,
        }
    }

    pub fn supports(provider_id: &str) -> bool {
        is_genai_supported(provider_id)
    }

    /// Strip a backend prefix (e.g., "openai/gpt-4o" -> "gpt-4o")
    pub fn extract_model_name(model: &str) -> &str {
        model.split_once('/').map(|(_, name)| name).unwrap_or(model)
    }

    fn api_error(&self, message: impl ToString) -> ProviderError {
        ProviderError::api_error(self.provider_id.clone(), 500, message.to_string())
    }
}

#[async_trait]
impl Provider for GenaiProvider {
    fn name(&self) -> &str {
        &self.provider_id
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        model_config: ProviderModelConfig,
        options: StreamChatOptions,
        cancel_token: CancellationToken,
    ) -> ProviderResult<StreamResponse> {
        let model_name = Self::extract_model_name(&model_config.model).to_string();
        log_info!(
            self.logger,
            "[GenaiProvider] stream_chat: provider={}, model={}, tools={}",
            self.provider_id,
            model_name,
            options.tools.as_ref().map_or(0, Vec::len)
        );

        let client = create_client(&ProviderConfig {
            provider: self.provider_id.clone(),
            api_key: model_config.api_key.clone(),
            api_base: model_config.api_base.clone(),
        })?;

        let mut chat_req = ChatRequest::new(to_genai_messages(messages));
        if let Some(tools) = &options.tools {
            chat_req = chat_req.with_tools(to_genai_tools(tools.clone()));
        }
        let genai_options = to_genai_options(&options);

        let chat_stream = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(ProviderError::Cancelled),
            started = client.exec_chat_stream(model_name.as_str(), chat_req, Some(&genai_options)) => {
                started.map_err(|e| self.api_error(e))?
            }
        };

        let logger = Arc::clone(&self.logger);
        let provider_id = self.provider_id.clone();

        let stream = chat_stream
            .stream
            .take_while(move |_| futures::future::ready(!cancel_token.is_cancelled()))
            .flat_map(move |result| {
                let chunks: Vec<ProviderResult<StreamChunk>> = match result {
                    Ok(event) => {
                        if let ChatStreamEvent::End(_) = &event {
                            log_debug!(logger, "[GenaiProvider] Stream event: End");
                        }
                        from_genai_event(event).into_iter().map(Ok).collect()
                    }
                    Err(e) => {
                        log_error!(logger, "[GenaiProvider] Stream error: {}", e);
                        vec![Err(ProviderError::api_error(provider_id.clone(), 500, e.to_string()))]
                    }
                };
                stream::iter(chunks)
            });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoOpLogger;

    #[test]
    fn test_extract_model_name() {
        assert_eq!(GenaiProvider::extract_model_name("openai/gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(GenaiProvider::extract_model_name("gemini-2.0-flash-exp"), "gemini-2.0-flash-exp");
        assert_eq!(
            GenaiProvider::extract_model_name("openrouter/meta-llama/llama-3-8b"),
            "meta-llama/llama-3-8b"
        );
    }

    #[test]
    fn test_supports() {
        assert!(GenaiProvider::supports("openai"));
        assert!(GenaiProvider::supports("gemini"));
        assert!(GenaiProvider::supports("openrouter"));
        assert!(!GenaiProvider::supports("unknown_provider"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = GenaiProvider::new("openai", Arc::new(NoOpLogger));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = provider
            .stream_chat(
                vec![ChatMessage::user("hi")],
                ProviderModelConfig::new("gpt-4o-mini").with_api_key("unused"),
                StreamChatOptions::default(),
                cancel,
            )
            .await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}
