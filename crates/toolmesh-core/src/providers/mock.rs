//! Mock provider for testing
//!
//! Deterministic responses without network access. The scripted mode plays
//! back one turn per `stream_chat` call, which lets orchestrator tests drive
//! multi-step tool loops.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::{ProviderError, ProviderResult};
use super::traits::{Provider, ProviderModelConfig, StreamChatOptions, StreamResponse};
use crate::logging::SharedLogger;
use crate::log_debug;
use crate::types::{CancellationToken, ChatMessage, MessageRole, StreamChunk, ToolCall};

/// One scripted model step
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    pub text: Option<String>,
    /// Calls with an empty id get `call_<step>_<index>`
    pub tool_calls: Vec<ToolCall>,
}

impl MockTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::default().with_tool(name, input)
    }

    pub fn with_tool(mut self, name: impl Into<String>, input: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCall::new("", name, input));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Mock response mode
#[derive(Debug, Clone, Default)]
pub enum MockMode {
    /// Echo back the last user message
    #[default]
    Echo,
    /// Return a fixed response
    Fixed(String),
    /// Return response as specific chunks
    Chunks(Vec<String>),
    /// Fail after `delay_chunks` text chunks
    Error { message: String, delay_chunks: usize },
    /// Return nothing
    Empty,
    /// Play back turns in order; the last one repeats
    Script(Vec<MockTurn>),
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub mode: MockMode,
    /// Delay between chunks in milliseconds (0 = no delay)
    pub chunk_delay_ms: u64,
    /// Size of each chunk when splitting text responses
    pub chunk_size: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            mode: MockMode::Echo,
            chunk_delay_ms: 0,
            chunk_size: 10,
        }
    }
}

/// Mock model provider for testing
pub struct MockProvider {
    config: MockConfig,
    calls: AtomicUsize,
    requests: Mutex<Vec<(Vec<ChatMessage>, StreamChatOptions)>>,
    logger: SharedLogger,
}

impl MockProvider {
    pub fn with_config(config: MockConfig, logger: SharedLogger) -> Self {
        Self {
            config,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            logger,
        }
    }

    fn with_mode(mode: MockMode, logger: SharedLogger) -> Self {
        Self::with_config(
            MockConfig {
                mode,
                ..Default::default()
            },
            logger,
        )
    }

    pub fn echo(logger: SharedLogger) -> Self {
        Self::with_mode(MockMode::Echo, logger)
    }

    pub fn fixed(response: impl Into<String>, logger: SharedLogger) -> Self {
        Self::with_mode(MockMode::Fixed(response.into()), logger)
    }

    pub fn chunked(chunks: Vec<String>, delay_ms: u64, logger: SharedLogger) -> Self {
        Self::with_mode(MockMode::Chunks(chunks), logger).with_delay(delay_ms)
    }

    pub fn error(message: impl Into<String>, logger: SharedLogger) -> Self {
        Self::with_mode(
            MockMode::Error {
                message: message.into(),
                delay_chunks: 0,
            },
            logger,
        )
    }

    pub fn scripted(turns: Vec<MockTurn>, logger: SharedLogger) -> Self {
        Self::with_mode(MockMode::Script(turns), logger)
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.config.chunk_delay_ms = delay_ms;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Number of `stream_chat` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages and options of every call, oldest first
    pub fn requests(&self) -> Vec<(Vec<ChatMessage>, StreamChatOptions)> {
        self.requests.lock().clone()
    }

    fn last_user_message(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .rev()
            .filter(|m| m.role == MessageRole::User)
            .map(ChatMessage::text_content)
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| "Hello from MockProvider!".to_string())
    }

    fn split_into_chunks(&self, text: &str) -> Vec<String> {
        if self.config.chunk_size == 0 || text.is_empty() {
            return vec![text.to_string()];
        }

        text.chars()
            .collect::<Vec<_>>()
            .chunks(self.config.chunk_size)
            .map(|c| c.iter().collect())
            .collect()
    }

    fn text_chunks(&self, text: &str) -> Vec<ProviderResult<StreamChunk>> {
        self.split_into_chunks(text).into_iter().map(|t| Ok(StreamChunk::text(t))).collect()
    }

    fn script_step(&self, turns: &[MockTurn], step: usize) -> Vec<ProviderResult<StreamChunk>> {
        let Some(turn) = turns.get(step).or_else(|| turns.last()) else {
            return Vec::new();
        };

        let mut chunks = turn.text.as_deref().map(|t| self.text_chunks(t)).unwrap_or_default();
        chunks.extend(turn.tool_calls.iter().enumerate().map(|(i, call)| {
            let mut call = call.clone();
            if call.id.is_empty() {
                call.id = format!("call_{}_{}", step, i);
            }
            Ok(StreamChunk::tool_call(call))
        }));
        chunks
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        _model: ProviderModelConfig,
        options: StreamChatOptions,
        cancel_token: CancellationToken,
    ) -> ProviderResult<StreamResponse> {
        let step = self.calls.fetch_add(1, Ordering::SeqCst);
        log_debug!(self.logger, "[MockProvider] stream_chat call {}", step);

        let chunks = match &self.config.mode {
            MockMode::Echo => self.text_chunks(&format!("Echo: {}", Self::last_user_message(&messages))),
            MockMode::Fixed(response) => self.text_chunks(response),
            MockMode::Chunks(chunks) => chunks.iter().map(|c| Ok(StreamChunk::text(c.clone()))).collect(),
            MockMode::Empty => Vec::new(),
            MockMode::Error { message, delay_chunks } => {
                let mut chunks: Vec<_> = (0..*delay_chunks)
                    .map(|i| Ok(StreamChunk::text(format!("Chunk {} before error. ", i))))
                    .collect();
                chunks.push(Err(ProviderError::Other(format!("Mock error: {}", message))));
                chunks
            }
            MockMode::Script(turns) => self.script_step(turns, step),
        };
        self.requests.lock().push((messages, options));

        let delay_ms = self.config.chunk_delay_ms;
        let stream = stream::iter(chunks.into_iter().enumerate()).then(move |(i, chunk)| {
            let cancel = cancel_token.clone();
            async move {
                if i > 0 && delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                if cancel.is_cancelled() {
                    return Err(ProviderError::Cancelled);
                }
                chunk
            }
        });

        Ok(Box::pin(stream))
    }
}
