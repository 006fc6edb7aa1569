//! The bounded generate/execute loop of one chat turn
//!
//! A turn streams model output, executes every tool call the model asks for,
//! feeds the results back and repeats until the model answers without tools
//! or `max_steps` rounds have run. Events go out as they happen; the finished
//! assistant message is persisted before `turn_completed` is emitted.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{AppConfig, DEFAULT_SYSTEM_PROMPT};
use crate::logging::SharedLogger;
use crate::mcp::ConnectionManager;
use crate::providers::{ModelHandle, ModelResolver, StreamChatOptions};
use crate::store::ConversationStore;
use crate::tools::{builtin_tools, LocalTool, ToolOutcome, ToolRegistry};
use crate::types::{
    generate_message_id, CancellationToken, ChatEvent, ChatMessage, ContentPart, ConversationMessage,
    ConversationRole, DropGuard, MessagePart, MessageRole, StreamChunk, ToolCall, ToolCallPart,
};
use crate::{log_debug, log_error, log_info, log_warn};

use super::context::build_context;
use super::error::{OrchestratorError, OrchestratorResult};

pub type EventSender = mpsc::UnboundedSender<ChatEvent>;

/// Lifecycle of a single turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Generating,
    ToolExecuting,
    Completed,
    Truncated,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Generating => "generating",
            TurnState::ToolExecuting => "tool_executing",
            TurnState::Completed => "completed",
            TurnState::Truncated => "truncated",
            TurnState::Failed => "failed",
            TurnState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::Truncated | TurnState::Failed | TurnState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        match (self, next) {
            (Idle, Generating) => true,
            (Generating, ToolExecuting) | (ToolExecuting, Generating) => true,
            (Generating, Completed) | (ToolExecuting, Truncated) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_steps: usize,
    pub system_prompt: String,
    pub tool_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_steps: 5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tool_timeout: Duration::from_secs(60),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.defaults.max_steps.max(1),
            system_prompt: config.defaults.system_prompt.clone(),
            tool_timeout: config.timeouts.tool_call(),
        }
    }
}

/// What the caller sends to start a turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    /// The whole transcript, oldest first, ending with the new user message
    Transcript(Vec<ConversationMessage>),
    /// Only the new message; history is loaded from the store
    Latest(ConversationMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub input: TurnInput,
    /// Where the turn is persisted; a fresh id is generated when absent
    pub conversation_id: Option<String>,
    /// Model-provider id; unknown or missing ids use the default
    pub model_provider: Option<String>,
}

impl TurnRequest {
    pub fn transcript(messages: Vec<ConversationMessage>) -> Self {
        Self {
            input: TurnInput::Transcript(messages),
            conversation_id: None,
            model_provider: None,
        }
    }

    pub fn latest(conversation_id: impl Into<String>, message: ConversationMessage) -> Self {
        Self {
            input: TurnInput::Latest(message),
            conversation_id: Some(conversation_id.into()),
            model_provider: None,
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_model_provider(mut self, id: impl Into<String>) -> Self {
        self.model_provider = Some(id.into());
        self
    }
}

/// Result of a turn that reached the store
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub message: ConversationMessage,
    pub steps: usize,
    pub truncated: bool,
}

/// Per-turn bookkeeping: event sink, cancellation and state
struct Turn {
    events: EventSender,
    cancel: CancellationToken,
    state: Mutex<TurnState>,
    logger: SharedLogger,
}

impl Turn {
    /// Emit an event; a closed receiver means the caller is gone, so the turn is cancelled
    fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() && !self.cancel.is_cancelled() {
            log_debug!(self.logger, "[Orchestrator] Event receiver dropped, cancelling turn");
            self.cancel.cancel();
        }
    }

    fn advance(&self, next: TurnState) {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            log_warn!(self.logger, "[Orchestrator] Unexpected turn transition {} -> {}", *state, next);
        }
        log_debug!(self.logger, "[Orchestrator] Turn {} -> {}", *state, next);
        *state = next;
    }

    /// Await `fut` unless the turn is cancelled first
    async fn guard<F: std::future::Future>(&self, fut: F) -> OrchestratorResult<F::Output> {
        self.cancel
            .run_until_cancelled(fut)
            .await
            .ok_or(OrchestratorError::Cancelled)
    }
}

/// Text and completed tool calls from one model step
struct StepOutput {
    text: String,
    calls: Vec<ToolCall>,
}

/// Runs chat turns against a model, the merged tool set and a store
pub struct Orchestrator {
    models: ModelResolver,
    connections: Arc<ConnectionManager>,
    local_tools: Vec<Arc<dyn LocalTool>>,
    store: Arc<dyn ConversationStore>,
    settings: OrchestratorSettings,
    logger: SharedLogger,
}

impl Orchestrator {
    pub fn new(
        models: ModelResolver,
        connections: Arc<ConnectionManager>,
        store: Arc<dyn ConversationStore>,
        logger: SharedLogger,
    ) -> Self {
        Self {
            models,
            connections,
            local_tools: builtin_tools(),
            store,
            settings: OrchestratorSettings::default(),
            logger,
        }
    }

    /// Replace the settings; `max_steps` is raised to at least one step
    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = OrchestratorSettings {
            max_steps: settings.max_steps.max(1),
            ..settings
        };
        self
    }

    pub fn with_local_tools(mut self, tools: Vec<Arc<dyn LocalTool>>) -> Self {
        self.local_tools = tools;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Run a turn on a background task
    ///
    /// Dropping the guard, or the receiver, cancels the turn.
    pub fn spawn_turn(self: &Arc<Self>, request: TurnRequest) -> (mpsc::UnboundedReceiver<ChatEvent>, DropGuard) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.run_turn(request, tx, token).await;
        });
        (rx, cancel.drop_guard())
    }

    /// Drive one turn to completion, emitting events as they happen
    ///
    /// Every turn ends with exactly one terminal event. On failure or
    /// cancellation nothing is persisted.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: EventSender,
        cancel: CancellationToken,
    ) -> OrchestratorResult<TurnOutcome> {
        let turn = Turn {
            events,
            cancel: cancel.child_token(),
            state: Mutex::new(TurnState::Idle),
            logger: Arc::clone(&self.logger),
        };

        match self.drive(&turn, request).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if err.is_cancelled() {
                    turn.advance(TurnState::Cancelled);
                    log_info!(self.logger, "[Orchestrator] Turn cancelled");
                } else {
                    turn.advance(TurnState::Failed);
                    log_error!(self.logger, "[Orchestrator] Turn failed: {}", err);
                }
                turn.emit(ChatEvent::TurnFailed { error: err.to_string() });
                Err(err)
            }
        }
    }

    async fn drive(&self, turn: &Turn, request: TurnRequest) -> OrchestratorResult<TurnOutcome> {
        let TurnRequest {
            input,
            conversation_id,
            model_provider,
        } = request;

        let transcript = match input {
            TurnInput::Transcript(messages) => messages,
            TurnInput::Latest(message) => {
                let Some(id) = conversation_id.as_deref() else {
                    return Err(OrchestratorError::InvalidRequest(
                        "a single message requires a conversation id".to_string(),
                    ));
                };
                let mut history = self.store.load(id).await?;
                history.push(message);
                history
            }
        };
        if transcript.is_empty() {
            return Err(OrchestratorError::InvalidRequest("no messages to respond to".to_string()));
        }

        let handle = self.models.resolve(model_provider.as_deref())?;
        let conversation_id = conversation_id.unwrap_or_else(generate_message_id);
        let message_id = generate_message_id();
        let user_message_id = transcript
            .iter()
            .rev()
            .find(|m| m.role == ConversationRole::User)
            .map(|m| m.id.clone());

        log_info!(
            self.logger,
            "[Orchestrator] Turn for conversation {} using '{}' ({} prior messages)",
            conversation_id,
            handle.id,
            transcript.len()
        );
        turn.emit(ChatEvent::TurnStarted {
            conversation_id: Some(conversation_id.clone()),
            user_message_id,
            message_id: message_id.clone(),
        });

        // Unreachable providers are logged by the manager and left out of the merge
        turn.guard(self.connections.connect_all()).await?;
        let registry = ToolRegistry::merge(&self.local_tools, Arc::clone(&self.connections), Arc::clone(&self.logger))
            .with_timeout(self.settings.tool_timeout);
        let options = StreamChatOptions::new().with_tools(registry.tools_for_model());

        let mut context = build_context(&self.settings.system_prompt, &transcript);
        let mut parts = Vec::new();
        let mut steps = 0;
        let mut truncated = false;

        for step in 1..=self.settings.max_steps {
            steps = step;
            turn.advance(TurnState::Generating);
            turn.emit(ChatEvent::StepStarted { step });

            let output = self.generate(turn, &handle, context.clone(), options.clone()).await?;
            if !output.text.is_empty() {
                parts.push(MessagePart::text(output.text.clone()));
            }
            if output.calls.is_empty() {
                break;
            }

            turn.advance(TurnState::ToolExecuting);
            let mut uses = Vec::with_capacity(output.calls.len() + 1);
            if !output.text.is_empty() {
                uses.push(ContentPart::text(output.text));
            }
            let mut results = Vec::with_capacity(output.calls.len());

            for call in output.calls {
                let outcome = turn.guard(registry.invoke(&call)).await?;
                turn.emit(match &outcome {
                    ToolOutcome::Succeeded(text) => ChatEvent::ToolCallResult {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        output: text.clone(),
                    },
                    ToolOutcome::Failed(text) => ChatEvent::ToolCallError {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        error_text: text.clone(),
                    },
                });

                uses.push(ContentPart::tool_use(call.id.clone(), call.name.clone(), call.input.clone()));
                results.push(ContentPart::tool_result(call.id.clone(), outcome.text()));
                let is_error = outcome.is_error();
                let text = outcome.into_text();
                parts.push(MessagePart::ToolCall(ToolCallPart {
                    call_id: call.id,
                    tool_name: call.name,
                    input: call.input,
                    output: (!is_error).then(|| text.clone()),
                    error_text: is_error.then_some(text),
                }));
            }

            context.push(ChatMessage::with_parts(MessageRole::Assistant, uses));
            context.push(ChatMessage::with_parts(MessageRole::User, results));

            if step == self.settings.max_steps {
                truncated = true;
                log_warn!(
                    self.logger,
                    "[Orchestrator] Reached {} steps with tools still requested, truncating",
                    self.settings.max_steps
                );
                turn.emit(ChatEvent::Truncated {
                    max_steps: self.settings.max_steps,
                });
            }
        }

        if turn.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let mut message = ConversationMessage::new(ConversationRole::Assistant, parts);
        message.id = message_id;
        let mut updated = transcript;
        updated.push(message.clone());
        let added = self.store.save(&conversation_id, Some(&handle.id), &updated).await?;
        log_debug!(self.logger, "[Orchestrator] Persisted {} new messages to {}", added, conversation_id);

        turn.advance(if truncated {
            TurnState::Truncated
        } else {
            TurnState::Completed
        });
        turn.emit(ChatEvent::TurnCompleted {
            message: message.clone(),
            truncated,
        });
        log_info!(self.logger, "[Orchestrator] Turn completed after {} steps", steps);

        Ok(TurnOutcome {
            conversation_id,
            message,
            steps,
            truncated,
        })
    }

    /// One model step: stream deltas out and collect completed tool calls
    async fn generate(
        &self,
        turn: &Turn,
        handle: &ModelHandle,
        context: Vec<ChatMessage>,
        options: StreamChatOptions,
    ) -> OrchestratorResult<StepOutput> {
        let started = handle
            .provider
            .stream_chat(context, handle.model.clone(), options, turn.cancel.clone());
        let mut stream = turn.guard(started).await??;

        let mut output = StepOutput {
            text: String::new(),
            calls: Vec::new(),
        };
        loop {
            let next = tokio::select! {
                biased;
                _ = turn.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(StreamChunk::Text { text })) => {
                    if text.is_empty() {
                        continue;
                    }
                    output.text.push_str(&text);
                    turn.emit(ChatEvent::TextDelta { text });
                }
                Some(Ok(StreamChunk::ToolCall { mut tool_call })) => {
                    if tool_call.id.is_empty() {
                        tool_call.id = format!("call_{}", generate_message_id());
                    }
                    turn.emit(ChatEvent::ToolCallRequested {
                        call_id: tool_call.id.clone(),
                        tool_name: tool_call.name.clone(),
                        input: tool_call.input.clone(),
                    });
                    output.calls.push(tool_call);
                }
                Some(Ok(StreamChunk::ToolCallDelta { .. })) => {}
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchSpec;
    use crate::logging::NoOpLogger;
    use crate::mcp::testing::FakeConnector;
    use crate::providers::{MockProvider, MockTurn, ProviderModelConfig};
    use crate::store::MemoryConversationStore;
    use crate::types::ToolDefinition;
    use serde_json::json;

    fn logger() -> SharedLogger {
        Arc::new(NoOpLogger)
    }

    fn orchestrator_with(
        provider: Arc<MockProvider>,
        connector: Arc<FakeConnector>,
        store: Arc<MemoryConversationStore>,
    ) -> Orchestrator {
        let models = ModelResolver::new("mock", logger()).with_handle("mock", provider, ProviderModelConfig::new("mock-echo"));
        let connections = Arc::new(ConnectionManager::new(connector, logger()));
        Orchestrator::new(models, connections, store, logger())
    }

    fn orchestrator(provider: Arc<MockProvider>, store: Arc<MemoryConversationStore>) -> Orchestrator {
        orchestrator_with(provider, Arc::new(FakeConnector::new()), store)
    }

    async fn run(
        orchestrator: &Orchestrator,
        request: TurnRequest,
    ) -> (OrchestratorResult<TurnOutcome>, Vec<ChatEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = orchestrator.run_turn(request, tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    fn names(events: &[ChatEvent]) -> Vec<&'static str> {
        events.iter().map(ChatEvent::name).collect()
    }

    #[test]
    fn test_turn_state_transitions() {
        use TurnState::*;
        assert!(Idle.can_transition_to(Generating));
        assert!(Generating.can_transition_to(ToolExecuting));
        assert!(ToolExecuting.can_transition_to(Generating));
        assert!(ToolExecuting.can_transition_to(Truncated));
        assert!(Generating.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Completed));
    }

    #[tokio::test]
    async fn test_calculate_round_trip() {
        let provider = Arc::new(MockProvider::scripted(
            vec![
                MockTurn::tool("calculate", json!({ "expression": "2 + 2" })),
                MockTurn::text("It is 4."),
            ],
            logger(),
        ));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(Arc::clone(&provider), Arc::clone(&store));

        let request = TurnRequest::transcript(vec![ConversationMessage::user_text("What is 2 + 2?")])
            .with_conversation_id("conv-1");
        let (result, events) = run(&orchestrator, request).await;
        let outcome = result.unwrap();

        assert_eq!(
            names(&events),
            [
                "turn_started",
                "step_started",
                "tool_call_requested",
                "tool_call_result",
                "step_started",
                "text_delta",
                "turn_completed",
            ]
        );
        assert!(matches!(
            &events[3],
            ChatEvent::ToolCallResult { output, .. } if output == "The result of 2 + 2 is 4"
        ));
        assert_eq!(outcome.steps, 2);
        assert!(!outcome.truncated);

        // Second request carries the tool exchange
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let (second, options) = &requests[1];
        assert_eq!(second[0].role, MessageRole::System);
        let last = second.last().unwrap();
        assert_eq!(last.role, MessageRole::User);
        assert!(matches!(
            &last.parts()[0],
            ContentPart::ToolResult { content, .. } if content == "The result of 2 + 2 is 4"
        ));
        assert!(options.tools.as_ref().unwrap().iter().any(|t| t.name == "calculate"));

        let saved = store.load("conv-1").await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1], outcome.message);
        assert_eq!(saved[1].text(), "It is 4.");
        assert_eq!(saved[1].tool_calls().count(), 1);
        let conversation = store.get("conv-1").await.unwrap().unwrap();
        assert_eq!(conversation.model_provider.as_deref(), Some("mock"));
    }

    #[tokio::test]
    async fn test_tool_loop_is_bounded() {
        let provider = Arc::new(MockProvider::scripted(
            vec![MockTurn::tool("calculate", json!({ "expression": "1 + 1" })).with_text("Again. ")],
            logger(),
        ));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(Arc::clone(&provider), Arc::clone(&store));

        let request = TurnRequest::transcript(vec![ConversationMessage::user_text("loop")]).with_conversation_id("c");
        let (result, events) = run(&orchestrator, request).await;
        let outcome = result.unwrap();

        assert_eq!(provider.calls(), 5);
        assert!(outcome.truncated);
        assert_eq!(outcome.steps, 5);

        let emitted = names(&events);
        assert_eq!(&emitted[emitted.len() - 3..], ["tool_call_result", "truncated", "turn_completed"]);
        assert!(matches!(events.last(), Some(ChatEvent::TurnCompleted { truncated: true, .. })));

        // Partial text and every executed call are kept
        let saved = store.load("c").await.unwrap();
        assert_eq!(saved[1].tool_calls().count(), 5);
        assert_eq!(saved[1].text(), "Again. ".repeat(5));
    }

    #[tokio::test]
    async fn test_max_steps_setting() {
        let provider = Arc::new(MockProvider::scripted(
            vec![MockTurn::tool("getWeather", json!({ "city": "Oslo" }))],
            logger(),
        ));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(Arc::clone(&provider), store).with_settings(OrchestratorSettings {
            max_steps: 2,
            ..Default::default()
        });

        let (result, _) = run(&orchestrator, TurnRequest::transcript(vec![ConversationMessage::user_text("hi")])).await;
        assert!(result.unwrap().truncated);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_max_steps_still_runs_one_step() {
        let provider = Arc::new(MockProvider::scripted(
            vec![MockTurn::tool("getWeather", json!({ "city": "Oslo" }))],
            logger(),
        ));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(Arc::clone(&provider), store).with_settings(OrchestratorSettings {
            max_steps: 0,
            ..Default::default()
        });
        assert_eq!(orchestrator.settings().max_steps, 1);

        let (result, _) = run(&orchestrator, TurnRequest::transcript(vec![ConversationMessage::user_text("hi")])).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.steps, 1);
        assert!(outcome.truncated);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_tool_routes_to_provider() {
        let connector = Arc::new(FakeConnector::new().with_provider(
            "git",
            vec![ToolDefinition::new("status", json!({ "type": "object", "properties": {} }))],
        ));
        let provider = Arc::new(MockProvider::scripted(
            vec![MockTurn::tool("git_status", json!({})), MockTurn::text("Clean.")],
            logger(),
        ));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator_with(Arc::clone(&provider), Arc::clone(&connector), store);
        orchestrator.connections().register("git", LaunchSpec::new("uvx"));

        let (result, events) = run(&orchestrator, TurnRequest::transcript(vec![ConversationMessage::user_text("status?")])).await;
        result.unwrap();

        let calls = connector.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].provider, "git");
        assert_eq!(calls[0].tool, "status");
        assert!(events.iter().any(|e| matches!(e, ChatEvent::ToolCallResult { tool_name, .. } if tool_name == "git_status")));

        let (_, options) = &provider.requests()[0];
        assert!(options.tools.as_ref().unwrap().iter().any(|t| t.name == "git_status"));
    }

    #[tokio::test]
    async fn test_unreachable_provider_does_not_block_turn() {
        let connector = Arc::new(FakeConnector::new());
        let provider = Arc::new(MockProvider::fixed("No tools needed.", logger()));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator_with(provider, connector, store);
        orchestrator.connections().register("broken", LaunchSpec::new("/nonexistent/provider-command"));

        let (result, events) = run(&orchestrator, TurnRequest::transcript(vec![ConversationMessage::user_text("hi")])).await;
        assert_eq!(result.unwrap().message.text(), "No tools needed.");
        assert!(matches!(events.last(), Some(ChatEvent::TurnCompleted { truncated: false, .. })));
        assert!(!orchestrator.connections().is_connected("broken"));
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let provider = Arc::new(MockProvider::scripted(
            vec![MockTurn::tool("nope", json!({})), MockTurn::text("Sorry.")],
            logger(),
        ));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(Arc::clone(&provider), Arc::clone(&store));

        let (result, events) = run(&orchestrator, TurnRequest::transcript(vec![ConversationMessage::user_text("x")])).await;
        let outcome = result.unwrap();

        assert!(events.iter().any(|e| matches!(
            e,
            ChatEvent::ToolCallError { error_text, .. } if error_text == "Error: unknown tool nope"
        )));
        let call = outcome.message.tool_calls().next().unwrap();
        assert!(call.is_error());
        assert_eq!(call.result_text(), "Error: unknown tool nope");
    }

    #[tokio::test]
    async fn test_model_error_persists_nothing() {
        let provider = Arc::new(MockProvider::error("boom", logger()));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(provider, Arc::clone(&store));

        let request = TurnRequest::transcript(vec![ConversationMessage::user_text("hi")]).with_conversation_id("c");
        let (result, events) = run(&orchestrator, request).await;

        assert!(matches!(result, Err(OrchestratorError::ModelStream(_))));
        assert!(matches!(events.last(), Some(ChatEvent::TurnFailed { error }) if error.contains("boom")));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_persists_nothing() {
        let chunks = (0..20).map(|i| format!("chunk {} ", i)).collect();
        let provider = Arc::new(MockProvider::chunked(chunks, 20, logger()));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(provider, Arc::clone(&store));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = TurnRequest::transcript(vec![ConversationMessage::user_text("hi")]).with_conversation_id("c");
        let result = orchestrator.run_turn(request, tx, cancel).await;

        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        let mut deltas = 0;
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ChatEvent::TextDelta { .. }) {
                deltas += 1;
            }
            last = Some(event);
        }
        assert!(deltas > 0 && deltas < 20);
        assert!(matches!(last, Some(ChatEvent::TurnFailed { .. })));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_turn() {
        let provider = Arc::new(MockProvider::fixed("unheard", logger()));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = orchestrator(provider, Arc::clone(&store));

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let request = TurnRequest::transcript(vec![ConversationMessage::user_text("hi")]);
        let result = orchestrator.run_turn(request, tx, CancellationToken::new()).await;

        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_message_loads_history() {
        let provider = Arc::new(MockProvider::echo(logger()));
        let store = Arc::new(MemoryConversationStore::new());
        let history = vec![
            ConversationMessage::user_text("first"),
            ConversationMessage::assistant_text("Echo: first"),
        ];
        store.save("c", Some("mock"), &history).await.unwrap();
        let orchestrator = orchestrator(Arc::clone(&provider), Arc::clone(&store));

        let request = TurnRequest::latest("c", ConversationMessage::user_text("second"));
        let (result, _) = run(&orchestrator, request).await;
        assert_eq!(result.unwrap().message.text(), "Echo: second");

        let (context, _) = &provider.requests()[0];
        assert_eq!(context.len(), 4);
        assert_eq!(context[1].text_content(), "first");
        assert_eq!(store.load("c").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_latest_message_requires_conversation_id() {
        let provider = Arc::new(MockProvider::echo(logger()));
        let orchestrator = orchestrator(Arc::clone(&provider), Arc::new(MemoryConversationStore::new()));

        let request = TurnRequest {
            input: TurnInput::Latest(ConversationMessage::user_text("hi")),
            conversation_id: None,
            model_provider: None,
        };
        let (result, events) = run(&orchestrator, request).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
        assert_eq!(names(&events), ["turn_failed"]);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_spawned_turn_streams_until_completed() {
        let provider = Arc::new(MockProvider::fixed("Hello there, general.", logger()));
        let store = Arc::new(MemoryConversationStore::new());
        let orchestrator = Arc::new(orchestrator(provider, store));

        let (mut rx, _guard) =
            orchestrator.spawn_turn(TurnRequest::transcript(vec![ConversationMessage::user_text("hi")]));
        let mut text = String::new();
        while let Some(event) = rx.recv().await {
            if let ChatEvent::TextDelta { text: delta } = &event {
                text.push_str(delta);
            }
            if event.is_terminal() {
                assert!(matches!(event, ChatEvent::TurnCompleted { .. }));
                break;
            }
        }
        assert_eq!(text, "Hello there, general.");
    }
}
