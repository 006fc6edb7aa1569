//! Adapter between toolmesh types and genai types
//!
//! Tool-use parts become genai tool calls on the assistant message and each
//! tool result becomes its own tool-role message. Images and tool parts in
//! any other position are rendered into message text.

use std::future::Future;
use std::pin::Pin;

use genai::chat::{
    ChatMessage as GenaiMessage, ChatOptions as GenaiOptions, ChatRole as GenaiRole, ChatStreamEvent,
    ContentPart as GenaiPart, MessageContent as GenaiContent, Tool as GenaiTool, ToolCall as GenaiToolCall,
    ToolResponse as GenaiToolResponse,
};
use genai::resolver::{AuthData, AuthResolver, Endpoint, ServiceTargetResolver};
use genai::{adapter::AdapterKind, Client, ModelIden, ServiceTarget};

use crate::types::{ChatMessage, ContentPart, MessageContent, MessageRole, StreamChunk, Tool, ToolCall};

use super::error::{ProviderError, ProviderResult};
use super::traits::StreamChatOptions;

// ============================================================================
// Message Conversion: toolmesh -> genai
// ============================================================================

pub fn to_genai_role(role: MessageRole) -> GenaiRole {
    match role {
        MessageRole::System => GenaiRole::System,
        MessageRole::User => GenaiRole::User,
        MessageRole::Assistant => GenaiRole::Assistant,
    }
}

pub fn to_genai_tool_call(id: String, name: String, input: serde_json::Value) -> GenaiToolCall {
    GenaiToolCall {
        call_id: id,
        fn_name: name,
        fn_arguments: input,
        thought_signatures: None,
    }
}

pub fn to_genai_tool_response(tool_use_id: String, content: String) -> GenaiToolResponse {
    GenaiToolResponse::new(tool_use_id, content)
}

/// Text fallback for parts with no native genai form in their position
fn render_part(part: ContentPart) -> String {
    match part {
        ContentPart::Text { text } => text,
        ContentPart::Image { image_url } => format!("[Attachment: {}]", image_url),
        ContentPart::ToolUse { id, name, input } => format!("[Tool call {} ({})]: {}", name, id, input),
        ContentPart::ToolResult { tool_use_id, content } => format!("[Tool result for {}]: {}", tool_use_id, content),
    }
}

fn flush(out: &mut Vec<GenaiMessage>, role: &GenaiRole, pending: &mut Vec<GenaiPart>) {
    if pending.is_empty() {
        return;
    }
    out.push(GenaiMessage {
        role: role.clone(),
        content: GenaiContent::from_parts(std::mem::take(pending)),
        options: None,
    });
}

/// Convert one message; tool results split it into several genai messages
pub fn to_genai_message(msg: ChatMessage) -> Vec<GenaiMessage> {
    let role = to_genai_role(msg.role);
    let parts = match msg.content {
        MessageContent::Text(text) => {
            return vec![GenaiMessage {
                role,
                content: GenaiContent::from_text(text),
                options: None,
            }]
        }
        MessageContent::Parts(parts) => parts,
    };

    let mut out = Vec::new();
    let mut pending = Vec::new();
    for part in parts {
        match part {
            ContentPart::ToolUse { id, name, input } if msg.role == MessageRole::Assistant => {
                pending.push(GenaiPart::ToolCall(to_genai_tool_call(id, name, input)));
            }
            ContentPart::ToolResult { tool_use_id, content } if msg.role != MessageRole::System => {
                flush(&mut out, &role, &mut pending);
                out.push(GenaiMessage::from(to_genai_tool_response(tool_use_id, content)));
            }
            ContentPart::Text { text } => pending.push(GenaiPart::Text(text)),
            other => pending.push(GenaiPart::Text(render_part(other))),
        }
    }
    flush(&mut out, &role, &mut pending);
    out
}

pub fn to_genai_messages(messages: Vec<ChatMessage>) -> Vec<GenaiMessage> {
    messages.into_iter().flat_map(to_genai_message).collect()
}

// ============================================================================
// Tool Conversion: toolmesh -> genai
// ============================================================================

pub fn to_genai_tool(tool: Tool) -> GenaiTool {
    let mut genai_tool = GenaiTool::new(&tool.name).with_description(&tool.description);

    if let Some(schema) = tool.input_schema {
        genai_tool = genai_tool.with_schema(schema);
    }

    genai_tool
}

pub fn to_genai_tools(tools: Vec<Tool>) -> Vec<GenaiTool> {
    tools.into_iter().map(to_genai_tool).collect()
}

// ============================================================================
// Options Conversion: toolmesh -> genai
// ============================================================================

pub fn to_genai_options(options: &StreamChatOptions) -> GenaiOptions {
    let mut genai_opts = GenaiOptions::default();

    if let Some(temp) = options.temperature {
        genai_opts = genai_opts.with_temperature(temp as f64);
    }

    if let Some(max_tokens) = options.max_tokens {
        genai_opts = genai_opts.with_max_tokens(max_tokens);
    }

    if let Some(stop) = &options.stop {
        genai_opts = genai_opts.with_stop_sequences(stop.clone());
    }

    // Completed tool calls are delivered with the End event
    genai_opts.with_capture_tool_calls(true)
}

// ============================================================================
// Response Conversion: genai -> toolmesh
// ============================================================================

pub fn from_genai_tool_call(tc: &GenaiToolCall) -> ToolCall {
    ToolCall {
        id: tc.call_id.clone(),
        name: tc.fn_name.clone(),
        input: tc.fn_arguments.clone(),
    }
}

/// Convert one genai stream event into zero or more chunks
///
/// The End event carries every tool call captured during the step.
pub fn from_genai_event(event: ChatStreamEvent) -> Vec<StreamChunk> {
    match event {
        ChatStreamEvent::Chunk(chunk) if !chunk.content.is_empty() => vec![StreamChunk::text(chunk.content)],
        ChatStreamEvent::ToolCallChunk(chunk) => vec![StreamChunk::ToolCallDelta {
            id: chunk.tool_call.call_id,
            name: Some(chunk.tool_call.fn_name),
            input_delta: Some(chunk.tool_call.fn_arguments.to_string()),
        }],
        ChatStreamEvent::End(end) => end
            .captured_tool_calls()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| StreamChunk::tool_call(from_genai_tool_call(tc)))
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

// ============================================================================
// Client Creation
// ============================================================================

/// Backend routing for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Backend identifier (e.g., "openai", "gemini", "openrouter")
    pub provider: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

/// Fixed endpoint of an OpenAI-compatible backend genai has no adapter for
fn compat_endpoint(provider: &str) -> Option<&'static str> {
    match provider {
        "openrouter" => Some("https://openrouter.ai/api/v1/"),
        "mistral" => Some("https://api.mistral.ai/v1/"),
        _ => None,
    }
}

/// Backends that only work with an explicit `api_base`
fn requires_api_base(provider: &str) -> bool {
    matches!(provider, "azure" | "openai_compat")
}

/// Create a genai Client with explicit-key auth and endpoint routing
///
/// Without an explicit key genai falls back to its per-backend environment
/// variable (e.g. `OPENAI_API_KEY`).
pub fn create_client(config: &ProviderConfig) -> ProviderResult<Client> {
    let provider = config.provider.to_lowercase();
    if requires_api_base(&provider) && config.api_base.is_none() {
        return Err(ProviderError::Other(format!("{} requires api_base", provider)));
    }

    let explicit_key = config.api_key.clone();
    let auth_resolver = AuthResolver::from_resolver_async_fn(
        move |_model_iden: ModelIden| -> Pin<Box<dyn Future<Output = genai::resolver::Result<Option<AuthData>>> + Send>> {
            let explicit_key = explicit_key.clone();
            Box::pin(async move { Ok(explicit_key.map(AuthData::from_single)) })
        },
    );

    let api_base = config.api_base.clone();
    let target_resolver = ServiceTargetResolver::from_resolver_fn(
        move |target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error> {
            let endpoint = match (&api_base, compat_endpoint(&provider)) {
                (Some(base), _) => Endpoint::from_owned(base.clone()),
                (None, Some(fixed)) => Endpoint::from_static(fixed),
                (None, None) => return Ok(target),
            };

            // A custom endpoint also means the OpenAI wire protocol, unless the
            // backend is a native one that was only relocated
            let adapter_kind = if is_genai_native(&provider) {
                target.model.adapter_kind
            } else {
                AdapterKind::OpenAI
            };

            Ok(ServiceTarget {
                endpoint,
                auth: target.auth,
                model: ModelIden::new(adapter_kind, target.model.model_name.clone()),
            })
        },
    );

    Ok(Client::builder()
        .with_auth_resolver(auth_resolver)
        .with_service_target_resolver(target_resolver)
        .build())
}

/// Check if a provider is natively supported by genai
pub fn is_genai_native(provider: &str) -> bool {
    matches!(
        provider.to_lowercase().as_str(),
        "openai"
            | "anthropic"
            | "gemini"
            | "ollama"
            | "groq"
            | "xai"
            | "deepseek"
            | "cohere"
            | "fireworks"
            | "together"
    )
}

/// Check if a provider can be handled by genai (native or via OpenAI-compat)
pub fn is_genai_supported(provider: &str) -> bool {
    is_genai_native(provider)
        || matches!(
            provider.to_lowercase().as_str(),
            "azure" | "openrouter" | "mistral" | "openai_compat"
        )
}
