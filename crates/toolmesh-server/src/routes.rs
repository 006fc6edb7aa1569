//! HTTP routes
//!
//! - `POST /api/chat`: one turn, streamed as server-sent events
//! - `GET /api/mcp`: tool-provider status
//! - `/api/conversations[/:id]`: conversation CRUD

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;

use toolmesh_core::mcp::ProviderStatus;
use toolmesh_core::orchestrator::TurnInput;
use toolmesh_core::types::generate_message_id;
use toolmesh_core::{ChatEvent, Conversation, ConversationMessage, ConversationRole, MessagePart, TurnRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/mcp", get(mcp_status))
        .route("/api/conversations", get(list_conversations).post(create_conversation))
        .route(
            "/api/conversations/:id",
            get(get_conversation)
                .patch(rename_conversation)
                .delete(delete_conversation),
        )
        .with_state(state)
}

/// A message as sent by a client; only a brand-new message may omit its id
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: ConversationRole,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl IncomingMessage {
    fn into_message(self, id: String) -> ConversationMessage {
        ConversationMessage {
            id,
            role: self.role,
            parts: self.parts,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }

    /// Transcript entries must carry the id they were announced under, or a
    /// resent transcript would be stored again
    fn into_transcript_message(self, index: usize) -> ApiResult<ConversationMessage> {
        match self.id.clone().filter(|id| !id.is_empty()) {
            Some(id) => Ok(self.into_message(id)),
            None => Err(ApiError::bad_request(format!("Message {} in `messages` has no id", index))),
        }
    }

    fn into_new_message(self) -> ConversationMessage {
        let id = self.id.clone().filter(|id| !id.is_empty()).unwrap_or_else(generate_message_id);
        self.into_message(id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub messages: Option<Vec<IncomingMessage>>,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub model_provider: Option<String>,
}

impl ChatBody {
    /// A transcript wins over a single message; a lone message without a
    /// conversation id starts a new conversation
    pub fn into_request(self) -> ApiResult<TurnRequest> {
        let input = match (self.messages, self.message) {
            (Some(messages), _) if !messages.is_empty() => TurnInput::Transcript(
                messages
                    .into_iter()
                    .enumerate()
                    .map(|(index, message)| message.into_transcript_message(index))
                    .collect::<ApiResult<_>>()?,
            ),
            (_, Some(message)) if self.conversation_id.is_some() => TurnInput::Latest(message.into_new_message()),
            (_, Some(message)) => TurnInput::Transcript(vec![message.into_new_message()]),
            _ => return Err(ApiError::bad_request("Request needs `messages` or `message`")),
        };
        Ok(TurnRequest {
            input,
            conversation_id: self.conversation_id,
            model_provider: self.model_provider,
        })
    }
}

fn sse_event(event: &ChatEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|err| {
            Event::default()
                .event("turn_failed")
                .data(json!({ "type": "turn_failed", "error": err.to_string() }).to_string())
        })
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let request = body.into_request()?;
    let (events, guard) = state.orchestrator.spawn_turn(request);

    // The guard lives as long as the response stream; a client disconnect cancels the turn
    let stream = UnboundedReceiverStream::new(events).map(move |event| {
        let _turn = &guard;
        Ok::<_, Infallible>(sse_event(&event))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct McpStatusResponse {
    success: bool,
    servers: Vec<ProviderStatus>,
    total_tools: usize,
}

async fn mcp_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<McpStatusResponse>> {
    let connections = Arc::clone(&state.connections);
    let servers = tokio::spawn(async move {
        connections.connect_all().await;
        connections.get_status()
    })
    .await
    .map_err(|e| ApiError::internal(format!("Failed to connect to MCP servers: {}", e)))?;

    let total_tools = servers.iter().map(|s| s.tools.len()).sum();
    Ok(Json(McpStatusResponse {
        success: true,
        servers,
        total_tools,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    model_provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameConversationBody {
    title: String,
}

fn conversation_json(conversation: &Conversation) -> Value {
    json!({ "success": true, "conversation": conversation })
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateConversationBody>>,
) -> ApiResult<Json<Value>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let conversation = state
        .store
        .create(body.title.as_deref(), body.model_provider.as_deref())
        .await?;
    Ok(Json(conversation_json(&conversation)))
}

async fn list_conversations(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let conversations = state.store.list().await?;
    Ok(Json(json!({ "success": true, "conversations": conversations })))
}

async fn get_conversation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let conversation = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Conversation not found: {}", id)))?;
    let messages = state.store.load(&id).await?;
    Ok(Json(json!({
        "success": true,
        "conversation": conversation,
        "messages": messages,
    })))
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenameConversationBody>,
) -> ApiResult<Json<Value>> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title must not be empty"));
    }
    let conversation = state.store.rename(&id, title).await?;
    Ok(Json(conversation_json(&conversation)))
}

async fn delete_conversation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    if !state.store.delete(&id).await? {
        return Err(ApiError::not_found(format!("Conversation not found: {}", id)));
    }
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use toolmesh_core::providers::{MockProvider, MockTurn, ProviderModelConfig};
    use toolmesh_core::{
        ConnectionManager, ConversationStore, MemoryConversationStore, ModelResolver, NoOpLogger, Orchestrator,
        SharedLogger, StdioConnector,
    };

    fn app_with(provider: MockProvider) -> (Router, Arc<AppState>) {
        let logger: SharedLogger = Arc::new(NoOpLogger::new());
        let models = ModelResolver::new("mock", Arc::clone(&logger)).with_handle(
            "mock",
            Arc::new(provider),
            ProviderModelConfig::new("mock-echo"),
        );
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(StdioConnector::new(Arc::clone(&logger))),
            Arc::clone(&logger),
        ));
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());
        let state = AppState::new(Arc::new(Orchestrator::new(models, connections, store, logger)));
        (router(Arc::clone(&state)), state)
    }

    fn app() -> (Router, Arc<AppState>) {
        app_with(MockProvider::echo(Arc::new(NoOpLogger::new())))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    fn user_message(id: &str, text: &str) -> Value {
        json!({ "id": id, "role": "user", "parts": [{ "type": "text", "text": text }] })
    }

    /// Data lines of every SSE event with the given name
    fn event_data(body: &str, name: &str) -> Vec<Value> {
        body.split("\n\n")
            .filter(|block| block.lines().any(|line| line == format!("event: {}", name)))
            .filter_map(|block| block.lines().find_map(|line| line.strip_prefix("data: ")))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_chat_streams_events_and_persists() {
        let (app, state) = app();
        let request = json_request(
            "POST",
            "/api/chat",
            json!({ "messages": [user_message("u1", "hello")], "conversationId": "c1" }),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;

        assert!(body.contains("event: turn_started"));
        assert!(body.contains("event: text_delta"));
        assert!(body.contains("event: turn_completed"));
        let saved = state.store.load("c1").await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].text(), "Echo: hello");
    }

    #[tokio::test]
    async fn test_chat_runs_local_tools() {
        let logger: SharedLogger = Arc::new(NoOpLogger::new());
        let (app, _) = app_with(MockProvider::scripted(
            vec![
                MockTurn::tool("calculate", json!({ "expression": "2 + 2" })),
                MockTurn::text("Four."),
            ],
            logger,
        ));

        let response = app
            .oneshot(json_request("POST", "/api/chat", json!({ "message": { "role": "user", "parts": [{ "type": "text", "text": "2 + 2?" }] } })))
            .await
            .unwrap();
        let body = body_text(response).await;
        assert!(body.contains("event: tool_call_result"));
        assert!(body.contains("The result of 2 + 2 is 4"));
    }

    #[tokio::test]
    async fn test_chat_without_messages_is_rejected() {
        let (app, _) = app();
        let response = app.oneshot(json_request("POST", "/api/chat", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("messages"));
    }

    #[tokio::test]
    async fn test_resent_transcript_is_stored_once() {
        let (app, state) = app();

        let first = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                json!({ "messages": [user_message("u1", "one")], "conversationId": "c" }),
            ))
            .await
            .unwrap();
        let first = body_text(first).await;
        assert_eq!(event_data(&first, "turn_started")[0]["userMessageId"], "u1");
        let assistant = event_data(&first, "turn_completed")[0]["message"].clone();

        let second = app
            .oneshot(json_request(
                "POST",
                "/api/chat",
                json!({
                    "messages": [user_message("u1", "one"), assistant, user_message("u2", "two")],
                    "conversationId": "c",
                }),
            ))
            .await
            .unwrap();
        assert!(body_text(second).await.contains("event: turn_completed"));

        let texts: Vec<_> = state.store.load("c").await.unwrap().iter().map(|m| m.text()).collect();
        assert_eq!(texts, ["one", "Echo: one", "two", "Echo: two"]);
    }

    #[tokio::test]
    async fn test_transcript_message_without_id_is_rejected() {
        let (app, state) = app();
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/chat",
                json!({
                    "messages": [{ "role": "user", "parts": [{ "type": "text", "text": "hi" }] }],
                    "conversationId": "c",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("no id"));
        assert!(state.store.load("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mcp_status_without_servers() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["totalTools"], 0);
        assert_eq!(body["servers"], json!([]));
    }

    #[tokio::test]
    async fn test_mcp_status_reports_failed_server() {
        let (app, state) = app();
        state
            .connections
            .register("broken", toolmesh_core::LaunchSpec::new("/nonexistent/provider-command"));

        let response = app
            .oneshot(Request::get("/api/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["servers"][0]["name"], "broken");
        assert_eq!(body["servers"][0]["connected"], false);
        assert!(body["servers"][0]["error"].is_string());
    }

    #[tokio::test]
    async fn test_conversation_crud() {
        let (app, _) = app();

        let created = body_json(
            app.clone()
                .oneshot(json_request("POST", "/api/conversations", json!({ "title": "Notes" })))
                .await
                .unwrap(),
        )
        .await;
        let id = created["conversation"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["conversation"]["title"], "Notes");

        let renamed = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &format!("/api/conversations/{}", id),
                json!({ "title": "Renamed" }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(renamed).await["conversation"]["title"], "Renamed");

        let fetched = app
            .clone()
            .oneshot(Request::get(format!("/api/conversations/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let fetched = body_json(fetched).await;
        assert_eq!(fetched["messages"], json!([]));

        let listed = app
            .clone()
            .oneshot(Request::get("/api/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(listed).await["conversations"].as_array().unwrap().len(), 1);

        let deleted = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/conversations/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);

        let missing = app
            .oneshot(Request::get(format!("/api/conversations/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(missing).await["success"], false);
    }
}
