//! Conversion of persisted messages into model context

use crate::types::{ChatMessage, ContentPart, ConversationMessage, ConversationRole, MessagePart, MessageRole};

fn file_part(url: &str, media_type: &str, filename: Option<&str>) -> ContentPart {
    if media_type.starts_with("image/") {
        ContentPart::image(url)
    } else {
        ContentPart::text(format!("[File {} ({}): {}]", filename.unwrap_or("attachment"), media_type, url))
    }
}

/// Model context for one persisted message
///
/// Assistant messages are split wherever a tool result must precede later
/// text: each run of tool calls becomes an assistant message carrying the
/// calls followed by a user message carrying their results.
pub fn to_chat_messages(message: &ConversationMessage) -> Vec<ChatMessage> {
    match message.role {
        ConversationRole::User => {
            let parts = message
                .parts
                .iter()
                .map(|part| match part {
                    MessagePart::Text { text } => ContentPart::text(text.clone()),
                    MessagePart::File { url, media_type, filename } => file_part(url, media_type, filename.as_deref()),
                    MessagePart::ToolCall(call) => ContentPart::tool_result(call.call_id.clone(), call.result_text()),
                })
                .collect();
            vec![ChatMessage::with_parts(MessageRole::User, parts)]
        }
        ConversationRole::Assistant => {
            let mut out = Vec::new();
            let mut uses = Vec::new();
            let mut results = Vec::new();

            for part in &message.parts {
                match part {
                    MessagePart::ToolCall(call) => {
                        uses.push(ContentPart::tool_use(call.call_id.clone(), call.tool_name.clone(), call.input.clone()));
                        results.push(ContentPart::tool_result(call.call_id.clone(), call.result_text()));
                    }
                    other => {
                        if !results.is_empty() {
                            out.push(ChatMessage::with_parts(MessageRole::Assistant, std::mem::take(&mut uses)));
                            out.push(ChatMessage::with_parts(MessageRole::User, std::mem::take(&mut results)));
                        }
                        uses.push(match other {
                            MessagePart::Text { text } => ContentPart::text(text.clone()),
                            MessagePart::File { url, media_type, filename } => {
                                file_part(url, media_type, filename.as_deref())
                            }
                            MessagePart::ToolCall(_) => continue,
                        });
                    }
                }
            }

            if !uses.is_empty() {
                out.push(ChatMessage::with_parts(MessageRole::Assistant, uses));
            }
            if !results.is_empty() {
                out.push(ChatMessage::with_parts(MessageRole::User, results));
            }
            out
        }
    }
}

/// System prompt followed by the whole transcript
pub fn build_context(system_prompt: &str, transcript: &[ConversationMessage]) -> Vec<ChatMessage> {
    let mut context = Vec::with_capacity(transcript.len() + 1);
    if !system_prompt.is_empty() {
        context.push(ChatMessage::system(system_prompt));
    }
    context.extend(transcript.iter().flat_map(to_chat_messages));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCallPart;
    use serde_json::json;

    fn call(id: &str, output: &str) -> MessagePart {
        MessagePart::ToolCall(ToolCallPart {
            call_id: id.into(),
            tool_name: "calculate".into(),
            input: json!({ "expression": "1 + 1" }),
            output: Some(output.into()),
            error_text: None,
        })
    }

    #[test]
    fn test_assistant_tool_runs_are_split() {
        let message = ConversationMessage::new(
            ConversationRole::Assistant,
            vec![
                MessagePart::text("Checking."),
                call("a", "2"),
                call("b", "2"),
                MessagePart::text("Both are 2."),
            ],
        );

        let context = to_chat_messages(&message);
        let roles: Vec<_> = context.iter().map(|m| m.role).collect();
        assert_eq!(roles, [MessageRole::Assistant, MessageRole::User, MessageRole::Assistant]);
        assert_eq!(context[0].parts().len(), 3);
        assert!(matches!(&context[1].parts()[1], ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == "b"));
        assert_eq!(context[2].text_content(), "Both are 2.");
    }

    #[test]
    fn test_build_context_prepends_system_prompt() {
        let transcript = vec![ConversationMessage::user_text("hello")];
        let context = build_context("Be brief.", &transcript);
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].role, MessageRole::System);
        assert_eq!(context[1].text_content(), "hello");
    }

    #[test]
    fn test_image_files_become_image_parts() {
        let message = ConversationMessage::new(
            ConversationRole::User,
            vec![
                MessagePart::File {
                    url: "https://example.com/cat.png".into(),
                    media_type: "image/png".into(),
                    filename: None,
                },
                MessagePart::File {
                    url: "https://example.com/report.pdf".into(),
                    media_type: "application/pdf".into(),
                    filename: Some("report.pdf".into()),
                },
            ],
        );
        let context = to_chat_messages(&message);
        let parts = context[0].parts();
        assert!(matches!(&parts[0], ContentPart::Image { .. }));
        assert!(matches!(&parts[1], ContentPart::Text { text } if text.contains("report.pdf")));
    }
}
