use std::time::{SystemTime, UNIX_EPOCH};

use adk_pipe_agent_client::AgentEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Fragment size for the artificial streaming effect on text deltas.
const TEXT_SPLIT_CHARS: usize = 10;

const TAKE_OVER_PREFIX: &str = "You need to take over from another agent and help the user, \
here is the conversation so far with the last user question at the end: ";

/// One inbound chat message in the OpenAI shape. Content stays a raw value
/// because hosts send either a string or a part array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

/// One outgoing increment: a plain text fragment, or a pre-formatted block
/// (collapsible tool call/result section). Only text fragments are paced by
/// the configured delay.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Text(String),
    Block(String),
}

/// Serialize the conversation for the remote agent. A fresh conversation goes
/// over verbatim; a longer history gets the take-over preamble so the agent
/// sees it is mid-conversation.
pub fn user_input_from_messages(messages: &[ChatMessage]) -> String {
    let serialized = serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string());
    if messages.len() == 1 {
        serialized
    } else {
        format!("{TAKE_OVER_PREFIX}{serialized}")
    }
}

/// Translate one decoded stream event into outgoing deltas.
///
/// Text parts only stream while `partial` is set; the remote repeats the full
/// text in a final non-partial event, which must not be re-emitted. Function
/// calls and responses become collapsible blocks, `actions` objects likewise.
/// Unrecognized parts and event kinds produce nothing.
pub fn deltas_for_event(event: &AgentEvent) -> Vec<ChatDelta> {
    let mut deltas = Vec::new();

    if let Some(content) = &event.content {
        for part in &content.parts {
            if let Some(text) = &part.text {
                if event.partial {
                    deltas.extend(split_text(text).into_iter().map(ChatDelta::Text));
                }
            } else if let Some(call) = &part.function_call {
                deltas.push(ChatDelta::Block(json_details_block("Function Call:", call)));
            } else if let Some(response) = &part.function_response {
                deltas.push(ChatDelta::Block(json_details_block(
                    "Function Response:",
                    response,
                )));
            }
        }
    } else if let Some(actions) = &event.actions {
        let body = serde_json::to_string(actions).unwrap_or_else(|_| "{}".to_string());
        deltas.push(ChatDelta::Block(format!(
            "<details>\n<summary>Action:</summary>\n{body}\n</details>\n"
        )));
    }

    deltas
}

/// Split on char boundaries into fragments of at most [`TEXT_SPLIT_CHARS`].
fn split_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(TEXT_SPLIT_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn json_details_block(summary: &str, payload: &Value) -> String {
    let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| "{}".to_string());
    format!("<details>\n<summary>{summary}</summary>\n\n```json\n{pretty}\n```\n</details>\n")
}

/// One OpenAI `chat.completion.chunk` carrying `content` as the delta.
pub fn completion_chunk(model: &str, content: &str) -> Value {
    json!({
        "created": now_secs(),
        "model": model,
        "object": "chat.completion.chunk",
        "choices": [{
            "index": 0,
            "delta": {"content": content, "role": "assistant"},
        }],
    })
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
