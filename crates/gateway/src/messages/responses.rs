//! OpenAI "responses" dialect wire types.
//!
//! The inbound surface accepts either a chat-style `messages` array or the
//! newer `input` + `instructions` pair. Streaming replies are emitted as
//! `response.delta` / `response.completed` / `response.error` SSE events,
//! terminated by `data: [DONE]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::openai::ChatMessage;

/// Request body of `POST /openai/v1/responses`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponsesRequest {
    pub model: Option<String>,
    /// Out-of-band system prompt.
    pub instructions: Option<String>,
    /// Input items (newer shape).
    pub input: Option<ResponsesInput>,
    /// Chat-style transcript (legacy shape).
    pub messages: Option<Vec<ChatMessage>>,
    pub tools: Option<Vec<ResponsesTool>>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub stream: Option<bool>,
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `input` is either one string or a list of typed items.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<InputItem>),
}

/// One input item of the responses surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// Bare user text.
    InputText { text: String },
    /// A full message with role and content parts.
    Message {
        role: super::openai::ChatRole,
        content: MessageContent,
    },
    /// A prior tool invocation being replayed.
    FunctionCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        id: Option<String>,
        name: String,
        arguments: String,
    },
    /// The result of a prior tool invocation.
    FunctionCallOutput { call_id: String, output: String },
}

/// Message content: one string or typed text parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenate all text parts.
    pub fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .map(|part| match part {
                    ContentPart::InputText { text } | ContentPart::OutputText { text } | ContentPart::Text { text } => {
                        text
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
    Text { text: String },
}

/// Flat tool declaration used by the responses surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// Payload of a `response.delta` event.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseDelta {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<OutputContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ResponseDelta {
    pub fn text(text: String) -> Self {
        Self {
            event_type: "response.delta",
            content: vec![OutputContent::OutputText { text }],
            reasoning: None,
        }
    }

    pub fn reasoning(text: String) -> Self {
        Self {
            event_type: "response.delta",
            content: Vec::new(),
            reasoning: Some(text),
        }
    }
}

/// Payload of a `response.completed` event, also the non-streaming body.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseCompleted {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub response: ResponsesResponse,
}

impl ResponseCompleted {
    pub fn new(response: ResponsesResponse) -> Self {
        Self {
            event_type: "response.completed",
            response,
        }
    }
}

/// The response object of the responses surface.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: u64,
    pub model: String,
    pub status: &'static str,
    pub output: Vec<OutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
}

/// One output item of a completed response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        role: &'static str,
        content: Vec<OutputContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    Reasoning {
        summary: Vec<OutputContent>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: String },
    SummaryText { text: String },
}

/// Usage block in the responses naming scheme.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResponsesUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_input_items() {
        let json = r#"{
            "instructions": "be terse",
            "input": [{"type":"input_text","text":"hi"}],
            "stream": true
        }"#;

        let request: ResponsesRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.instructions.as_deref(), Some("be terse"));

        let Some(ResponsesInput::Items(items)) = request.input else {
            panic!("expected items input");
        };
        assert!(matches!(&items[0], InputItem::InputText { text } if text == "hi"));
    }

    #[test]
    fn request_accepts_bare_string_input() {
        let request: ResponsesRequest = serde_json::from_str(r#"{"input":"hello"}"#).unwrap();
        assert!(matches!(request.input, Some(ResponsesInput::Text(ref t)) if t == "hello"));
    }

    #[test]
    fn function_call_items_round_trip() {
        let json = r#"[
            {"type":"function_call","call_id":"call_1","name":"x","arguments":"{}"},
            {"type":"function_call_output","call_id":"call_1","output":"42"}
        ]"#;

        let items: Vec<InputItem> = serde_json::from_str(json).unwrap();
        assert!(matches!(&items[0], InputItem::FunctionCall { name, .. } if name == "x"));
        assert!(matches!(&items[1], InputItem::FunctionCallOutput { output, .. } if output == "42"));
    }

    #[test]
    fn delta_event_serializes_output_text() {
        let delta = ResponseDelta::text("hello".into());
        let json = serde_json::to_value(&delta).unwrap();

        assert_eq!(json["type"], "response.delta");
        assert_eq!(json["content"][0]["type"], "output_text");
        assert_eq!(json["content"][0]["text"], "hello");
    }
}
