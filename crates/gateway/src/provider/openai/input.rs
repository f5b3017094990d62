//! Wire request for the OpenAI-compatible chat completions endpoint.
//!
//! Near-identity from the unified shape. Extra body entries from both the
//! configuration and the inbound request are merged verbatim; recognized
//! fields are stripped from the merge so they cannot override invariants.

use serde::Serialize;
use serde_json::Value;

use crate::messages::{openai, unified};

/// Keys the adapter owns; extra-body entries with these names are discarded.
const RESERVED_KEYS: &[&str] = &[
    "model",
    "messages",
    "temperature",
    "top_p",
    "max_tokens",
    "stop",
    "stream",
    "stream_options",
    "tools",
    "tool_choice",
    "user",
];

#[derive(Debug, Serialize)]
pub(super) struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<openai::ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<openai::Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<openai::ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub(super) struct StreamOptions {
    pub include_usage: bool,
}

pub(super) fn build_request(
    request: unified::UnifiedRequest,
    upstream_model: &str,
    configured_extra: Option<&serde_json::Map<String, Value>>,
) -> OpenAiChatRequest {
    let mut extra = configured_extra.cloned().unwrap_or_default();
    for (key, value) in request.extra {
        extra.insert(key, value);
    }
    for key in RESERVED_KEYS {
        extra.remove(*key);
    }

    let mut messages: Vec<openai::ChatMessage> = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system {
        messages.push(openai::ChatMessage {
            role: openai::ChatRole::System,
            content: Some(system),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }

    messages.extend(request.messages.into_iter().map(wire_message));

    OpenAiChatRequest {
        model: upstream_model.to_string(),
        messages,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        stop: request.stop_sequences,
        stream: false,
        stream_options: None,
        tools: request.tools.map(|tools| tools.into_iter().map(wire_tool).collect()),
        tool_choice: request.tool_choice.map(wire_tool_choice),
        user: request.user,
        extra,
    }
}

fn wire_message(message: unified::UnifiedMessage) -> openai::ChatMessage {
    openai::ChatMessage {
        role: message.role.into(),
        content: message.content,
        // The shadow stream is never replayed upstream.
        reasoning_content: None,
        tool_calls: message
            .tool_calls
            .map(|calls| calls.into_iter().map(openai::ToolCall::from).collect()),
        tool_call_id: message.tool_call_id,
    }
}

fn wire_tool(tool: unified::UnifiedTool) -> openai::Tool {
    openai::Tool {
        tool_type: openai::ToolCallType::Function,
        function: openai::FunctionDefinition {
            name: tool.name,
            description: tool.description,
            parameters: tool.parameters,
            strict: None,
        },
    }
}

fn wire_tool_choice(choice: unified::UnifiedToolChoice) -> openai::ToolChoice {
    match choice {
        unified::UnifiedToolChoice::Mode(mode) => openai::ToolChoice::Mode(match mode {
            unified::UnifiedToolChoiceMode::None => openai::ToolChoiceMode::None,
            unified::UnifiedToolChoiceMode::Auto => openai::ToolChoiceMode::Auto,
            unified::UnifiedToolChoiceMode::Required => openai::ToolChoiceMode::Required,
        }),
        unified::UnifiedToolChoice::Specific { name } => openai::ToolChoice::Specific {
            choice_type: openai::ToolCallType::Function,
            function: openai::FunctionChoice { name },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::UnifiedMessage;

    fn request_with_extra(extra: serde_json::Map<String, Value>) -> unified::UnifiedRequest {
        unified::UnifiedRequest {
            model: "client-model".into(),
            messages: vec![UnifiedMessage::user("hi")],
            system: None,
            max_tokens: Some(64),
            temperature: Some(0.1),
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            user: None,
            extra,
        }
    }

    #[test]
    fn model_is_rewritten_to_the_upstream_name() {
        let wire = build_request(request_with_extra(Default::default()), "glm-4.5", None);
        assert_eq!(wire.model, "glm-4.5");
    }

    #[test]
    fn request_extra_overrides_configured_extra() {
        let mut configured = serde_json::Map::new();
        configured.insert("seed".into(), serde_json::json!(1));
        configured.insert("logprobs".into(), serde_json::json!(false));

        let mut inbound = serde_json::Map::new();
        inbound.insert("seed".into(), serde_json::json!(2));

        let wire = build_request(request_with_extra(inbound), "glm-4.5", Some(&configured));

        assert_eq!(wire.extra["seed"], serde_json::json!(2));
        assert_eq!(wire.extra["logprobs"], serde_json::json!(false));
    }

    #[test]
    fn reserved_keys_cannot_be_overridden_by_extra_body() {
        let mut inbound = serde_json::Map::new();
        inbound.insert("model".into(), serde_json::json!("evil-model"));
        inbound.insert("stream".into(), serde_json::json!(false));

        let wire = build_request(request_with_extra(inbound), "glm-4.5", None);

        assert_eq!(wire.model, "glm-4.5");
        assert!(wire.extra.is_empty());
    }

    #[test]
    fn system_field_is_prepended_as_a_system_message() {
        let mut request = request_with_extra(Default::default());
        request.system = Some("be terse".into());

        let wire = build_request(request, "glm-4.5", None);

        assert_eq!(wire.messages.len(), 2);
        assert!(matches!(wire.messages[0].role, openai::ChatRole::System));
    }
}
