//! Wire request for the Anthropic messages endpoint.
//!
//! The unified transcript is reshaped to Anthropic's block structure:
//! system messages accumulate into the request-level `system` string, tool
//! calls become `tool_use` blocks, and tool results batch into synthetic
//! user messages placed where the results appeared.

use serde::Serialize;
use serde_json::Value;

use crate::{
    messages::unified,
    transcript::{CONTINUE_PROMPT, IdNamespace, normalize_tool_call_id},
};

/// Lowest `max_tokens` the adapter will send when nothing sensible is
/// configured; Anthropic rejects requests without an explicit value.
const MAX_TOKENS_FLOOR: u32 = 4096;

#[derive(Debug, Serialize)]
pub(super) struct ClaudeRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ClaudeTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ClaudeToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ClaudeMetadata>,
}

#[derive(Debug, Serialize)]
pub(super) struct ClaudeMessage {
    pub role: ClaudeRole,
    pub content: Vec<ClaudeBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum ClaudeRole {
    User,
    Assistant,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClaudeBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
pub(super) struct ClaudeTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClaudeToolChoice {
    None,
    Any,
    Tool { name: String },
}

#[derive(Debug, Serialize)]
pub(super) struct ClaudeMetadata {
    pub user_id: String,
}

pub(super) fn build_request(
    request: unified::UnifiedRequest,
    upstream_model: &str,
    configured_max_tokens: u32,
) -> ClaudeRequest {
    let mut system_parts = Vec::new();
    if let Some(system) = request.system {
        system_parts.push(system);
    }

    let mut messages: Vec<ClaudeMessage> = Vec::with_capacity(request.messages.len());
    let mut pending_results: Vec<ClaudeBlock> = Vec::new();

    for message in request.messages {
        match message.role {
            unified::UnifiedRole::System => {
                if let Some(text) = message.content {
                    system_parts.push(text);
                }
            }
            unified::UnifiedRole::Tool => {
                // Consecutive results batch into one synthetic user message.
                pending_results.push(ClaudeBlock::ToolResult {
                    tool_use_id: normalize_tool_call_id(
                        message.tool_call_id.as_deref().unwrap_or_default(),
                        IdNamespace::Anthropic,
                    ),
                    content: message.content.unwrap_or_default(),
                });
            }
            unified::UnifiedRole::User => {
                flush_tool_results(&mut messages, &mut pending_results);

                messages.push(ClaudeMessage {
                    role: ClaudeRole::User,
                    // Empty strings stay present, not null.
                    content: vec![ClaudeBlock::Text {
                        text: message.content.unwrap_or_default(),
                    }],
                });
            }
            unified::UnifiedRole::Assistant => {
                flush_tool_results(&mut messages, &mut pending_results);

                let mut blocks = Vec::new();

                if let Some(text) = message.content {
                    if !text.is_empty() {
                        blocks.push(ClaudeBlock::Text { text });
                    }
                }

                for call in message.tool_calls.unwrap_or_default() {
                    blocks.push(ClaudeBlock::ToolUse {
                        id: normalize_tool_call_id(&call.id, IdNamespace::Anthropic),
                        name: call.name,
                        input: parse_tool_input(&call.arguments),
                    });
                }

                if !blocks.is_empty() {
                    messages.push(ClaudeMessage {
                        role: ClaudeRole::Assistant,
                        content: blocks,
                    });
                }
            }
        }
    }

    flush_tool_results(&mut messages, &mut pending_results);

    // Anthropic insists the transcript opens with a user turn.
    if messages.first().map(|m| m.role) != Some(ClaudeRole::User) {
        messages.insert(
            0,
            ClaudeMessage {
                role: ClaudeRole::User,
                content: vec![ClaudeBlock::Text {
                    text: CONTINUE_PROMPT.to_string(),
                }],
            },
        );
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let max_tokens = request
        .max_tokens
        .or((configured_max_tokens > 0).then_some(configured_max_tokens))
        .unwrap_or(MAX_TOKENS_FLOOR);

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| ClaudeTool {
                name: tool.name,
                description: tool.description,
                input_schema: ensure_object_schema(tool.parameters),
            })
            .collect()
    });

    let tool_choice = request.tool_choice.and_then(|choice| match choice {
        unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Auto) => None,
        unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::None) => Some(ClaudeToolChoice::None),
        unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Required) => Some(ClaudeToolChoice::Any),
        unified::UnifiedToolChoice::Specific { name } => Some(ClaudeToolChoice::Tool { name }),
    });

    ClaudeRequest {
        model: upstream_model.to_string(),
        max_tokens,
        system,
        messages,
        stop_sequences: request.stop_sequences,
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
        tools,
        tool_choice,
        metadata: request.user.map(|user_id| ClaudeMetadata { user_id }),
    }
}

fn flush_tool_results(messages: &mut Vec<ClaudeMessage>, pending: &mut Vec<ClaudeBlock>) {
    if pending.is_empty() {
        return;
    }

    messages.push(ClaudeMessage {
        role: ClaudeRole::User,
        content: std::mem::take(pending),
    });
}

/// Arguments are a JSON string; on parse failure the raw string is passed
/// through so nothing is silently lost.
fn parse_tool_input(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn ensure_object_schema(mut schema: Value) -> Value {
    if let Some(object) = schema.as_object_mut() {
        object
            .entry("type")
            .or_insert_with(|| Value::String("object".to_string()));
        return schema;
    }

    serde_json::json!({"type": "object"})
}
