//! Wire request for the Codex responses endpoint.
//!
//! The transcript flattens into a sequence of typed input items. Codex has
//! no separate system role; a compiled-in base prompt concatenates with the
//! request's system content into the `instructions` field.

use std::hash::{DefaultHasher, Hash, Hasher};

use config::CodexConfig;
use serde::Serialize;
use serde_json::Value;

use crate::messages::unified;

/// Base instructions sent on every request, mirroring what the reference CLI
/// ships. Inbound system prompts are appended after it.
pub(super) const BASE_INSTRUCTIONS: &str = "You are a coding agent. You are precise, safe, and helpful. \
Prefer short, direct answers. When you call a tool, emit arguments as strict JSON. \
Never fabricate tool output; wait for the result before continuing.";

#[derive(Debug, Serialize)]
pub(super) struct CodexRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<CodexInputItem>,
    pub tools: Vec<CodexTool>,
    pub tool_choice: &'static str,
    pub parallel_tool_calls: bool,
    pub store: bool,
    pub stream: bool,
    pub prompt_cache_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<CodexReasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<CodexTextControls>,
}

#[derive(Debug, Serialize)]
pub(super) struct CodexReasoning {
    pub effort: config::ReasoningEffort,
    pub summary: config::ReasoningSummary,
}

#[derive(Debug, Serialize)]
pub(super) struct CodexTextControls {
    pub verbosity: config::TextVerbosity,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum CodexInputItem {
    Message {
        role: &'static str,
        content: Vec<CodexContentPart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum CodexContentPart {
    InputText { text: String },
    OutputText { text: String },
}

#[derive(Debug, Serialize)]
pub(super) struct CodexTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub name: String,
    pub description: String,
    pub strict: bool,
    pub parameters: Value,
}

pub(super) fn build_request(request: unified::UnifiedRequest, config: &CodexConfig) -> CodexRequest {
    let mut instruction_parts = vec![BASE_INSTRUCTIONS.to_string()];
    if let Some(system) = request.system {
        instruction_parts.push(system);
    }

    let prompt_cache_key = conversation_cache_key(&request.messages, &config.model);

    let mut input = Vec::with_capacity(request.messages.len());

    for message in request.messages {
        match message.role {
            unified::UnifiedRole::System => {
                if let Some(text) = message.content {
                    instruction_parts.push(text);
                }
            }
            unified::UnifiedRole::User => {
                input.push(CodexInputItem::Message {
                    role: "user",
                    content: vec![CodexContentPart::InputText {
                        text: message.content.unwrap_or_default(),
                    }],
                });
            }
            unified::UnifiedRole::Assistant => {
                if let Some(text) = message.content {
                    if !text.is_empty() {
                        input.push(CodexInputItem::Message {
                            role: "assistant",
                            content: vec![CodexContentPart::OutputText { text }],
                        });
                    }
                }

                for call in message.tool_calls.unwrap_or_default() {
                    input.push(CodexInputItem::FunctionCall {
                        call_id: call.id,
                        name: call.name,
                        arguments: call.arguments,
                    });
                }
            }
            unified::UnifiedRole::Tool => {
                input.push(CodexInputItem::FunctionCallOutput {
                    call_id: message.tool_call_id.unwrap_or_default(),
                    output: message.content.unwrap_or_default(),
                });
            }
        }
    }

    let tools = request
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|tool| CodexTool {
            tool_type: "function",
            name: tool.name,
            description: tool.description,
            strict: false,
            parameters: tool.parameters,
        })
        .collect();

    CodexRequest {
        model: config.model.clone(),
        instructions: instruction_parts.join("\n\n"),
        input,
        tools,
        tool_choice: "auto",
        parallel_tool_calls: false,
        store: false,
        // The responses backend only speaks SSE.
        stream: true,
        prompt_cache_key,
        reasoning: Some(CodexReasoning {
            effort: config.reasoning.effort,
            summary: config.reasoning.summary,
        }),
        text: Some(CodexTextControls {
            verbosity: config.text_verbosity,
        }),
    }
}

/// Stable per-conversation key so upstream prompt caching keeps working
/// across turns: derived from the first user message, which identifies the
/// conversation for CLI clients.
fn conversation_cache_key(messages: &[unified::UnifiedMessage], model: &str) -> String {
    let mut hasher = DefaultHasher::new();
    model.hash(&mut hasher);

    if let Some(first_user) = messages
        .iter()
        .find(|m| m.role == unified::UnifiedRole::User)
        .and_then(|m| m.content.as_deref())
    {
        first_user.hash(&mut hasher);
    }

    format!("prism-{:016x}", hasher.finish())
}
