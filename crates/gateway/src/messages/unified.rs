//! Protocol-agnostic canonical types for LLM requests and responses.
//!
//! Every inbound dialect (Gemini, OpenAI chat, OpenAI responses) converts into
//! these types, and every provider adapter (OpenAI-compatible, Codex, Claude)
//! converts out of them. The shape is modeled on the OpenAI chat schema:
//!
//! ```text
//! dialect request → UnifiedRequest → adapter → UnifiedResponse/UnifiedChunk → dialect response
//! ```
//!
//! Invariants maintained on transcripts (see `crate::transcript`):
//! - the first non-system message is user-role;
//! - every assistant tool call is answered by a tool message, or dropped;
//! - consecutive assistant messages are merged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) mod from_gemini;
pub(crate) mod from_openai;
pub(crate) mod from_responses;
pub(crate) mod to_gemini;
pub(crate) mod to_openai;
pub(crate) mod to_responses;

/// Canonical request shape consumed by every provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRequest {
    /// Model requested by the client. Adapters rewrite this to their
    /// configured upstream model before dispatch.
    pub model: String,

    /// Ordered conversation transcript, including system messages.
    pub messages: Vec<UnifiedMessage>,

    /// System instruction provided out-of-band (the responses surface's
    /// `instructions` field). Merged with in-transcript system messages by
    /// the adapters.
    pub system: Option<String>,

    /// Maximum tokens to generate. Anthropic requires a value; the adapter
    /// falls back to its configured default.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,

    /// Sequences that halt generation.
    pub stop_sequences: Option<Vec<String>>,

    /// Whether the client asked for a streaming response.
    pub stream: Option<bool>,

    /// Tool declarations the model may call.
    pub tools: Option<Vec<UnifiedTool>>,

    /// How the model is allowed to use tools.
    pub tool_choice: Option<UnifiedToolChoice>,

    /// Opaque end-user identifier for upstream abuse tracking.
    pub user: Option<String>,

    /// Opaque extra body merged verbatim into the upstream request.
    /// Recognized fields always take priority over these entries.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// One turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedMessage {
    pub role: UnifiedRole,

    /// Text content. `None` is allowed on assistant messages that carry only
    /// tool calls; empty strings are preserved as empty, not null.
    pub content: Option<String>,

    /// Model-provided chain-of-thought shadow, assistant only. Never sent
    /// back upstream; surfaced to clients that understand it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Tool invocations, assistant only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<UnifiedToolCall>>,

    /// Id of the invocation this message answers, tool role only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl UnifiedMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: UnifiedRole::User,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: UnifiedRole::System,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Option<Vec<UnifiedToolCall>>) -> Self {
        Self {
            role: UnifiedRole::Assistant,
            content,
            reasoning_content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: UnifiedRole::Tool,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Whether the message has neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty)
            && self.tool_calls.as_deref().is_none_or(<[UnifiedToolCall]>::is_empty)
    }
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnifiedRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured invocation request emitted by the model.
///
/// Ids are dialect-namespaced (`call_*` in OpenAI chat, `toolu_*` in
/// Anthropic). `crate::transcript::normalize_tool_call_id` rewrites them
/// between namespaces deterministically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments string; the client parses and executes.
    pub arguments: String,
}

/// Tool declaration: name, description, JSON-Schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool usage policy for the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedToolChoice {
    Mode(UnifiedToolChoiceMode),
    /// The model must use the named function.
    Specific { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedToolChoiceMode {
    /// Tools disabled for this turn.
    None,
    /// The model decides.
    Auto,
    /// At least one tool must be called.
    #[serde(alias = "any")]
    Required,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedFinishReason {
    Stop,
    #[serde(alias = "max_tokens")]
    Length,
    ContentFilter,
    ToolCalls,
}

impl std::fmt::Display for UnifiedFinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnifiedFinishReason::Stop => write!(f, "stop"),
            UnifiedFinishReason::Length => write!(f, "length"),
            UnifiedFinishReason::ContentFilter => write!(f, "content_filter"),
            UnifiedFinishReason::ToolCalls => write!(f, "tool_calls"),
        }
    }
}

/// Token accounting triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub id: String,
    /// Unix timestamp in seconds.
    pub created: u64,
    pub model: String,
    pub choices: Vec<UnifiedChoice>,
    pub usage: Option<UnifiedUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedChoice {
    pub index: u32,
    pub message: UnifiedMessage,
    pub finish_reason: Option<UnifiedFinishReason>,
}

impl UnifiedResponse {
    /// The primary choice's message, if any.
    pub fn primary_message(&self) -> Option<&UnifiedMessage> {
        self.choices.first().map(|c| &c.message)
    }
}

/// Incremental streaming delta.
///
/// The first chunk for a choice that carries payload sets `role`; later
/// chunks never re-emit it. Exactly one chunk per choice carries
/// `finish_reason`, and no payload deltas follow it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedChunk {
    pub id: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<UnifiedChoiceDelta>,
    pub usage: Option<UnifiedUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedChoiceDelta {
    pub index: u32,
    pub delta: UnifiedDelta,
    pub finish_reason: Option<UnifiedFinishReason>,
}

/// Partial message content carried by one chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UnifiedRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<UnifiedToolCallDelta>>,
}

impl UnifiedDelta {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.content.is_none() && self.reasoning_content.is_none() && self.tool_calls.is_none()
    }
}

/// One tool-call fragment inside a chunk.
///
/// `arguments` carries only the new fragment, never the cumulative value;
/// concatenating fragments for one `index` in receipt order yields a valid
/// JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}
