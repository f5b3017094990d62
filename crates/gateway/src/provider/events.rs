//! Normalized upstream event taxonomy.
//!
//! Every provider adapter parses its own SSE schema and surfaces these
//! events; the stream transformer consumes them without knowing which
//! provider produced them.

use crate::token_counter::PartialUsage;

/// Position of a reasoning slice inside the upstream response, used to
/// de-duplicate snapshot re-sends against already-streamed deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct ReasoningKey {
    pub output_index: u32,
    pub content_index: u32,
}

/// Finish reason as reported upstream, before canonical derivation.
///
/// `EndTurn` and `Other` are ambiguous: when tool calls were emitted during
/// the stream they resolve to `tool_calls`, otherwise to `stop`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UpstreamFinishReason {
    Stop,
    EndTurn,
    Length,
    ToolUse,
    ContentFilter,
    Other(String),
}

/// One normalized event from an upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ProviderEvent {
    /// Incremental (or, for some providers, cumulative) text.
    TextDelta { choice: u32, text: String },

    /// Incremental chain-of-thought text. `snapshot` marks done-style events
    /// that repeat content already carried by deltas.
    ReasoningDelta {
        choice: u32,
        key: ReasoningKey,
        text: String,
        snapshot: bool,
    },

    /// A tool invocation opened. `id` and `name` may trail in later events.
    ToolCallStart {
        choice: u32,
        tool_index: u32,
        id: Option<String>,
        name: Option<String>,
    },

    /// A fragment of the invocation's JSON arguments.
    ToolCallArgsDelta {
        choice: u32,
        tool_index: u32,
        fragment: String,
    },

    /// The invocation closed; `final_args` carries the full argument string
    /// for providers that only report arguments here.
    ToolCallDone {
        choice: u32,
        tool_index: u32,
        final_args: Option<String>,
    },

    /// Token accounting report; any field may be absent.
    Usage(PartialUsage),

    /// The upstream declared a finish reason for a choice.
    Finish {
        choice: u32,
        reason: UpstreamFinishReason,
    },

    /// End of the upstream stream.
    Done,
}
