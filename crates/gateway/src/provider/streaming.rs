//! The streaming state machine: normalized provider events in, canonical
//! chunks out.
//!
//! One `StreamTransformer` is owned by the single consumer loop of one
//! request. It guarantees the canonical chunk contract:
//!
//! - the first payload chunk for a choice is preceded by a role chunk, and
//!   the role is never re-emitted;
//! - tool-call argument fragments for a (choice, tool-index) pair are
//!   append-only, and done-events never repeat already-streamed content;
//! - text that arrives as a cumulative snapshot is trimmed against the
//!   accumulated buffer before emission;
//! - exactly one terminal chunk per choice carries the finish reason and the
//!   merged usage, and nothing follows it.

use std::collections::HashMap;

use crate::{
    messages::unified::{
        UnifiedChoice, UnifiedChoiceDelta, UnifiedChunk, UnifiedDelta, UnifiedFinishReason, UnifiedMessage,
        UnifiedResponse, UnifiedRole, UnifiedToolCall, UnifiedToolCallDelta,
    },
    provider::events::{ProviderEvent, ReasoningKey, UpstreamFinishReason},
    token_counter::{self, PartialUsage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    Streaming,
    Finishing,
    Closed,
}

#[derive(Debug, Default)]
struct ChoiceState {
    role_sent: bool,
    accumulated_text: String,
    accumulated_reasoning: String,
    finish: Option<UpstreamFinishReason>,
}

/// Per-invocation build state.
#[derive(Debug)]
struct ToolCallState {
    id: String,
    name: Option<String>,
    arguments: String,
    has_streamed: bool,
}

/// Per-stream context, created when the upstream request is issued and
/// dropped when the terminal chunk goes out or the client disconnects.
pub(crate) struct StreamTransformer {
    id: String,
    model: String,
    created: u64,
    phase: Phase,
    choices: HashMap<u32, ChoiceState>,
    tool_calls: HashMap<(u32, u32), ToolCallState>,
    reasoning_streamed: HashMap<(u32, ReasoningKey), bool>,
    usage: PartialUsage,
    any_tool_call: bool,
    final_sent: bool,
    /// Prompt texts retained for local usage fallback.
    prompt_texts: Vec<String>,
}

impl StreamTransformer {
    pub fn new(model: impl Into<String>, prompt_texts: Vec<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            created: crate::error::unix_timestamp_ms() / 1000,
            phase: Phase::Initial,
            choices: HashMap::new(),
            tool_calls: HashMap::new(),
            reasoning_streamed: HashMap::new(),
            usage: PartialUsage::default(),
            any_tool_call: false,
            final_sent: false,
            prompt_texts,
        }
    }

    /// Feed one normalized event, returning zero or more chunks to emit.
    pub fn handle(&mut self, event: ProviderEvent) -> Vec<UnifiedChunk> {
        if self.phase == Phase::Closed {
            return Vec::new();
        }

        match event {
            ProviderEvent::TextDelta { choice, text } => self.on_text(choice, text),
            ProviderEvent::ReasoningDelta {
                choice,
                key,
                text,
                snapshot,
            } => self.on_reasoning(choice, key, text, snapshot),
            ProviderEvent::ToolCallStart {
                choice,
                tool_index,
                id,
                name,
            } => {
                self.on_tool_start(choice, tool_index, id, name);
                Vec::new()
            }
            ProviderEvent::ToolCallArgsDelta {
                choice,
                tool_index,
                fragment,
            } => self.on_tool_args(choice, tool_index, fragment),
            ProviderEvent::ToolCallDone {
                choice,
                tool_index,
                final_args,
            } => self.on_tool_done(choice, tool_index, final_args),
            ProviderEvent::Usage(report) => {
                self.usage.merge(report);
                Vec::new()
            }
            ProviderEvent::Finish { choice, reason } => {
                self.choices.entry(choice).or_default().finish = Some(reason);
                self.phase = Phase::Finishing;
                Vec::new()
            }
            ProviderEvent::Done => self.finalize(),
        }
    }

    /// Emit the terminal chunk if it has not gone out yet. Called on a `Done`
    /// event and again by the consumer loop on upstream EOF.
    pub fn finalize(&mut self) -> Vec<UnifiedChunk> {
        if self.final_sent {
            self.phase = Phase::Closed;
            return Vec::new();
        }

        self.final_sent = true;
        self.phase = Phase::Closed;

        let mut indices: Vec<u32> = self.choices.keys().copied().collect();
        if indices.is_empty() {
            indices.push(0);
        }
        indices.sort_unstable();

        let any_tool_call = self.any_tool_call;
        let choices = indices
            .into_iter()
            .map(|index| {
                let reason = self
                    .choices
                    .get(&index)
                    .and_then(|c| c.finish.clone())
                    .unwrap_or(UpstreamFinishReason::Stop);

                UnifiedChoiceDelta {
                    index,
                    delta: UnifiedDelta::default(),
                    finish_reason: Some(derive_finish_reason(reason, any_tool_call)),
                }
            })
            .collect();

        vec![UnifiedChunk {
            id: self.id.clone(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage: Some(self.merged_usage()),
        }]
    }

    /// Whether the terminal chunk has been emitted.
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    fn merged_usage(&self) -> crate::messages::unified::UnifiedUsage {
        let prompt_refs: Vec<&str> = self.prompt_texts.iter().map(String::as_str).collect();

        let mut indices: Vec<u32> = self.choices.keys().copied().collect();
        indices.sort_unstable();

        let completion: String = indices
            .iter()
            .filter_map(|i| self.choices.get(i).map(|c| c.accumulated_text.as_str()))
            .collect();

        let reasoning: String = indices
            .iter()
            .filter_map(|i| self.choices.get(i).map(|c| c.accumulated_reasoning.as_str()))
            .collect();

        token_counter::combine_usage(
            Some(self.usage),
            &prompt_refs,
            &[completion.as_str()],
            &[reasoning.as_str()],
            &self.model,
        )
    }

    fn on_text(&mut self, choice: u32, text: String) -> Vec<UnifiedChunk> {
        if self.phase == Phase::Finishing {
            // No payload after a finish reason was recorded for this stream.
            log::debug!("Dropping text delta received after finish");
            return Vec::new();
        }

        if text.is_empty() {
            return Vec::new();
        }

        let mut chunks = self.role_chunk_if_needed(choice);
        let state = self.choices.entry(choice).or_default();

        // Providers occasionally resend cumulative snapshots of everything
        // emitted so far; trim against the accumulated buffer.
        let accumulated = &state.accumulated_text;
        if !accumulated.is_empty() && (accumulated.starts_with(&text) || accumulated.ends_with(&text)) {
            return chunks;
        }

        let common = common_prefix_len(accumulated, &text);
        let remainder = text[common..].to_string();

        if remainder.is_empty() {
            return chunks;
        }

        state.accumulated_text.push_str(&remainder);

        chunks.push(self.payload_chunk(
            choice,
            UnifiedDelta {
                content: Some(remainder),
                ..Default::default()
            },
        ));

        chunks
    }

    fn on_reasoning(&mut self, choice: u32, key: ReasoningKey, text: String, snapshot: bool) -> Vec<UnifiedChunk> {
        if self.phase == Phase::Finishing || text.is_empty() {
            return Vec::new();
        }

        let streamed = self.reasoning_streamed.entry((choice, key)).or_insert(false);

        // A done-event is a snapshot of deltas already forwarded.
        if snapshot && *streamed {
            return Vec::new();
        }

        *streamed = true;

        let mut chunks = self.role_chunk_if_needed(choice);
        self.choices.entry(choice).or_default().accumulated_reasoning.push_str(&text);

        chunks.push(self.payload_chunk(
            choice,
            UnifiedDelta {
                reasoning_content: Some(text),
                ..Default::default()
            },
        ));

        chunks
    }

    fn on_tool_start(&mut self, choice: u32, tool_index: u32, id: Option<String>, name: Option<String>) {
        self.any_tool_call = true;

        let state = self.tool_calls.entry((choice, tool_index)).or_insert_with(|| ToolCallState {
            id: id.clone().unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
            name: None,
            arguments: String::new(),
            has_streamed: false,
        });

        if let Some(id) = id {
            state.id = id;
        }
        if name.is_some() {
            state.name = name;
        }
    }

    fn on_tool_args(&mut self, choice: u32, tool_index: u32, fragment: String) -> Vec<UnifiedChunk> {
        if self.phase == Phase::Finishing {
            return Vec::new();
        }

        // Providers may skip the explicit start event.
        if !self.tool_calls.contains_key(&(choice, tool_index)) {
            self.on_tool_start(choice, tool_index, None, None);
        }

        let mut chunks = self.role_chunk_if_needed(choice);

        let state = self
            .tool_calls
            .get_mut(&(choice, tool_index))
            .expect("tool call state allocated above");

        state.arguments.push_str(&fragment);
        state.has_streamed = true;

        let delta = UnifiedToolCallDelta {
            index: tool_index,
            id: Some(state.id.clone()),
            // Placeholder until the upstream names the function.
            name: Some(state.name.clone().unwrap_or_else(|| "function".to_string())),
            arguments: fragment,
        };

        chunks.push(self.payload_chunk(
            choice,
            UnifiedDelta {
                tool_calls: Some(vec![delta]),
                ..Default::default()
            },
        ));

        chunks
    }

    fn on_tool_done(&mut self, choice: u32, tool_index: u32, final_args: Option<String>) -> Vec<UnifiedChunk> {
        if !self.tool_calls.contains_key(&(choice, tool_index)) {
            self.on_tool_start(choice, tool_index, None, None);
        }

        let already_streamed = self
            .tool_calls
            .get(&(choice, tool_index))
            .map(|state| state.has_streamed)
            .unwrap_or_default();

        // Deltas already carried the full value; done is a snapshot.
        if already_streamed {
            return Vec::new();
        }

        let mut chunks = self.role_chunk_if_needed(choice);

        let state = self
            .tool_calls
            .get_mut(&(choice, tool_index))
            .expect("tool call state allocated above");

        let arguments = final_args.unwrap_or_else(|| state.arguments.clone());
        state.arguments = arguments.clone();
        state.has_streamed = true;

        let delta = UnifiedToolCallDelta {
            index: tool_index,
            id: Some(state.id.clone()),
            name: Some(state.name.clone().unwrap_or_else(|| "function".to_string())),
            arguments,
        };

        chunks.push(self.payload_chunk(
            choice,
            UnifiedDelta {
                tool_calls: Some(vec![delta]),
                ..Default::default()
            },
        ));

        chunks
    }

    fn role_chunk_if_needed(&mut self, choice: u32) -> Vec<UnifiedChunk> {
        self.phase = Phase::Streaming;

        let state = self.choices.entry(choice).or_default();
        if state.role_sent {
            return Vec::new();
        }
        state.role_sent = true;

        vec![UnifiedChunk {
            id: self.id.clone(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![UnifiedChoiceDelta {
                index: choice,
                delta: UnifiedDelta {
                    role: Some(UnifiedRole::Assistant),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }]
    }

    fn payload_chunk(&self, choice: u32, delta: UnifiedDelta) -> UnifiedChunk {
        UnifiedChunk {
            id: self.id.clone(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![UnifiedChoiceDelta {
                index: choice,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }
}

fn derive_finish_reason(reason: UpstreamFinishReason, any_tool_call: bool) -> UnifiedFinishReason {
    match reason {
        UpstreamFinishReason::Length => UnifiedFinishReason::Length,
        UpstreamFinishReason::ContentFilter => UnifiedFinishReason::ContentFilter,
        UpstreamFinishReason::ToolUse => UnifiedFinishReason::ToolCalls,
        // `end_turn` and friends are ambiguous: tool calls win when any were
        // streamed.
        UpstreamFinishReason::Stop | UpstreamFinishReason::EndTurn | UpstreamFinishReason::Other(_) => {
            if any_tool_call {
                UnifiedFinishReason::ToolCalls
            } else {
                UnifiedFinishReason::Stop
            }
        }
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    let bytes = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .take_while(|(x, y)| x == y)
        .count();

    // Stay on a char boundary.
    let mut len = bytes;
    while len > 0 && !b.is_char_boundary(len) {
        len -= 1;
    }
    len
}

/// Fold a sequence of canonical chunks back into one canonical response.
///
/// Used when the gateway streams upstream but answers the client with a
/// buffered body (the Codex adapter always streams, and the Gemini
/// `generateContent` surface is non-streaming).
#[derive(Debug, Default)]
pub(crate) struct ResponseAggregator {
    id: Option<String>,
    model: Option<String>,
    created: Option<u64>,
    content: String,
    reasoning: String,
    tool_calls: Vec<UnifiedToolCall>,
    open_fragments: HashMap<u32, ToolCallFragments>,
    finish_reason: Option<UnifiedFinishReason>,
    usage: Option<crate::messages::unified::UnifiedUsage>,
}

#[derive(Debug, Default)]
struct ToolCallFragments {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: UnifiedChunk) {
        self.id.get_or_insert(chunk.id);
        self.model.get_or_insert(chunk.model);
        self.created.get_or_insert(chunk.created);

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.content.push_str(&content);
            }
            if let Some(reasoning) = choice.delta.reasoning_content {
                self.reasoning.push_str(&reasoning);
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.open_fragments.entry(call.index).or_default();
                if call.id.is_some() {
                    entry.id = call.id;
                }
                if call.name.is_some() {
                    entry.name = call.name;
                }
                entry.arguments.push_str(&call.arguments);
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
    }

    pub fn into_response(mut self) -> UnifiedResponse {
        let mut indices: Vec<u32> = self.open_fragments.keys().copied().collect();
        indices.sort_unstable();

        for index in indices {
            if let Some(fragments) = self.open_fragments.remove(&index) {
                self.tool_calls.push(UnifiedToolCall {
                    id: fragments
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name: fragments.name.unwrap_or_else(|| "function".to_string()),
                    arguments: fragments.arguments,
                });
            }
        }

        let finish_reason = if self.tool_calls.is_empty() {
            self.finish_reason.or(Some(UnifiedFinishReason::Stop))
        } else {
            Some(UnifiedFinishReason::ToolCalls)
        };

        let message = UnifiedMessage {
            role: UnifiedRole::Assistant,
            content: if self.content.is_empty() && !self.tool_calls.is_empty() {
                None
            } else {
                Some(self.content)
            },
            reasoning_content: if self.reasoning.is_empty() {
                None
            } else {
                Some(self.reasoning)
            },
            tool_calls: if self.tool_calls.is_empty() {
                None
            } else {
                Some(self.tool_calls)
            },
            tool_call_id: None,
        };

        UnifiedResponse {
            id: self
                .id
                .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
            created: self.created.unwrap_or_else(|| crate::error::unix_timestamp_ms() / 1000),
            model: self.model.unwrap_or_default(),
            choices: vec![UnifiedChoice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: self.usage,
        }
    }
}
