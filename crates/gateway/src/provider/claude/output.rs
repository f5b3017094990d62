//! Anthropic response and stream-event parsing.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    messages::unified,
    provider::events::{ProviderEvent, ReasoningKey, UpstreamFinishReason},
    token_counter::PartialUsage,
};

/// The reason the model stopped generating.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub(super) enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
    /// Any other stop reason not yet known.
    #[serde(untagged)]
    Other(String),
}

impl From<StopReason> for UpstreamFinishReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn | StopReason::StopSequence => UpstreamFinishReason::EndTurn,
            StopReason::MaxTokens => UpstreamFinishReason::Length,
            StopReason::ToolUse => UpstreamFinishReason::ToolUse,
            StopReason::Refusal => UpstreamFinishReason::ContentFilter,
            StopReason::Other(other) => {
                log::warn!("Unknown stop reason from Anthropic: {other}");
                UpstreamFinishReason::Other(other)
            }
        }
    }
}

/// Buffered response of the messages endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct ClaudeResponse {
    pub id: String,
    pub content: Vec<ClaudeContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClaudeContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Forward compatibility with block types we do not handle.
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(super) struct ClaudeUsage {
    /// Omitted on streaming `message_delta` events.
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

impl From<ClaudeUsage> for PartialUsage {
    fn from(usage: ClaudeUsage) -> Self {
        // No synthesized total: `message_start` reports input while the final
        // output count only arrives on `message_delta`, and a premature total
        // would survive the field-wise merge.
        PartialUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: None,
        }
    }
}

impl From<ClaudeResponse> for unified::UnifiedResponse {
    fn from(response: ClaudeResponse) -> Self {
        let mut texts = Vec::new();
        let mut thinking = Vec::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                ClaudeContentBlock::Text { text } => texts.push(text),
                ClaudeContentBlock::Thinking { thinking: thought } => thinking.push(thought),
                ClaudeContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(unified::UnifiedToolCall {
                        id,
                        name,
                        arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                    });
                }
                ClaudeContentBlock::Other(value) => {
                    log::debug!("Ignoring unsupported Anthropic content block: {value}");
                }
            }
        }

        // `end_turn` after tool use still means the model wants the tools run.
        let finish_reason = match response.stop_reason {
            Some(StopReason::MaxTokens) => unified::UnifiedFinishReason::Length,
            Some(StopReason::Refusal) => unified::UnifiedFinishReason::ContentFilter,
            Some(StopReason::ToolUse) => unified::UnifiedFinishReason::ToolCalls,
            _ if !tool_calls.is_empty() => unified::UnifiedFinishReason::ToolCalls,
            _ => unified::UnifiedFinishReason::Stop,
        };

        let content = texts.join("");

        let usage = match (response.usage.input_tokens, response.usage.output_tokens) {
            (Some(input), Some(output)) => Some(unified::UnifiedUsage {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            }),
            _ => None,
        };

        let message = unified::UnifiedMessage {
            role: unified::UnifiedRole::Assistant,
            content: if content.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(content)
            },
            reasoning_content: if thinking.is_empty() {
                None
            } else {
                Some(thinking.join(""))
            },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        };

        Self {
            id: response.id,
            created: crate::error::unix_timestamp_ms() / 1000,
            model: String::new(),
            choices: vec![unified::UnifiedChoice {
                index: 0,
                message,
                finish_reason: Some(finish_reason),
            }],
            usage,
        }
    }
}

// Streaming event types.

/// Anthropic streams typed events; the flow for one response is
/// `message_start`, then per content block `content_block_start` /
/// `content_block_delta`* / `content_block_stop`, then `message_delta`
/// with the stop reason, then `message_stop`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClaudeStreamEvent {
    MessageStart {
        message: ClaudeMessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: ClaudeStreamBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: ClaudeBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: ClaudeMessageDelta,
        #[serde(default)]
        usage: Option<ClaudeUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ClaudeStreamError,
    },
    /// Forward compatibility with event types we do not handle.
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
pub(super) struct ClaudeMessageStart {
    pub id: String,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClaudeStreamBlock {
    Text {
        #[allow(dead_code)]
        text: String,
    },
    Thinking {},
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ClaudeBlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
pub(super) struct ClaudeMessageDelta {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ClaudeStreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Maps Anthropic stream events onto the normalized taxonomy.
///
/// Block indexes are global over the message, so the mapper remembers which
/// indexes opened as tool blocks to translate their stop events.
#[derive(Default)]
pub(super) struct ClaudeEventMapper {
    tool_blocks: HashSet<u32>,
}

impl ClaudeEventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, event: ClaudeStreamEvent) -> Vec<ProviderEvent> {
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                log::debug!("Anthropic stream started: {}", message.id);
                vec![ProviderEvent::Usage(message.usage.into())]
            }

            ClaudeStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                ClaudeStreamBlock::ToolUse { id, name } => {
                    self.tool_blocks.insert(index);
                    vec![ProviderEvent::ToolCallStart {
                        choice: 0,
                        tool_index: index,
                        id: Some(id),
                        name: Some(name),
                    }]
                }
                _ => Vec::new(),
            },

            ClaudeStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ClaudeBlockDelta::TextDelta { text } => vec![ProviderEvent::TextDelta { choice: 0, text }],
                ClaudeBlockDelta::ThinkingDelta { thinking } => vec![ProviderEvent::ReasoningDelta {
                    choice: 0,
                    key: ReasoningKey {
                        output_index: index,
                        content_index: 0,
                    },
                    text: thinking,
                    snapshot: false,
                }],
                ClaudeBlockDelta::InputJsonDelta { partial_json } => vec![ProviderEvent::ToolCallArgsDelta {
                    choice: 0,
                    tool_index: index,
                    fragment: partial_json,
                }],
                ClaudeBlockDelta::Other(value) => {
                    log::debug!("Ignoring unsupported Anthropic delta: {value}");
                    Vec::new()
                }
            },

            ClaudeStreamEvent::ContentBlockStop { index } => {
                if self.tool_blocks.remove(&index) {
                    vec![ProviderEvent::ToolCallDone {
                        choice: 0,
                        tool_index: index,
                        final_args: None,
                    }]
                } else {
                    Vec::new()
                }
            }

            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::new();

                if let Some(usage) = usage {
                    events.push(ProviderEvent::Usage(usage.into()));
                }

                if let Some(stop_reason) = delta.stop_reason {
                    events.push(ProviderEvent::Finish {
                        choice: 0,
                        reason: stop_reason.into(),
                    });
                }

                events
            }

            ClaudeStreamEvent::MessageStop => vec![ProviderEvent::Done],

            ClaudeStreamEvent::Error { error } => {
                log::error!("Anthropic stream error: {} - {}", error.error_type, error.message);
                Vec::new()
            }

            ClaudeStreamEvent::Ping => Vec::new(),

            ClaudeStreamEvent::Other(value) => {
                log::debug!("Ignoring unknown Anthropic stream event: {value}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_all(events: &[&str]) -> Vec<ProviderEvent> {
        let mut mapper = ClaudeEventMapper::new();
        events
            .iter()
            .flat_map(|json| mapper.map(serde_json::from_str(json).unwrap()))
            .collect()
    }

    #[test]
    fn tool_use_stream_maps_to_start_delta_done() {
        let events = map_all(&[
            r#"{"type":"message_start","message":{"id":"msg_1","role":"assistant","content":[],"model":"claude","usage":{"input_tokens":10,"output_tokens":0}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_abc","name":"get_weather"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"loca"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"tion\":\"Paris\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
            r#"{"type":"message_stop"}"#,
        ]);

        assert!(matches!(
            &events[1],
            ProviderEvent::ToolCallStart { id: Some(id), name: Some(name), .. }
                if id == "toolu_abc" && name == "get_weather"
        ));
        assert!(matches!(&events[2], ProviderEvent::ToolCallArgsDelta { .. }));
        assert!(matches!(&events[4], ProviderEvent::ToolCallDone { final_args: None, .. }));
        assert!(matches!(
            &events[6],
            ProviderEvent::Finish {
                reason: UpstreamFinishReason::ToolUse,
                ..
            }
        ));
        assert!(matches!(events.last(), Some(ProviderEvent::Done)));
    }

    #[test]
    fn text_block_stop_produces_no_tool_done() {
        let events = map_all(&[
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
        ]);

        assert_eq!(
            events,
            vec![ProviderEvent::TextDelta {
                choice: 0,
                text: "hi".into()
            }]
        );
    }

    #[test]
    fn thinking_deltas_become_reasoning_events() {
        let events = map_all(&[
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        ]);

        assert!(matches!(
            &events[0],
            ProviderEvent::ReasoningDelta { text, snapshot: false, .. } if text == "hmm"
        ));
    }

    #[test]
    fn buffered_response_derives_tool_calls_from_end_turn() {
        let response: ClaudeResponse = serde_json::from_str(
            r#"{
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude",
                "content": [
                    {"type": "text", "text": "checking"},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"location": "Paris"}}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedResponse::from(response);

        assert_eq!(
            unified.choices[0].finish_reason,
            Some(unified::UnifiedFinishReason::ToolCalls)
        );

        let message = unified.primary_message().unwrap();
        assert_eq!(message.content.as_deref(), Some("checking"));

        let call = &message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "toolu_1");

        let args: Value = serde_json::from_str(&call.arguments).unwrap();
        assert_eq!(args["location"], "Paris");

        assert_eq!(unified.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn max_tokens_maps_to_length() {
        let response: ClaudeResponse = serde_json::from_str(
            r#"{
                "id": "msg_1",
                "content": [{"type": "text", "text": "trunc"}],
                "stop_reason": "max_tokens",
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedResponse::from(response);
        assert_eq!(
            unified.choices[0].finish_reason,
            Some(unified::UnifiedFinishReason::Length)
        );
    }
}
