//! Mapping of OpenAI streaming chunks onto the normalized event taxonomy.

use crate::{
    messages::openai,
    provider::events::{ProviderEvent, ReasoningKey, UpstreamFinishReason},
    token_counter::PartialUsage,
};

pub(super) fn finish_reason(reason: openai::FinishReason) -> UpstreamFinishReason {
    match reason {
        openai::FinishReason::Stop => UpstreamFinishReason::Stop,
        openai::FinishReason::Length => UpstreamFinishReason::Length,
        openai::FinishReason::ContentFilter => UpstreamFinishReason::ContentFilter,
        openai::FinishReason::ToolCalls => UpstreamFinishReason::ToolUse,
        openai::FinishReason::Other(other) => UpstreamFinishReason::Other(other),
    }
}

/// Flatten one upstream chunk into normalized events.
pub(super) fn chunk_events(chunk: openai::ChatCompletionChunk) -> Vec<ProviderEvent> {
    let mut events = Vec::new();

    for choice in chunk.choices {
        let index = choice.index;

        if let Some(text) = choice.delta.content {
            events.push(ProviderEvent::TextDelta { choice: index, text });
        }

        if let Some(text) = choice.delta.reasoning_content {
            events.push(ProviderEvent::ReasoningDelta {
                choice: index,
                key: ReasoningKey::default(),
                text,
                snapshot: false,
            });
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            match call {
                openai::StreamingToolCall::Start {
                    index: tool_index,
                    id,
                    function,
                    ..
                } => {
                    events.push(ProviderEvent::ToolCallStart {
                        choice: index,
                        tool_index,
                        id: Some(id),
                        name: Some(function.name),
                    });

                    if !function.arguments.is_empty() {
                        events.push(ProviderEvent::ToolCallArgsDelta {
                            choice: index,
                            tool_index,
                            fragment: function.arguments,
                        });
                    }
                }
                openai::StreamingToolCall::Delta {
                    index: tool_index,
                    function,
                } => {
                    events.push(ProviderEvent::ToolCallArgsDelta {
                        choice: index,
                        tool_index,
                        fragment: function.arguments,
                    });
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            events.push(ProviderEvent::Finish {
                choice: index,
                reason: finish_reason(reason),
            });
        }
    }

    // Usage rides on its own (typically final) chunk.
    if let Some(usage) = chunk.usage {
        events.push(ProviderEvent::Usage(PartialUsage {
            prompt_tokens: Some(usage.prompt_tokens),
            completion_tokens: Some(usage.completion_tokens),
            total_tokens: Some(usage.total_tokens),
        }));
    }

    events
}
