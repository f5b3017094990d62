//! Conversion from unified types to the Gemini dialect.
//!
//! Streaming reuses the non-streaming response shape: each SSE event is a
//! `GenerateContentResponse` carrying one incremental slice. Tool-call
//! argument fragments ride in `functionCall.args` as JSON strings; the
//! client concatenates them into the full argument object.

use serde_json::Value;

use crate::messages::{
    gemini::{self, Candidate, Content, GeminiFinishReason, GeminiRole, Part},
    unified,
};

pub(crate) fn generate_response(response: unified::UnifiedResponse) -> gemini::GenerateContentResponse {
    let usage_metadata = response.usage.map(usage_metadata);

    let candidates = response
        .choices
        .into_iter()
        .map(|choice| {
            let mut parts = Vec::new();

            if let Some(reasoning) = choice.message.reasoning_content {
                if !reasoning.is_empty() {
                    parts.push(Part::Text {
                        text: reasoning,
                        thought: Some(true),
                    });
                }
            }

            if let Some(text) = choice.message.content {
                if !text.is_empty() {
                    parts.push(Part::Text { text, thought: None });
                }
            }

            for call in choice.message.tool_calls.unwrap_or_default() {
                parts.push(Part::FunctionCall {
                    function_call: gemini::FunctionCall {
                        id: Some(call.id),
                        name: call.name,
                        args: parse_arguments(&call.arguments),
                    },
                });
            }

            Candidate {
                content: Content {
                    role: Some(GeminiRole::Model),
                    parts,
                },
                finish_reason: choice.finish_reason.map(finish_reason),
                index: choice.index,
            }
        })
        .collect();

    gemini::GenerateContentResponse {
        candidates,
        usage_metadata,
    }
}

/// Convert one canonical chunk into a Gemini stream event. Role-only chunks
/// have no Gemini representation and yield `None`.
pub(crate) fn stream_event(chunk: unified::UnifiedChunk) -> Option<gemini::GenerateContentResponse> {
    let usage_metadata = chunk.usage.map(usage_metadata);
    let mut candidates = Vec::new();

    for choice in chunk.choices {
        let mut parts = Vec::new();

        if let Some(reasoning) = choice.delta.reasoning_content {
            parts.push(Part::Text {
                text: reasoning,
                thought: Some(true),
            });
        }

        if let Some(text) = choice.delta.content {
            parts.push(Part::Text { text, thought: None });
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            parts.push(Part::FunctionCall {
                function_call: gemini::FunctionCall {
                    id: call.id,
                    name: call.name.unwrap_or_else(|| "function".to_string()),
                    // A fragment is rarely complete JSON; string fragments
                    // are concatenated client-side.
                    args: parse_arguments(&call.arguments),
                },
            });
        }

        if parts.is_empty() && choice.finish_reason.is_none() {
            continue;
        }

        candidates.push(Candidate {
            content: Content {
                role: Some(GeminiRole::Model),
                parts,
            },
            finish_reason: choice.finish_reason.map(finish_reason),
            index: choice.index,
        });
    }

    if candidates.is_empty() && usage_metadata.is_none() {
        return None;
    }

    if candidates.is_empty() {
        // Usage without payload still needs a candidate envelope.
        candidates.push(Candidate {
            content: Content {
                role: Some(GeminiRole::Model),
                parts: Vec::new(),
            },
            finish_reason: None,
            index: 0,
        });
    }

    Some(gemini::GenerateContentResponse {
        candidates,
        usage_metadata,
    })
}

fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => value,
        _ => Value::String(raw.to_string()),
    }
}

fn finish_reason(reason: unified::UnifiedFinishReason) -> GeminiFinishReason {
    match reason {
        unified::UnifiedFinishReason::Stop => GeminiFinishReason::Stop,
        unified::UnifiedFinishReason::Length => GeminiFinishReason::MaxTokens,
        unified::UnifiedFinishReason::ContentFilter => GeminiFinishReason::Safety,
        unified::UnifiedFinishReason::ToolCalls => GeminiFinishReason::ToolCalls,
    }
}

fn usage_metadata(usage: unified::UnifiedUsage) -> gemini::UsageMetadata {
    let accounted = usage.prompt_tokens + usage.completion_tokens;
    let thoughts = usage.total_tokens.saturating_sub(accounted);

    gemini::UsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        total_token_count: usage.total_tokens,
        thoughts_token_count: (thoughts > 0).then_some(thoughts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{
        UnifiedChoice, UnifiedChoiceDelta, UnifiedChunk, UnifiedDelta, UnifiedFinishReason, UnifiedMessage,
        UnifiedResponse, UnifiedToolCall, UnifiedToolCallDelta, UnifiedUsage,
    };

    fn chunk_with(delta: UnifiedDelta, finish: Option<UnifiedFinishReason>) -> UnifiedChunk {
        UnifiedChunk {
            id: "chatcmpl-1".into(),
            created: 1,
            model: "m".into(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
        }
    }

    #[test]
    fn buffered_response_maps_to_candidates() {
        let response = UnifiedResponse {
            id: "chatcmpl-1".into(),
            created: 1,
            model: "m".into(),
            choices: vec![UnifiedChoice {
                index: 0,
                message: UnifiedMessage::assistant(Some("hello".into()), None),
                finish_reason: Some(UnifiedFinishReason::Stop),
            }],
            usage: Some(UnifiedUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
        };

        let json = serde_json::to_value(generate_response(response)).unwrap();

        assert_eq!(json["candidates"][0]["content"]["role"], "model");
        assert_eq!(json["candidates"][0]["content"]["parts"][0]["text"], "hello");
        assert_eq!(json["candidates"][0]["finishReason"], "STOP");
        assert_eq!(json["usageMetadata"]["promptTokenCount"], 1);
        assert_eq!(json["usageMetadata"]["candidatesTokenCount"], 1);
        assert_eq!(json["usageMetadata"]["totalTokenCount"], 2);
    }

    #[test]
    fn tool_calls_become_function_call_parts() {
        let response = UnifiedResponse {
            id: "chatcmpl-1".into(),
            created: 1,
            model: "m".into(),
            choices: vec![UnifiedChoice {
                index: 0,
                message: UnifiedMessage::assistant(
                    None,
                    Some(vec![UnifiedToolCall {
                        id: "call_1".into(),
                        name: "get_weather".into(),
                        arguments: r#"{"location":"Paris"}"#.into(),
                    }]),
                ),
                finish_reason: Some(UnifiedFinishReason::ToolCalls),
            }],
            usage: None,
        };

        let json = serde_json::to_value(generate_response(response)).unwrap();
        let part = &json["candidates"][0]["content"]["parts"][0];

        assert_eq!(part["functionCall"]["name"], "get_weather");
        assert_eq!(part["functionCall"]["args"]["location"], "Paris");
        assert_eq!(json["candidates"][0]["finishReason"], "TOOL_CALLS");
    }

    #[test]
    fn role_only_chunk_yields_no_event() {
        let chunk = chunk_with(
            UnifiedDelta {
                role: Some(crate::messages::unified::UnifiedRole::Assistant),
                ..Default::default()
            },
            None,
        );

        assert!(stream_event(chunk).is_none());
    }

    #[test]
    fn partial_argument_fragments_survive_as_strings() {
        let chunk = chunk_with(
            UnifiedDelta {
                tool_calls: Some(vec![UnifiedToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("get_weather".into()),
                    arguments: "{\"loca".into(),
                }]),
                ..Default::default()
            },
            None,
        );

        let event = stream_event(chunk).unwrap();
        let json = serde_json::to_value(event).unwrap();

        assert_eq!(json["candidates"][0]["content"]["parts"][0]["functionCall"]["args"], "{\"loca");
    }

    #[test]
    fn terminal_chunk_maps_finish_reason_and_usage() {
        let mut chunk = chunk_with(UnifiedDelta::default(), Some(UnifiedFinishReason::ToolCalls));
        chunk.usage = Some(UnifiedUsage {
            prompt_tokens: 10,
            completion_tokens: 4,
            total_tokens: 17,
        });

        let json = serde_json::to_value(stream_event(chunk).unwrap()).unwrap();

        assert_eq!(json["candidates"][0]["finishReason"], "TOOL_CALLS");
        assert_eq!(json["usageMetadata"]["thoughtsTokenCount"], 3);
    }

    #[test]
    fn thought_deltas_are_flagged() {
        let chunk = chunk_with(
            UnifiedDelta {
                reasoning_content: Some("pondering".into()),
                ..Default::default()
            },
            None,
        );

        let json = serde_json::to_value(stream_event(chunk).unwrap()).unwrap();
        assert_eq!(json["candidates"][0]["content"]["parts"][0]["thought"], true);
    }
}
