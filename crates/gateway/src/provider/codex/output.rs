//! Codex responses SSE event parsing.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    provider::events::{ProviderEvent, ReasoningKey, UpstreamFinishReason},
    token_counter::PartialUsage,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(super) enum CodexStreamEvent {
    #[serde(rename = "response.created")]
    Created { response: CodexResponseEnvelope },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        output_index: u32,
        item: CodexOutputItem,
    },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        output_index: u32,
        delta: String,
    },

    #[serde(rename = "response.reasoning_text.delta")]
    ReasoningTextDelta {
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta {
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        summary_index: u32,
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        output_index: u32,
        delta: String,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        output_index: u32,
        item: CodexOutputItem,
    },

    #[serde(rename = "response.completed")]
    Completed { response: CodexResponseEnvelope },

    #[serde(rename = "response.failed")]
    Failed {
        #[serde(default)]
        response: Option<Value>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    /// Codex emits many bookkeeping events we have no use for.
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
pub(super) struct CodexResponseEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub usage: Option<CodexUsage>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(super) struct CodexUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

impl From<CodexUsage> for PartialUsage {
    fn from(usage: CodexUsage) -> Self {
        let total = usage.total_tokens.or(match (usage.input_tokens, usage.output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

        PartialUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: total,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum CodexOutputItem {
    Message {
        #[serde(default)]
        content: Vec<CodexOutputContent>,
    },
    FunctionCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: Option<String>,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<CodexOutputContent>,
    },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum CodexOutputContent {
    OutputText { text: String },
    SummaryText { text: String },
    #[serde(untagged)]
    Other(Value),
}

impl CodexOutputContent {
    fn text(&self) -> Option<&str> {
        match self {
            CodexOutputContent::OutputText { text } | CodexOutputContent::SummaryText { text } => Some(text),
            CodexOutputContent::Other(_) => None,
        }
    }
}

/// Maps Codex stream events onto the normalized taxonomy.
///
/// Codex sends both incremental deltas and whole-item done snapshots; the
/// mapper remembers whether delta text was seen so the done variant only
/// surfaces for providers that never stream deltas.
#[derive(Default)]
pub(super) struct CodexEventMapper {
    saw_text_delta: bool,
}

impl CodexEventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, event: CodexStreamEvent) -> Vec<ProviderEvent> {
        match event {
            CodexStreamEvent::Created { response } => {
                log::debug!(
                    "Codex response created: {}",
                    response.id.as_deref().unwrap_or("<unknown>")
                );
                Vec::new()
            }

            CodexStreamEvent::OutputItemAdded { output_index, item } => match item {
                CodexOutputItem::FunctionCall { call_id, name, .. } => {
                    vec![ProviderEvent::ToolCallStart {
                        choice: 0,
                        tool_index: output_index,
                        id: call_id,
                        name,
                    }]
                }
                _ => Vec::new(),
            },

            CodexStreamEvent::OutputTextDelta { delta, .. } => {
                self.saw_text_delta = true;
                vec![ProviderEvent::TextDelta {
                    choice: 0,
                    text: delta,
                }]
            }

            CodexStreamEvent::ReasoningTextDelta {
                output_index,
                content_index,
                delta,
            } => vec![ProviderEvent::ReasoningDelta {
                choice: 0,
                key: ReasoningKey {
                    output_index,
                    content_index,
                },
                text: delta,
                snapshot: false,
            }],

            CodexStreamEvent::ReasoningSummaryTextDelta {
                output_index,
                summary_index,
                delta,
            } => vec![ProviderEvent::ReasoningDelta {
                choice: 0,
                key: ReasoningKey {
                    output_index,
                    content_index: summary_index,
                },
                text: delta,
                snapshot: false,
            }],

            CodexStreamEvent::FunctionCallArgumentsDelta { output_index, delta } => {
                vec![ProviderEvent::ToolCallArgsDelta {
                    choice: 0,
                    tool_index: output_index,
                    fragment: delta,
                }]
            }

            CodexStreamEvent::OutputItemDone { output_index, item } => match item {
                CodexOutputItem::FunctionCall { call_id, name, arguments } => {
                    let mut events = Vec::new();

                    // Ids and names may only arrive on the done snapshot.
                    if call_id.is_some() || name.is_some() {
                        events.push(ProviderEvent::ToolCallStart {
                            choice: 0,
                            tool_index: output_index,
                            id: call_id,
                            name,
                        });
                    }

                    events.push(ProviderEvent::ToolCallDone {
                        choice: 0,
                        tool_index: output_index,
                        final_args: arguments,
                    });

                    events
                }
                CodexOutputItem::Message { content } => {
                    // The done item repeats everything the deltas carried.
                    if self.saw_text_delta {
                        return Vec::new();
                    }

                    let text: String = content.iter().filter_map(CodexOutputContent::text).collect();

                    if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![ProviderEvent::TextDelta { choice: 0, text }]
                    }
                }
                CodexOutputItem::Reasoning { summary } => summary
                    .iter()
                    .enumerate()
                    .filter_map(|(content_index, part)| {
                        part.text().map(|text| ProviderEvent::ReasoningDelta {
                            choice: 0,
                            key: ReasoningKey {
                                output_index,
                                content_index: content_index as u32,
                            },
                            text: text.to_string(),
                            snapshot: true,
                        })
                    })
                    .collect(),
                CodexOutputItem::Other(value) => {
                    log::debug!("Ignoring unsupported Codex output item: {value}");
                    Vec::new()
                }
            },

            CodexStreamEvent::Completed { response } => {
                let mut events = Vec::new();

                if let Some(usage) = response.usage {
                    events.push(ProviderEvent::Usage(usage.into()));
                }

                events.push(ProviderEvent::Finish {
                    choice: 0,
                    reason: UpstreamFinishReason::Stop,
                });
                events.push(ProviderEvent::Done);

                events
            }

            CodexStreamEvent::Failed { response } => {
                log::error!(
                    "Codex stream reported failure: {}",
                    response.unwrap_or(Value::Null)
                );
                vec![ProviderEvent::Done]
            }

            CodexStreamEvent::Error { message } => {
                log::error!(
                    "Codex stream error: {}",
                    message.as_deref().unwrap_or("<no message>")
                );
                Vec::new()
            }

            CodexStreamEvent::Other(value) => {
                log::trace!("Ignoring Codex bookkeeping event: {value}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_all(events: &[&str]) -> Vec<ProviderEvent> {
        let mut mapper = CodexEventMapper::new();
        events
            .iter()
            .flat_map(|json| mapper.map(serde_json::from_str(json).unwrap()))
            .collect()
    }

    #[test]
    fn reasoning_then_message_done_then_completed() {
        let events = map_all(&[
            r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
            r#"{"type":"response.reasoning_text.delta","output_index":0,"content_index":0,"delta":"think"}"#,
            r#"{"type":"response.output_item.done","output_index":1,"item":{"type":"message","content":[{"type":"output_text","text":"hello"}]}}"#,
            r#"{"type":"response.completed","response":{"id":"resp_1","usage":{"input_tokens":3,"output_tokens":1}}}"#,
        ]);

        assert!(matches!(
            &events[0],
            ProviderEvent::ReasoningDelta { text, snapshot: false, .. } if text == "think"
        ));

        // Without prior text deltas, the done item supplies the text.
        assert!(matches!(
            &events[1],
            ProviderEvent::TextDelta { text, .. } if text == "hello"
        ));

        assert!(matches!(&events[2], ProviderEvent::Usage(usage) if usage.total_tokens == Some(4)));
        assert!(matches!(
            &events[3],
            ProviderEvent::Finish {
                reason: UpstreamFinishReason::Stop,
                ..
            }
        ));
        assert!(matches!(events.last(), Some(ProviderEvent::Done)));
    }

    #[test]
    fn message_done_is_suppressed_after_text_deltas() {
        let events = map_all(&[
            r#"{"type":"response.output_text.delta","output_index":0,"delta":"hel"}"#,
            r#"{"type":"response.output_text.delta","output_index":0,"delta":"lo"}"#,
            r#"{"type":"response.output_item.done","output_index":0,"item":{"type":"message","content":[{"type":"output_text","text":"hello"}]}}"#,
        ]);

        let texts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProviderEvent::TextDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(texts, vec!["hel", "lo"]);
    }

    #[test]
    fn function_call_done_carries_final_arguments() {
        let events = map_all(&[
            r#"{"type":"response.output_item.added","output_index":0,"item":{"type":"function_call","call_id":"fc-1","name":"shell"}}"#,
            r#"{"type":"response.function_call_arguments.delta","output_index":0,"delta":"{\"cmd\""}"#,
            r#"{"type":"response.function_call_arguments.delta","output_index":0,"delta":":\"ls\"}"}"#,
            r#"{"type":"response.output_item.done","output_index":0,"item":{"type":"function_call","call_id":"fc-1","name":"shell","arguments":"{\"cmd\":\"ls\"}"}}"#,
        ]);

        assert!(matches!(
            &events[0],
            ProviderEvent::ToolCallStart { id: Some(id), .. } if id == "fc-1"
        ));
        assert!(matches!(&events[1], ProviderEvent::ToolCallArgsDelta { .. }));
        assert!(matches!(
            events.last(),
            Some(ProviderEvent::ToolCallDone {
                final_args: Some(args),
                ..
            }) if args == "{\"cmd\":\"ls\"}"
        ));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let events = map_all(&[
            r#"{"type":"response.in_progress","response":{}}"#,
            r#"{"type":"response.content_part.added","part":{}}"#,
        ]);

        assert!(events.is_empty());
    }
}
