//! Conversions from unified types to OpenAI chat protocol types, used when
//! answering clients on the OpenAI dialect surface.

use crate::messages::{openai, unified};

impl From<unified::UnifiedRole> for openai::ChatRole {
    fn from(role: unified::UnifiedRole) -> Self {
        match role {
            unified::UnifiedRole::System => openai::ChatRole::System,
            unified::UnifiedRole::User => openai::ChatRole::User,
            unified::UnifiedRole::Assistant => openai::ChatRole::Assistant,
            unified::UnifiedRole::Tool => openai::ChatRole::Tool,
        }
    }
}

impl From<unified::UnifiedToolCall> for openai::ToolCall {
    fn from(call: unified::UnifiedToolCall) -> Self {
        Self {
            id: call.id,
            tool_type: openai::ToolCallType::Function,
            function: openai::FunctionCall {
                name: call.name,
                arguments: call.arguments,
            },
        }
    }
}

impl From<unified::UnifiedMessage> for openai::ChatMessage {
    fn from(msg: unified::UnifiedMessage) -> Self {
        Self {
            role: msg.role.into(),
            content: msg.content,
            reasoning_content: msg.reasoning_content,
            tool_calls: msg
                .tool_calls
                .map(|calls| calls.into_iter().map(openai::ToolCall::from).collect()),
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<unified::UnifiedFinishReason> for openai::FinishReason {
    fn from(reason: unified::UnifiedFinishReason) -> Self {
        match reason {
            unified::UnifiedFinishReason::Stop => openai::FinishReason::Stop,
            unified::UnifiedFinishReason::Length => openai::FinishReason::Length,
            unified::UnifiedFinishReason::ContentFilter => openai::FinishReason::ContentFilter,
            unified::UnifiedFinishReason::ToolCalls => openai::FinishReason::ToolCalls,
        }
    }
}

impl From<unified::UnifiedUsage> for openai::Usage {
    fn from(usage: unified::UnifiedUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<unified::UnifiedResponse> for openai::ChatCompletionResponse {
    fn from(resp: unified::UnifiedResponse) -> Self {
        Self {
            id: resp.id,
            object: openai::ObjectType::ChatCompletion,
            created: resp.created,
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| openai::ChatChoice {
                    index: choice.index,
                    message: choice.message.into(),
                    finish_reason: choice.finish_reason.map(Into::into),
                })
                .collect(),
            usage: resp.usage.map(Into::into),
        }
    }
}

impl From<unified::UnifiedToolCallDelta> for openai::StreamingToolCall {
    fn from(delta: unified::UnifiedToolCallDelta) -> Self {
        match delta.id {
            // Every fragment the transformer emits carries id and name, which
            // maps onto the start shape; clients tolerate the repetition.
            Some(id) => openai::StreamingToolCall::Start {
                index: delta.index,
                id,
                tool_type: openai::ToolCallType::Function,
                function: openai::FunctionStart {
                    name: delta.name.unwrap_or_else(|| "function".to_string()),
                    arguments: delta.arguments,
                },
            },
            None => openai::StreamingToolCall::Delta {
                index: delta.index,
                function: openai::FunctionDelta {
                    arguments: delta.arguments,
                },
            },
        }
    }
}

impl From<unified::UnifiedChunk> for openai::ChatCompletionChunk {
    fn from(chunk: unified::UnifiedChunk) -> Self {
        Self {
            id: chunk.id,
            object: Some(openai::ObjectType::ChatCompletionChunk),
            created: chunk.created,
            model: chunk.model,
            choices: chunk
                .choices
                .into_iter()
                .map(|choice| openai::ChatChoiceDelta {
                    index: choice.index,
                    delta: openai::ChatMessageDelta {
                        role: choice.delta.role.map(Into::into),
                        content: choice.delta.content,
                        reasoning_content: choice.delta.reasoning_content,
                        tool_calls: choice
                            .delta
                            .tool_calls
                            .map(|calls| calls.into_iter().map(openai::StreamingToolCall::from).collect()),
                    },
                    finish_reason: choice.finish_reason.map(Into::into),
                })
                .collect(),
            usage: chunk.usage.map(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::messages::{
        openai,
        unified::{
            UnifiedChoiceDelta, UnifiedChunk, UnifiedDelta, UnifiedFinishReason, UnifiedRole, UnifiedToolCallDelta,
        },
    };

    #[test]
    fn chunk_serializes_in_openai_wire_format() {
        let chunk = UnifiedChunk {
            id: "chatcmpl-1".into(),
            created: 1,
            model: "glm-4.5".into(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta: UnifiedDelta {
                    role: Some(UnifiedRole::Assistant),
                    content: Some("hi".into()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };

        let wire = openai::ChatCompletionChunk::from(chunk);
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(json["choices"][0]["delta"]["content"], "hi");
    }

    #[test]
    fn tool_fragments_keep_index_id_and_name() {
        let chunk = UnifiedChunk {
            id: "chatcmpl-1".into(),
            created: 1,
            model: "glm-4.5".into(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta: UnifiedDelta {
                    tool_calls: Some(vec![UnifiedToolCallDelta {
                        index: 0,
                        id: Some("call_1".into()),
                        name: Some("get_weather".into()),
                        arguments: "{\"loca".into(),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };

        let json = serde_json::to_value(openai::ChatCompletionChunk::from(chunk)).unwrap();
        let call = &json["choices"][0]["delta"]["tool_calls"][0];

        assert_eq!(call["id"], "call_1");
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "get_weather");
        assert_eq!(call["function"]["arguments"], "{\"loca");
    }

    #[test]
    fn terminal_chunk_carries_finish_reason() {
        let chunk = UnifiedChunk {
            id: "chatcmpl-1".into(),
            created: 1,
            model: "glm-4.5".into(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta: UnifiedDelta::default(),
                finish_reason: Some(UnifiedFinishReason::ToolCalls),
            }],
            usage: None,
        };

        let json = serde_json::to_value(openai::ChatCompletionChunk::from(chunk)).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "tool_calls");
    }
}
