//! Conversions from OpenAI chat protocol types to unified types.
//!
//! All data is moved, not cloned.

use crate::messages::{openai, unified};

impl From<openai::ChatCompletionRequest> for unified::UnifiedRequest {
    fn from(req: openai::ChatCompletionRequest) -> Self {
        Self {
            model: req.model,
            messages: req.messages.into_iter().map(unified::UnifiedMessage::from).collect(),
            system: None,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop,
            stream: req.stream,
            tools: req
                .tools
                .map(|tools| tools.into_iter().map(unified::UnifiedTool::from).collect()),
            tool_choice: req.tool_choice.map(unified::UnifiedToolChoice::from),
            user: req.user,
            extra: req.extra,
        }
    }
}

impl From<openai::ChatRole> for unified::UnifiedRole {
    fn from(role: openai::ChatRole) -> Self {
        match role {
            openai::ChatRole::System => unified::UnifiedRole::System,
            openai::ChatRole::User => unified::UnifiedRole::User,
            openai::ChatRole::Assistant => unified::UnifiedRole::Assistant,
            openai::ChatRole::Tool => unified::UnifiedRole::Tool,
            openai::ChatRole::Other(role) => {
                log::warn!("Unknown chat role '{role}', treating as user");
                unified::UnifiedRole::User
            }
        }
    }
}

impl From<openai::ChatMessage> for unified::UnifiedMessage {
    fn from(msg: openai::ChatMessage) -> Self {
        Self {
            role: unified::UnifiedRole::from(msg.role),
            content: msg.content,
            reasoning_content: msg.reasoning_content,
            tool_calls: msg
                .tool_calls
                .map(|calls| calls.into_iter().map(unified::UnifiedToolCall::from).collect()),
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<openai::ToolCall> for unified::UnifiedToolCall {
    fn from(call: openai::ToolCall) -> Self {
        Self {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        }
    }
}

impl From<openai::Tool> for unified::UnifiedTool {
    fn from(tool: openai::Tool) -> Self {
        Self {
            name: tool.function.name,
            description: tool.function.description,
            parameters: tool.function.parameters,
        }
    }
}

impl From<openai::ToolChoiceMode> for unified::UnifiedToolChoiceMode {
    fn from(mode: openai::ToolChoiceMode) -> Self {
        match mode {
            openai::ToolChoiceMode::None => unified::UnifiedToolChoiceMode::None,
            openai::ToolChoiceMode::Auto => unified::UnifiedToolChoiceMode::Auto,
            openai::ToolChoiceMode::Required => unified::UnifiedToolChoiceMode::Required,
            openai::ToolChoiceMode::Other(_) => unified::UnifiedToolChoiceMode::Auto,
        }
    }
}

impl From<openai::ToolChoice> for unified::UnifiedToolChoice {
    fn from(choice: openai::ToolChoice) -> Self {
        match choice {
            openai::ToolChoice::Mode(mode) => unified::UnifiedToolChoice::Mode(mode.into()),
            openai::ToolChoice::Specific { function, .. } => {
                unified::UnifiedToolChoice::Specific { name: function.name }
            }
        }
    }
}

impl From<openai::FinishReason> for unified::UnifiedFinishReason {
    fn from(reason: openai::FinishReason) -> Self {
        match reason {
            openai::FinishReason::Stop => unified::UnifiedFinishReason::Stop,
            openai::FinishReason::Length => unified::UnifiedFinishReason::Length,
            openai::FinishReason::ContentFilter => unified::UnifiedFinishReason::ContentFilter,
            openai::FinishReason::ToolCalls => unified::UnifiedFinishReason::ToolCalls,
            openai::FinishReason::Other(_) => unified::UnifiedFinishReason::Stop,
        }
    }
}

impl From<openai::ChatCompletionResponse> for unified::UnifiedResponse {
    fn from(resp: openai::ChatCompletionResponse) -> Self {
        Self {
            id: resp.id,
            created: resp.created,
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| unified::UnifiedChoice {
                    index: choice.index,
                    message: unified::UnifiedMessage::from(choice.message),
                    finish_reason: choice.finish_reason.map(Into::into),
                })
                .collect(),
            usage: resp.usage.map(|u| unified::UnifiedUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedRole, UnifiedToolChoice, UnifiedToolChoiceMode};

    #[test]
    fn request_with_tools_converts_losslessly() {
        let request: openai::ChatCompletionRequest = serde_json::from_str(
            r#"{
                "model": "glm-4.5",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "weather?"}
                ],
                "tools": [{
                    "type": "function",
                    "function": {
                        "name": "get_weather",
                        "description": "Get the weather",
                        "parameters": {"type": "object"}
                    }
                }],
                "tool_choice": "auto",
                "stop": ["END"]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedRequest::from(request);

        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[0].role, UnifiedRole::System);
        assert_eq!(unified.tools.as_ref().unwrap()[0].name, "get_weather");
        assert_eq!(
            unified.tool_choice,
            Some(UnifiedToolChoice::Mode(UnifiedToolChoiceMode::Auto))
        );
        assert_eq!(unified.stop_sequences.as_deref(), Some(&["END".to_string()][..]));
    }

    #[test]
    fn assistant_tool_calls_flatten_into_unified_shape() {
        let message: openai::ChatMessage = serde_json::from_str(
            r#"{
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "x", "arguments": "{\"a\":1}"}
                }]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedMessage::from(message);
        let calls = unified.tool_calls.unwrap();

        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "x");
        assert_eq!(calls[0].arguments, r#"{"a":1}"#);
    }
}
