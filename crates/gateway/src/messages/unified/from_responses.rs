//! Conversion from the OpenAI responses dialect to unified types.

use crate::{
    messages::{
        responses::{self, InputItem, ResponsesInput},
        unified,
    },
    transcript::{IdNamespace, normalize_tool_call_id},
};

impl From<responses::ResponsesRequest> for unified::UnifiedRequest {
    fn from(req: responses::ResponsesRequest) -> Self {
        let mut messages: Vec<unified::UnifiedMessage> = Vec::new();

        // Legacy chat-style transcript takes effect when present; otherwise
        // the input item sequence is flattened.
        if let Some(chat_messages) = req.messages {
            messages.extend(chat_messages.into_iter().map(unified::UnifiedMessage::from));
        } else if let Some(input) = req.input {
            match input {
                ResponsesInput::Text(text) => messages.push(unified::UnifiedMessage::user(text)),
                ResponsesInput::Items(items) => {
                    for item in items {
                        convert_item(item, &mut messages);
                    }
                }
            }
        }

        let tools = req.tools.map(|tools| {
            tools
                .into_iter()
                .filter(|tool| {
                    let supported = tool.tool_type == "function";
                    if !supported {
                        log::debug!("Dropping unsupported tool type '{}'", tool.tool_type);
                    }
                    supported
                })
                .map(|tool| unified::UnifiedTool {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool
                        .parameters
                        .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                })
                .collect()
        });

        Self {
            model: req.model.unwrap_or_default(),
            messages,
            system: req.instructions,
            max_tokens: req.max_output_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: None,
            stream: req.stream,
            tools,
            tool_choice: None,
            user: req.user,
            extra: req.extra,
        }
    }
}

fn convert_item(item: InputItem, messages: &mut Vec<unified::UnifiedMessage>) {
    match item {
        InputItem::InputText { text } => messages.push(unified::UnifiedMessage::user(text)),
        InputItem::Message { role, content } => {
            let mut message = unified::UnifiedMessage {
                role: unified::UnifiedRole::from(role),
                content: Some(content.into_text()),
                reasoning_content: None,
                tool_calls: None,
                tool_call_id: None,
            };

            // Consecutive assistant items merge later during pairing; here we
            // only normalize empty text away.
            if message.content.as_deref() == Some("") {
                message.content = None;
            }

            messages.push(message);
        }
        InputItem::FunctionCall {
            call_id,
            id,
            name,
            arguments,
        } => {
            let call_id = call_id
                .or(id)
                .map(|id| normalize_tool_call_id(&id, IdNamespace::OpenAi))
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

            messages.push(unified::UnifiedMessage::assistant(
                None,
                Some(vec![unified::UnifiedToolCall {
                    id: call_id,
                    name,
                    arguments,
                }]),
            ));
        }
        InputItem::FunctionCallOutput { call_id, output } => {
            let call_id = normalize_tool_call_id(&call_id, IdNamespace::OpenAi);
            messages.push(unified::UnifiedMessage::tool(call_id, output));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::messages::{responses::ResponsesRequest, unified::UnifiedRequest, unified::UnifiedRole};

    fn convert(json: &str) -> UnifiedRequest {
        let request: ResponsesRequest = serde_json::from_str(json).unwrap();
        UnifiedRequest::from(request)
    }

    #[test]
    fn instructions_become_the_system_field() {
        let unified = convert(r#"{"instructions":"be terse","input":[{"type":"input_text","text":"hi"}]}"#);

        assert_eq!(unified.system.as_deref(), Some("be terse"));
        assert_eq!(unified.messages.len(), 1);
        assert_eq!(unified.messages[0].content.as_deref(), Some("hi"));
    }

    #[test]
    fn function_call_items_reconstruct_the_tool_exchange() {
        let unified = convert(
            r#"{
                "input": [
                    {"type":"input_text","text":"list files"},
                    {"type":"function_call","call_id":"fc-1","name":"shell","arguments":"{\"cmd\":\"ls\"}"},
                    {"type":"function_call_output","call_id":"fc-1","output":"main.rs"}
                ]
            }"#,
        );

        assert_eq!(unified.messages.len(), 3);
        assert_eq!(unified.messages[1].role, UnifiedRole::Assistant);

        let call = &unified.messages[1].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "call_fc-1");
        assert_eq!(call.name, "shell");

        assert_eq!(unified.messages[2].role, UnifiedRole::Tool);
        assert_eq!(unified.messages[2].tool_call_id.as_deref(), Some("call_fc-1"));
    }

    #[test]
    fn bare_string_input_becomes_one_user_turn() {
        let unified = convert(r#"{"input":"hello"}"#);
        assert_eq!(unified.messages.len(), 1);
        assert_eq!(unified.messages[0].role, UnifiedRole::User);
    }

    #[test]
    fn chat_messages_take_priority_over_input() {
        let unified = convert(
            r#"{
                "messages": [{"role":"user","content":"from messages"}],
                "input": "from input"
            }"#,
        );

        assert_eq!(unified.messages.len(), 1);
        assert_eq!(unified.messages[0].content.as_deref(), Some("from messages"));
    }
}
