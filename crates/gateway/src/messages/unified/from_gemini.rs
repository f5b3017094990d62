//! Conversion from the Gemini dialect to unified types.
//!
//! Gemini function calls carry no stable ids on the wire; invocations and
//! their responses pair up by function name in emission order. Synthesized
//! ids keep that pairing intact through the canonical transcript.

use std::collections::{HashMap, VecDeque};

use crate::{
    messages::{
        gemini::{self, FunctionCallingMode, GeminiRole, Part},
        unified,
    },
    transcript::{IdNamespace, normalize_tool_call_id},
};

/// Build a unified request from an inbound Gemini body. The model comes from
/// the request path, not the body.
pub(crate) fn unified_request(model: String, request: gemini::GenerateContentRequest) -> unified::UnifiedRequest {
    let mut messages = Vec::new();

    if let Some(instruction) = request.system_instruction {
        let text = instruction.into_text();
        if !text.is_empty() {
            messages.push(unified::UnifiedMessage::system(text));
        }
    }

    // Open invocations by function name, oldest first.
    let mut pending: HashMap<String, VecDeque<String>> = HashMap::new();

    for content in request.contents {
        match content.role {
            Some(GeminiRole::Model) => convert_model_turn(content.parts, &mut messages, &mut pending),
            _ => convert_user_turn(content.parts, &mut messages, &mut pending),
        }
    }

    let generation = request.generation_config.unwrap_or_default();

    let tools = request
        .tools
        .map(|tools| {
            tools
                .into_iter()
                .flat_map(|tool| tool.function_declarations.unwrap_or_default())
                .map(|declaration| unified::UnifiedTool {
                    name: declaration.name,
                    description: declaration.description.unwrap_or_default(),
                    parameters: declaration
                        .parameters
                        .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                })
                .collect::<Vec<_>>()
        })
        .filter(|tools| !tools.is_empty());

    let tool_choice = request
        .tool_config
        .and_then(|config| config.function_calling_config)
        .map(|config| match config.mode {
            FunctionCallingMode::None => unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::None),
            FunctionCallingMode::Auto => unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Auto),
            FunctionCallingMode::Any => match config
                .allowed_function_names
                .and_then(|names| names.into_iter().next())
            {
                Some(name) => unified::UnifiedToolChoice::Specific { name },
                None => unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Required),
            },
        });

    unified::UnifiedRequest {
        model,
        messages,
        system: None,
        max_tokens: generation.max_output_tokens,
        temperature: generation.temperature,
        top_p: generation.top_p,
        stop_sequences: generation.stop_sequences,
        stream: None,
        tools,
        tool_choice,
        user: None,
        extra: generation.extra,
    }
}

fn convert_model_turn(
    parts: Vec<Part>,
    messages: &mut Vec<unified::UnifiedMessage>,
    pending: &mut HashMap<String, VecDeque<String>>,
) {
    let mut texts = Vec::new();
    let mut thoughts = Vec::new();
    let mut calls = Vec::new();

    for part in parts {
        match part {
            Part::Text { text, thought } => {
                if thought == Some(true) {
                    thoughts.push(text);
                } else {
                    texts.push(text);
                }
            }
            Part::FunctionCall { function_call } => {
                let id = function_call
                    .id
                    .as_deref()
                    .map(|id| normalize_tool_call_id(id, IdNamespace::OpenAi))
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

                pending
                    .entry(function_call.name.clone())
                    .or_default()
                    .push_back(id.clone());

                calls.push(unified::UnifiedToolCall {
                    id,
                    name: function_call.name,
                    arguments: serde_json::to_string(&function_call.args).unwrap_or_else(|_| "{}".to_string()),
                });
            }
            Part::FunctionResponse { .. } => {
                log::warn!("Dropping functionResponse part on a model turn");
            }
            Part::InlineData { .. } | Part::FileData { .. } => {
                log::debug!("Dropping media part on a model turn");
            }
        }
    }

    let message = unified::UnifiedMessage {
        role: unified::UnifiedRole::Assistant,
        content: if texts.is_empty() { None } else { Some(texts.join("\n")) },
        reasoning_content: if thoughts.is_empty() {
            None
        } else {
            Some(thoughts.join("\n"))
        },
        tool_calls: if calls.is_empty() { None } else { Some(calls) },
        tool_call_id: None,
    };

    if !message.is_empty() || message.reasoning_content.is_some() {
        messages.push(message);
    }
}

fn convert_user_turn(
    parts: Vec<Part>,
    messages: &mut Vec<unified::UnifiedMessage>,
    pending: &mut HashMap<String, VecDeque<String>>,
) {
    let mut texts = Vec::new();

    for part in parts {
        match part {
            Part::Text { text, .. } => texts.push(text),
            Part::FunctionResponse { function_response } => {
                let id = function_response
                    .id
                    .as_deref()
                    .map(|id| normalize_tool_call_id(id, IdNamespace::OpenAi))
                    .or_else(|| {
                        pending
                            .get_mut(&function_response.name)
                            .and_then(VecDeque::pop_front)
                    })
                    // Orphan results keep a fresh id; pairing drops them later.
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

                let content =
                    serde_json::to_string(&function_response.response).unwrap_or_else(|_| "{}".to_string());

                messages.push(unified::UnifiedMessage::tool(id, content));
            }
            Part::FunctionCall { .. } => {
                log::warn!("Dropping functionCall part on a user turn");
            }
            Part::InlineData { inline_data } => {
                log::debug!("Dropping inlineData part ({}) on a user turn", inline_data.mime_type);
            }
            Part::FileData { file_data } => {
                log::debug!("Dropping fileData part ({}) on a user turn", file_data.file_uri);
            }
        }
    }

    if !texts.is_empty() {
        messages.push(unified::UnifiedMessage::user(texts.join("\n")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::UnifiedRole;

    fn parse_request(json: &str) -> gemini::GenerateContentRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn simple_text_request_converts() {
        let request = parse_request(r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#);
        let unified = unified_request("gemini-2.5-pro".into(), request);

        assert_eq!(unified.model, "gemini-2.5-pro");
        assert_eq!(unified.messages.len(), 1);
        assert_eq!(unified.messages[0].role, UnifiedRole::User);
        assert_eq!(unified.messages[0].content.as_deref(), Some("hi"));
    }

    #[test]
    fn system_instruction_becomes_a_system_message() {
        let request = parse_request(
            r#"{
                "systemInstruction": {"parts":[{"text":"be terse"}]},
                "contents": [{"role":"user","parts":[{"text":"hi"}]}]
            }"#,
        );

        let unified = unified_request("m".into(), request);
        assert_eq!(unified.messages[0].role, UnifiedRole::System);
        assert_eq!(unified.messages[0].content.as_deref(), Some("be terse"));
    }

    #[test]
    fn function_call_and_response_pair_by_name_order() {
        let request = parse_request(
            r#"{
                "contents": [
                    {"role":"user","parts":[{"text":"weather?"}]},
                    {"role":"model","parts":[{"functionCall":{"name":"get_weather","args":{"location":"Paris"}}}]},
                    {"role":"user","parts":[{"functionResponse":{"name":"get_weather","response":{"temp":21}}}]}
                ]
            }"#,
        );

        let unified = unified_request("m".into(), request);

        let call_id = unified.messages[1].tool_calls.as_ref().unwrap()[0].id.clone();
        assert!(call_id.starts_with("call_"));
        assert_eq!(unified.messages[2].role, UnifiedRole::Tool);
        assert_eq!(unified.messages[2].tool_call_id.as_deref(), Some(call_id.as_str()));
    }

    #[test]
    fn thought_parts_become_reasoning_content() {
        let request = parse_request(
            r#"{
                "contents": [
                    {"role":"model","parts":[{"text":"mull it over","thought":true},{"text":"answer"}]}
                ]
            }"#,
        );

        let unified = unified_request("m".into(), request);
        assert_eq!(unified.messages[0].reasoning_content.as_deref(), Some("mull it over"));
        assert_eq!(unified.messages[0].content.as_deref(), Some("answer"));
    }

    #[test]
    fn media_parts_contribute_nothing() {
        let request = parse_request(
            r#"{
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text":"describe"},
                        {"inlineData":{"mimeType":"image/png","data":"aGk="}},
                        {"fileData":{"fileUri":"gs://bucket/x.png"}}
                    ]
                }]
            }"#,
        );

        let unified = unified_request("m".into(), request);
        assert_eq!(unified.messages.len(), 1);
        assert_eq!(unified.messages[0].content.as_deref(), Some("describe"));
    }

    #[test]
    fn generation_config_maps_onto_hints() {
        let request = parse_request(
            r#"{
                "contents": [{"role":"user","parts":[{"text":"hi"}]}],
                "generationConfig": {
                    "temperature": 0.3,
                    "topP": 0.9,
                    "maxOutputTokens": 2048,
                    "stopSequences": ["END"],
                    "seed": 7
                }
            }"#,
        );

        let unified = unified_request("m".into(), request);
        assert_eq!(unified.temperature, Some(0.3));
        assert_eq!(unified.top_p, Some(0.9));
        assert_eq!(unified.max_tokens, Some(2048));
        assert_eq!(unified.stop_sequences.as_deref(), Some(&["END".to_string()][..]));
        assert_eq!(unified.extra.get("seed"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn tool_config_any_with_allowed_name_forces_that_tool() {
        let request = parse_request(
            r#"{
                "contents": [{"role":"user","parts":[{"text":"hi"}]}],
                "tools": [{"functionDeclarations":[{"name":"get_weather"}]}],
                "toolConfig": {"functionCallingConfig":{"mode":"ANY","allowedFunctionNames":["get_weather"]}}
            }"#,
        );

        let unified = unified_request("m".into(), request);
        assert_eq!(
            unified.tool_choice,
            Some(unified::UnifiedToolChoice::Specific {
                name: "get_weather".into()
            })
        );

        // Declarations without parameters default to an object schema.
        assert_eq!(
            unified.tools.as_ref().unwrap()[0].parameters,
            serde_json::json!({"type": "object"})
        );
    }
}
