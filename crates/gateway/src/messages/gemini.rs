//! Gemini dialect wire types, as spoken by the Gemini CLI family.
//!
//! The surface is `POST /gemini/models/{model}:generateContent` (and the
//! `:streamGenerateContent` / `:countTokens` siblings). Streaming responses
//! reuse the non-streaming response shape: each SSE event carries a complete
//! `GenerateContentResponse` holding one incremental slice.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `generateContent` and `streamGenerateContent`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateContentRequest {
    /// The conversation so far, latest turn last.
    pub contents: Vec<Content>,
    /// Tools the model may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,
    /// Function-calling policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    /// System prompt, either a full content or a bare `{text}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    /// Generation knobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// The CLI sends `systemInstruction` in two shapes depending on version.
///
/// `Text` must stay the first variant: `Content` tolerates unknown fields, so
/// the untagged match would otherwise swallow the bare `{text}` shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemInstruction {
    Text { text: String },
    Content(Content),
}

impl SystemInstruction {
    /// Flatten either shape into plain text.
    pub fn into_text(self) -> String {
        match self {
            SystemInstruction::Text { text } => text,
            SystemInstruction::Content(content) => content.joined_text("\n"),
        }
    }
}

/// One conversational turn.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Content {
    /// "user" or "model"; absent on some systemInstruction payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<GeminiRole>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Concatenate the text parts with the given separator.
    pub fn joined_text(&self, separator: &str) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeminiRole {
    User,
    Model,
}

/// One part of a content turn, discriminated by field presence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Part {
    /// Plain text. `thought: true` marks model reasoning slices.
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
    /// A function invocation emitted by the model.
    FunctionCall { function_call: FunctionCall },
    /// The client's answer to a function invocation.
    FunctionResponse { function_response: FunctionResponse },
    /// Base64-encoded media.
    InlineData { inline_data: Blob },
    /// Media referenced by URI.
    FileData { file_data: FileData },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Correlation id; the wire format allows omitting it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Arguments object. When the gateway streams partial fragments this is
    /// a JSON string the client concatenates.
    pub args: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub file_uri: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_declarations: Option<Vec<FunctionDeclaration>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calling_config: Option<FunctionCallingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    pub mode: FunctionCallingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionCallingMode {
    None,
    Auto,
    Any,
}

/// Generation knobs. Unknown keys ride in `extra` and are merged verbatim
/// into the upstream body; recognized fields take priority.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Response body shared by `generateContent` and every streaming event.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<GeminiFinishReason>,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeminiFinishReason {
    Stop,
    MaxTokens,
    Safety,
    ToolCalls,
    Other,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: u32,
    pub candidates_token_count: u32,
    pub total_token_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts_token_count: Option<u32>,
}

/// Request body for `countTokens`; accepts either bare contents or a wrapped
/// generate request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CountTokensRequest {
    pub contents: Vec<Content>,
    pub generate_content_request: Option<Box<GenerateContentRequest>>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountTokensResponse {
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_deserialize_by_field_presence() {
        let json = r#"[
            {"text":"hi"},
            {"functionCall":{"name":"get_weather","args":{"location":"Paris"}}},
            {"functionResponse":{"name":"get_weather","response":{"temp":21}}},
            {"inlineData":{"mimeType":"image/png","data":"aGk="}},
            {"fileData":{"fileUri":"gs://bucket/img.png"}}
        ]"#;

        let parts: Vec<Part> = serde_json::from_str(json).unwrap();

        assert!(matches!(parts[0], Part::Text { .. }));
        assert!(matches!(parts[1], Part::FunctionCall { .. }));
        assert!(matches!(parts[2], Part::FunctionResponse { .. }));
        assert!(matches!(parts[3], Part::InlineData { .. }));
        assert!(matches!(parts[4], Part::FileData { .. }));
    }

    #[test]
    fn system_instruction_accepts_both_shapes() {
        let wrapped: SystemInstruction =
            serde_json::from_str(r#"{"parts":[{"text":"be"},{"text":"terse"}]}"#).unwrap();
        assert_eq!(wrapped.into_text(), "be\nterse");

        let bare: SystemInstruction = serde_json::from_str(r#"{"text":"be terse"}"#).unwrap();
        assert_eq!(bare.into_text(), "be terse");
    }

    #[test]
    fn finish_reasons_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&GeminiFinishReason::ToolCalls).unwrap(),
            r#""TOOL_CALLS""#
        );
        assert_eq!(
            serde_json::to_string(&GeminiFinishReason::MaxTokens).unwrap(),
            r#""MAX_TOKENS""#
        );
    }

    #[test]
    fn generation_config_keeps_unknown_keys() {
        let config: GenerationConfig =
            serde_json::from_str(r#"{"temperature":0.2,"thinkingConfig":{"includeThoughts":true}}"#).unwrap();

        assert_eq!(config.temperature, Some(0.2));
        assert!(config.extra.contains_key("thinkingConfig"));
    }
}
