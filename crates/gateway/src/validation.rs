//! Schema checks on inbound bodies beyond what deserialization enforces.
//!
//! All violations are collected and returned in one response so clients can
//! fix everything at once.

use crate::{
    error::{FieldViolation, GatewayError},
    messages::{gemini, openai},
};

pub(crate) fn validate_generate_request(request: &gemini::GenerateContentRequest) -> crate::Result<()> {
    let mut violations = Vec::new();

    for (index, content) in request.contents.iter().enumerate() {
        if content.parts.is_empty() {
            violations.push(FieldViolation::new(
                format!("contents[{index}].parts"),
                "must contain at least one part",
            ));
        }
    }

    if let Some(config) = &request.generation_config {
        check_range(&mut violations, "generationConfig.temperature", config.temperature, 0.0, 2.0);
        check_range(&mut violations, "generationConfig.topP", config.top_p, 0.0, 1.0);

        if config.max_output_tokens == Some(0) {
            violations.push(FieldViolation::new(
                "generationConfig.maxOutputTokens",
                "must be greater than zero",
            ));
        }

        if let Some(count) = config.candidate_count {
            if count != 1 {
                violations.push(FieldViolation::new(
                    "generationConfig.candidateCount",
                    "only a single candidate is supported",
                ));
            }
        }
    }

    if let Some(tools) = &request.tools {
        for (tool_index, tool) in tools.iter().enumerate() {
            for (decl_index, declaration) in tool
                .function_declarations
                .as_deref()
                .unwrap_or_default()
                .iter()
                .enumerate()
            {
                if declaration.name.is_empty() {
                    violations.push(FieldViolation::new(
                        format!("tools[{tool_index}].functionDeclarations[{decl_index}].name"),
                        "must not be empty",
                    ));
                }
            }
        }
    }

    finish(violations)
}

pub(crate) fn validate_chat_request(request: &openai::ChatCompletionRequest) -> crate::Result<()> {
    let mut violations = Vec::new();

    if request.model.is_empty() {
        violations.push(FieldViolation::new("model", "must not be empty"));
    }

    check_range(&mut violations, "temperature", request.temperature, 0.0, 2.0);
    check_range(&mut violations, "top_p", request.top_p, 0.0, 1.0);

    if request.max_tokens == Some(0) {
        violations.push(FieldViolation::new("max_tokens", "must be greater than zero"));
    }

    for (index, message) in request.messages.iter().enumerate() {
        if let openai::ChatRole::Tool = message.role {
            if message.tool_call_id.is_none() {
                violations.push(FieldViolation::new(
                    format!("messages[{index}].tool_call_id"),
                    "required on tool messages",
                ));
            }
        }
    }

    if let Some(tools) = &request.tools {
        for (index, tool) in tools.iter().enumerate() {
            if tool.function.name.is_empty() {
                violations.push(FieldViolation::new(
                    format!("tools[{index}].function.name"),
                    "must not be empty",
                ));
            }
        }
    }

    finish(violations)
}

fn check_range(violations: &mut Vec<FieldViolation>, path: &str, value: Option<f32>, min: f32, max: f32) {
    if let Some(value) = value {
        if !(min..=max).contains(&value) {
            violations.push(FieldViolation::new(
                path,
                format!("must be between {min} and {max}"),
            ));
        }
    }
}

fn finish(violations: Vec<FieldViolation>) -> crate::Result<()> {
    if violations.is_empty() {
        return Ok(());
    }

    Err(GatewayError::Validation {
        message: format!("{} validation error(s)", violations.len()),
        details: violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    #[test]
    fn all_violations_are_reported_together() {
        let request: gemini::GenerateContentRequest = serde_json::from_str(
            r#"{
                "contents": [{"role":"user","parts":[]}],
                "generationConfig": {"temperature": 3.5, "candidateCount": 2}
            }"#,
        )
        .unwrap();

        let error = validate_generate_request(&request).unwrap_err();

        let GatewayError::Validation { details, .. } = error else {
            panic!("expected validation error");
        };

        let paths: Vec<&str> = details.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "contents[0].parts",
                "generationConfig.temperature",
                "generationConfig.candidateCount"
            ]
        );
    }

    #[test]
    fn valid_request_passes() {
        let request: gemini::GenerateContentRequest =
            serde_json::from_str(r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#).unwrap();

        assert!(validate_generate_request(&request).is_ok());
    }

    #[test]
    fn chat_request_checks_tool_message_correlation() {
        let request: openai::ChatCompletionRequest = serde_json::from_str(
            r#"{
                "model": "glm-4.5",
                "messages": [{"role":"tool","content":"result"}]
            }"#,
        )
        .unwrap();

        let error = validate_chat_request(&request).unwrap_err();
        let GatewayError::Validation { details, .. } = error else {
            panic!("expected validation error");
        };

        assert_eq!(details[0].path, "messages[0].tool_call_id");
    }
}
