//! Conversion from unified types to the OpenAI responses dialect.

use crate::messages::{
    responses::{OutputContent, OutputItem, ResponseDelta, ResponsesResponse, ResponsesUsage},
    unified,
};

/// Convert one canonical chunk into a `response.delta` payload. Role-only
/// and terminal chunks yield `None`; the completed event is built separately
/// from the aggregated response.
pub(crate) fn stream_delta(chunk: &unified::UnifiedChunk) -> Option<ResponseDelta> {
    let choice = chunk.choices.first()?;

    if let Some(text) = &choice.delta.content {
        return Some(ResponseDelta::text(text.clone()));
    }

    if let Some(reasoning) = &choice.delta.reasoning_content {
        return Some(ResponseDelta::reasoning(reasoning.clone()));
    }

    None
}

pub(crate) fn completed_response(response: unified::UnifiedResponse) -> ResponsesResponse {
    let usage = response.usage.map(|u| ResponsesUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let mut output = Vec::new();

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(reasoning) = choice.message.reasoning_content {
            if !reasoning.is_empty() {
                output.push(OutputItem::Reasoning {
                    summary: vec![OutputContent::SummaryText { text: reasoning }],
                });
            }
        }

        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                output.push(OutputItem::Message {
                    role: "assistant",
                    content: vec![OutputContent::OutputText { text }],
                });
            }
        }

        for call in choice.message.tool_calls.unwrap_or_default() {
            output.push(OutputItem::FunctionCall {
                call_id: call.id,
                name: call.name,
                arguments: call.arguments,
            });
        }
    }

    ResponsesResponse {
        id: format!("resp_{}", uuid::Uuid::new_v4().simple()),
        object: "response",
        created_at: response.created,
        model: response.model,
        status: "completed",
        output,
        usage,
    }
}
