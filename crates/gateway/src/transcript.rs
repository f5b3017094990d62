//! Transcript cleanup: tool-call pairing, assistant merging, and id
//! normalization.
//!
//! Providers reject transcripts with unanswered tool invocations or orphan
//! tool results, so before dispatch every transcript is rewritten to a shape
//! all of them accept:
//!
//! - consecutive assistant messages are merged, their tool calls unioned;
//! - tool messages without a matching open invocation are dropped;
//! - assistant tool calls that never received a result are removed, keeping
//!   any text content of the same message;
//! - a transcript that does not start (after system messages) with a user
//!   turn gets a synthetic user "Continue" prepended.

use std::collections::HashSet;

use crate::messages::unified::{UnifiedMessage, UnifiedRole};

/// Tool-call id namespace of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdNamespace {
    /// `call_*`, OpenAI chat.
    OpenAi,
    /// `toolu_*`, Anthropic messages.
    Anthropic,
}

impl IdNamespace {
    fn prefix(self) -> &'static str {
        match self {
            IdNamespace::OpenAi => "call_",
            IdNamespace::Anthropic => "toolu_",
        }
    }
}

const KNOWN_PREFIXES: &[&str] = &["call_", "toolu_"];

/// Rewrite a tool-call id into the target namespace.
///
/// Known prefixes are swapped, foreign ids are prefixed keeping the suffix.
/// The mapping is bijective between namespaces for well-formed ids.
pub(crate) fn normalize_tool_call_id(id: &str, namespace: IdNamespace) -> String {
    let target = namespace.prefix();

    if id.starts_with(target) {
        return id.to_string();
    }

    let suffix = KNOWN_PREFIXES
        .iter()
        .find_map(|prefix| id.strip_prefix(prefix))
        .unwrap_or(id);

    format!("{target}{suffix}")
}

/// Synthetic user text used to satisfy providers that insist the first
/// non-system turn is user-role.
pub(crate) const CONTINUE_PROMPT: &str = "Continue";

/// Prepend a synthetic user turn when the transcript does not lead with one.
pub(crate) fn ensure_leading_user(messages: &mut Vec<UnifiedMessage>) {
    let first_non_system = messages.iter().position(|m| m.role != UnifiedRole::System);

    match first_non_system {
        Some(index) if messages[index].role == UnifiedRole::User => {}
        Some(index) => messages.insert(index, UnifiedMessage::user(CONTINUE_PROMPT)),
        None => messages.push(UnifiedMessage::user(CONTINUE_PROMPT)),
    }
}

/// Enforce tool-call pairing and assistant merging over a transcript.
pub(crate) fn clean_transcript(messages: Vec<UnifiedMessage>) -> Vec<UnifiedMessage> {
    let mut cleaned: Vec<UnifiedMessage> = Vec::with_capacity(messages.len());
    let mut open: HashSet<String> = HashSet::new();
    let mut answered: HashSet<String> = HashSet::new();

    for message in messages {
        match message.role {
            UnifiedRole::Assistant => {
                for call in message.tool_calls.as_deref().unwrap_or_default() {
                    open.insert(call.id.clone());
                }

                match cleaned.last_mut() {
                    Some(previous) if previous.role == UnifiedRole::Assistant => {
                        merge_assistant(previous, message);
                    }
                    _ => cleaned.push(message),
                }
            }
            UnifiedRole::Tool => {
                let matches_open = message.tool_call_id.as_deref().is_some_and(|id| open.contains(id));

                if matches_open {
                    if let Some(id) = &message.tool_call_id {
                        open.remove(id);
                        answered.insert(id.clone());
                    }
                    cleaned.push(message);
                } else {
                    log::debug!(
                        "Dropping orphan tool result for id {:?}",
                        message.tool_call_id.as_deref().unwrap_or("<missing>")
                    );
                }
            }
            UnifiedRole::System | UnifiedRole::User => cleaned.push(message),
        }
    }

    // Second pass: strip invocations that never got an answer.
    cleaned.retain_mut(|message| {
        if message.role != UnifiedRole::Assistant {
            return true;
        }

        if let Some(calls) = &mut message.tool_calls {
            let before = calls.len();
            calls.retain(|call| answered.contains(&call.id));

            if calls.len() < before {
                log::debug!("Dropped {} unanswered tool call(s)", before - calls.len());
            }

            if calls.is_empty() {
                message.tool_calls = None;
            }
        }

        !message.is_empty()
    });

    cleaned
}

fn merge_assistant(target: &mut UnifiedMessage, source: UnifiedMessage) {
    match (&mut target.content, source.content) {
        (Some(existing), Some(addition)) => existing.push_str(&addition),
        (None, Some(addition)) => target.content = Some(addition),
        _ => {}
    }

    match (&mut target.reasoning_content, source.reasoning_content) {
        (Some(existing), Some(addition)) => existing.push_str(&addition),
        (None, Some(addition)) => target.reasoning_content = Some(addition),
        _ => {}
    }

    if let Some(calls) = source.tool_calls {
        target.tool_calls.get_or_insert_with(Vec::new).extend(calls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::UnifiedToolCall;

    fn call(id: &str) -> UnifiedToolCall {
        UnifiedToolCall {
            id: id.to_string(),
            name: "x".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[test]
    fn id_normalization_is_bijective_between_namespaces() {
        let anthropic = normalize_tool_call_id("call_abc123", IdNamespace::Anthropic);
        assert_eq!(anthropic, "toolu_abc123");

        let back = normalize_tool_call_id(&anthropic, IdNamespace::OpenAi);
        assert_eq!(back, "call_abc123");
    }

    #[test]
    fn foreign_ids_get_the_target_prefix() {
        assert_eq!(normalize_tool_call_id("fc-99", IdNamespace::OpenAi), "call_fc-99");
        assert_eq!(normalize_tool_call_id("toolu_x", IdNamespace::Anthropic), "toolu_x");
    }

    #[test]
    fn consecutive_assistant_messages_merge_in_order() {
        let cleaned = clean_transcript(vec![
            UnifiedMessage::user("q"),
            UnifiedMessage::assistant(Some("A".into()), None),
            UnifiedMessage::assistant(Some("B".into()), None),
        ]);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[1].content.as_deref(), Some("AB"));
    }

    #[test]
    fn merged_assistants_union_tool_calls_preserving_order() {
        let cleaned = clean_transcript(vec![
            UnifiedMessage::user("q"),
            UnifiedMessage::assistant(None, Some(vec![call("call_1")])),
            UnifiedMessage::assistant(None, Some(vec![call("call_2")])),
            UnifiedMessage::tool("call_1", "r1"),
            UnifiedMessage::tool("call_2", "r2"),
        ]);

        assert_eq!(cleaned.len(), 4);
        let ids: Vec<&str> = cleaned[1]
            .tool_calls
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
    }

    #[test]
    fn orphan_tool_results_are_dropped() {
        let cleaned = clean_transcript(vec![
            UnifiedMessage::user("q"),
            UnifiedMessage::tool("call_ghost", "spooky"),
            UnifiedMessage::user("q2"),
        ]);

        assert_eq!(cleaned.len(), 2);
        assert!(cleaned.iter().all(|m| m.role != UnifiedRole::Tool));
    }

    #[test]
    fn unanswered_tool_call_is_dropped_and_text_retained() {
        let cleaned = clean_transcript(vec![
            UnifiedMessage::user("q"),
            UnifiedMessage::assistant(Some("thinking...".into()), Some(vec![call("call_1")])),
            UnifiedMessage::user("q2"),
        ]);

        assert_eq!(cleaned.len(), 3);
        assert_eq!(cleaned[1].content.as_deref(), Some("thinking..."));
        assert!(cleaned[1].tool_calls.is_none());
    }

    #[test]
    fn assistant_with_only_unanswered_calls_is_dropped_entirely() {
        let cleaned = clean_transcript(vec![
            UnifiedMessage::user("q"),
            UnifiedMessage::assistant(None, Some(vec![call("call_1")])),
            UnifiedMessage::user("q2"),
        ]);

        assert_eq!(cleaned.len(), 2);
        assert!(cleaned.iter().all(|m| m.role == UnifiedRole::User));
    }

    #[test]
    fn empty_transcript_gets_a_continue_turn() {
        let mut messages = Vec::new();
        ensure_leading_user(&mut messages);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, UnifiedRole::User);
        assert_eq!(messages[0].content.as_deref(), Some(CONTINUE_PROMPT));
    }

    #[test]
    fn transcript_starting_with_assistant_gets_a_continue_turn() {
        let mut messages = vec![
            UnifiedMessage::system("be terse"),
            UnifiedMessage::assistant(Some("hello".into()), None),
        ];
        ensure_leading_user(&mut messages);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, UnifiedRole::User);
        assert_eq!(messages[2].role, UnifiedRole::Assistant);
    }

    #[test]
    fn paired_calls_survive_cleaning() {
        let cleaned = clean_transcript(vec![
            UnifiedMessage::user("weather?"),
            UnifiedMessage::assistant(None, Some(vec![call("call_1")])),
            UnifiedMessage::tool("call_1", r#"{"temp":21}"#),
            UnifiedMessage::assistant(Some("21 degrees".into()), None),
        ]);

        assert_eq!(cleaned.len(), 4);
        assert_eq!(cleaned[1].tool_calls.as_ref().unwrap().len(), 1);
    }
}
