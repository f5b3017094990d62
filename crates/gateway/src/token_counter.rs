//! Local token accounting.
//!
//! Upstream usage reports win when they are complete; anything missing is
//! filled from a local tiktoken count so clients always receive a full
//! usage triple. Encoders are cached per model name; the heuristic fallback
//! of one token per four bytes keeps counting deterministic when the
//! encoding library cannot help.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use tiktoken_rs::CoreBPE;

use crate::messages::unified::{UnifiedMessage, UnifiedUsage};

/// A usage report where any field may be missing, as streamed by providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PartialUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl PartialUsage {
    pub fn is_complete(&self) -> bool {
        self.prompt_tokens.is_some() && self.completion_tokens.is_some() && self.total_tokens.is_some()
    }

    /// Merge a newer report into this one, field-wise last-write-wins.
    pub fn merge(&mut self, newer: PartialUsage) {
        if newer.prompt_tokens.is_some() {
            self.prompt_tokens = newer.prompt_tokens;
        }
        if newer.completion_tokens.is_some() {
            self.completion_tokens = newer.completion_tokens;
        }
        if newer.total_tokens.is_some() {
            self.total_tokens = newer.total_tokens;
        }
    }
}

fn encoder_cache() -> &'static Mutex<HashMap<String, Arc<CoreBPE>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<CoreBPE>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn encoder_for(model: &str) -> Option<Arc<CoreBPE>> {
    if let Some(encoder) = encoder_cache().lock().ok()?.get(model) {
        return Some(encoder.clone());
    }

    // Unknown models fall back to the standard encoding.
    let encoder = tiktoken_rs::get_bpe_from_model(model)
        .or_else(|_| tiktoken_rs::o200k_base())
        .ok()?;

    let encoder = Arc::new(encoder);
    encoder_cache()
        .lock()
        .ok()?
        .insert(model.to_string(), encoder.clone());

    Some(encoder)
}

/// Release all cached encoders. Called on shutdown.
pub fn clear_encoder_cache() {
    if let Ok(mut cache) = encoder_cache().lock() {
        cache.clear();
    }
}

/// Deterministic last-resort estimate: one token per four bytes, rounded up.
fn heuristic_count(text: &str) -> u32 {
    text.len().div_ceil(4) as u32
}

/// BPE token count of `text` under `model`'s native encoding.
pub(crate) fn count(text: &str, model: &str) -> u32 {
    match encoder_for(model) {
        Some(encoder) => encoder.encode_with_special_tokens(text).len() as u32,
        None => heuristic_count(text),
    }
}

/// Token count of a whole transcript: every text fragment of every message.
/// Non-text payloads contribute nothing.
pub(crate) fn count_request(messages: &[UnifiedMessage], model: &str) -> u32 {
    messages
        .iter()
        .filter_map(|message| message.content.as_deref())
        .map(|text| count(text, model))
        .sum()
}

/// Merge an upstream usage report with local counts.
///
/// A complete upstream report passes through untouched. Otherwise missing
/// fields are filled locally and the total recomputed as
/// prompt + completion + thoughts.
pub(crate) fn combine_usage(
    api_usage: Option<PartialUsage>,
    prompt_texts: &[&str],
    completion_texts: &[&str],
    reasoning_texts: &[&str],
    model: &str,
) -> UnifiedUsage {
    let api_usage = api_usage.unwrap_or_default();

    if api_usage.is_complete() {
        return UnifiedUsage {
            prompt_tokens: api_usage.prompt_tokens.unwrap_or_default(),
            completion_tokens: api_usage.completion_tokens.unwrap_or_default(),
            total_tokens: api_usage.total_tokens.unwrap_or_default(),
        };
    }

    let count_all = |texts: &[&str]| texts.iter().map(|text| count(text, model)).sum::<u32>();

    let prompt_tokens = api_usage.prompt_tokens.unwrap_or_else(|| count_all(prompt_texts));
    let completion_tokens = api_usage
        .completion_tokens
        .unwrap_or_else(|| count_all(completion_texts));
    let thought_tokens = count_all(reasoning_texts);

    UnifiedUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens + thought_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "gpt-4o";

    #[test]
    fn counting_is_idempotent() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(count(text, MODEL), count(text, MODEL));
    }

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(count("", MODEL), 0);
    }

    #[test]
    fn request_count_is_the_sum_of_message_counts() {
        let messages = vec![UnifiedMessage::user("hello world"), UnifiedMessage::user("goodbye")];

        let expected = count("hello world", MODEL) + count("goodbye", MODEL);
        assert_eq!(count_request(&messages, MODEL), expected);
    }

    #[test]
    fn messages_without_text_contribute_nothing() {
        let messages = vec![UnifiedMessage::assistant(None, None)];
        assert_eq!(count_request(&messages, MODEL), 0);
    }

    #[test]
    fn heuristic_rounds_up_per_four_bytes() {
        assert_eq!(heuristic_count(""), 0);
        assert_eq!(heuristic_count("abc"), 1);
        assert_eq!(heuristic_count("abcd"), 1);
        assert_eq!(heuristic_count("abcde"), 2);
    }

    #[test]
    fn complete_upstream_usage_passes_through() {
        let usage = combine_usage(
            Some(PartialUsage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                total_tokens: Some(15),
            }),
            &["this is ignored"],
            &[],
            &[],
            MODEL,
        );

        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn missing_fields_are_filled_locally() {
        let usage = combine_usage(
            Some(PartialUsage {
                prompt_tokens: Some(10),
                completion_tokens: None,
                total_tokens: None,
            }),
            &[],
            &["hello world"],
            &[],
            MODEL,
        );

        let local_completion = count("hello world", MODEL);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, local_completion);
        assert_eq!(usage.total_tokens, 10 + local_completion);
    }

    #[test]
    fn thoughts_are_included_in_the_total() {
        let usage = combine_usage(None, &["prompt"], &["answer"], &["reasoning"], MODEL);

        let expected_total = count("prompt", MODEL) + count("answer", MODEL) + count("reasoning", MODEL);
        assert_eq!(usage.total_tokens, expected_total);
    }

    #[test]
    fn partial_usage_merge_is_field_wise() {
        let mut usage = PartialUsage {
            prompt_tokens: Some(3),
            completion_tokens: None,
            total_tokens: None,
        };

        usage.merge(PartialUsage {
            prompt_tokens: None,
            completion_tokens: Some(1),
            total_tokens: None,
        });

        assert_eq!(usage.prompt_tokens, Some(3));
        assert_eq!(usage.completion_tokens, Some(1));
        assert!(!usage.is_complete());
    }
}
