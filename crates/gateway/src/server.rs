//! Provider dispatch: select the adapter, enforce retries, timeouts, and
//! cancellation, and run the streaming pipeline.

mod builder;

pub(crate) use builder::GatewayServerBuilder;

use std::{collections::VecDeque, pin::Pin, sync::Arc, time::Duration};

use config::AiProvider;
use futures::{Stream, StreamExt};
use rand::Rng;

use crate::{
    error::GatewayError,
    messages::unified::{UnifiedChunk, UnifiedRequest, UnifiedResponse},
    provider::{
        Provider, ProviderEventStream,
        claude::ClaudeProvider,
        codex::CodexProvider,
        openai::OpenAiProvider,
        streaming::StreamTransformer,
        with_cancellation,
    },
    request::RequestContext,
    transcript,
};

/// Stream of canonical chunks headed for the client.
pub(crate) type ChunkStream = Pin<Box<dyn Stream<Item = crate::Result<UnifiedChunk>> + Send>>;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub(crate) struct GatewayServer {
    shared: Arc<GatewayServerInner>,
}

pub(crate) struct GatewayServerInner {
    pub(super) default_provider: AiProvider,
    pub(super) openai: Option<OpenAiProvider>,
    pub(super) codex: Option<CodexProvider>,
    pub(super) claude: Option<ClaudeProvider>,
    pub(super) request_timeout: Duration,
}

impl GatewayServer {
    /// Select the adapter for a request: explicit override first, then the
    /// configured default. A selected but unconfigured provider is an error.
    pub fn resolve(&self, provider_override: Option<AiProvider>) -> crate::Result<&dyn Provider> {
        let selected = provider_override.unwrap_or(self.shared.default_provider);

        let provider: Option<&dyn Provider> = match selected {
            AiProvider::Openai => self.shared.openai.as_ref().map(|p| p as &dyn Provider),
            AiProvider::Codex => self.shared.codex.as_ref().map(|p| p as &dyn Provider),
            AiProvider::ClaudeCode => self.shared.claude.as_ref().map(|p| p as &dyn Provider),
        };

        provider.ok_or_else(|| GatewayError::ProviderDisabled(selected.as_str().to_string()))
    }

    /// Buffered completion with the full retry policy.
    pub async fn completions(
        &self,
        mut request: UnifiedRequest,
        context: &RequestContext,
        provider_override: Option<AiProvider>,
    ) -> crate::Result<UnifiedResponse> {
        let provider = self.resolve(provider_override)?;

        request.messages = transcript::clean_transcript(std::mem::take(&mut request.messages));
        transcript::ensure_leading_user(&mut request.messages);

        log::debug!(
            "[{}] Dispatching buffered completion to {}",
            context.request_id,
            provider.name()
        );

        let work = self.generate_with_retries(provider, request, context);

        tokio::select! {
            result = tokio::time::timeout(self.shared.request_timeout, work) => {
                result.map_err(|_| GatewayError::UpstreamTimeout)?
            }
            _ = context.cancel.cancelled() => Err(GatewayError::ClientDisconnect),
        }
    }

    /// Streaming completion. Retries only a connection failure before the
    /// first event, exactly once; never mid-stream.
    pub async fn completions_stream(
        &self,
        mut request: UnifiedRequest,
        context: &RequestContext,
        provider_override: Option<AiProvider>,
    ) -> crate::Result<ChunkStream> {
        let provider = self.resolve(provider_override)?;

        request.messages = transcript::clean_transcript(std::mem::take(&mut request.messages));
        transcript::ensure_leading_user(&mut request.messages);

        log::debug!(
            "[{}] Dispatching streaming completion to {}",
            context.request_id,
            provider.name()
        );

        let client_model = request.model.clone();
        let prompt_texts: Vec<String> = request
            .messages
            .iter()
            .filter_map(|m| m.content.clone())
            .collect();

        let events = match provider.generate_stream(request.clone(), context).await {
            Ok(stream) => stream,
            Err(GatewayError::ConnectionError(message)) => {
                log::debug!("Retrying streaming connect once after failure: {message}");
                provider.generate_stream(request.clone(), context).await?
            }
            Err(GatewayError::AuthenticationFailed(message)) => {
                if provider.refresh_auth().await {
                    provider.generate_stream(request, context).await?
                } else {
                    return Err(GatewayError::AuthenticationFailed(message));
                }
            }
            Err(error) => return Err(error),
        };

        let events = with_cancellation(events, context.upstream_token());
        let transformer = StreamTransformer::new(client_model, prompt_texts);

        Ok(chunk_stream(events, transformer))
    }

    /// Local token count for the Gemini `countTokens` surface; never calls
    /// upstream.
    pub fn count_tokens(&self, request: &UnifiedRequest, provider_override: Option<AiProvider>) -> crate::Result<u32> {
        let provider = self.resolve(provider_override)?;
        Ok(crate::token_counter::count_request(&request.messages, provider.model()))
    }

    async fn generate_with_retries(
        &self,
        provider: &dyn Provider,
        request: UnifiedRequest,
        context: &RequestContext,
    ) -> crate::Result<UnifiedResponse> {
        let mut attempt = 0u32;

        loop {
            match provider.generate(request.clone(), context).await {
                Ok(response) => {
                    log::debug!(
                        "[{}] Upstream completed in {:?}",
                        context.request_id,
                        context.started_at.elapsed()
                    );
                    return Ok(response);
                }

                Err(GatewayError::AuthenticationFailed(message)) => {
                    // One refresh, one retry; a second 401 surfaces as-is.
                    if !provider.refresh_auth().await {
                        return Err(GatewayError::AuthenticationFailed(message));
                    }

                    log::debug!("Retrying once after credential refresh");
                    return provider.generate(request, context).await;
                }

                Err(error) if error.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    log::warn!(
                        "Upstream attempt {} failed ({error}), retrying in {delay:?}",
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }

                Err(error) => return Err(error),
            }
        }
    }
}

/// Exponential backoff with jitter, clamped to the cap.
fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_CAP);

    let jitter_ms = rand::rng().random_range(0..=exponential.as_millis() as u64 / 2);

    (exponential + Duration::from_millis(jitter_ms)).min(BACKOFF_CAP)
}

/// Drive the stream transformer over the upstream events, yielding canonical
/// chunks. The transformer is owned by this single consumer loop.
fn chunk_stream(events: ProviderEventStream, transformer: StreamTransformer) -> ChunkStream {
    struct FoldState {
        events: ProviderEventStream,
        transformer: StreamTransformer,
        queue: VecDeque<UnifiedChunk>,
        finished: bool,
    }

    let state = FoldState {
        events,
        transformer,
        queue: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.queue.pop_front() {
                return Some((Ok(chunk), state));
            }

            if state.finished {
                return None;
            }

            match state.events.next().await {
                Some(Ok(event)) => {
                    state.queue.extend(state.transformer.handle(event));

                    if state.transformer.is_closed() {
                        state.finished = true;
                    }
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(error), state));
                }
                None => {
                    // Upstream EOF without a done event still terminates the
                    // stream properly.
                    state.queue.extend(state.transformer.finalize());
                    state.finished = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::unified::{UnifiedChoice, UnifiedMessage, UnifiedRole},
        provider::events::{ProviderEvent, UpstreamFinishReason},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Upstream double: fails with 401 a configured number of times, then
    /// succeeds. Refreshing counts.
    #[derive(Debug)]
    struct FlakyAuthProvider {
        failures_remaining: AtomicU32,
        generate_calls: AtomicU32,
        refresh_calls: AtomicU32,
        refresh_succeeds: bool,
    }

    impl FlakyAuthProvider {
        fn new(failures: u32, refresh_succeeds: bool) -> Self {
            Self {
                failures_remaining: AtomicU32::new(failures),
                generate_calls: AtomicU32::new(0),
                refresh_calls: AtomicU32::new(0),
                refresh_succeeds,
            }
        }
    }

    #[async_trait]
    impl Provider for FlakyAuthProvider {
        async fn generate(
            &self,
            request: UnifiedRequest,
            _context: &RequestContext,
        ) -> crate::Result<UnifiedResponse> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);

            if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(GatewayError::AuthenticationFailed("expired".into()));
            }

            Ok(UnifiedResponse {
                id: "chatcmpl-1".into(),
                created: 1,
                model: request.model,
                choices: vec![UnifiedChoice {
                    index: 0,
                    message: UnifiedMessage {
                        role: UnifiedRole::Assistant,
                        content: Some("ok".into()),
                        reasoning_content: None,
                        tool_calls: None,
                        tool_call_id: None,
                    },
                    finish_reason: None,
                }],
                usage: None,
            })
        }

        async fn generate_stream(
            &self,
            _request: UnifiedRequest,
            _context: &RequestContext,
        ) -> crate::Result<ProviderEventStream> {
            Err(GatewayError::Internal(None))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        fn base_url(&self) -> &str {
            "http://upstream"
        }

        async fn refresh_auth(&self) -> bool {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_succeeds
        }
    }

    fn empty_server() -> GatewayServer {
        let config = config::Config::default();
        GatewayServerBuilder::new(&config).build().unwrap()
    }

    fn unified_request() -> UnifiedRequest {
        UnifiedRequest {
            model: "m".into(),
            messages: vec![UnifiedMessage::user("hi")],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            user: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn one_401_triggers_one_refresh_and_one_retry() {
        let server = empty_server();
        let provider = FlakyAuthProvider::new(1, true);

        let response = server
            .generate_with_retries(&provider, unified_request(), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(response.primary_message().unwrap().content.as_deref(), Some("ok"));
        assert_eq!(provider.generate_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_consecutive_401s_surface_as_authentication_error() {
        let server = empty_server();
        let provider = FlakyAuthProvider::new(2, true);

        let error = server
            .generate_with_retries(&provider, unified_request(), &RequestContext::new())
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::AuthenticationFailed(_)));
        assert_eq!(provider.generate_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_the_original_401() {
        let server = empty_server();
        let provider = FlakyAuthProvider::new(1, false);

        let error = server
            .generate_with_retries(&provider, unified_request(), &RequestContext::new())
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::AuthenticationFailed(message) if message == "expired"));
        assert_eq!(provider.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_exponentially_within_the_cap() {
        for _ in 0..32 {
            let first = backoff_delay(0);
            assert!(first >= Duration::from_secs(1));
            assert!(first <= Duration::from_millis(1500));

            let second = backoff_delay(1);
            assert!(second >= Duration::from_secs(2));
            assert!(second <= Duration::from_secs(3));

            let large = backoff_delay(9);
            assert!(large <= BACKOFF_CAP);
        }
    }

    #[tokio::test]
    async fn chunk_stream_terminates_on_upstream_eof_without_done() {
        let events: ProviderEventStream = Box::pin(futures::stream::iter(vec![
            Ok(ProviderEvent::TextDelta {
                choice: 0,
                text: "hi".into(),
            }),
            Ok(ProviderEvent::Finish {
                choice: 0,
                reason: UpstreamFinishReason::Stop,
            }),
        ]));

        let transformer = StreamTransformer::new("m", vec![]);
        let chunks: Vec<_> = chunk_stream(events, transformer).collect().await;

        let terminal_count = chunks
            .iter()
            .filter_map(|c| c.as_ref().ok())
            .flat_map(|c| &c.choices)
            .filter(|c| c.finish_reason.is_some())
            .count();

        assert_eq!(terminal_count, 1);
    }
}
