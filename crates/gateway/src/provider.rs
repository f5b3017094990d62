//! Upstream provider adapters.
//!
//! Each adapter builds the provider's wire request from the unified shape,
//! speaks the provider's SSE schema, and surfaces the normalized event
//! taxonomy consumed by the stream transformer.

pub(crate) mod claude;
pub(crate) mod codex;
pub(crate) mod events;
mod http_client;
pub(crate) mod openai;
pub(crate) mod streaming;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    error::GatewayError,
    messages::unified::{UnifiedRequest, UnifiedResponse},
    provider::events::ProviderEvent,
    request::RequestContext,
};

pub(crate) use http_client::default_http_client_builder;

/// Stream of normalized upstream events.
pub(crate) type ProviderEventStream = Pin<Box<dyn Stream<Item = crate::Result<ProviderEvent>> + Send>>;

#[async_trait]
pub(crate) trait Provider: Send + Sync + std::fmt::Debug {
    /// Buffered completion.
    async fn generate(&self, request: UnifiedRequest, context: &RequestContext) -> crate::Result<UnifiedResponse>;

    /// Streaming completion, as normalized events.
    async fn generate_stream(
        &self,
        request: UnifiedRequest,
        context: &RequestContext,
    ) -> crate::Result<ProviderEventStream>;

    fn name(&self) -> &'static str;

    /// The upstream model requests are rewritten to.
    fn model(&self) -> &str;

    /// The resolved upstream base URL, surfaced on the health endpoint.
    fn base_url(&self) -> &str;

    /// React to an upstream 401. Returns true when credentials were renewed
    /// and the request should be retried once.
    async fn refresh_auth(&self) -> bool {
        false
    }
}

/// Map an upstream HTTP status to the gateway error taxonomy.
pub(crate) fn error_for_status(status: u16, message: String) -> GatewayError {
    match status {
        401 => GatewayError::AuthenticationFailed(message),
        429 => GatewayError::RateLimitExceeded { message },
        400..=499 => GatewayError::UpstreamClientError { status, message },
        _ => GatewayError::UpstreamServerError { status, message },
    }
}

/// End the stream as soon as the request's cancellation token trips; dropping
/// the inner stream aborts the upstream fetch.
pub(crate) fn with_cancellation(stream: ProviderEventStream, token: CancellationToken) -> ProviderEventStream {
    Box::pin(futures::stream::unfold(
        (stream, token),
        |(mut stream, token)| async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("Upstream stream cancelled");
                    None
                }
                item = stream.next() => item.map(|item| (item, (stream, token))),
            }
        },
    ))
}
