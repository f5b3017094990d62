pub(crate) mod auth;
mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use config::CodexConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use self::{
    auth::CodexAuthStore,
    output::{CodexEventMapper, CodexStreamEvent},
};
use crate::{
    error::GatewayError,
    messages::unified::{UnifiedRequest, UnifiedResponse},
    provider::{
        Provider, ProviderEventStream, default_http_client_builder, error_for_status,
        streaming::{ResponseAggregator, StreamTransformer},
    },
    request::RequestContext,
};

const DEFAULT_CODEX_API_URL: &str = "https://chatgpt.com/backend-api/codex";

#[derive(Debug)]
pub(crate) enum CodexCredentials {
    ApiKey(SecretString),
    Chatgpt(Arc<CodexAuthStore>),
}

#[derive(Debug)]
pub(crate) struct CodexProvider {
    client: Client,
    base_url: String,
    credentials: CodexCredentials,
    config: CodexConfig,
    session_id: String,
}

impl CodexProvider {
    pub fn new(config: CodexConfig, credentials: CodexCredentials) -> crate::Result<Self> {
        let mut headers = axum::http::HeaderMap::new();

        headers.insert(
            "OpenAI-Beta",
            axum::http::HeaderValue::from_static("responses=experimental"),
        );
        headers.insert("originator", axum::http::HeaderValue::from_static("codex_cli_rs"));
        headers.insert("content-type", axum::http::HeaderValue::from_static("application/json"));

        let user_agent = user_agent();
        headers.insert(
            axum::http::header::USER_AGENT,
            user_agent.parse().map_err(|e| {
                log::error!("Failed to build Codex user agent: {e}");
                GatewayError::Internal(None)
            })?,
        );

        let client = default_http_client_builder(config.timeout(), headers)
            .build()
            .map_err(|e| {
                log::error!("Failed to create HTTP client for Codex provider: {e}");
                GatewayError::Internal(None)
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_CODEX_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            credentials,
            config,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn send(&self, body: Vec<u8>) -> crate::Result<reqwest::Response> {
        let url = format!("{}/responses", self.base_url);

        let mut request_builder = self.client.post(url).header("session_id", &self.session_id);

        request_builder = match &self.credentials {
            CodexCredentials::ApiKey(key) => {
                request_builder.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            }
            CodexCredentials::Chatgpt(store) => {
                let auth = store.get_headers().await?;

                request_builder
                    .header(AUTHORIZATION, format!("Bearer {}", auth.bearer.expose_secret()))
                    .header("chatgpt-account-id", auth.account_id)
            }
        };

        let response = request_builder.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::UpstreamTimeout
            } else {
                GatewayError::ConnectionError(format!("Failed to send request to Codex: {e}"))
            }
        })?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Codex API error ({status}): {error_text}");
            return Err(error_for_status(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for CodexProvider {
    /// The responses backend only streams; a buffered completion drains the
    /// stream and folds it back into one response.
    async fn generate(&self, request: UnifiedRequest, context: &RequestContext) -> crate::Result<UnifiedResponse> {
        let original_model = request.model.clone();

        let prompt_texts: Vec<String> = request
            .messages
            .iter()
            .filter_map(|m| m.content.clone())
            .collect();

        let mut events = self.generate_stream(request, context).await?;

        let mut transformer = StreamTransformer::new(original_model.clone(), prompt_texts);
        let mut aggregator = ResponseAggregator::new();

        while let Some(event) = events.next().await {
            let event = event?;
            for chunk in transformer.handle(event) {
                aggregator.push(chunk);
            }
            if transformer.is_closed() {
                break;
            }
        }

        if !transformer.is_closed() {
            for chunk in transformer.finalize() {
                aggregator.push(chunk);
            }
        }

        let mut response = aggregator.into_response();
        response.model = original_model;

        Ok(response)
    }

    async fn generate_stream(
        &self,
        request: UnifiedRequest,
        _context: &RequestContext,
    ) -> crate::Result<ProviderEventStream> {
        let wire_request = input::build_request(request, &self.config);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize Codex request: {e}");
            GatewayError::Internal(None)
        })?;

        let response = self.send(body).await?;

        let mut mapper = CodexEventMapper::new();

        let event_stream = response.bytes_stream().eventsource().flat_map(move |event| {
            let events: Vec<crate::Result<crate::provider::events::ProviderEvent>> = match event {
                Err(_) => {
                    log::warn!("SSE parsing error in Codex stream");
                    Vec::new()
                }
                Ok(event) if event.data == "[DONE]" => {
                    vec![Ok(crate::provider::events::ProviderEvent::Done)]
                }
                Ok(event) => match sonic_rs::from_str::<CodexStreamEvent>(&event.data) {
                    Ok(stream_event) => mapper.map(stream_event).into_iter().map(Ok).collect(),
                    Err(_) => {
                        log::warn!("Failed to parse Codex streaming event");
                        Vec::new()
                    }
                },
            };

            futures::stream::iter(events)
        });

        Ok(Box::pin(event_stream))
    }

    fn name(&self) -> &'static str {
        "codex"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn refresh_auth(&self) -> bool {
        match &self.credentials {
            CodexCredentials::ApiKey(_) => false,
            CodexCredentials::Chatgpt(store) => match store.force_refresh().await {
                Ok(()) => true,
                Err(e) => {
                    log::error!("ChatGPT credential refresh failed: {e}");
                    false
                }
            },
        }
    }
}

/// The reference CLI identifies its host platform; compatible backends use
/// this for diagnostics only.
fn user_agent() -> String {
    let terminal = std::env::var("TERM_PROGRAM")
        .or_else(|_| std::env::var("TERM"))
        .unwrap_or_else(|_| "unknown".to_string());

    format!(
        "codex_cli_rs/0.21.0 ({} {}) {terminal}",
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}
