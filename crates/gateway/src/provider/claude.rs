pub(super) mod input;
pub(super) mod output;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use config::ClaudeCodeConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use self::output::{ClaudeEventMapper, ClaudeResponse, ClaudeStreamEvent};
use crate::{
    error::GatewayError,
    messages::unified::{UnifiedRequest, UnifiedResponse},
    provider::{Provider, ProviderEventStream, default_http_client_builder, error_for_status},
    request::RequestContext,
};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

/// Client identification headers matching the reference CLI, which some
/// compatible endpoints use to gate features.
const STAINLESS_HEADERS: &[(&str, &str)] = &[
    ("x-stainless-lang", "js"),
    ("x-stainless-package-version", "0.55.1"),
    ("x-stainless-runtime", "node"),
    ("x-stainless-retry-count", "0"),
];

const DEFAULT_USER_AGENT: &str = "claude-cli/1.0.83 (external, cli)";

#[derive(Debug)]
pub(crate) struct ClaudeProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    config: ClaudeCodeConfig,
}

impl ClaudeProvider {
    pub fn new(config: ClaudeCodeConfig, api_key: SecretString) -> crate::Result<Self> {
        let mut headers = HeaderMap::new();

        let insert = |headers: &mut HeaderMap, name: &str, value: &str| -> crate::Result<()> {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                log::error!("Invalid header name '{name}': {e}");
                GatewayError::Internal(None)
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                log::error!("Invalid value for header '{name}': {e}");
                GatewayError::Internal(None)
            })?;
            headers.insert(name, value);
            Ok(())
        };

        insert(&mut headers, "anthropic-version", &config.anthropic_version)?;
        insert(&mut headers, "content-type", "application/json")?;

        if !config.beta.is_empty() {
            insert(&mut headers, "anthropic-beta", &config.beta.join(","))?;
        }

        if config.dangerous_direct_browser_access {
            insert(&mut headers, "anthropic-dangerous-direct-browser-access", "true")?;
        }

        if let Some(x_app) = &config.x_app {
            insert(&mut headers, "x-app", x_app)?;
        }

        let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        insert(&mut headers, "user-agent", user_agent)?;

        for (name, value) in STAINLESS_HEADERS {
            insert(&mut headers, name, value)?;
        }

        for (name, value) in &config.extra_headers {
            insert(&mut headers, name, value)?;
        }

        let client = default_http_client_builder(config.timeout(), headers)
            .build()
            .map_err(|e| {
                log::error!("Failed to create HTTP client for Claude provider: {e}");
                GatewayError::Internal(None)
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
            config,
        })
    }

    async fn send(&self, body: Vec<u8>) -> crate::Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(url)
            .header("x-api-key", self.api_key.expose_secret())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::UpstreamTimeout
                } else {
                    GatewayError::ConnectionError(format!("Failed to send request to Anthropic: {e}"))
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Anthropic API error ({status}): {error_text}");
            return Err(error_for_status(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    async fn generate(&self, request: UnifiedRequest, _context: &RequestContext) -> crate::Result<UnifiedResponse> {
        let original_model = request.model.clone();

        let wire_request = input::build_request(request, &self.config.model, self.config.max_output_tokens);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize Anthropic request: {e}");
            GatewayError::Internal(None)
        })?;

        let response = self.send(body).await?;

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read Anthropic response body: {e}");
            GatewayError::Internal(None)
        })?;

        let claude_response: ClaudeResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse Anthropic response: {e}");
            log::debug!("Response parsing failed, length: {} bytes", response_text.len());
            GatewayError::Internal(None)
        })?;

        let mut response = UnifiedResponse::from(claude_response);
        response.model = original_model;

        Ok(response)
    }

    async fn generate_stream(
        &self,
        request: UnifiedRequest,
        _context: &RequestContext,
    ) -> crate::Result<ProviderEventStream> {
        let mut wire_request = input::build_request(request, &self.config.model, self.config.max_output_tokens);
        wire_request.stream = Some(true);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize Anthropic streaming request: {e}");
            GatewayError::Internal(None)
        })?;

        let response = self.send(body).await?;

        let mut mapper = ClaudeEventMapper::new();

        let event_stream = response.bytes_stream().eventsource().flat_map(move |event| {
            let events: Vec<crate::Result<crate::provider::events::ProviderEvent>> = match event {
                Err(_) => {
                    log::warn!("SSE parsing error in Anthropic stream");
                    Vec::new()
                }
                Ok(event) => match sonic_rs::from_str::<ClaudeStreamEvent>(&event.data) {
                    Ok(stream_event) => mapper.map(stream_event).into_iter().map(Ok).collect(),
                    Err(_) => {
                        log::warn!("Failed to parse Anthropic streaming event");
                        Vec::new()
                    }
                },
            };

            futures::stream::iter(events)
        });

        Ok(Box::pin(event_stream))
    }

    fn name(&self) -> &'static str {
        "claude-code"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::UnifiedMessage;
    use axum::{Json, Router, extract::State, routing::post};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct CaptureState {
        captured: Arc<Mutex<Option<(axum::http::HeaderMap, Value)>>>,
    }

    async fn handle_messages(
        State(state): State<CaptureState>,
        headers: axum::http::HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        *state.captured.lock().unwrap() = Some((headers, body));

        Json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [{"type": "text", "text": "bonjour"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 2, "output_tokens": 3}
        }))
    }

    #[tokio::test]
    async fn generate_sends_versioned_headers_and_parses_the_response() {
        let state = CaptureState::default();

        let app = Router::new()
            .route("/v1/messages", post(handle_messages))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = ClaudeCodeConfig {
            base_url: Some(format!("http://{address}")),
            model: "claude-sonnet-4".into(),
            beta: vec!["oauth-2025-04-20".into()],
            ..Default::default()
        };

        let provider = ClaudeProvider::new(config, SecretString::from("sk-ant-test".to_string())).unwrap();

        let request = UnifiedRequest {
            model: "gemini-2.5-pro".into(),
            messages: vec![UnifiedMessage::user("salut")],
            system: None,
            max_tokens: Some(128),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            user: None,
            extra: Default::default(),
        };

        let response = provider.generate(request, &RequestContext::new()).await.unwrap();

        let (headers, body) = state.captured.lock().unwrap().clone().unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-test");
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
        assert_eq!(headers.get("anthropic-beta").unwrap(), "oauth-2025-04-20");

        assert_eq!(body["model"], "claude-sonnet-4");
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["messages"][0]["content"][0]["text"], "salut");

        assert_eq!(response.model, "gemini-2.5-pro");
        assert_eq!(
            response.primary_message().unwrap().content.as_deref(),
            Some("bonjour")
        );
    }
}
