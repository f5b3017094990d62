mod input;
mod output;

use async_trait::async_trait;
use axum::http::HeaderMap;
use config::OpenAiConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::GatewayError,
    messages::{openai, unified::{UnifiedRequest, UnifiedResponse}},
    provider::{Provider, ProviderEventStream, default_http_client_builder, error_for_status, events::ProviderEvent},
    request::RequestContext,
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug)]
pub(crate) struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig, api_key: SecretString) -> crate::Result<Self> {
        let mut headers = HeaderMap::new();

        if let Some(organization) = &config.organization {
            headers.insert(
                "OpenAI-Organization",
                organization.parse().map_err(|e| {
                    log::error!("Invalid openai.organization value: {e}");
                    GatewayError::Internal(None)
                })?,
            );
        }

        let client = default_http_client_builder(config.timeout(), headers)
            .build()
            .map_err(|e| {
                log::error!("Failed to create HTTP client for OpenAI provider: {e}");
                GatewayError::Internal(None)
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string())
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
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::UpstreamTimeout
                } else {
                    GatewayError::ConnectionError(format!("Failed to send request to OpenAI: {e}"))
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI API error ({status}): {error_text}");
            return Err(error_for_status(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn generate(&self, request: UnifiedRequest, _context: &RequestContext) -> crate::Result<UnifiedResponse> {
        let original_model = request.model.clone();

        let wire_request = input::build_request(request, &self.config.model, self.config.extra_body.as_ref());

        let body = sonic_rs::to_vec(&wire_request)
            .map_err(|e| GatewayError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let response = self.send(body).await?;

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read OpenAI response body: {e}");
            GatewayError::Internal(None)
        })?;

        let wire_response: openai::ChatCompletionResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse OpenAI chat completion response: {e}");
            log::debug!("Response parsing failed, length: {} bytes", response_text.len());
            GatewayError::Internal(None)
        })?;

        let mut response = UnifiedResponse::from(wire_response);
        response.model = original_model;

        Ok(response)
    }

    async fn generate_stream(
        &self,
        request: UnifiedRequest,
        _context: &RequestContext,
    ) -> crate::Result<ProviderEventStream> {
        let mut wire_request = input::build_request(request, &self.config.model, self.config.extra_body.as_ref());
        wire_request.stream = true;
        wire_request.stream_options = Some(input::StreamOptions { include_usage: true });

        let body = sonic_rs::to_vec(&wire_request)
            .map_err(|e| GatewayError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let response = self.send(body).await?;

        let event_stream = response.bytes_stream().eventsource().flat_map(|event| {
            let events: Vec<crate::Result<ProviderEvent>> = match event {
                Err(_) => {
                    // One bad frame never aborts the stream.
                    log::warn!("SSE parsing error in OpenAI stream");
                    Vec::new()
                }
                Ok(event) if event.data == "[DONE]" => vec![Ok(ProviderEvent::Done)],
                Ok(event) => match sonic_rs::from_str::<openai::ChatCompletionChunk>(&event.data) {
                    Ok(chunk) => output::chunk_events(chunk).into_iter().map(Ok).collect(),
                    Err(_) => {
                        log::warn!("Failed to parse OpenAI streaming chunk");
                        Vec::new()
                    }
                },
            };

            futures::stream::iter(events)
        });

        Ok(Box::pin(event_stream))
    }

    fn name(&self) -> &'static str {
        "openai"
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
        captured: Arc<Mutex<Option<Value>>>,
    }

    async fn handle_chat(State(state): State<CaptureState>, Json(body): Json<Value>) -> Json<Value> {
        *state.captured.lock().unwrap() = Some(body);

        Json(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1,
            "model": "glm-4.5",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
    }

    async fn spawn_upstream(state: CaptureState) -> String {
        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}/v1")
    }

    fn unified_request() -> UnifiedRequest {
        UnifiedRequest {
            model: "gemini-2.5-pro".into(),
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
    async fn generate_rewrites_model_and_restores_it_in_the_response() {
        let state = CaptureState::default();
        let base_url = spawn_upstream(state.clone()).await;

        let config = OpenAiConfig {
            base_url: Some(base_url),
            model: "glm-4.5".into(),
            ..Default::default()
        };

        let provider = OpenAiProvider::new(config, SecretString::from("sk-test".to_string())).unwrap();
        let response = provider
            .generate(unified_request(), &RequestContext::new())
            .await
            .unwrap();

        // The upstream saw the configured model.
        let captured = state.captured.lock().unwrap().clone().unwrap();
        assert_eq!(captured["model"], "glm-4.5");
        assert_eq!(captured["messages"][0]["content"], "hi");

        // The client sees the model it asked for.
        assert_eq!(response.model, "gemini-2.5-pro");
        assert_eq!(response.primary_message().unwrap().content.as_deref(), Some("hello"));
        assert_eq!(response.usage.unwrap().total_tokens, 2);
    }
}
