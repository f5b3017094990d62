//! Protocol-translating gateway core.
//!
//! Inbound requests arrive in the Gemini dialect (used by CLI tools) or the
//! OpenAI dialect (chat/completions plus the responses surface) and are
//! dispatched, transformed, to the configured upstream provider. Responses
//! stream back in the client's wire format.

use std::{convert::Infallible, sync::Arc, time::Instant};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::{HeaderMap, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use config::{AiProvider, ApiMode, CliMode, Config};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

mod error;
mod messages;
mod provider;
mod request;
mod server;
pub mod token_counter;
mod transcript;
mod validation;

pub use error::{ErrorBody, ErrorEnvelope, FieldViolation, GatewayError, GatewayResult as Result};

use messages::{gemini, openai, responses, unified};
use provider::streaming::ResponseAggregator;
use request::RequestContext;
use server::{GatewayServer, GatewayServerBuilder};

/// Optional per-request provider override, for clients that want to bypass
/// the configured default.
const PROVIDER_OVERRIDE_HEADER: &str = "x-ai-provider";

#[derive(Clone)]
struct AppState {
    server: GatewayServer,
    config: Arc<Config>,
    started_at: Instant,
}

/// Creates the axum router for the gateway.
///
/// The dialect surface under `/api/v1` follows `gateway.api_mode`; `/health`
/// is always mounted. Legacy path rewrites are applied before routing.
pub fn router(config: &Config) -> anyhow::Result<Router> {
    let server = GatewayServerBuilder::new(config)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to initialize gateway server: {e}"))?;

    let state = AppState {
        server,
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    let mut api = Router::new();

    match config.gateway.api_mode {
        ApiMode::Gemini => {
            api = api.route("/gemini/models/{model_action}", post(gemini_generate));
        }
        ApiMode::Openai => {
            api = api
                .route("/openai/v1/chat/completions", post(chat_completions))
                .route("/openai/v1/responses", post(openai_responses))
                .route("/openai/v1/models", get(list_models));
        }
    }

    // The bare models rewrite only makes sense for CLIs speaking the Gemini
    // dialect; opencode and crush talk OpenAI paths.
    let rewrite_models = matches!(config.gateway.cli_mode, CliMode::Gemini | CliMode::Qwencode)
        && config.gateway.api_mode == ApiMode::Gemini;

    let router = Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .with_state(state)
        .layer(axum::middleware::from_fn(move |request: Request, next: Next| {
            rewrite_legacy_paths(request, next, rewrite_models)
        }));

    Ok(router)
}

/// Rewrites `/api/v1beta/…` to `/api/v1/…` for legacy clients and, when the
/// Gemini surface is mounted, bare `/api/v1/models/…` to the Gemini prefix.
async fn rewrite_legacy_paths(mut request: Request, next: Next, rewrite_models: bool) -> Response {
    if let Some(path) = rewritten_path(request.uri().path(), rewrite_models) {
        let path_and_query = match request.uri().query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        let mut parts = request.uri().clone().into_parts();
        parts.path_and_query = path_and_query.parse().ok();

        if let Ok(uri) = Uri::from_parts(parts) {
            log::debug!("Rewrote legacy path {} -> {}", request.uri().path(), uri.path());
            *request.uri_mut() = uri;
        }
    }

    next.run(request).await
}

fn rewritten_path(path: &str, rewrite_models: bool) -> Option<String> {
    let mut current = path.to_string();
    let mut changed = false;

    if let Some(rest) = current.strip_prefix("/api/v1beta/") {
        current = format!("/api/v1/{rest}");
        changed = true;
    }

    if rewrite_models {
        if let Some(rest) = current.strip_prefix("/api/v1/models/") {
            current = format!("/api/v1/gemini/models/{rest}");
            changed = true;
        }
    }

    changed.then_some(current)
}

fn provider_override(headers: &HeaderMap) -> Option<AiProvider> {
    match headers.get(PROVIDER_OVERRIDE_HEADER)?.to_str().ok()? {
        "openai" => Some(AiProvider::Openai),
        "codex" => Some(AiProvider::Codex),
        "claude-code" | "claudeCode" => Some(AiProvider::ClaudeCode),
        other => {
            log::warn!("Ignoring unknown provider override '{other}'");
            None
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T> {
    sonic_rs::from_slice(body).map_err(|e| GatewayError::Validation {
        message: format!("Invalid request body: {e}"),
        details: Vec::new(),
    })
}

/// Cancel the request token when the inbound deadline passes.
fn spawn_request_deadline(token: CancellationToken, timeout: std::time::Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                log::debug!("Request deadline reached, cancelling");
                token.cancel();
            }
        }
    });
}

fn sse_json<T: Serialize>(payload: &T) -> Event {
    let json = sonic_rs::to_string(payload).unwrap_or_else(|e| {
        log::error!("Failed to serialize SSE payload: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    });

    Event::default().data(json)
}

/// SSE response with the headers streaming clients expect, flushed before
/// the first event.
fn sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(stream).into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().expect("static header"));
    headers.insert("x-accel-buffering", "no".parse().expect("static header"));

    response
}

// Gemini dialect.

/// Handles the three Gemini model operations, multiplexed on the
/// `{model}:{action}` path segment.
async fn gemini_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let Some((model, action)) = model_action.split_once(':') else {
        return Err(GatewayError::InvalidRequest(format!(
            "Expected 'model:action' in path, got '{model_action}'"
        )));
    };

    let provider_override = provider_override(&headers);

    match action {
        "generateContent" => {
            gemini_generate_content(state, model.to_string(), provider_override, body).await
        }
        "streamGenerateContent" => {
            gemini_stream_generate_content(state, model.to_string(), provider_override, body).await
        }
        "countTokens" => gemini_count_tokens(state, model.to_string(), provider_override, body).await,
        other => Err(GatewayError::InvalidRequest(format!("Unknown model action '{other}'"))),
    }
}

async fn gemini_generate_content(
    state: AppState,
    model: String,
    provider_override: Option<AiProvider>,
    body: Bytes,
) -> Result<Response> {
    let gemini_request: gemini::GenerateContentRequest = parse_body(&body)?;
    validation::validate_generate_request(&gemini_request)?;

    log::debug!(
        "Gemini generateContent for model {model}, {} content(s)",
        gemini_request.contents.len()
    );

    let unified_request = unified::from_gemini::unified_request(model, gemini_request);

    let context = RequestContext::new();

    // The upstream is always streamed; the reply is aggregated locally.
    let timeout = state.config.gateway.request_timeout();
    let work = async {
        let mut chunks = state
            .server
            .completions_stream(unified_request, &context, provider_override)
            .await?;

        let mut aggregator = ResponseAggregator::new();
        while let Some(chunk) = chunks.next().await {
            aggregator.push(chunk?);
        }

        Ok::<_, GatewayError>(aggregator.into_response())
    };

    let response = tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| GatewayError::UpstreamTimeout)??;

    Ok(Json(unified::to_gemini::generate_response(response)).into_response())
}

async fn gemini_stream_generate_content(
    state: AppState,
    model: String,
    provider_override: Option<AiProvider>,
    body: Bytes,
) -> Result<Response> {
    let gemini_request: gemini::GenerateContentRequest = parse_body(&body)?;
    validation::validate_generate_request(&gemini_request)?;

    let unified_request = unified::from_gemini::unified_request(model, gemini_request);

    let context = RequestContext::new();
    spawn_request_deadline(context.cancel.clone(), state.config.gateway.request_timeout());

    let chunks = state
        .server
        .completions_stream(unified_request, &context, provider_override)
        .await?;

    // Dropping the outbound stream on client disconnect trips the token and
    // aborts the upstream fetch.
    let guard = context.cancel.clone().drop_guard();

    let events = chunks.filter_map(move |item| {
        let _keep_alive = &guard;

        let event = match item {
            Ok(chunk) => unified::to_gemini::stream_event(chunk).map(|payload| sse_json(&payload)),
            Err(error) => {
                log::error!("Stream error: {error}");
                Some(sse_json(&error::StreamErrorFrame::from(&error)))
            }
        };

        async move { event.map(Ok::<_, Infallible>) }
    });

    log::debug!("Returning Gemini streaming response");
    Ok(sse_response(events))
}

async fn gemini_count_tokens(
    state: AppState,
    model: String,
    provider_override: Option<AiProvider>,
    body: Bytes,
) -> Result<Response> {
    let count_request: gemini::CountTokensRequest = parse_body(&body)?;

    // Accept both the bare contents shape and the wrapped generate request.
    let generate_request = match count_request.generate_content_request {
        Some(inner) => *inner,
        None => gemini::GenerateContentRequest {
            contents: count_request.contents,
            ..Default::default()
        },
    };

    let unified_request = unified::from_gemini::unified_request(model, generate_request);
    let total_tokens = state.server.count_tokens(&unified_request, provider_override)?;

    Ok(Json(gemini::CountTokensResponse { total_tokens }).into_response())
}

// OpenAI dialect.

/// Handle chat completion requests.
///
/// With `stream: true` the response is sent as Server-Sent Events terminated
/// by `data: [DONE]`; otherwise a standard JSON body is returned.
async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let chat_request: openai::ChatCompletionRequest = parse_body(&body)?;
    validation::validate_chat_request(&chat_request)?;

    let provider_override = provider_override(&headers);
    let streaming = chat_request.stream.unwrap_or(false);

    log::debug!(
        "Chat completions for model {}, {} message(s), streaming: {streaming}",
        chat_request.model,
        chat_request.messages.len()
    );

    let unified_request = unified::UnifiedRequest::from(chat_request);

    let context = RequestContext::new();

    if !streaming {
        // The dispatcher enforces the request deadline on buffered calls.
        let response = state
            .server
            .completions(unified_request, &context, provider_override)
            .await?;

        return Ok(Json(openai::ChatCompletionResponse::from(response)).into_response());
    }

    spawn_request_deadline(context.cancel.clone(), state.config.gateway.request_timeout());

    let chunks = state
        .server
        .completions_stream(unified_request, &context, provider_override)
        .await?;

    let guard = context.cancel.clone().drop_guard();

    let events = chunks.map(move |item| {
        let _keep_alive = &guard;

        let event = match item {
            Ok(chunk) => sse_json(&openai::ChatCompletionChunk::from(chunk)),
            Err(error) => {
                log::error!("Stream error: {error}");
                sse_json(&error::StreamErrorFrame::from(&error))
            }
        };

        Ok::<_, Infallible>(event)
    });

    let with_done = events.chain(futures::stream::once(async {
        Ok::<_, Infallible>(Event::default().data("[DONE]"))
    }));

    Ok(sse_response(with_done))
}

/// Handle the responses surface.
///
/// Streaming replies are `response.delta` events followed by one
/// `response.completed` carrying the aggregated payload, then `[DONE]`.
async fn openai_responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let responses_request: responses::ResponsesRequest = parse_body(&body)?;

    let provider_override = provider_override(&headers);
    let streaming = responses_request.stream.unwrap_or(false);

    let mut unified_request = unified::UnifiedRequest::from(responses_request);

    if unified_request.model.is_empty() {
        unified_request.model = state.server.resolve(provider_override)?.model().to_string();
    }

    let context = RequestContext::new();

    if !streaming {
        let response = state
            .server
            .completions(unified_request, &context, provider_override)
            .await?;

        return Ok(Json(unified::to_responses::completed_response(response)).into_response());
    }

    spawn_request_deadline(context.cancel.clone(), state.config.gateway.request_timeout());

    let chunks = state
        .server
        .completions_stream(unified_request, &context, provider_override)
        .await?;

    let guard = context.cancel.clone().drop_guard();

    struct Fold {
        chunks: server::ChunkStream,
        aggregator: Option<ResponseAggregator>,
        _guard: tokio_util::sync::DropGuard,
    }

    let fold = Fold {
        chunks,
        aggregator: Some(ResponseAggregator::new()),
        _guard: guard,
    };

    let events = futures::stream::unfold(fold, |mut fold| async move {
        loop {
            match fold.chunks.next().await {
                Some(Ok(chunk)) => {
                    if let Some(aggregator) = fold.aggregator.as_mut() {
                        aggregator.push(chunk.clone());
                    }

                    if let Some(delta) = unified::to_responses::stream_delta(&chunk) {
                        let event = sse_json(&delta).event("response.delta");
                        return Some((Ok::<_, Infallible>(event), fold));
                    }
                }
                Some(Err(error)) => {
                    log::error!("Stream error: {error}");
                    fold.aggregator = None;

                    let event = sse_json(&error::StreamErrorFrame::from(&error)).event("response.error");
                    return Some((Ok(event), fold));
                }
                None => {
                    let aggregator = fold.aggregator.take()?;
                    let completed = responses::ResponseCompleted::new(unified::to_responses::completed_response(
                        aggregator.into_response(),
                    ));

                    let event = sse_json(&completed).event("response.completed");
                    return Some((Ok(event), fold));
                }
            }
        }
    });

    let with_done = events.chain(futures::stream::once(async {
        Ok::<_, Infallible>(Event::default().data("[DONE]"))
    }));

    Ok(sse_response(with_done))
}

/// List the configured model.
async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let provider = state.server.resolve(provider_override(&headers))?;

    let response = openai::ModelsResponse {
        object: openai::ObjectType::List,
        data: vec![openai::Model {
            id: provider.model().to_string(),
            object: openai::ObjectType::Model,
            created: 0,
            owned_by: provider.name().to_string(),
        }],
    };

    Ok(Json(response).into_response())
}

// Health.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    /// Seconds since startup.
    uptime: u64,
    version: &'static str,
    provider: &'static str,
    config: HealthProviderConfig,
    gateway: HealthGatewayConfig,
}

#[derive(Serialize)]
struct HealthProviderConfig {
    model: String,
    #[serde(rename = "baseURL")]
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthGatewayConfig {
    api_mode: &'static str,
    cli_mode: &'static str,
}

async fn health(State(state): State<AppState>) -> Response {
    let (provider_name, model, base_url) = match state.server.resolve(None) {
        Ok(provider) => (
            provider.name(),
            provider.model().to_string(),
            provider.base_url().to_string(),
        ),
        Err(_) => (state.config.ai_provider.as_str(), String::new(), String::new()),
    };

    let response = HealthResponse {
        status: "ok",
        uptime: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        provider: provider_name,
        config: HealthProviderConfig { model, base_url },
        gateway: HealthGatewayConfig {
            api_mode: state.config.gateway.api_mode.as_str(),
            cli_mode: state.config.gateway.cli_mode.as_str(),
        },
    };

    Json(response).into_response()
}
