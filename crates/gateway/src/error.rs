use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// A single schema violation on an inbound request body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldViolation {
    /// Dotted path of the offending field, e.g. `contents[0].parts`.
    pub path: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl FieldViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The requested provider is not configured or has no credentials.
    #[error("Provider '{0}' is not enabled")]
    ProviderDisabled(String),

    /// Inbound body failed schema validation.
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldViolation>,
    },

    /// Invalid request parameters beyond schema validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream authentication failed, after one refresh attempt in ChatGPT mode.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Upstream rate limit, surfaced after retry exhaustion.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Upstream returned a non-retryable 4xx.
    #[error("Provider API error ({status}): {message}")]
    UpstreamClientError { status: u16, message: String },

    /// Upstream kept returning 5xx after retries.
    #[error("Provider API error ({status}): {message}")]
    UpstreamServerError { status: u16, message: String },

    /// The upstream request exceeded its deadline.
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Network or connection error reaching the upstream.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The client went away; cancels upstream work, never surfaced as a body.
    #[error("Client disconnected")]
    ClientDisconnect,

    /// A single upstream SSE frame could not be parsed. Logged, the stream continues.
    #[error("Stream parse error: {0}")]
    StreamParse(String),

    /// Internal server error.
    /// If Some(message), it came from a provider and can be shown.
    /// If None, details must not leak to the client.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl GatewayError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProviderDisabled(_) | Self::Validation { .. } | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamClientError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamServerError { .. } | Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ClientDisconnect | Self::StreamParse(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string for the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ProviderDisabled(_) => "configuration_error",
            Self::Validation { .. } | Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::RateLimitExceeded { .. } => "rate_limit_error",
            Self::UpstreamClientError { .. } | Self::UpstreamServerError { .. } | Self::ConnectionError(_) => {
                "api_error"
            }
            Self::UpstreamTimeout => "timeout_error",
            Self::ClientDisconnect | Self::StreamParse(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(provider_msg)) => provider_msg.clone(),
            Self::Internal(None) | Self::StreamParse(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the dispatcher may retry the request after this error.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError(_) | Self::RateLimitExceeded { .. } | Self::UpstreamServerError { .. }
        )
    }
}

/// Structured error body returned on non-streaming requests.
///
/// `path` and `method` are filled in by the error envelope middleware; handlers
/// that bypass it leave them out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub message: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldViolation>>,
}

impl ErrorBody {
    pub fn from_error(error: &GatewayError) -> Self {
        let details = match error {
            GatewayError::Validation { details, .. } if !details.is_empty() => Some(details.clone()),
            _ => None,
        };

        Self {
            status_code: error.status_code().as_u16(),
            timestamp: unix_timestamp_ms(),
            path: None,
            method: None,
            message: error.client_message(),
            error: error.error_type().to_string(),
            details,
        }
    }
}

/// Marker extension the error envelope middleware uses to attach request
/// context (path, method) to error bodies.
#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
    pub error: String,
    pub details: Option<Vec<FieldViolation>>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, GatewayError::ClientDisconnect) {
            // Nothing to write; the peer is gone.
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }

        let status = self.status_code();
        let body = ErrorBody::from_error(&self);

        let envelope = ErrorEnvelope {
            status_code: body.status_code,
            message: body.message.clone(),
            error: body.error.clone(),
            details: body.details.clone(),
        };

        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(envelope);

        response
    }
}

pub(crate) fn unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Payload of the final `data: {"error": ...}` frame on a broken stream.
#[derive(Debug, Serialize)]
pub struct StreamErrorFrame {
    pub error: StreamErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct StreamErrorDetails {
    pub message: String,
    pub r#type: String,
}

impl From<&GatewayError> for StreamErrorFrame {
    fn from(error: &GatewayError) -> Self {
        Self {
            error: StreamErrorDetails {
                message: error.client_message(),
                r#type: error.error_type().to_string(),
            },
        }
    }
}
