//! Error envelope middleware.
//!
//! Gateway handlers attach an [`gateway::ErrorEnvelope`] extension to error
//! responses; this layer re-renders the body with the request path and
//! method filled in, which handlers cannot see at conversion time.

use axum::{
    Json,
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use gateway::ErrorBody;

pub(crate) async fn attach_request_context(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();

    let mut response = next.run(request).await;

    let Some(envelope) = response.extensions_mut().remove::<gateway::ErrorEnvelope>() else {
        return response;
    };

    let body = ErrorBody {
        status_code: envelope.status_code,
        timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64,
        path: Some(path),
        method: Some(method),
        message: envelope.message,
        error: envelope.error,
        details: envelope.details,
    };

    (response.status(), Json(body)).into_response()
}
