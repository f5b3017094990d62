use std::time::Duration;

use axum::http;
use reqwest::ClientBuilder;

/// Shared HTTP client defaults for every provider adapter.
///
/// The pool idle timeout stays low so DNS changes on provider endpoints are
/// picked up without restarting the gateway; the overall timeout is the
/// upstream deadline from the provider's configuration and also bounds the
/// full body read of a streaming response.
pub(crate) fn default_http_client_builder(timeout: Duration, headers: http::HeaderMap) -> ClientBuilder {
    let mut default_headers = http::HeaderMap::new();
    default_headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));
    default_headers.extend(headers);

    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(default_headers)
}
