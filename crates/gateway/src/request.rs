use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// Runtime context owned by a single in-flight request.
///
/// The cancellation token is observed by the outbound writer loop, the
/// upstream fetch, and the per-request timeout timer. Tripping it releases
/// every resource scoped to the request.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    /// Correlates log lines and error bodies for one request.
    pub request_id: String,
    /// Cooperative cancellation for the whole request pipeline.
    pub cancel: CancellationToken,
    /// When the gateway accepted the request.
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Child token handed to the upstream fetch so aborting it does not
    /// require aborting the whole request.
    pub fn upstream_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
