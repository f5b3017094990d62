//! Prism server library.
//!
//! Provides a reusable serve function used by the binary and by tests:
//! router assembly, CORS, the error envelope, and graceful shutdown with a
//! force-close timer.

#![deny(missing_docs)]

mod envelope;
mod logger;

use std::{net::SocketAddr, time::Duration};

use anyhow::anyhow;
use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// In-flight requests get this long to finish after a shutdown signal.
const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for serving Prism.
pub struct ServeConfig {
    /// The deserialized gateway configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the gateway server with the provided configuration.
pub async fn serve(
    ServeConfig {
        config,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&config.gateway.log_level);

    // Log the version as the first message after logger initialization.
    log::info!("Prism {version}");

    if let Some(log_dir) = &config.gateway.log_dir {
        log::debug!("File logging directory configured at {}", log_dir.display());
    }

    let listen_address = config.gateway.listen_address()?;

    let app = gateway::router(&config)?
        .layer(axum::middleware::from_fn(envelope::attach_request_context))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let bound_address = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(bound_address)
            .map_err(|_| anyhow!("Failed to send back bound address"))?;
    }

    match config.gateway.api_mode {
        config::ApiMode::Gemini => {
            log::info!("Gemini endpoint: http://{bound_address}/api/v1/gemini");
        }
        config::ApiMode::Openai => {
            log::info!("OpenAI endpoint: http://{bound_address}/api/v1/openai/v1");
        }
    }
    log::info!("Health endpoint: http://{bound_address}/health");

    let graceful_token = shutdown_signal.clone();
    let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async move {
        graceful_token.cancelled().await;
        log::info!("Received shutdown signal, shutting down gracefully...");
    });

    let force_close = async {
        shutdown_signal.cancelled().await;
        tokio::time::sleep(FORCE_CLOSE_TIMEOUT).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| anyhow!("Server error: {e}"))?;
        }
        _ = force_close => {
            log::warn!(
                "In-flight requests did not finish within {FORCE_CLOSE_TIMEOUT:?}, forcing close"
            );
        }
    }

    gateway::token_counter::clear_encoder_cache();

    Ok(())
}
