use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;

fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let config = match config::Config::load(args.config.as_deref()) {
        Ok(mut config) => {
            if let Some(log_level) = args.log_level {
                config.gateway.log_level = log_level;
            }
            config
        }
        Err(error) => {
            eprintln!("Configuration error: {error:#}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Startup error: {error:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(config: config::Config) -> anyhow::Result<()> {
    let shutdown_signal = CancellationToken::new();

    spawn_signal_handler(shutdown_signal.clone());

    server::serve(server::ServeConfig {
        config,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}

/// SIGTERM and SIGINT both trigger graceful shutdown.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(error) => {
                    log::error!("Failed to install SIGTERM handler: {error}");
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => log::debug!("Received SIGINT"),
                _ = sigterm.recv() => log::debug!("Received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            log::debug!("Received interrupt");
        }

        token.cancel();
    });
}
