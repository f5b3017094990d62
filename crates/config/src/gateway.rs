//! Inbound HTTP surface configuration settings.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use secrecy::SecretString;
use serde::Deserialize;

/// Which client dialect the gateway mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    /// Gemini-style `models/{model}:generateContent` surface, used by CLI tools.
    #[default]
    Gemini,
    /// OpenAI-style chat/completions and responses surface.
    Openai,
}

impl ApiMode {
    /// Stable name used in logs and the health payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMode::Gemini => "gemini",
            ApiMode::Openai => "openai",
        }
    }
}

/// Which CLI client the gateway is fronting.
///
/// Controls legacy path rewrites and the default-model fallback the client
/// expects to see in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CliMode {
    /// The Gemini CLI.
    #[default]
    Gemini,
    /// The opencode CLI.
    Opencode,
    /// The crush CLI.
    Crush,
    /// The qwen-code CLI.
    Qwencode,
}

impl CliMode {
    /// Stable name used in logs and the health payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            CliMode::Gemini => "gemini",
            CliMode::Opencode => "opencode",
            CliMode::Crush => "crush",
            CliMode::Qwencode => "qwencode",
        }
    }
}

/// Inbound HTTP surface configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Which inbound dialect surface is mounted.
    pub api_mode: ApiMode,
    /// Which CLI client is being fronted; controls path-rewrite rules.
    pub cli_mode: CliMode,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Per-request inbound deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Log filter string (e.g. "info" or "gateway=debug").
    pub log_level: String,
    /// Directory for the rotating file logger, if any.
    pub log_dir: Option<PathBuf>,
    /// Optional shared secret; also seeds upstream keys that are not set separately.
    pub api_key: Option<SecretString>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_mode: ApiMode::default(),
            cli_mode: CliMode::default(),
            host: "127.0.0.1".to_string(),
            port: 23062,
            request_timeout_ms: 3_600_000,
            log_level: "info".to_string(),
            log_dir: None,
            api_key: None,
        }
    }
}

impl GatewayConfig {
    /// The socket address the server binds to.
    pub fn listen_address(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid gateway.host '{}': {e}", self.host))?;

        Ok(SocketAddr::new(ip, self.port))
    }

    /// The per-request inbound deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
