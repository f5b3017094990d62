//! Prism configuration structures to map the prism.toml configuration.

#![deny(missing_docs)]

mod gateway;
mod loader;
mod providers;

use std::path::Path;

pub use gateway::{ApiMode, CliMode, GatewayConfig};
pub use providers::{
    AiProvider, ClaudeCodeConfig, CodexAuthMode, CodexConfig, OpenAiConfig, ReasoningConfig, ReasoningEffort,
    ReasoningSummary, TextVerbosity,
};
use serde::Deserialize;

/// Main configuration structure for the Prism gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Which upstream provider requests are dispatched to by default.
    pub ai_provider: AiProvider,
    /// Inbound HTTP surface settings.
    pub gateway: GatewayConfig,
    /// OpenAI-compatible provider settings.
    pub openai: OpenAiConfig,
    /// ChatGPT-Codex responses provider settings.
    pub codex: CodexConfig,
    /// Anthropic messages provider settings.
    pub claude_code: ClaudeCodeConfig,
}

impl Config {
    /// Load configuration from environment variables layered under an optional
    /// file. Values from the file win over the environment.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<Config> {
        loader::load(path.as_ref().map(|p| p.as_ref()))
    }

    /// Validates that the configured default provider can actually be used.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }

    /// Whether the given provider has the credentials it needs to serve requests.
    pub fn provider_enabled(&self, provider: AiProvider) -> bool {
        match provider {
            AiProvider::Openai => self.openai.api_key.is_some() || self.gateway.api_key.is_some(),
            AiProvider::Codex => match self.codex.auth_mode {
                CodexAuthMode::ApiKey => self.codex.api_key.is_some(),
                CodexAuthMode::Chatgpt => self.codex.auth_file_path().exists(),
            },
            AiProvider::ClaudeCode => self.claude_code.api_key.is_some() || self.gateway.api_key.is_some(),
        }
    }
}
