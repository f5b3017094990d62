//! Builds the gateway server from validated configuration, constructing only
//! the providers that have usable credentials.

use std::sync::Arc;

use config::{CodexAuthMode, Config};
use secrecy::SecretString;

use crate::{
    provider::{
        claude::ClaudeProvider,
        codex::{CodexCredentials, CodexProvider, auth::CodexAuthStore},
        openai::OpenAiProvider,
    },
    server::{GatewayServer, GatewayServerInner},
};

pub(crate) struct GatewayServerBuilder<'a> {
    config: &'a Config,
}

impl<'a> GatewayServerBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn build(self) -> crate::Result<GatewayServer> {
        let config = self.config;

        // The gateway-level key seeds providers that have none of their own.
        let seed_key = config.gateway.api_key.clone();

        let openai = match config.openai.api_key.clone().or_else(|| seed_key.clone()) {
            Some(key) => Some(OpenAiProvider::new(config.openai.clone(), key)?),
            None => None,
        };

        let codex = match codex_credentials(config, seed_key.clone()) {
            Some(credentials) => Some(CodexProvider::new(config.codex.clone(), credentials)?),
            None => None,
        };

        let claude = match config.claude_code.api_key.clone().or(seed_key) {
            Some(key) => Some(ClaudeProvider::new(config.claude_code.clone(), key)?),
            None => None,
        };

        let enabled: Vec<&str> = [
            openai.as_ref().map(|_| "openai"),
            codex.as_ref().map(|_| "codex"),
            claude.as_ref().map(|_| "claude-code"),
        ]
        .into_iter()
        .flatten()
        .collect();

        log::debug!(
            "Gateway server initialized, default provider {}, enabled: [{}]",
            config.ai_provider.as_str(),
            enabled.join(", ")
        );

        Ok(GatewayServer {
            shared: Arc::new(GatewayServerInner {
                default_provider: config.ai_provider,
                openai,
                codex,
                claude,
                request_timeout: config.gateway.request_timeout(),
            }),
        })
    }
}

fn codex_credentials(config: &Config, seed_key: Option<SecretString>) -> Option<CodexCredentials> {
    match config.codex.auth_mode {
        CodexAuthMode::ApiKey => config
            .codex
            .api_key
            .clone()
            .or(seed_key)
            .map(CodexCredentials::ApiKey),
        CodexAuthMode::Chatgpt => {
            let path = config.codex.auth_file_path();

            if path.exists() {
                Some(CodexCredentials::Chatgpt(Arc::new(CodexAuthStore::new(path))))
            } else {
                log::debug!("No ChatGPT auth record at {}, codex provider disabled", path.display());
                None
            }
        }
    }
}
