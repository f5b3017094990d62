//! Upstream provider configuration structures.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use secrecy::SecretString;
use serde::Deserialize;

/// The upstream provider an inbound request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AiProvider {
    /// An OpenAI-compatible chat completions API.
    #[default]
    Openai,
    /// The ChatGPT-Codex responses API.
    Codex,
    /// An Anthropic-style messages API.
    #[serde(alias = "claudeCode")]
    ClaudeCode,
}

impl AiProvider {
    /// Stable name used in logs and the health payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::Openai => "openai",
            AiProvider::Codex => "codex",
            AiProvider::ClaudeCode => "claude-code",
        }
    }
}

/// Configuration for the OpenAI-compatible provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenAiConfig {
    /// API key sent as a bearer token.
    pub api_key: Option<SecretString>,
    /// Custom base URL; defaults to the official endpoint.
    pub base_url: Option<String>,
    /// Upstream model name requests are rewritten to.
    pub model: String,
    /// Upstream request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Optional organization header.
    pub organization: Option<String>,
    /// Opaque extra request body merged verbatim into upstream requests.
    /// Recognized fields always take priority over these entries.
    pub extra_body: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "gpt-4o".to_string(),
            timeout_ms: 1_800_000,
            organization: None,
            extra_body: None,
        }
    }
}

impl OpenAiConfig {
    /// The upstream request deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How the Codex provider authenticates upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CodexAuthMode {
    /// Static API key.
    #[serde(alias = "ApiKey")]
    ApiKey,
    /// Refresh-token OAuth against the ChatGPT backend.
    #[default]
    #[serde(alias = "ChatGPT")]
    Chatgpt,
}

/// Reasoning effort requested from the Codex model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Minimal reasoning.
    Minimal,
    /// Low reasoning.
    Low,
    /// Medium reasoning.
    #[default]
    Medium,
    /// High reasoning.
    High,
}

/// Reasoning summary style requested from the Codex model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    /// Let the provider decide.
    #[default]
    Auto,
    /// Short summaries.
    Concise,
    /// Long summaries.
    Detailed,
    /// No summaries.
    None,
}

/// Output length knob for the Codex model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextVerbosity {
    /// Terse output.
    Low,
    /// Default output length.
    #[default]
    Medium,
    /// Verbose output.
    High,
}

/// Reasoning knobs propagated into Codex requests.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ReasoningConfig {
    /// Reasoning effort.
    pub effort: ReasoningEffort,
    /// Reasoning summary style.
    pub summary: ReasoningSummary,
}

/// Configuration for the ChatGPT-Codex responses provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodexConfig {
    /// Upstream authentication flavor.
    pub auth_mode: CodexAuthMode,
    /// API key for the api-key auth mode.
    pub api_key: Option<SecretString>,
    /// Custom base URL; defaults to the ChatGPT backend.
    pub base_url: Option<String>,
    /// Upstream model name requests are rewritten to.
    pub model: String,
    /// Upstream request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Reasoning knobs forwarded upstream.
    pub reasoning: ReasoningConfig,
    /// Output length knob forwarded upstream.
    pub text_verbosity: TextVerbosity,
    /// Override for the on-disk ChatGPT auth record location.
    pub auth_file: Option<PathBuf>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            auth_mode: CodexAuthMode::default(),
            api_key: None,
            base_url: None,
            model: "gpt-5".to_string(),
            timeout_ms: 1_800_000,
            reasoning: ReasoningConfig::default(),
            text_verbosity: TextVerbosity::default(),
            auth_file: None,
        }
    }
}

impl CodexConfig {
    /// The upstream request deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The on-disk location of the ChatGPT auth record.
    pub fn auth_file_path(&self) -> PathBuf {
        if let Some(path) = &self.auth_file {
            return path.clone();
        }

        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(".codex").join("auth.json")
    }
}

/// Configuration for the Anthropic messages provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClaudeCodeConfig {
    /// API key sent as `x-api-key`.
    pub api_key: Option<SecretString>,
    /// Custom base URL; defaults to the official endpoint.
    pub base_url: Option<String>,
    /// Upstream model name requests are rewritten to.
    pub model: String,
    /// Upstream request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Value of the `anthropic-version` header.
    pub anthropic_version: String,
    /// Beta feature flags joined into the `anthropic-beta` header.
    pub beta: Vec<String>,
    /// Override for the upstream user agent.
    pub user_agent: Option<String>,
    /// Value of the `x-app` header, if any.
    pub x_app: Option<String>,
    /// Sets the `anthropic-dangerous-direct-browser-access` header.
    pub dangerous_direct_browser_access: bool,
    /// Default `max_tokens` when the client does not specify one.
    pub max_output_tokens: u32,
    /// Extra headers sent verbatim on every upstream request.
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "claude-sonnet-4-20250514".to_string(),
            timeout_ms: 1_800_000,
            anthropic_version: "2023-06-01".to_string(),
            beta: Vec::new(),
            user_agent: None,
            x_app: None,
            dangerous_direct_browser_access: false,
            max_output_tokens: 32_000,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl ClaudeCodeConfig {
    /// The upstream request deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
