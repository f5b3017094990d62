use std::path::Path;

use anyhow::{Context, bail};
use indoc::indoc;
use serde::Deserialize;
use toml::{Table, Value};

use crate::{AiProvider, Config};

/// Prefix for configuration environment variables.
///
/// `PRISM_GATEWAY__PORT=8080` maps to `gateway.port`, with `__` separating
/// table segments.
const ENV_PREFIX: &str = "PRISM_";

pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut layered = env_layer(std::env::vars());

    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let file: Table = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        // The file wins over the environment.
        merge_tables(&mut layered, file);
    }

    let config = Config::deserialize(Value::Table(layered)).context("Invalid configuration")?;
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    config.gateway.listen_address()?;

    if !config.provider_enabled(config.ai_provider) {
        match config.ai_provider {
            AiProvider::Openai => bail!(indoc! {r#"
                The openai provider is selected but has no API key configured.

                Either set one in the configuration file:

                  [openai]
                  api_key = "sk-..."

                or export PRISM_OPENAI__API_KEY.
            "#}),
            AiProvider::Codex => bail!(indoc! {r#"
                The codex provider is selected but has no usable credentials.

                For api-key mode, configure:

                  [codex]
                  auth_mode = "api-key"
                  api_key = "sk-..."

                For chatgpt mode, log in with the Codex CLI first so that
                ~/.codex/auth.json exists, or point codex.auth_file at an
                existing auth record.
            "#}),
            AiProvider::ClaudeCode => bail!(indoc! {r#"
                The claude-code provider is selected but has no API key configured.

                Either set one in the configuration file:

                  [claude_code]
                  api_key = "sk-ant-..."

                or export PRISM_CLAUDE_CODE__API_KEY.
            "#}),
        }
    }

    Ok(())
}

/// Build a toml table from `PRISM_*` environment variables.
///
/// `__` separates table segments; single underscores stay part of the key, so
/// `PRISM_CLAUDE_CODE__API_KEY` maps to `claude_code.api_key`.
fn env_layer(vars: impl Iterator<Item = (String, String)>) -> Table {
    let mut root = Table::new();

    'vars: for (key, value) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        let segments: Vec<String> = rest.split("__").map(|s| s.to_ascii_lowercase()).collect();

        if segments.iter().any(|s| s.is_empty()) {
            log::warn!("Ignoring malformed configuration variable {key}");
            continue;
        }

        let mut table = &mut root;

        for segment in &segments[..segments.len() - 1] {
            let entry = table
                .entry(segment.clone())
                .or_insert_with(|| Value::Table(Table::new()));

            match entry.as_table_mut() {
                Some(inner) => table = inner,
                None => {
                    log::warn!("Ignoring configuration variable {key}: {segment} is not a table");
                    continue 'vars;
                }
            }
        }

        if let Some(last) = segments.last() {
            table.insert(last.clone(), parse_env_value(&value));
        }
    }

    root
}

/// Environment values are strings; booleans and integers are recognized so
/// numeric options such as ports work without quoting tricks.
fn parse_env_value(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Boolean(b);
    }

    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }

    Value::String(raw.to_string())
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(base_inner)), Value::Table(overlay_inner)) => {
                merge_tables(base_inner, overlay_inner);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
