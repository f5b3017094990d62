use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "prism", version, about = "Protocol-translating LLM gateway")]
pub(crate) struct Args {
    /// Path to the prism.toml configuration file.
    #[arg(short, long, env = "PRISM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured log filter (e.g. "info" or "gateway=debug").
    #[arg(long, env = "PRISM_LOG")]
    pub log_level: Option<String>,
}
