pub mod config;
pub mod proactive;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// Parley conversation runtime utilities.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
pub struct Cli {
    /// Emit JSON logs instead of compact text.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Settings utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Proactive scheduler utilities.
    #[command(subcommand)]
    Proactive(ProactiveCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the settings file and report any errors.
    Validate,
    /// Dump the resolved settings (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum ProactiveCommand {
    /// Print when each enabled assistant would fire next.
    Plan {
        /// Evaluation time (RFC 3339). Defaults to now.
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Last user message (RFC 3339).
        #[arg(long)]
        last_user_message: Option<DateTime<Utc>>,
        /// Last finished generation (RFC 3339).
        #[arg(long)]
        last_conversation_done: Option<DateTime<Utc>>,
        /// Last time the app went to the background (RFC 3339).
        #[arg(long)]
        last_app_backgrounded: Option<DateTime<Utc>>,
    },
}

// ── Settings loading helper ───────────────────────────────────────────

/// Load settings from the path in `PARLEY_CONFIG` (or `parley.toml` by
/// default). A missing file yields the defaults. Returns the settings and
/// the path that was used.
pub fn load_config() -> anyhow::Result<(parley_domain::config::Settings, String)> {
    let config_path =
        std::env::var("PARLEY_CONFIG").unwrap_or_else(|_| "parley.toml".into());

    let settings = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        parley_domain::config::Settings::default()
    };

    Ok((settings, config_path))
}
