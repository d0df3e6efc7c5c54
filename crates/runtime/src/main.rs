use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use parley_runtime::cli::{Cli, Command, ConfigCommand, ProactiveCommand};
use parley_runtime::proactive::IdleSignals;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        init_json_tracing();
    } else {
        init_cli_tracing();
    }

    match cli.command {
        Command::Config(ConfigCommand::Validate) => {
            let (settings, config_path) = parley_runtime::cli::load_config()?;
            let valid = parley_runtime::cli::config::validate(&settings, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (settings, _config_path) = parley_runtime::cli::load_config()?;
            parley_runtime::cli::config::show(&settings)
        }
        Command::Proactive(ProactiveCommand::Plan {
            now,
            last_user_message,
            last_conversation_done,
            last_app_backgrounded,
        }) => {
            let (settings, _config_path) = parley_runtime::cli::load_config()?;
            let signals = IdleSignals {
                last_user_message_at: last_user_message,
                last_conversation_done_at: last_conversation_done,
                last_app_backgrounded_at: last_app_backgrounded,
            };
            let now = now.unwrap_or_else(chrono::Utc::now);
            parley_runtime::cli::proactive::plan(&settings, &signals, now);
            Ok(())
        }
        Command::Version => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON logs, as emitted by long-running hosts.
fn init_json_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,parley_runtime=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Quiet compact logs on stderr for one-shot commands.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
