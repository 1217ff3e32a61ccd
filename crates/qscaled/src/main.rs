//! qscaled — the qscale daemon.
//!
//! Polls job queue depth and scales groups of compose services between
//! configured bounds:
//! - Redis queue sampler (`LLEN`)
//! - Docker Compose orchestrator (Engine API + `docker compose up --scale`)
//! - Control loop with per-group hysteresis and cooldown
//!
//! # Usage
//!
//! ```text
//! qscaled run --config /etc/qscale/qscale.toml
//! qscaled check-config --config qscale.toml
//! qscaled once --dry-run
//! ```

mod daemon;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,qscale=debug";

#[derive(Parser, Debug)]
#[command(name = "qscaled", about = "Queue-driven replica autoscaler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, env = "QSCALE_CONFIG", default_value = "qscale.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Log filter used when RUST_LOG is unset (e.g. `debug`, `info,qscale=trace`).
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop until SIGINT or SIGTERM.
    Run {
        /// Sample, decide and log, but never scale.
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration and print the effective settings.
    CheckConfig,

    /// Run a single tick and exit.
    Once {
        /// Sample, decide and log, but never scale.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.log_level.as_deref())?;

    match cli.command {
        Command::Run { dry_run } => daemon::run(&cli.config, dry_run).await,
        Command::CheckConfig => daemon::check_config(&cli.config),
        Command::Once { dry_run } => daemon::once(&cli.config, dry_run).await,
    }
}

fn init_tracing(format: LogFormat, level: Option<&str>) -> anyhow::Result<()> {
    let filter = log_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// `RUST_LOG` wins, then `--log-level`, then the default.
fn log_filter(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = level.unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directives).with_context(|| format!("invalid log filter {directives:?}"))
}
