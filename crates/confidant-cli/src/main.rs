//! Confidant CLI — entry point.
//!
//! # Commands
//!
//! - `confidant run [--logs]` — start the Telegram bot, assistant loop, and scheduler
//! - `confidant status` — show configuration and model server status
//! - `confidant init [--force]` — write the default config file
//! - `confidant clear <SESSION>` — delete a session's stored history

mod gateway;
mod helpers;
mod init;
mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use confidant_core::config::load_config;
use confidant_core::session::DurableLog;
use confidant_core::utils::expand_home;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🤫 Confidant — a private Telegram companion backed by a local LM Studio model
#[derive(Parser)]
#[command(name = "confidant", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot (Telegram channel + assistant loop + scheduler)
    Run {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and model server status
    Status,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Delete the stored history of one session (e.g. "telegram:123456")
    Clear {
        session: String,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Status => status::run().await,
        Commands::Init { force } => init::run(force),
        Commands::Clear { session } => {
            init_logging(false);
            run_clear(&session).await
        }
    }
}

/// Clear a session directly in the database. A running bot keeps its
/// in-memory copy until it restarts or receives `/clear`.
async fn run_clear(session: &str) -> Result<()> {
    let config = load_config(None);
    let db_path = expand_home(&config.storage.database_path);
    let log = DurableLog::open(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let removed = log.clear(session).await.context("failed to clear session")?;
    log.close().await;

    println!(
        "  {} removed {} message(s) from {}",
        "✓".green(),
        removed,
        session.bold()
    );
    Ok(())
}

/// Default filter when `RUST_LOG` is not set.
fn default_filter(verbose: bool) -> String {
    let base = if verbose {
        "confidant=debug,info"
    } else {
        "warn,confidant=info"
    };
    format!("{base},reqwest=error,hyper=error,teloxide=error")
}

/// Initialize tracing/logging. `RUST_LOG` takes precedence over `--logs`.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
