//! Abacus - arithmetic tools over a JSON-RPC tool protocol
//!
//! Main entry point for the Abacus CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

mod commands;

use commands::{ask, call, chat, config, serve, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Abacus - arithmetic tools over a JSON-RPC tool protocol
#[derive(Parser)]
#[command(name = "abacus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Tool server endpoint (tcp://host:port or stdio:<command>)
    #[arg(long, global = true, env = "ABACUS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Directory holding the user config file
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the arithmetic tool server
    Serve(serve::ServeArgs),

    /// List the tools a server offers
    Tools(tools::ToolsArgs),

    /// Invoke a single tool
    Call(call::CallArgs),

    /// Ask a one-shot arithmetic question
    Ask(ask::AskArgs),

    /// Enter interactive chat mode (REPL)
    Chat(chat::ChatArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = abacus_config::load_config_with_options(None, cli.config_dir.as_deref())
        .context("failed to load configuration")?;

    // Console output goes to stderr: stdout carries the protocol under `serve --stdio`
    let level = if cli.verbose {
        "debug"
    } else {
        loaded.config.log_level().unwrap_or(abacus_config::DEFAULT_LOG_LEVEL)
    };
    let filter = format!(
        "abacus={level},abacus_mcp={level},abacus_agent={level},abacus_config={level},warn"
    );
    let console_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter));

    let file_layer = match loaded.config_dir.as_ref() {
        Some(dir) if loaded.config.log_to_file() => {
            let file_appender = tracing_appender::rolling::daily(dir.join("logs"), "abacus.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "abacus=trace,abacus_mcp=trace,abacus_agent=trace,abacus_config=trace,info",
                ));
            Some((layer, guard))
        }
        _ => None,
    };
    let (file_layer, _guard) = match file_layer {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::debug!(sources = ?loaded.loaded_from(), "configuration loaded");

    let endpoint = cli
        .endpoint
        .unwrap_or_else(|| loaded.config.client_endpoint().to_string());
    let request_timeout = match cli.timeout_ms {
        Some(0) => anyhow::bail!("--timeout-ms must be greater than zero"),
        Some(ms) => std::time::Duration::from_millis(ms),
        None => loaded
            .config
            .request_timeout()
            .unwrap_or(abacus_mcp::DEFAULT_REQUEST_TIMEOUT),
    };

    // Create context for commands
    let ctx = commands::Context {
        loaded,
        endpoint,
        request_timeout,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Ask(args) => ask::run(args, &ctx).await,
        Commands::Chat(args) => chat::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
