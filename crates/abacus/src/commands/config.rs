//! Config command - configuration management.

use std::path::PathBuf;

use abacus_config::AbacusConfig;
use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use console::style;
use serde_json::json;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./abacus.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local, force } => cmd_init(ctx, local, force),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = &ctx.loaded.config;
    let bind = config
        .server_bind()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|e| format!("invalid ({})", e));
    let level = config.log_level().unwrap_or("invalid");

    if ctx.json_output {
        let value = json!({
            "server": { "name": config.server_name(), "bind": bind },
            "client": {
                "endpoint": ctx.endpoint,
                "request_timeout_ms": ctx.request_timeout.as_millis() as u64,
            },
            "logging": { "level": level, "file": config.log_to_file() },
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", style("# Abacus Configuration").bold());
    println!();

    let sources = ctx.loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
    }
    println!();

    println!("{}", style("[server]").cyan());
    println!("  {:<20} {}", "name", config.server_name());
    println!("  {:<20} {}", "bind", bind);
    println!("{}", style("[client]").cyan());
    println!("  {:<20} {}", "endpoint", ctx.endpoint);
    println!("  {:<20} {}", "request_timeout_ms", ctx.request_timeout.as_millis());
    println!("{}", style("[logging]").cyan());
    println!("  {:<20} {}", "level", level);
    println!("  {:<20} {}", "file", config.log_to_file());

    if !ctx.loaded.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &ctx.loaded.warnings {
            println!("  {}", style(warning).yellow());
        }
    }

    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    println!("Config file search order (later overrides earlier):\n");

    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = ctx.loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'abacus config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

fn cmd_init(ctx: &Context, local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("abacus.toml")
    } else {
        user_config_path(ctx)?
    };

    if path.exists() && !force {
        println!("Config file already exists: {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    abacus_config::save_config(&AbacusConfig::with_defaults(), &path)?;
    println!("Created {}", path.display());
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    println!("{}", user_config_path(ctx)?.display());
    Ok(())
}

fn user_config_path(ctx: &Context) -> Result<PathBuf> {
    ctx.loaded
        .user_config_path()
        .ok_or_else(|| anyhow!("Could not determine config directory"))
}
