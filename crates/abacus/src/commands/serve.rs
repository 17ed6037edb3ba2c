//! Serve command - run the arithmetic tool server.

use std::net::SocketAddr;
use std::sync::Arc;

use abacus_mcp::{McpServer, calculator};
use anyhow::{Context as _, Result};
use clap::Args;

use super::{Context, interrupt_token};

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides server.bind)
    #[arg(short, long, conflicts_with = "stdio")]
    pub bind: Option<SocketAddr>,

    /// Serve one session over stdin/stdout instead of TCP
    #[arg(long)]
    pub stdio: bool,

    /// Name advertised in the handshake (overrides server.name)
    #[arg(long)]
    pub name: Option<String>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.loaded.config;
    let name = args
        .name
        .unwrap_or_else(|| config.server_name().to_string());
    let registry = calculator::registry().context("failed to build tool registry")?;
    let server = McpServer::new(name, Arc::new(registry));

    if args.stdio {
        server.serve_stdio().await?;
        return Ok(());
    }

    let addr = match args.bind {
        Some(addr) => addr,
        None => config.server_bind()?,
    };

    server.serve_on(addr, interrupt_token()).await?;
    Ok(())
}
