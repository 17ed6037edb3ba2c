//! CLI command handlers.

use std::time::Duration;

use abacus_config::LoadedConfig;
use abacus_mcp::{ClientConfig, Endpoint};
use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub mod ask;
pub mod call;
pub mod chat;
pub mod config;
pub mod repl;
pub mod serve;
pub mod tools;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Endpoint to connect to (flag, env, or config).
    pub endpoint: String,
    /// Bound on the wait for each response.
    pub request_timeout: Duration,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Client settings for the configured endpoint.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let endpoint: Endpoint = self.endpoint.parse()?;
        Ok(ClientConfig::new(endpoint).with_request_timeout(self.request_timeout))
    }
}

/// A token that fires on Ctrl-C.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            signal.cancel();
        }
    });
    token
}
