//! Error types for the agent crate.

use abacus_mcp::McpError;
use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The tool session failed in a way the conversation cannot recover from.
    #[error("Tool session error: {0}")]
    Mcp(#[from] McpError),

    /// The planner could not turn the message into calls.
    #[error("Planning error: {0}")]
    Planning(String),
}

impl AgentError {
    /// Create a planning error.
    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning(msg.into())
    }
}
