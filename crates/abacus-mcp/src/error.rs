//! Error types for tool protocol operations.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CorrelationId, ErrorKind};

/// Result type for tool protocol operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for tool protocol operations.
///
/// Tool-level failures (`UnknownTool`, `InvalidArgument`, `Computation`) are
/// scoped to a single call and leave the session usable. `Transport` and
/// `Protocol` failures invalidate the session.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn a stdio server process.
    #[error("failed to spawn tool server: {0}")]
    SpawnFailed(String),

    /// The connection could not be established or was lost.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed data on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server rejected the request at the JSON-RPC level.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// The named tool is not advertised by the server.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Arguments do not satisfy the tool's declared parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The call was well-formed but the tool could not produce a result.
    #[error("computation error: {0}")]
    Computation(String),

    /// No response arrived within the request timeout.
    #[error("request {correlation_id} timed out after {after:?}")]
    Timeout {
        /// The abandoned correlation id.
        correlation_id: CorrelationId,
        /// How long the caller waited.
        after: Duration,
    },

    /// The session is closing or closed.
    #[error("session closed")]
    SessionClosed,

    /// The session was cancelled by an external signal.
    #[error("session cancelled")]
    Cancelled,

    /// A tool with the same name is already registered.
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    /// Operation not valid in the current session state.
    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a computation error.
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    /// Build the error carried by a structured tool failure.
    pub fn from_tool_failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::UnknownTool => Self::UnknownTool(message),
            ErrorKind::InvalidArgument => Self::InvalidArgument(message),
            ErrorKind::ComputationError => Self::Computation(message),
        }
    }

    /// The wire error kind for tool-level failures, if this is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::UnknownTool(_) => Some(ErrorKind::UnknownTool),
            Self::InvalidArgument(_) => Some(ErrorKind::InvalidArgument),
            Self::Computation(_) => Some(ErrorKind::ComputationError),
            _ => None,
        }
    }

    /// Whether this error means the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Protocol(_)
                | Self::Io(_)
                | Self::Json(_)
                | Self::SessionClosed
                | Self::Cancelled
        )
    }
}
