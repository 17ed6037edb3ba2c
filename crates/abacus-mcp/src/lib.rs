//! Tool discovery and invocation protocol for Abacus.
//!
//! A server exposes a registry of typed tools; a client connects, discovers
//! the tool set, and issues calls that are validated locally, correlated by
//! id, and bounded by a timeout.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │  lifecycle::with_session     │        │  McpServer                   │
//! │  - connect / close once      │        │  - initialize, tools/list,   │
//! └──────────────────────────────┘        │    tools/call                │
//!               │                         └──────────────────────────────┘
//!               ▼                                        │
//! ┌──────────────────────────────┐                       ▼
//! │  McpClient                   │        ┌──────────────────────────────┐
//! │  - cached discovery          │        │  ToolExecutor                │
//! │  - local validation          │        │  - validate, run handler     │
//! │  - correlation + timeouts    │        └──────────────────────────────┘
//! └──────────────────────────────┘                       │
//!               │                                        ▼
//!               ▼                         ┌──────────────────────────────┐
//! ┌──────────────────────────────┐        │  ToolRegistry                │
//! │  codec + Transport           │◀──────▶│  - definitions + handlers    │
//! │  - JSON-RPC 2.0, framed      │  TCP / └──────────────────────────────┘
//! │  - TCP or child stdio        │  stdio
//! └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use abacus_mcp::{ClientConfig, Endpoint, with_session};
//! use serde_json::json;
//!
//! let config = ClientConfig::new("tcp://127.0.0.1:7878".parse::<Endpoint>()?);
//! let total = with_session(config, |client| async move {
//!     let args = json!({"a": 15, "b": 7}).as_object().cloned().unwrap_or_default();
//!     client.invoke("add", args).await
//! })
//! .await?;
//! ```
//!
//! # Wire format
//!
//! JSON-RPC 2.0 with Content-Length framing. Ids are strings and double as
//! correlation ids. Call results are tagged by `status`:
//!
//! ```text
//! {"status": "success", "value": 22.0}
//! {"status": "error", "errorKind": "ComputationError", "message": "Cannot divide by zero"}
//! ```

pub mod calculator;
pub mod client;
pub mod codec;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod transport;

// Re-export main types
pub use client::{ClientConfig, DEFAULT_REQUEST_TIMEOUT, McpClient};
pub use error::{McpError, Result};
pub use executor::ToolExecutor;
pub use lifecycle::{
    SessionState, StateCell, with_session, with_session_cancellable, with_transport_cancellable,
};
pub use protocol::{
    Arguments, CallOutcome, ClientInfo, CorrelationId, ErrorKind, ParameterSpec, ServerInfo,
    ToolCallRequest, ToolCallResult, ToolDefinition, ValueType,
};
pub use registry::{FnHandler, RegisteredTool, ToolHandler, ToolRegistry};
pub use server::McpServer;
pub use transport::{Endpoint, FramedTransport, Transport};
