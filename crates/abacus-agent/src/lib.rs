//! Planner interface and conversation driver for Abacus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Conversation                                               │
//! │  - one Turn per user message                                │
//! │  - carries the last result between turns                    │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                             │
//!                 ▼                             ▼
//!          ┌────────────┐               ┌──────────────┐
//!          │  Planner   │               │  McpClient   │
//!          │ (pluggable)│               │ (abacus-mcp) │
//!          └────────────┘               └──────────────┘
//! ```
//!
//! The planner only proposes calls. Anything it gets wrong (a tool the
//! server does not offer, a missing argument) is rejected by the client
//! before it reaches the wire.

pub mod conversation;
pub mod error;
pub mod planner;

pub use conversation::{
    CallRecord, Conversation, FailureKind, RecordedOutcome, Turn, format_value,
};
pub use error::{AgentError, Result};
pub use planner::{KeywordPlanner, PlanContext, PlannedCall, Planner};
