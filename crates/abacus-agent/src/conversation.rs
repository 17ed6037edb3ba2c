//! Multi-turn conversation driver.
//!
//! Each user message becomes a [`Turn`]: the planner proposes calls, the
//! calls go through the client in order, and the outcome is summarized in a
//! short reply. The value of the last successful call carries over so later
//! messages can refer to "the result".

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use abacus_mcp::{Arguments, CallOutcome, CorrelationId, ErrorKind, McpClient, McpError};

use crate::error::Result;
use crate::planner::{PlanContext, Planner};

/// Why a recorded call failed.
///
/// Extends the wire [`ErrorKind`] with failures that never produced a tool
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    UnknownTool,
    InvalidArgument,
    ComputationError,
    /// No response within the request timeout.
    Timeout,
    /// The server rejected the request at the JSON-RPC level.
    ServerError,
}

impl FailureKind {
    /// Kind for a client error that leaves the session usable.
    ///
    /// `None` means the error should end the turn instead of being recorded.
    pub fn from_error(error: &McpError) -> Option<Self> {
        if error.is_fatal() {
            return None;
        }
        match error {
            McpError::Timeout { .. } => Some(Self::Timeout),
            McpError::ServerError { .. } => Some(Self::ServerError),
            other => other.kind().map(Self::from),
        }
    }
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::UnknownTool => Self::UnknownTool,
            ErrorKind::InvalidArgument => Self::InvalidArgument,
            ErrorKind::ComputationError => Self::ComputationError,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnknownTool => "UnknownTool",
            Self::InvalidArgument => "InvalidArgument",
            Self::ComputationError => "ComputationError",
            Self::Timeout => "Timeout",
            Self::ServerError => "ServerError",
        };
        f.write_str(name)
    }
}

/// What a recorded call produced, tagged by `status` like a call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RecordedOutcome {
    Success {
        value: Value,
    },
    Error {
        #[serde(rename = "errorKind")]
        kind: FailureKind,
        message: String,
    },
}

impl RecordedOutcome {
    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<CallOutcome> for RecordedOutcome {
    fn from(outcome: CallOutcome) -> Self {
        match outcome {
            CallOutcome::Success { value } => Self::Success { value },
            CallOutcome::Error {
                error_kind,
                message,
            } => Self::Error {
                kind: error_kind.into(),
                message,
            },
        }
    }
}

/// A call made during a turn and what came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Correlation id, if the call reached the server.
    pub correlation_id: Option<CorrelationId>,
    /// Tool invoked.
    pub tool_name: String,
    /// Arguments sent.
    pub arguments: Arguments,
    /// Value or structured failure.
    pub outcome: RecordedOutcome,
}

/// One user message and the agent's handling of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the conversation, starting at 1.
    pub index: usize,
    /// The user's input message.
    pub user_message: String,
    /// Calls issued for this message, in order.
    pub calls: Vec<CallRecord>,
    /// Reply shown to the user.
    pub reply: String,
}

impl Turn {
    /// Whether any call in this turn failed.
    pub fn has_failure(&self) -> bool {
        self.calls.iter().any(|c| c.outcome.is_error())
    }
}

/// Drives a planner and a tool session across several messages.
pub struct Conversation {
    client: Arc<McpClient>,
    planner: Box<dyn Planner>,
    history: Vec<Turn>,
    last_result: Option<Value>,
}

impl Conversation {
    /// Start a conversation over a connected client.
    pub fn new(client: Arc<McpClient>, planner: impl Planner + 'static) -> Self {
        Self {
            client,
            planner: Box::new(planner),
            history: Vec::new(),
            last_result: None,
        }
    }

    /// The session calls go through.
    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }

    /// Turns so far, oldest first.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Value produced by the most recent successful call.
    pub fn last_result(&self) -> Option<&Value> {
        self.last_result.as_ref()
    }

    /// Handle one user message and return the reply.
    ///
    /// Tool-level failures (unknown tool, bad arguments, computation errors,
    /// timeouts) are described in the reply and leave the conversation usable.
    /// Session failures and planning errors are returned as errors.
    pub async fn send(&mut self, message: &str) -> Result<&Turn> {
        let index = self.history.len() + 1;
        tracing::info!(turn = index, message_len = message.len(), "turn started");

        let tools = self.client.discover()?;
        let context = PlanContext {
            tools: &tools,
            message,
            last_result: self.last_result.as_ref(),
        };
        let plan = self.planner.plan(&context).await?;

        let mut calls = Vec::with_capacity(plan.len());
        let mut failure = None;

        for planned in plan {
            let (correlation_id, outcome) = match self
                .client
                .invoke_request(&planned.tool_name, planned.arguments.clone())
                .await
            {
                Ok(result) => (Some(result.correlation_id), result.outcome.into()),
                Err(e) => match FailureKind::from_error(&e) {
                    Some(kind) => {
                        let correlation_id = match &e {
                            McpError::Timeout { correlation_id, .. } => Some(correlation_id.clone()),
                            _ => None,
                        };
                        (correlation_id, RecordedOutcome::error(kind, e.to_string()))
                    }
                    None => return Err(e.into()),
                },
            };

            tracing::debug!(
                turn = index,
                tool = %planned.tool_name,
                failed = outcome.is_error(),
                "call finished"
            );

            let stop = match &outcome {
                RecordedOutcome::Success { value } => {
                    self.last_result = Some(value.clone());
                    false
                }
                RecordedOutcome::Error { kind, message } => {
                    failure = Some(format!("{} ({})", message, kind));
                    true
                }
            };

            calls.push(CallRecord {
                correlation_id,
                tool_name: planned.tool_name,
                arguments: planned.arguments,
                outcome,
            });
            if stop {
                break;
            }
        }

        let reply = match (&failure, calls.last()) {
            (Some(reason), _) => format!("I couldn't compute that: {}.", reason),
            (None, Some(_)) => match &self.last_result {
                Some(value) => format!("The result is {}.", format_value(value)),
                None => "Done.".to_string(),
            },
            (None, None) => "I didn't find a calculation to perform.".to_string(),
        };

        tracing::info!(turn = index, calls = calls.len(), "turn completed");
        self.history.push(Turn {
            index,
            user_message: message.to_string(),
            calls,
            reply,
        });
        Ok(&self.history[self.history.len() - 1])
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("client", &self.client)
            .field("turns", &self.history.len())
            .field("last_result", &self.last_result)
            .finish_non_exhaustive()
    }
}

/// Render a value for a reply, dropping a zero fractional part.
pub fn format_value(value: &Value) -> String {
    match value.as_f64() {
        Some(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", n as i64),
        Some(n) => n.to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use abacus_mcp::codec::{self, ClientMessage};
    use abacus_mcp::protocol::methods;
    use abacus_mcp::{
        ClientConfig, Endpoint, FramedTransport, McpServer, SessionState, Transport, calculator,
    };
    use serde_json::json;

    use super::*;
    use crate::error::AgentError;
    use crate::planner::KeywordPlanner;

    async fn conversation() -> Conversation {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (sr, sw) = tokio::io::split(server_io);
        let server = McpServer::new("math_server", Arc::new(calculator::registry().unwrap()));
        tokio::spawn(async move {
            let transport: Arc<dyn Transport> = Arc::new(FramedTransport::from_io("server", sr, sw));
            let _ = server.serve_connection(transport).await;
        });

        let (cr, cw) = tokio::io::split(client_io);
        let client = McpClient::connect_with_transport(
            Arc::new(FramedTransport::from_io("client", cr, cw)),
            ClientConfig::new(Endpoint::tcp("in-memory:0")),
        )
        .await
        .unwrap();
        Conversation::new(Arc::new(client), KeywordPlanner::new())
    }

    /// Server that completes the handshake but never answers tools/call.
    async fn stalled_conversation(timeout: Duration) -> Conversation {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (sr, sw) = tokio::io::split(server_io);
        let server = McpServer::new("math_server", Arc::new(calculator::registry().unwrap()));
        tokio::spawn(async move {
            let transport = FramedTransport::from_io("stalled", sr, sw);
            while let Ok(Some(frame)) = transport.receive().await {
                let Ok(ClientMessage::Request(request)) = codec::decode_client_message(&frame)
                else {
                    continue;
                };
                if request.method == methods::TOOLS_CALL {
                    continue;
                }
                let response = server.handle_request(request).await;
                let _ = transport.send(&codec::encode(&response).unwrap()).await;
            }
        });

        let (cr, cw) = tokio::io::split(client_io);
        let client = McpClient::connect_with_transport(
            Arc::new(FramedTransport::from_io("client", cr, cw)),
            ClientConfig::new(Endpoint::tcp("in-memory:0")).with_request_timeout(timeout),
        )
        .await
        .unwrap();
        Conversation::new(Arc::new(client), KeywordPlanner::new())
    }

    #[test]
    fn test_failure_kind_from_error() {
        let timeout = McpError::Timeout {
            correlation_id: CorrelationId::new("abcd1234-1"),
            after: Duration::from_millis(5),
        };
        assert_eq!(FailureKind::from_error(&timeout), Some(FailureKind::Timeout));
        let rejected = McpError::ServerError {
            code: -32601,
            message: "method not found".into(),
            data: None,
        };
        assert_eq!(FailureKind::from_error(&rejected), Some(FailureKind::ServerError));
        assert_eq!(
            FailureKind::from_error(&McpError::Computation("boom".into())),
            Some(FailureKind::ComputationError)
        );
        assert_eq!(FailureKind::from_error(&McpError::SessionClosed), None);
        assert_eq!(FailureKind::from_error(&McpError::spawn_failed("gone")), None);
    }

    #[test]
    fn test_recorded_outcome_shape() {
        let outcome = RecordedOutcome::error(FailureKind::Timeout, "no answer");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["errorKind"], "Timeout");
        assert!(outcome.is_error());
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!(33.0)), "33");
        assert_eq!(format_value(&json!(-4)), "-4");
        assert_eq!(format_value(&json!(0.25)), "0.25");
        assert_eq!(format_value(&json!("text")), "\"text\"");
    }

    #[tokio::test]
    async fn test_chained_turns() {
        let mut convo = conversation().await;

        let turn = convo.send("What is 15 plus 7?").await.unwrap();
        assert_eq!(turn.reply, "The result is 22.");
        assert!(turn.calls[0].correlation_id.is_some());

        let turn = convo.send("Multiply that result by 3").await.unwrap();
        assert_eq!(turn.reply, "The result is 66.");

        let turn = convo.send("Now divide the result by 2").await.unwrap();
        assert_eq!(turn.reply, "The result is 33.");

        assert_eq!(convo.history().len(), 3);
        assert_eq!(convo.last_result().and_then(Value::as_f64), Some(33.0));
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_session_survives() {
        let mut convo = conversation().await;
        convo.send("15 plus 7").await.unwrap();

        let turn = convo.send("divide it by 0").await.unwrap();
        assert!(turn.has_failure());
        assert!(turn.reply.contains("Cannot divide by zero"));
        assert!(turn.reply.contains("ComputationError"));

        // The failed call does not replace the carried value
        assert_eq!(convo.last_result().and_then(Value::as_f64), Some(22.0));
        let turn = convo.send("times 2").await.unwrap();
        assert_eq!(turn.reply, "The result is 44.");
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_timeout() {
        let mut convo = stalled_conversation(Duration::from_millis(100)).await;

        let turn = convo.send("What is 15 plus 7?").await.unwrap();
        assert!(turn.has_failure());
        assert_eq!(turn.calls.len(), 1);
        match &turn.calls[0].outcome {
            RecordedOutcome::Error { kind, .. } => assert_eq!(*kind, FailureKind::Timeout),
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(turn.calls[0].correlation_id.is_some());
        assert!(turn.reply.contains("(Timeout)"));

        // Only the call was abandoned
        assert_eq!(convo.client().state(), SessionState::Connected);
        assert!(convo.last_result().is_none());
        assert_eq!(convo.history().len(), 1);
    }

    #[tokio::test]
    async fn test_message_without_calculation() {
        let mut convo = conversation().await;
        let turn = convo.send("good morning").await.unwrap();
        assert!(turn.calls.is_empty());
        assert_eq!(turn.reply, "I didn't find a calculation to perform.");
    }

    #[tokio::test]
    async fn test_planning_error_propagates() {
        let mut convo = conversation().await;
        let err = convo.send("multiply it by 3").await.unwrap_err();
        assert!(matches!(err, AgentError::Planning(_)));
        assert!(convo.history().is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_is_an_error() {
        let mut convo = conversation().await;
        convo.client.close().await.unwrap();
        let err = convo.send("1 plus 1").await.unwrap_err();
        assert!(matches!(err, AgentError::Mcp(abacus_mcp::McpError::SessionClosed)));
    }
}
