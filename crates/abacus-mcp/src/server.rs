//! Tool server: answers discovery and call requests on a transport.
//!
//! Each connection is one session. Calls within a session run concurrently
//! and their responses go out as they complete, so clients must correlate by
//! id rather than by arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, ClientMessage};
use crate::error::{McpError, Result};
use crate::executor::ToolExecutor;
use crate::protocol::{
    CallOutcome, ErrorKind, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, ServerCapabilities, ServerInfo,
    ToolCallResult, ToolsCapability, methods,
};
use crate::registry::ToolRegistry;
use crate::transport::{FramedTransport, Transport};

/// A tool server bound to one registry.
#[derive(Debug, Clone)]
pub struct McpServer {
    info: ServerInfo,
    executor: ToolExecutor,
}

impl McpServer {
    /// Create a server advertising the given name.
    pub fn new(name: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            executor: ToolExecutor::new(registry),
        }
    }

    /// Name and version sent during the handshake.
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// The executor behind `tools/call`.
    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Serve one session until the peer disconnects.
    ///
    /// In-flight calls are allowed to finish before the transport is closed.
    pub async fn serve_connection(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let mut in_flight = JoinSet::new();

        let outcome = loop {
            let frame = match transport.receive().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            match codec::decode_client_message(&frame) {
                Ok(ClientMessage::Request(request)) => {
                    let server = self.clone();
                    let transport = transport.clone();
                    in_flight.spawn(async move {
                        let response = server.handle_request(request).await;
                        server.respond(transport.as_ref(), &response).await;
                    });
                }
                Ok(ClientMessage::Notification(notification)) => {
                    tracing::debug!(method = %notification.method, "received notification");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "rejecting malformed message");
                    let code = if serde_json::from_slice::<serde_json::Value>(&frame).is_ok() {
                        JsonRpcError::INVALID_REQUEST
                    } else {
                        JsonRpcError::PARSE_ERROR
                    };
                    let response = JsonRpcResponse::failure(
                        codec::peek_request_id(&frame),
                        JsonRpcError::new(code, e.to_string()),
                    );
                    self.respond(transport.as_ref(), &response).await;
                }
            }

            // Reap finished calls so the set does not grow with the session
            while in_flight.try_join_next().is_some() {}
        };

        while in_flight.join_next().await.is_some() {}
        transport.close().await?;

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "session ended with transport error");
        } else {
            tracing::debug!("session ended");
        }
        outcome
    }

    async fn respond(&self, transport: &dyn Transport, response: &JsonRpcResponse) {
        let payload = match codec::encode(response) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = transport.send(&payload).await {
            tracing::warn!(error = %e, "failed to send response");
        }
    }

    /// Produce the response for one request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match request.method.as_str() {
            methods::INITIALIZE => {
                if let Some(params) = request
                    .params
                    .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
                {
                    tracing::info!(
                        client = %params.client_info.name,
                        version = %params.client_info.version,
                        protocol = %params.protocol_version,
                        "client initialized"
                    );
                }
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: Some(false),
                        }),
                    },
                    server_info: self.info.clone(),
                };
                JsonRpcResponse::success(id, json!(result))
            }
            methods::TOOLS_LIST => {
                let tools = self.executor.registry().list_tools();
                tracing::debug!(tool_count = tools.len(), "listed tools");
                JsonRpcResponse::success(id, json!(ListToolsResult { tools }))
            }
            methods::TOOLS_CALL => match codec::decode_call_request(&request) {
                Ok(call) => {
                    let result = self.run_call(call).await;
                    JsonRpcResponse::success(id, json!(result.outcome))
                }
                Err(e) => JsonRpcResponse::failure(
                    Some(id),
                    JsonRpcError::new(JsonRpcError::INVALID_PARAMS, e.to_string()),
                ),
            },
            other => JsonRpcResponse::failure(
                Some(id),
                JsonRpcError::new(
                    JsonRpcError::METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                ),
            ),
        }
    }

    /// Execute a call on its own task so a panicking tool becomes a reported failure.
    async fn run_call(&self, call: crate::protocol::ToolCallRequest) -> ToolCallResult {
        let correlation_id = call.correlation_id.clone();
        let tool = call.tool_name.clone();
        let executor = self.executor.clone();

        match tokio::spawn(async move { executor.execute_call(&call).await }).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(tool = %tool, correlation_id = %correlation_id, error = %e, "tool task failed");
                ToolCallResult {
                    correlation_id,
                    outcome: CallOutcome::error(
                        ErrorKind::ComputationError,
                        format!("tool '{}' failed unexpectedly", tool),
                    ),
                }
            }
        }
    }

    /// Accept TCP sessions until `shutdown` fires. Each session runs on its own task.
    pub async fn serve_tcp(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, server = %self.info.name, "tool server listening");

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = stream.into_split();
                    let transport: Arc<dyn Transport> =
                        Arc::new(FramedTransport::from_io(peer.to_string(), read_half, write_half));
                    let server = self.clone();
                    tracing::info!(peer = %peer, "session opened");
                    sessions.spawn(async move {
                        let _ = server.serve_connection(transport).await;
                        tracing::info!(peer = %peer, "session closed");
                    });
                }
            }
            while sessions.try_join_next().is_some() {}
        }

        tracing::info!(active = sessions.len(), "tool server shutting down");
        sessions.shutdown().await;
        Ok(())
    }

    /// Bind `addr` and serve until `shutdown` fires.
    pub async fn serve_on(&self, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| McpError::transport(format!("failed to bind {}: {}", addr, e)))?;
        self.serve_tcp(listener, shutdown).await
    }

    /// Serve a single session over this process's stdin/stdout.
    pub async fn serve_stdio(&self) -> Result<()> {
        let transport: Arc<dyn Transport> = Arc::new(FramedTransport::from_io(
            "stdio",
            tokio::io::stdin(),
            tokio::io::stdout(),
        ));
        tracing::info!(server = %self.info.name, "serving over stdio");
        self.serve_connection(transport).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::calculator;
    use crate::protocol::CorrelationId;

    fn server() -> McpServer {
        McpServer::new("math_server", Arc::new(calculator::registry().unwrap()))
    }

    fn request(id: &str, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(CorrelationId::from(id), method, params)
    }

    #[tokio::test]
    async fn test_initialize() {
        let resp = server().handle_request(request("1", methods::INITIALIZE, None)).await;
        let result: InitializeResult = serde_json::from_value(resp.into_result().unwrap()).unwrap();
        assert_eq!(result.server_info.name, "math_server");
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let resp = server().handle_request(request("2", methods::TOOLS_LIST, None)).await;
        assert_eq!(resp.id.as_ref().map(|id| id.as_str()), Some("2"));
        let tools = codec::decode_tools(resp.into_result().unwrap()).unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "subtract", "multiply", "divide"]);
    }

    #[tokio::test]
    async fn test_tools_call_success_and_failure() {
        let srv = server();
        let ok = srv
            .handle_request(request(
                "3",
                methods::TOOLS_CALL,
                Some(json!({"name": "add", "arguments": {"a": 15, "b": 7}})),
            ))
            .await;
        let outcome = codec::decode_call_outcome(ok.into_result().unwrap()).unwrap();
        assert_eq!(outcome, CallOutcome::Success { value: json!(22.0) });

        let div0 = srv
            .handle_request(request(
                "4",
                methods::TOOLS_CALL,
                Some(json!({"name": "divide", "arguments": {"a": 66, "b": 0}})),
            ))
            .await;
        let outcome = codec::decode_call_outcome(div0.into_result().unwrap()).unwrap();
        assert!(matches!(
            outcome,
            CallOutcome::Error { error_kind: ErrorKind::ComputationError, .. }
        ));
    }

    #[tokio::test]
    async fn test_tools_call_without_params() {
        let resp = server().handle_request(request("5", methods::TOOLS_CALL, None)).await;
        assert_eq!(resp.into_result().unwrap_err().code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let resp = server().handle_request(request("6", "resources/list", None)).await;
        assert_eq!(resp.into_result().unwrap_err().code, JsonRpcError::METHOD_NOT_FOUND);
    }
}
