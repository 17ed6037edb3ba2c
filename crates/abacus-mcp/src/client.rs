//! Tool client: handshake, discovery, validated and correlated calls.
//!
//! A background reader task owns the receive side of the transport and
//! routes each response to the caller waiting on its correlation id. Calls
//! may therefore be issued concurrently and answered in any order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::codec;
use crate::error::{McpError, Result};
use crate::lifecycle::{SessionState, StateCell};
use crate::protocol::{
    Arguments, ClientInfo, CorrelationId, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, ServerInfo, ToolCallRequest,
    ToolCallResult, ToolDefinition, methods,
};
use crate::schema::validate_arguments;
use crate::transport::{Endpoint, FramedTransport, Transport};

/// Default bound on the wait for any single response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How to reach and talk to a tool server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server location.
    pub endpoint: Endpoint,
    /// Bound on the wait for each response.
    pub request_timeout: Duration,
    /// Identity sent during the handshake.
    pub client_info: ClientInfo,
}

impl ClientConfig {
    /// Config for an endpoint with default timeout and identity.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_info: ClientInfo::default(),
        }
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the identity sent during the handshake.
    pub fn with_client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }
}

type PendingReply = oneshot::Sender<Result<JsonRpcResponse>>;

/// State shared between the client handle and its reader task.
struct Session {
    transport: Arc<dyn Transport>,
    state: StateCell,
    /// Requests awaiting a response. Removing an entry abandons its id.
    pending: Mutex<HashMap<CorrelationId, PendingReply>>,
    /// Set once the transport fails or the server hangs up.
    lost: Mutex<Option<String>>,
    id_prefix: String,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl Session {
    fn next_correlation_id(&self) -> CorrelationId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        CorrelationId::new(format!("{}-{}", self.id_prefix, n))
    }

    fn check_link(&self) -> Result<()> {
        match self.lost.lock().as_ref() {
            Some(reason) => Err(McpError::transport(format!("connection lost: {}", reason))),
            None => Ok(()),
        }
    }

    /// Send a request and wait for its response.
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.check_link()?;

        let id = request.id.clone();
        let payload = codec::encode(&request)?;

        // Register before sending so a fast reply cannot arrive unclaimed
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        if let Err(e) = self.transport.send(&payload).await {
            self.pending.lock().remove(&id);
            self.mark_lost(&e.to_string());
            return Err(e);
        }
        tracing::trace!(correlation_id = %id, method = %request.method, "request sent");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Sender dropped without a reply: the session was torn down
            Ok(Err(_)) => Err(McpError::SessionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                tracing::warn!(
                    correlation_id = %id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "request timed out; abandoning"
                );
                Err(McpError::Timeout {
                    correlation_id: id,
                    after: self.request_timeout,
                })
            }
        }
    }

    /// Send a request and unwrap its JSON-RPC result.
    async fn call_method(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = JsonRpcRequest::new(self.next_correlation_id(), method, params);
        self.request(request)
            .await?
            .into_result()
            .map_err(|e| McpError::server_error(e.code, e.message, e.data))
    }

    async fn notify(&self, method: &str) -> Result<()> {
        self.check_link()?;
        let payload = codec::encode(&JsonRpcNotification::new(method, None))?;
        self.transport.send(&payload).await
    }

    /// Route one inbound frame to its waiter.
    fn dispatch(&self, frame: &[u8]) {
        let response = match codec::decode_response(frame) {
            Ok(response) => response,
            Err(e) => {
                // Fail only the exchange the frame belongs to, if we can tell which
                let waiter = codec::peek_request_id(frame).and_then(|id| self.pending.lock().remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                    }
                    None => tracing::warn!(error = %e, "discarding undecodable frame"),
                }
                return;
            }
        };

        let Some(id) = response.id.clone() else {
            tracing::warn!(error = ?response.error, "discarding response without id");
            return;
        };

        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(Ok(response)).is_err() {
                    tracing::debug!(correlation_id = %id, "caller went away before response");
                }
            }
            None => {
                tracing::debug!(correlation_id = %id, "discarding response for unknown or abandoned request");
            }
        }
    }

    fn mark_lost(&self, reason: &str) {
        let mut lost = self.lost.lock();
        if lost.is_none() {
            tracing::warn!(reason = %reason, "connection to tool server lost");
            *lost = Some(reason.to_string());
        }
    }

    /// Fail every outstanding request with an error built by `make`.
    fn drain_pending(&self, make: impl Fn() -> McpError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (id, tx) in drained {
            tracing::debug!(correlation_id = %id, "failing outstanding request");
            let _ = tx.send(Err(make()));
        }
    }

    async fn read_loop(self: Arc<Self>) {
        let reason = loop {
            match self.transport.receive().await {
                Ok(Some(frame)) => self.dispatch(&frame),
                Ok(None) => break "server closed the connection".to_string(),
                Err(e) => break e.to_string(),
            }
        };

        if self.state.get().is_terminal() {
            self.drain_pending(|| McpError::SessionClosed);
        } else {
            self.mark_lost(&reason);
            self.drain_pending(|| McpError::transport(format!("connection lost: {}", reason)));
        }
    }
}

/// Owns a session while `establish` runs.
///
/// Unless the handshake completes, the session is torn down: inline on a
/// handshake failure, or on a spawned task when the connect future is dropped
/// (cancelled or timed out by the caller).
struct EstablishGuard {
    session: Arc<Session>,
    reader: Option<JoinHandle<()>>,
    done: bool,
}

impl EstablishGuard {
    fn new(session: Arc<Session>, reader: JoinHandle<()>) -> Self {
        Self {
            session,
            reader: Some(reader),
            done: false,
        }
    }

    /// Handshake succeeded: hand the reader task to the client.
    fn complete(mut self) -> Option<JoinHandle<()>> {
        self.done = true;
        self.reader.take()
    }

    /// Handshake failed: release everything before returning the error.
    async fn abandon(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.session.state.begin_close() {
            release(&self.session).await;
        }
        self.done = true;
    }
}

impl Drop for EstablishGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if !self.session.state.begin_close() {
            return;
        }

        tracing::debug!("connect abandoned before the handshake finished");
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { release(&session).await });
            }
            Err(_) => {
                // Dropping the last reference still drops the socket or kills the child
                tracing::warn!("no runtime to release abandoned connection");
            }
        }
    }
}

/// Fail waiters, close the transport, and mark the session closed.
///
/// Callers must have won [`StateCell::begin_close`].
async fn release(session: &Session) {
    session.drain_pending(|| McpError::SessionClosed);
    if let Err(e) = session.transport.close().await {
        tracing::debug!(error = %e, "transport close failed");
    }
    session.state.finish_close();
}

/// A connected session with one tool server.
///
/// Obtained from [`McpClient::connect`], which completes the handshake and
/// discovery before returning. The discovered tool set is fixed for the
/// life of the session.
pub struct McpClient {
    session: Arc<Session>,
    reader: Mutex<Option<JoinHandle<()>>>,
    server_info: ServerInfo,
    tools: Vec<ToolDefinition>,
    label: String,
}

impl McpClient {
    /// Open a transport to `config.endpoint` and establish a session.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport = FramedTransport::open(&config.endpoint).await?;
        let label = config.endpoint.to_string();
        Self::establish(Arc::new(transport), label, &config).await
    }

    /// Establish a session over an already-open transport.
    ///
    /// `config.endpoint` is used only as a label.
    pub async fn connect_with_transport(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        let label = config.endpoint.to_string();
        Self::establish(transport, label, &config).await
    }

    async fn establish(
        transport: Arc<dyn Transport>,
        label: String,
        config: &ClientConfig,
    ) -> Result<Self> {
        let id_prefix = Uuid::new_v4().simple().to_string()[..8].to_string();
        let session = Arc::new(Session {
            transport,
            state: StateCell::new(),
            pending: Mutex::new(HashMap::new()),
            lost: Mutex::new(None),
            id_prefix,
            next_id: AtomicU64::new(1),
            request_timeout: config.request_timeout,
        });
        session
            .state
            .transition(SessionState::Disconnected, SessionState::Connecting)?;

        let reader = tokio::spawn(session.clone().read_loop());
        let guard = EstablishGuard::new(session.clone(), reader);

        match Self::handshake(&session, &config.client_info).await {
            Ok((server_info, tools)) => {
                session
                    .state
                    .transition(SessionState::Connecting, SessionState::Connected)?;
                tracing::info!(
                    endpoint = %label,
                    server = %server_info.name,
                    version = %server_info.version,
                    tool_count = tools.len(),
                    "connected to tool server"
                );
                Ok(Self {
                    session,
                    reader: Mutex::new(guard.complete()),
                    server_info,
                    tools,
                    label,
                })
            }
            Err(e) => {
                tracing::warn!(endpoint = %label, error = %e, "handshake failed");
                guard.abandon().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        session: &Session,
        client_info: &ClientInfo,
    ) -> Result<(ServerInfo, Vec<ToolDefinition>)> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: client_info.clone(),
        };
        let result = session
            .call_method(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("malformed initialize response: {}", e)))?;

        if init.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                server = %init.server_info.name,
                theirs = %init.protocol_version,
                ours = PROTOCOL_VERSION,
                "protocol version mismatch"
            );
        }

        session.notify(methods::INITIALIZED).await?;

        let tools = codec::decode_tools(session.call_method(methods::TOOLS_LIST, None).await?)?;
        Ok((init.server_info, tools))
    }

    /// Endpoint description this client was built with.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session.state.get()
    }

    /// Identity the server reported during the handshake.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// The tool set discovered when the session was established.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Look up a discovered tool.
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// The server's capability set for this session.
    ///
    /// Discovery runs once while connecting; repeated calls return the same
    /// set without touching the transport.
    pub fn discover(&self) -> Result<Vec<ToolDefinition>> {
        self.session.state.ensure_connected()?;
        self.session.check_link()?;
        Ok(self.tools.clone())
    }

    /// Call a tool and return its value.
    ///
    /// Unknown tools and invalid arguments are rejected locally, before any
    /// I/O. Tool-level failures reported by the server come back as the
    /// matching [`McpError`] variant.
    pub async fn invoke(&self, tool_name: &str, arguments: Arguments) -> Result<Value> {
        self.invoke_request(tool_name, arguments).await?.into_value()
    }

    /// Call a tool and return the correlated result, failure outcomes included.
    pub async fn invoke_request(
        &self,
        tool_name: &str,
        arguments: Arguments,
    ) -> Result<ToolCallResult> {
        self.session.state.ensure_connected()?;

        let definition = self
            .tool(tool_name)
            .ok_or_else(|| McpError::UnknownTool(tool_name.to_string()))?;
        validate_arguments(definition, &arguments)?;

        let call = ToolCallRequest {
            correlation_id: self.session.next_correlation_id(),
            tool_name: tool_name.to_string(),
            arguments,
        };
        tracing::debug!(tool = %tool_name, correlation_id = %call.correlation_id, "invoking tool");

        let response = self.session.request(call.to_rpc()).await?;
        if response.id.as_ref() != Some(&call.correlation_id) {
            return Err(McpError::protocol("response correlation id does not match request"));
        }
        let result = response
            .into_result()
            .map_err(|e| McpError::server_error(e.code, e.message, e.data))?;
        let outcome = codec::decode_call_outcome(result)?;

        if outcome.is_error() {
            tracing::debug!(tool = %tool_name, correlation_id = %call.correlation_id, "tool reported failure");
        }

        Ok(ToolCallResult {
            correlation_id: call.correlation_id,
            outcome,
        })
    }

    /// Close the session.
    ///
    /// Outstanding calls fail with [`McpError::SessionClosed`]. Only the
    /// first call releases the transport; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        if !self.session.state.begin_close() {
            return Ok(());
        }

        self.session.drain_pending(|| McpError::SessionClosed);
        let released = self.session.transport.close().await;

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }

        self.session.state.finish_close();
        tracing::info!(endpoint = %self.label, "session closed");
        released
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if !self.session.state.get().is_terminal() {
            tracing::debug!(endpoint = %self.label, "client dropped without close");
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("endpoint", &self.label)
            .field("state", &self.state())
            .field("server", &self.server_info.name)
            .field("tools", &self.tools.len())
            .finish()
    }
}
