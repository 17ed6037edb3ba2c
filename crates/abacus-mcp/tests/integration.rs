//! End-to-end tests for the tool protocol.
//!
//! Most tests run a real server on `127.0.0.1:0`. Ordering and timeout
//! tests drive the server side by hand over an in-memory stream so the
//! response order is fully controlled.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use abacus_mcp::codec::{self, ClientMessage};
use abacus_mcp::protocol::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION,
    ServerCapabilities, methods,
};
use abacus_mcp::{
    Arguments, CallOutcome, ClientConfig, Endpoint, FramedTransport, McpClient, McpError,
    McpServer, ServerInfo, SessionState, Transport, calculator, with_session,
    with_session_cancellable, with_transport_cancellable,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Transport wrapper that counts sends and releases.
struct CountingTransport {
    inner: FramedTransport,
    sends: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingTransport {
    fn new(inner: FramedTransport) -> Arc<Self> {
        Arc::new(Self {
            inner,
            sends: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send(&self, payload: &[u8]) -> abacus_mcp::Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.send(payload).await
    }

    async fn receive(&self) -> abacus_mcp::Result<Option<Vec<u8>>> {
        self.inner.receive().await
    }

    async fn close(&self) -> abacus_mcp::Result<()> {
        if !self.inner.is_closed() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

fn args(value: Value) -> Arguments {
    value.as_object().cloned().unwrap_or_default()
}

async fn start_server() -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    let server = McpServer::new("math_server", Arc::new(calculator::registry().unwrap()));
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.serve_tcp(listener, token).await;
    });
    (addr, shutdown)
}

fn tcp_config(addr: &str) -> ClientConfig {
    ClientConfig::new(Endpoint::tcp(addr)).with_request_timeout(Duration::from_secs(5))
}

/// Client over a counting TCP transport to a real server.
async fn counted_client(addr: &str) -> (McpClient, Arc<CountingTransport>) {
    let transport = CountingTransport::new(
        FramedTransport::open(&Endpoint::tcp(addr)).await.unwrap(),
    );
    let client = McpClient::connect_with_transport(transport.clone(), tcp_config(addr))
        .await
        .unwrap();
    (client, transport)
}

/// In-memory link: a counting client transport and the raw server end.
fn scripted_link() -> (Arc<CountingTransport>, FramedTransport) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (cr, cw) = tokio::io::split(client_io);
    let (sr, sw) = tokio::io::split(server_io);
    (
        CountingTransport::new(FramedTransport::from_io("client", cr, cw)),
        FramedTransport::from_io("scripted", sr, sw),
    )
}

async fn next_request(server: &FramedTransport) -> JsonRpcRequest {
    loop {
        let frame = server.receive().await.unwrap().expect("client hung up");
        match codec::decode_client_message(&frame).unwrap() {
            ClientMessage::Request(request) => return request,
            ClientMessage::Notification(_) => continue,
        }
    }
}

async fn reply(server: &FramedTransport, response: JsonRpcResponse) {
    server.send(&codec::encode(&response).unwrap()).await.unwrap();
}

async fn reply_value(server: &FramedTransport, request: &JsonRpcRequest, value: f64) {
    let outcome = CallOutcome::Success { value: json!(value) };
    reply(server, JsonRpcResponse::success(request.id.clone(), json!(outcome))).await;
}

/// Answer `initialize` and `tools/list` the way the calculator server would.
async fn answer_handshake(server: &FramedTransport) {
    let init = next_request(server).await;
    assert_eq!(init.method, methods::INITIALIZE);
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities::default(),
        server_info: ServerInfo {
            name: "scripted".into(),
            version: "0.0.1".into(),
        },
    };
    reply(server, JsonRpcResponse::success(init.id, json!(result))).await;

    let list = next_request(server).await;
    assert_eq!(list.method, methods::TOOLS_LIST);
    let tools = ListToolsResult {
        tools: calculator::definitions(),
    };
    reply(server, JsonRpcResponse::success(list.id, json!(tools))).await;
}

async fn scripted_client(timeout: Duration) -> (Arc<McpClient>, Arc<CountingTransport>, FramedTransport) {
    let (transport, server) = scripted_link();
    let config = ClientConfig::new(Endpoint::tcp("scripted:0")).with_request_timeout(timeout);
    let (client, ()) = tokio::join!(
        McpClient::connect_with_transport(transport.clone(), config),
        answer_handshake(&server)
    );
    (Arc::new(client.unwrap()), transport, server)
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery and calls against a real server
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_is_idempotent() {
    let (addr, shutdown) = start_server().await;
    let (client, transport) = counted_client(&addr).await;

    assert_eq!(client.server_info().name, "math_server");
    let sends = transport.sends();
    let first: Vec<_> = client.discover().unwrap().into_iter().map(|t| t.name).collect();
    let second: Vec<_> = client.discover().unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(first, vec!["add", "subtract", "multiply", "divide"]);
    assert_eq!(first, second);
    assert_eq!(transport.sends(), sends);

    client.close().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_round_trip_values() {
    let (addr, shutdown) = start_server().await;
    let client = McpClient::connect(tcp_config(&addr)).await.unwrap();

    let sum = client.invoke("add", args(json!({"a": 15, "b": 7}))).await.unwrap();
    assert_eq!(sum.as_f64(), Some(22.0));
    let product = client.invoke("multiply", args(json!({"a": 22, "b": 3}))).await.unwrap();
    assert_eq!(product.as_f64(), Some(66.0));
    let quotient = client.invoke("divide", args(json!({"a": 66, "b": 2}))).await.unwrap();
    assert_eq!(quotient.as_f64(), Some(33.0));
    let difference = client.invoke("subtract", args(json!({"a": 15, "b": 7.5}))).await.unwrap();
    assert_eq!(difference.as_f64(), Some(7.5));

    client.close().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_divide_by_zero_keeps_session_usable() {
    let (addr, shutdown) = start_server().await;
    let client = McpClient::connect(tcp_config(&addr)).await.unwrap();

    let err = client
        .invoke("divide", args(json!({"a": 66, "b": 0})))
        .await
        .unwrap_err();
    match err {
        McpError::Computation(msg) => assert!(msg.contains("divide by zero")),
        other => panic!("expected computation error, got {:?}", other),
    }

    assert_eq!(client.state(), SessionState::Connected);
    let value = client.invoke("add", args(json!({"a": 1, "b": 2}))).await.unwrap();
    assert_eq!(value.as_f64(), Some(3.0));

    client.close().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_tool_never_reaches_transport() {
    let (addr, shutdown) = start_server().await;
    let (client, transport) = counted_client(&addr).await;
    let baseline = transport.sends();

    let err = client
        .invoke("power", args(json!({"a": 2, "b": 8})))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::UnknownTool(name) if name == "power"));
    assert_eq!(transport.sends(), baseline);

    client.close().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_invalid_arguments_never_reach_transport() {
    let (addr, shutdown) = start_server().await;
    let (client, transport) = counted_client(&addr).await;
    let baseline = transport.sends();

    let missing = client.invoke("add", args(json!({"a": 15}))).await.unwrap_err();
    assert!(matches!(missing, McpError::InvalidArgument(_)));

    let wrong_type = client
        .invoke("add", args(json!({"a": "15", "b": 7})))
        .await
        .unwrap_err();
    assert!(matches!(wrong_type, McpError::InvalidArgument(_)));

    let extra = client
        .invoke("add", args(json!({"a": 1, "b": 2, "c": 3})))
        .await
        .unwrap_err();
    assert!(matches!(extra, McpError::InvalidArgument(_)));

    assert_eq!(transport.sends(), baseline);

    client.close().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_concurrent_sessions() {
    let (addr, shutdown) = start_server().await;
    let a = McpClient::connect(tcp_config(&addr)).await.unwrap();
    let b = McpClient::connect(tcp_config(&addr)).await.unwrap();

    let (x, y) = tokio::join!(
        a.invoke("multiply", args(json!({"a": 6, "b": 7}))),
        b.invoke("subtract", args(json!({"a": 10, "b": 4}))),
    );
    assert_eq!(x.unwrap().as_f64(), Some(42.0));
    assert_eq!(y.unwrap().as_f64(), Some(6.0));

    a.close().await.unwrap();
    b.close().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_connect_to_unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = McpClient::connect(tcp_config(&addr)).await.unwrap_err();
    assert!(matches!(err, McpError::Transport(_)));
}

#[tokio::test]
async fn test_malformed_frame_gets_parse_error() {
    let (addr, shutdown) = start_server().await;
    let raw = FramedTransport::open(&Endpoint::tcp(&addr)).await.unwrap();

    raw.send(b"{not json").await.unwrap();
    let frame = raw.receive().await.unwrap().unwrap();
    let response = codec::decode_response(&frame).unwrap();
    assert!(response.id.is_none());
    assert_eq!(response.into_result().unwrap_err().code, -32700);

    raw.send(br#"{"jsonrpc":"2.0","id":"x-1","method":"tools/unknown"}"#)
        .await
        .unwrap();
    let frame = raw.receive().await.unwrap().unwrap();
    let response = codec::decode_response(&frame).unwrap();
    assert_eq!(response.id.as_ref().map(|id| id.as_str()), Some("x-1"));
    assert_eq!(response.into_result().unwrap_err().code, -32601);

    raw.close().await.unwrap();
    shutdown.cancel();
}

// ─────────────────────────────────────────────────────────────────────────────
// Correlation and timeouts (scripted server)
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reversed_responses_reach_the_right_callers() {
    let (client, _transport, server) = scripted_client(Duration::from_secs(5)).await;

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke("add", args(json!({"a": 1, "b": 1}))).await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke("add", args(json!({"a": 2, "b": 2}))).await })
    };

    let r1 = next_request(&server).await;
    let r2 = next_request(&server).await;
    assert_ne!(r1.id, r2.id);

    // Answer with the sum each caller asked for, newest request first
    let sum = |request: &JsonRpcRequest| {
        let params = request.params.clone().unwrap_or_default();
        params["arguments"]["a"].as_f64().unwrap_or_default()
            + params["arguments"]["b"].as_f64().unwrap_or_default()
    };
    reply_value(&server, &r2, sum(&r2)).await;
    reply_value(&server, &r1, sum(&r1)).await;

    assert_eq!(first.await.unwrap().unwrap().as_f64(), Some(2.0));
    assert_eq!(second.await.unwrap().unwrap().as_f64(), Some(4.0));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_timeout_abandons_id_and_discards_late_response() {
    let (client, _transport, server) = scripted_client(Duration::from_millis(100)).await;

    let slow = client
        .invoke("add", args(json!({"a": 1, "b": 1})))
        .await
        .unwrap_err();
    let abandoned = match slow {
        McpError::Timeout { correlation_id, after } => {
            assert_eq!(after, Duration::from_millis(100));
            correlation_id
        }
        other => panic!("expected timeout, got {:?}", other),
    };

    let late = next_request(&server).await;
    assert_eq!(late.id, abandoned);

    let next = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke("add", args(json!({"a": 5, "b": 5}))).await })
    };
    let fresh = next_request(&server).await;
    assert_ne!(fresh.id, abandoned);

    // The late answer must not be delivered to the new caller
    reply_value(&server, &late, 999.0).await;
    reply_value(&server, &fresh, 10.0).await;

    assert_eq!(next.await.unwrap().unwrap().as_f64(), Some(10.0));
    assert_eq!(client.state(), SessionState::Connected);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_wrong_result_shape_is_protocol_error() {
    let (client, _transport, server) = scripted_client(Duration::from_secs(5)).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke("add", args(json!({"a": 1, "b": 1}))).await })
    };
    let request = next_request(&server).await;
    reply(
        &server,
        JsonRpcResponse::success(request.id, json!({"tools": []})),
    )
    .await;

    assert!(matches!(call.await.unwrap(), Err(McpError::Protocol(_))));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_hangup_fails_outstanding_calls() {
    let (client, _transport, server) = scripted_client(Duration::from_secs(5)).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke("add", args(json!({"a": 1, "b": 1}))).await })
    };
    let _ = next_request(&server).await;
    server.close().await.unwrap();

    assert!(matches!(call.await.unwrap(), Err(McpError::Transport(_))));
    let after = client.invoke("add", args(json!({"a": 1, "b": 1}))).await;
    assert!(matches!(after, Err(McpError::Transport(_))));
    client.close().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_twice_releases_once() {
    let (addr, shutdown) = start_server().await;
    let (client, transport) = counted_client(&addr).await;

    client.close().await.unwrap();
    client.close().await.unwrap();

    assert_eq!(transport.releases(), 1);
    assert_eq!(client.state(), SessionState::Closed);
    shutdown.cancel();
}

#[tokio::test]
async fn test_invoke_after_close_performs_no_io() {
    let (addr, shutdown) = start_server().await;
    let (client, transport) = counted_client(&addr).await;
    client.close().await.unwrap();
    let sends = transport.sends();

    let err = client
        .invoke("add", args(json!({"a": 15, "b": 7})))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::SessionClosed));
    assert!(matches!(client.discover(), Err(McpError::SessionClosed)));
    assert_eq!(transport.sends(), sends);
    shutdown.cancel();
}

#[tokio::test]
async fn test_close_fails_outstanding_calls() {
    let (client, transport, server) = scripted_client(Duration::from_secs(30)).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke("add", args(json!({"a": 1, "b": 1}))).await })
    };
    // Wait until the call is on the wire, then tear down without answering
    let _ = next_request(&server).await;
    client.close().await.unwrap();

    assert!(matches!(call.await.unwrap(), Err(McpError::SessionClosed)));
    assert_eq!(transport.releases(), 1);
}

#[tokio::test]
async fn test_with_session_closes_on_success_and_error() {
    let (addr, shutdown) = start_server().await;

    let total = with_session(tcp_config(&addr), |client| async move {
        let sum = client.invoke("add", args(json!({"a": 15, "b": 7}))).await?;
        client.invoke("multiply", args(json!({"a": sum, "b": 3}))).await
    })
    .await
    .unwrap();
    assert_eq!(total.as_f64(), Some(66.0));

    let captured: Arc<Mutex<Option<Arc<McpClient>>>> = Arc::default();
    let slot = captured.clone();
    let err = with_session(tcp_config(&addr), |client| async move {
        *slot.lock().unwrap() = Some(client.clone());
        client.invoke("divide", args(json!({"a": 1, "b": 0}))).await
    })
    .await
    .unwrap_err();
    assert!(matches!(err, McpError::Computation(_)));
    let client = captured.lock().unwrap().take().unwrap();
    assert_eq!(client.state(), SessionState::Closed);

    shutdown.cancel();
}

#[tokio::test]
async fn test_with_session_cancellable() {
    let (addr, shutdown) = start_server().await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let result: Result<(), McpError> =
        with_session_cancellable(tcp_config(&addr), cancel, |_client| async move {
            trigger.cancel();
            std::future::pending::<Result<(), McpError>>().await
        })
        .await;
    assert!(matches!(result, Err(McpError::Cancelled)));

    shutdown.cancel();
}

#[tokio::test]
async fn test_cancel_during_body_releases_once() {
    let (transport, server) = scripted_link();
    let cancel = CancellationToken::new();
    let captured: Arc<Mutex<Option<Arc<McpClient>>>> = Arc::default();

    let trigger = cancel.clone();
    let slot = captured.clone();
    let session = with_transport_cancellable(
        transport.clone(),
        ClientConfig::new(Endpoint::tcp("scripted:0")),
        cancel,
        |client| async move {
            *slot.lock().unwrap() = Some(client.clone());
            trigger.cancel();
            std::future::pending::<Result<(), McpError>>().await
        },
    );
    let (result, ()) = tokio::join!(session, answer_handshake(&server));

    assert!(matches!(result, Err(McpError::Cancelled)));
    assert_eq!(transport.releases(), 1);
    let client = captured.lock().unwrap().take().unwrap();
    assert_eq!(client.state(), SessionState::Closed);
    assert!(server.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_during_connect_releases_once() {
    let (transport, server) = scripted_link();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let unanswered = async {
        // Take the initialize request and never answer it
        let init = next_request(&server).await;
        assert_eq!(init.method, methods::INITIALIZE);
        trigger.cancel();
    };
    let session = with_transport_cancellable(
        transport.clone(),
        ClientConfig::new(Endpoint::tcp("scripted:0")),
        cancel,
        |_client| async move { Ok::<_, McpError>(()) },
    );
    let (result, ()) = tokio::join!(session, unanswered);
    assert!(matches!(result, Err(McpError::Cancelled)));

    // Release runs on a spawned task once the connect future is dropped
    let eof = tokio::time::timeout(Duration::from_secs(2), server.receive())
        .await
        .expect("peer never saw the connection close");
    assert!(eof.unwrap().is_none());
    for _ in 0..100 {
        if transport.releases() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.releases(), 1);
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_cancel_during_tcp_connect_closes_socket() {
    use tokio::io::AsyncReadExt;

    // Accepts the connection but never speaks the protocol
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let silent_peer = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
        let mut buf = vec![0u8; 4096];
        loop {
            match socket.read(&mut buf).await.unwrap() {
                0 => return,
                _ => continue,
            }
        }
    });

    let result: Result<(), McpError> =
        with_session_cancellable(tcp_config(&addr), cancel, |_client| async move { Ok(()) })
            .await;
    assert!(matches!(result, Err(McpError::Cancelled)));

    tokio::time::timeout(Duration::from_secs(2), silent_peer)
        .await
        .expect("socket was left open after cancellation")
        .unwrap();
}
