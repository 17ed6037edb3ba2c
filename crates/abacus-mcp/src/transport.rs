//! Session transport for tool protocol communication.
//!
//! Messages travel as Content-Length framed payloads over a byte stream:
//! a TCP socket for network servers, or the stdio pipes of a spawned child
//! process for local servers.
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! {"jsonrpc": "2.0", "id": "…", "method": "...", "params": {...}}
//! ```

use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Where to reach a tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP `host:port`.
    Tcp {
        /// Socket address or `host:port`.
        addr: String,
    },
    /// Spawn a child process and speak over its stdin/stdout.
    Stdio {
        /// Command to spawn.
        command: String,
        /// Arguments to pass to the command.
        args: Vec<String>,
        /// Environment variables to set.
        env: Vec<(String, String)>,
    },
}

impl Endpoint {
    /// A TCP endpoint.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::Tcp { addr: addr.into() }
    }

    /// A stdio endpoint for the given command.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Add an argument (stdio only).
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        if let Self::Stdio { args, .. } = &mut self {
            args.push(arg.into());
        }
        self
    }

    /// Add an environment variable (stdio only).
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Stdio { env, .. } = &mut self {
            env.push((key.into(), value.into()));
        }
        self
    }

    /// Check if this is a stdio endpoint.
    pub fn is_stdio(&self) -> bool {
        matches!(self, Self::Stdio { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { addr } => write!(f, "tcp://{}", addr),
            Self::Stdio { command, args, .. } => {
                write!(f, "stdio:{}", command)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Endpoint {
    type Err = McpError;

    /// Parses `tcp://host:port`, `host:port`, or `stdio:command [args...]`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("stdio:") {
            let mut parts = rest.split_whitespace();
            let command = parts
                .next()
                .ok_or_else(|| McpError::transport("stdio endpoint requires a command"))?;
            return Ok(parts.fold(Self::stdio(command), |ep, arg| ep.with_arg(arg)));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::tcp(addr))
            }
            _ => Err(McpError::transport(format!(
                "invalid endpoint '{}': expected tcp://host:port or stdio:<command>",
                s
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Write one Content-Length framed payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one Content-Length framed payload.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| McpError::transport(format!("read failed: {}", e)))?;

        if bytes_read == 0 {
            if saw_header {
                return Err(McpError::transport("connection closed mid-frame"));
            }
            return Ok(None);
        }

        let trimmed = line.trim();

        // Empty line signals end of headers
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        if let Some(len_str) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(len_str.trim().parse().map_err(|e| {
                McpError::protocol(format!("invalid Content-Length: {}", e))
            })?);
        }
    }

    let content_length =
        content_length.ok_or_else(|| McpError::protocol("missing Content-Length header"))?;
    if content_length > MAX_FRAME_LEN {
        return Err(McpError::protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            content_length, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            McpError::transport("connection closed mid-frame")
        } else {
            McpError::transport(format!("read failed: {}", e))
        }
    })?;

    Ok(Some(body))
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// A bidirectional channel carrying framed payloads between one client and one server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one payload. Fails with [`McpError::Transport`] once closed.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Wait for the next payload. `Ok(None)` means the channel has closed.
    async fn receive(&self) -> Result<Option<Vec<u8>>>;

    /// Release the underlying I/O resource. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether [`Transport::close`] has run.
    fn is_closed(&self) -> bool;
}

type BoxReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// [`Transport`] over any byte stream pair, with Content-Length framing.
pub struct FramedTransport {
    /// Peer description for logs.
    label: String,
    reader: Mutex<Option<BoxReader>>,
    writer: Mutex<Option<BoxWriter>>,
    /// Spawned server process (stdio endpoints only).
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl FramedTransport {
    /// Establish a connection to an endpoint.
    pub async fn open(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { addr } => {
                let stream = TcpStream::connect(addr.as_str()).await.map_err(|e| {
                    McpError::transport(format!("failed to connect to {}: {}", addr, e))
                })?;
                let _ = stream.set_nodelay(true);
                let (read_half, write_half) = stream.into_split();

                tracing::info!(endpoint = %endpoint, "opened TCP transport");
                Ok(Self::from_io(endpoint.to_string(), read_half, write_half))
            }
            Endpoint::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args)
                    .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit()) // Let stderr pass through for debugging
                    .kill_on_drop(true);

                let mut child = cmd.spawn().map_err(|e| {
                    McpError::spawn_failed(format!("failed to spawn '{}': {}", command, e))
                })?;

                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;

                tracing::info!(endpoint = %endpoint, pid = ?child.id(), "spawned stdio transport");

                let mut transport = Self::from_io(endpoint.to_string(), stdout, stdin);
                transport.child = Mutex::new(Some(child));
                Ok(transport)
            }
        }
    }

    /// Wrap an already-connected stream pair.
    pub fn from_io<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: label.into(),
            reader: Mutex::new(Some(Box::new(BufReader::new(reader)))),
            writer: Mutex::new(Some(Box::new(writer))),
            child: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Peer description.
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(McpError::transport("transport is closed"));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| McpError::transport("transport is closed"))?;

        write_frame(writer, payload)
            .await
            .map_err(|e| McpError::transport(format!("write to {} failed: {}", self.label, e)))?;

        tracing::trace!(peer = %self.label, content_length = payload.len(), "sent frame");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        if self.is_closed() {
            return Ok(None);
        }

        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Ok(None);
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Ok(None),
            frame = read_frame(reader) => {
                if let Ok(Some(body)) = &frame {
                    tracing::trace!(peer = %self.label, content_length = body.len(), "received frame");
                }
                frame
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Wake any pending receive so the reader lock is released
        self.shutdown.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(peer = %self.label, error = %e, "writer shutdown failed");
            }
        }
        drop(self.reader.lock().await.take());

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        tracing::info!(peer = %self.label, "transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedTransport")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}
