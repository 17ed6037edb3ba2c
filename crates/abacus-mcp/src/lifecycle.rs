//! Session lifecycle: connect, use, and guaranteed teardown.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Closing ──▶ Closed
//!                      │                           ▲
//!                      └───── (handshake failed) ──┘
//! ```
//!
//! [`with_session`] and [`with_session_cancellable`] wrap a unit of work so the
//! session is closed exactly once however the work ends.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientConfig, McpClient};
use crate::error::{McpError, Result};
use crate::transport::Transport;

/// Where a client session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport yet.
    Disconnected,
    /// Transport open, handshake and discovery in progress.
    Connecting,
    /// Ready for calls.
    Connected,
    /// Teardown started; new calls are refused.
    Closing,
    /// Transport released.
    Closed,
}

impl SessionState {
    /// Whether teardown has started.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Lowercase name for logs and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-protected [`SessionState`].
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<SessionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// A cell starting at `Disconnected`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    /// Current state.
    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move from `from` to `to`, failing if the cell is elsewhere.
    pub fn transition(&self, from: SessionState, to: SessionState) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            if state.is_terminal() {
                return Err(McpError::SessionClosed);
            }
            return Err(McpError::InvalidState(format!(
                "expected {} to move to {}, found {}",
                from, to, *state
            )));
        }
        tracing::debug!(from = %from, to = %to, "session state changed");
        *state = to;
        Ok(())
    }

    /// Enter `Closing` from `Connecting` or `Connected`. Returns false
    /// otherwise (nothing was opened, or teardown had already started), in
    /// which case the caller must not release anything.
    pub fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SessionState::Connecting | SessionState::Connected) {
            return false;
        }
        tracing::debug!(from = %*state, to = %SessionState::Closing, "session state changed");
        *state = SessionState::Closing;
        true
    }

    /// Enter `Closed`.
    pub fn finish_close(&self) {
        let mut state = self.state.lock();
        tracing::debug!(from = %*state, to = %SessionState::Closed, "session state changed");
        *state = SessionState::Closed;
    }

    /// Fail unless the session accepts calls.
    pub fn ensure_connected(&self) -> Result<()> {
        match self.get() {
            SessionState::Connected => Ok(()),
            SessionState::Closing | SessionState::Closed => Err(McpError::SessionClosed),
            other => Err(McpError::InvalidState(format!(
                "session is {}, not connected",
                other
            ))),
        }
    }
}

/// Connect, run `body`, then close.
///
/// The session is closed whether `body` succeeds or fails. An error from
/// `body` takes precedence over an error from closing.
pub async fn with_session<F, Fut, T, E>(config: ClientConfig, body: F) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<McpClient>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<McpError>,
{
    let client = Arc::new(McpClient::connect(config).await?);
    let outcome = body(client.clone()).await;
    finish(&client, outcome).await
}

/// Like [`with_session`], but abandons `body` when `cancel` fires.
///
/// Cancellation closes the session, which fails any call still waiting on a
/// response, and resolves to [`McpError::Cancelled`]. Cancelling while the
/// handshake is still running releases the half-open connection as well.
pub async fn with_session_cancellable<F, Fut, T, E>(
    config: ClientConfig,
    cancel: CancellationToken,
    body: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<McpClient>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<McpError>,
{
    run_cancellable(McpClient::connect(config), cancel, body).await
}

/// [`with_session_cancellable`] over an already-open transport.
pub async fn with_transport_cancellable<F, Fut, T, E>(
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    cancel: CancellationToken,
    body: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<McpClient>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<McpError>,
{
    run_cancellable(
        McpClient::connect_with_transport(transport, config),
        cancel,
        body,
    )
    .await
}

async fn run_cancellable<C, F, Fut, T, E>(
    connect: C,
    cancel: CancellationToken,
    body: F,
) -> std::result::Result<T, E>
where
    C: Future<Output = Result<McpClient>>,
    F: FnOnce(Arc<McpClient>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<McpError>,
{
    // Dropping `connect` mid-handshake tears the connection down
    let client = tokio::select! {
        connected = connect => Arc::new(connected?),
        _ = cancel.cancelled() => {
            tracing::info!("connect cancelled");
            return Err(McpError::Cancelled.into());
        }
    };

    let outcome = tokio::select! {
        result = body(client.clone()) => result,
        _ = cancel.cancelled() => {
            tracing::info!("session cancelled");
            Err(McpError::Cancelled.into())
        }
    };
    finish(&client, outcome).await
}

async fn finish<T, E>(
    client: &McpClient,
    outcome: std::result::Result<T, E>,
) -> std::result::Result<T, E>
where
    E: From<McpError>,
{
    let closed = client.close().await;
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                tracing::warn!(error = %close_err, "failed to close session after error");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_happy_path() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), SessionState::Disconnected);
        cell.transition(SessionState::Disconnected, SessionState::Connecting)
            .unwrap();
        assert!(cell.ensure_connected().is_err());
        cell.transition(SessionState::Connecting, SessionState::Connected)
            .unwrap();
        assert!(cell.ensure_connected().is_ok());
    }

    #[test]
    fn test_transition_from_wrong_state() {
        let cell = StateCell::new();
        let err = cell
            .transition(SessionState::Connecting, SessionState::Connected)
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidState(_)));
    }

    #[test]
    fn test_begin_close_only_once() {
        let cell = StateCell::new();
        cell.transition(SessionState::Disconnected, SessionState::Connecting)
            .unwrap();
        cell.transition(SessionState::Connecting, SessionState::Connected)
            .unwrap();

        assert!(cell.begin_close());
        assert!(!cell.begin_close());
        cell.finish_close();
        assert!(!cell.begin_close());
        assert_eq!(cell.get(), SessionState::Closed);
    }

    #[test]
    fn test_begin_close_requires_open_session() {
        let cell = StateCell::new();
        assert!(!cell.begin_close());
        assert_eq!(cell.get(), SessionState::Disconnected);

        cell.transition(SessionState::Disconnected, SessionState::Connecting)
            .unwrap();
        assert!(cell.begin_close());
        assert_eq!(cell.get(), SessionState::Closing);
    }

    #[test]
    fn test_closed_session_refuses_calls_and_transitions() {
        let cell = StateCell::new();
        cell.transition(SessionState::Disconnected, SessionState::Connecting)
            .unwrap();
        cell.transition(SessionState::Connecting, SessionState::Connected)
            .unwrap();
        assert!(cell.begin_close());
        cell.finish_close();
        assert!(matches!(cell.ensure_connected(), Err(McpError::SessionClosed)));
        assert!(matches!(
            cell.transition(SessionState::Connecting, SessionState::Connected),
            Err(McpError::SessionClosed)
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "connected");
        assert!(SessionState::Closing.is_terminal());
        assert!(!SessionState::Connecting.is_terminal());
    }
}
