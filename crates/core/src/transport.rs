//! The seam between the session loop and a remote dialogue service.

use crate::audio::Frame;
use crate::config::SessionConfig;
use crate::credentials::Credential;
use crate::error::SessionError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Opaque continuation token issued by the remote service.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConversationHandle(String);

impl ConversationHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are long; a prefix is enough to tell them apart in logs.
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "ConversationHandle({prefix}..)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(Frame),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AudioChunk(Frame),
    TextChunk(String),
    TurnComplete,
    Interrupted,
    /// The remote issued a new continuation token.
    Resumption(ConversationHandle),
    Error(SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Failed)
                | (Connecting, Closing)
                | (Open, Closing)
                | (Closing, Closed)
        )
    }
}

/// Per-connection state machine, shared between a transport and its driver.
///
/// Transitions are compare-and-set under the watch lock, so only one path
/// advances at a time and concurrent closes coalesce.
#[derive(Clone)]
pub struct ConnectionStateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Connecting);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Moves to `next` if that is a legal transition. Returns whether it moved.
    pub fn advance(&self, next: ConnectionState) -> bool {
        let moved = self.tx.send_if_modified(|state| {
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::trace!(?next, "connection state");
        }
        moved
    }

    /// Claims the teardown. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        self.advance(ConnectionState::Closing)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Resolves once the state satisfies `pred`.
    pub async fn wait_until(&self, pred: impl FnMut(&ConnectionState) -> bool) -> ConnectionState {
        let mut rx = self.subscribe();
        match rx.wait_for(pred).await {
            Ok(state) => *state,
            // The sender lives in `self`, so it cannot be dropped while we wait.
            Err(_) => self.get(),
        }
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// One live connection.
#[async_trait]
pub trait StreamTransport: Send {
    /// Best-effort, non-blocking. Buffers while the link is not yet open and
    /// returns `NotConnected` once that buffer overflows.
    fn send(&mut self, message: Outbound) -> Result<(), SessionError>;

    /// Next inbound event; `None` once the connection has closed for any reason.
    async fn next_event(&mut self) -> Option<InboundEvent>;

    /// Idempotent teardown.
    async fn close(&mut self);

    fn state(&self) -> ConnectionState;

    /// Asks the remote to stop the current response. Returns true when the
    /// remote will acknowledge with an `Interrupted` event.
    fn signal_interrupt(&mut self) -> bool {
        false
    }
}

/// Opens transports. One factory serves every connection of a session.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        credential: &Credential,
        config: &SessionConfig,
        handle: Option<&ConversationHandle>,
    ) -> Result<Box<dyn StreamTransport>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_paths() {
        let cell = ConnectionStateCell::new();
        assert_eq!(cell.get(), ConnectionState::Connecting);
        assert!(!cell.advance(ConnectionState::Closed));
        assert!(cell.advance(ConnectionState::Open));
        assert!(!cell.advance(ConnectionState::Failed));

        let failed = ConnectionStateCell::new();
        assert!(failed.advance(ConnectionState::Failed));
        assert!(failed.get().is_terminal());
        assert!(!failed.begin_close());
    }

    #[test]
    fn concurrent_closes_coalesce() {
        let cell = ConnectionStateCell::new();
        cell.advance(ConnectionState::Open);
        let other = cell.clone();
        assert!(cell.begin_close());
        assert!(!other.begin_close());
        assert!(other.advance(ConnectionState::Closed));
        assert!(!cell.advance(ConnectionState::Closed));
    }

    #[tokio::test]
    async fn wait_until_sees_later_transition() {
        let cell = ConnectionStateCell::new();
        let waiter = cell.clone();
        let task = tokio::spawn(async move { waiter.wait_until(|s| s.is_terminal()).await });
        cell.advance(ConnectionState::Open);
        cell.begin_close();
        cell.advance(ConnectionState::Closed);
        assert_eq!(task.await.unwrap(), ConnectionState::Closed);
    }

    #[test]
    fn handle_debug_is_truncated() {
        let handle = ConversationHandle::new("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(format!("{handle:?}"), "ConversationHandle(abcdefgh..)");
        assert_eq!(handle.as_str().len(), 26);
    }
}
