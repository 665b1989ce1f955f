//! Error taxonomy shared by every session component.

/// Why a credential was refused by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The key is wrong, revoked, or lacks permission.
    Invalid,
    /// The key is valid but out of quota.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Fatal to capture or playback, never to the network session.
    #[error("audio device error: {0}")]
    Device(String),

    /// Every credential is exhausted or invalid. Fatal to the session.
    #[error("no usable credentials remain")]
    PoolExhausted,

    /// Recoverable by rotating to the next credential.
    #[error("credential rejected ({kind:?}): {message}")]
    Auth { kind: AuthFailure, message: String },

    /// Recoverable by reconnecting with backoff.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The remote ended the connection on its own schedule. Recoverable.
    #[error("remote idle timeout: {0}")]
    IdleTimeout(String),

    /// Fatal to one connection attempt only.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The outbound buffer overflowed while the link was down.
    #[error("not connected: outbound buffer overflowed")]
    NotConnected,

    #[error("session is stopped")]
    Stopped,
}

impl SessionError {
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        SessionError::Auth {
            kind: AuthFailure::Invalid,
            message: message.into(),
        }
    }

    pub fn auth_exhausted(message: impl Into<String>) -> Self {
        SessionError::Auth {
            kind: AuthFailure::Exhausted,
            message: message.into(),
        }
    }

    /// True for errors that reconnection or rotation can get past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Auth { .. }
                | SessionError::TransientNetwork(_)
                | SessionError::IdleTimeout(_)
                | SessionError::Protocol(_)
        )
    }

    /// True for errors that should be answered with a new connection.
    pub fn wants_reconnect(&self) -> bool {
        matches!(
            self,
            SessionError::TransientNetwork(_) | SessionError::IdleTimeout(_) | SessionError::Protocol(_)
        )
    }
}
