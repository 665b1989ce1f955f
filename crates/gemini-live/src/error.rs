use tokio_tungstenite::tungstenite;

/// Errors produced by the Live websocket client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("handshake rejected with HTTP {status}: {body}")]
    HandshakeRejected { status: u16, body: String },

    #[error("connection closed by server (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("unexpected message before setup completed: {0}")]
    UnexpectedMessage(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a caller should react to a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The API key was rejected. Try another one.
    InvalidCredential,
    /// The API key is over quota. Try another one.
    ExhaustedCredential,
    /// Network trouble; the same key may work on retry.
    Transient,
    /// The server ended the session on its own schedule.
    IdleTimeout,
    /// The exchange itself was malformed.
    Protocol,
}

impl ClientError {
    pub fn class(&self) -> FailureClass {
        match self {
            ClientError::HandshakeRejected { status, body } => classify_status(*status, body),
            ClientError::Closed { code, reason } => classify_close(*code, reason),
            ClientError::Timeout(_) => FailureClass::Transient,
            ClientError::UnexpectedMessage(_)
            | ClientError::InvalidConfig(_)
            | ClientError::Json(_) => FailureClass::Protocol,
            ClientError::WebSocket(e) => classify_ws(e),
        }
    }

    /// Converts a tungstenite error raised during the upgrade, pulling the
    /// HTTP status out of rejected handshakes.
    pub(crate) fn from_handshake(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Http(response) => {
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                ClientError::HandshakeRejected {
                    status: response.status().as_u16(),
                    body,
                }
            }
            other => ClientError::WebSocket(other),
        }
    }
}

fn mentions_quota(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("quota") || text.contains("resource_exhausted") || text.contains("rate limit")
}

fn mentions_bad_key(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("api key")
        || text.contains("api_key")
        || text.contains("permission")
        || text.contains("unauthenticated")
}

fn classify_status(status: u16, body: &str) -> FailureClass {
    match status {
        429 => FailureClass::ExhaustedCredential,
        401 | 403 => FailureClass::InvalidCredential,
        400 if mentions_bad_key(body) => FailureClass::InvalidCredential,
        408 | 500..=599 => FailureClass::Transient,
        _ => FailureClass::Protocol,
    }
}

fn classify_close(code: u16, reason: &str) -> FailureClass {
    // Key and quota rejections arrive under several close codes; the reason decides.
    if mentions_quota(reason) {
        return FailureClass::ExhaustedCredential;
    }
    if mentions_bad_key(reason) {
        return FailureClass::InvalidCredential;
    }
    match code {
        1008 | 1002 | 1003 | 1007 => FailureClass::Protocol,
        1000 | 1001 => FailureClass::IdleTimeout,
        1011 if reason.to_ascii_lowercase().contains("deadline") => FailureClass::IdleTimeout,
        _ => FailureClass::Transient,
    }
}

fn classify_ws(e: &tungstenite::Error) -> FailureClass {
    match e {
        tungstenite::Error::Http(response) => classify_status(response.status().as_u16(), ""),
        tungstenite::Error::Url(_)
        | tungstenite::Error::Protocol(_)
        | tungstenite::Error::Capacity(_) => FailureClass::Protocol,
        _ => FailureClass::Transient,
    }
}
