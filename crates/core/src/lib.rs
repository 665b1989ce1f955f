pub mod audio;
pub mod buffer;
pub mod config;
pub mod credentials;
pub mod error;
pub mod playback;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testing;

pub use audio::{AudioCaptureSource, AudioSink, Direction, Frame};
pub use config::{ResponseMode, SessionConfig, Voice};
pub use credentials::{Credential, CredentialPool, CredentialSource, CredentialStatus};
pub use error::{AuthFailure, SessionError};
pub use playback::PlaybackQueue;
pub use session::{ReconnectPolicy, SessionCore, SessionEvent, SessionHandle, SessionState};
pub use stats::SessionStats;
pub use transport::{
    ConnectionState, ConnectionStateCell, ConversationHandle, InboundEvent, Outbound,
    StreamTransport, TransportFactory,
};
