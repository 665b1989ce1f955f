//! Wire types for the Gemini Live (`BidiGenerateContent`) websocket protocol.
//!
//! Only the subset needed for a voice/text conversation is modelled. Unknown
//! server fields are ignored so newer server revisions keep deserializing.

pub mod client;
pub mod content;
pub mod server;
pub mod setup;

pub use client::{ClientContent, ClientMessage, RealtimeInput};
pub use content::{Blob, Content, Part};
pub use server::{GoAway, ServerContent, ServerMessage, SessionResumptionUpdate, Transcription};
pub use setup::{GenerationConfig, Modality, SessionResumptionConfig, Setup, SpeechConfig};
