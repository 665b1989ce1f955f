use crate::content::{Blob, Content};
use crate::setup::Setup;

/// Messages sent from the client. Each serializes as a single-key object,
/// e.g. `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
}

/// A complete text turn appended to the conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    turns: Vec<Content>,
    turn_complete: bool,
}

impl ClientContent {
    /// One user text turn that asks the model to respond.
    pub fn user_turn(text: &str) -> Self {
        Self {
            turns: vec![Content::user_text(text)],
            turn_complete: true,
        }
    }

    pub fn turns(&self) -> &[Content] {
        &self.turns
    }

    pub fn turn_complete(&self) -> bool {
        self.turn_complete
    }
}

/// Streaming media input; the server runs voice activity detection over it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    media_chunks: Vec<Blob>,
}

impl RealtimeInput {
    pub fn audio(blob: Blob) -> Self {
        Self {
            media_chunks: vec![blob],
        }
    }

    pub fn media_chunks(&self) -> &[Blob] {
        &self.media_chunks
    }
}
