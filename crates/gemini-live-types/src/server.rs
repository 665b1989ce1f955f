use crate::content::Content;

/// A message received from the server. Exactly one of the fields is normally
/// set; unknown fields (tool calls, usage metadata) are ignored.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub turn_complete: bool,
    /// Set when the server's voice activity detection cut the model off.
    pub interrupted: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionResumptionUpdate {
    pub new_handle: Option<String>,
    pub resumable: bool,
}

impl SessionResumptionUpdate {
    /// The handle to resume with, if the server says the session is resumable now.
    pub fn usable_handle(&self) -> Option<&str> {
        if self.resumable {
            self.new_handle.as_deref().filter(|h| !h.is_empty())
        } else {
            None
        }
    }
}

/// Notice that the server will close the connection soon.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    pub time_left: Option<String>,
}
