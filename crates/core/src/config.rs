use crate::audio::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant and answer in a friendly tone.";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseConfigError {
    #[error("unknown voice {0:?}, expected one of Aoede, Charon, Fenrir, Kore, Puck")]
    UnknownVoice(String),
    #[error("unknown response mode {0:?}, expected audio or text")]
    UnknownResponseMode(String),
}

/// The prebuilt voices offered by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Voice {
    Aoede,
    Charon,
    Fenrir,
    Kore,
    #[default]
    Puck,
}

impl Voice {
    pub const ALL: [Voice; 5] = [Voice::Aoede, Voice::Charon, Voice::Fenrir, Voice::Kore, Voice::Puck];

    pub fn as_str(self) -> &'static str {
        match self {
            Voice::Aoede => "Aoede",
            Voice::Charon => "Charon",
            Voice::Fenrir => "Fenrir",
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = ParseConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseConfigError::UnknownVoice(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseMode {
    #[default]
    Audio,
    Text,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Audio => f.write_str("AUDIO"),
            ResponseMode::Text => f.write_str("TEXT"),
        }
    }
}

impl FromStr for ResponseMode {
    type Err = ParseConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(ResponseMode::Audio),
            "text" => Ok(ResponseMode::Text),
            _ => Err(ParseConfigError::UnknownResponseMode(s.to_string())),
        }
    }
}

/// Immutable per-session settings. A different configuration means a new session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    voice: Voice,
    response_mode: ResponseMode,
    system_instruction: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    pub fn voice(&self) -> Voice {
        self.voice
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.response_mode
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn input_sample_rate(&self) -> u32 {
        self.input_sample_rate
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output_sample_rate
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfigBuilder::new().build()
    }
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig {
                voice: Voice::default(),
                response_mode: ResponseMode::default(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
                input_sample_rate: INPUT_SAMPLE_RATE,
                output_sample_rate: OUTPUT_SAMPLE_RATE,
            },
        }
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.config.voice = voice;
        self
    }

    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.config.response_mode = mode;
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.system_instruction = instruction.into();
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
