use crate::content::Content;

/// The first message of every connection. The server answers with `setupComplete`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Model resource name, e.g. `models/gemini-2.0-flash-exp`.
    model: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    system_instruction: Option<Content>,

    /// Present (even empty) to ask the server for resumption handles.
    /// Carries the handle of a previous connection when resuming.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    session_resumption: Option<SessionResumptionConfig>,
}

impl Setup {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            generation_config: None,
            system_instruction: None,
            session_resumption: None,
        }
    }

    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = Some(config);
        self
    }

    pub fn with_system_instruction(mut self, instruction: &str) -> Self {
        self.system_instruction = Some(Content::text(instruction));
        self
    }

    pub fn with_session_resumption(mut self, handle: Option<&str>) -> Self {
        self.session_resumption = Some(SessionResumptionConfig {
            handle: handle.map(str::to_string),
        });
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generation_config(&self) -> Option<&GenerationConfig> {
        self.generation_config.as_ref()
    }

    pub fn system_instruction(&self) -> Option<&Content> {
        self.system_instruction.as_ref()
    }

    pub fn session_resumption(&self) -> Option<&SessionResumptionConfig> {
        self.session_resumption.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<Modality>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    speech_config: Option<SpeechConfig>,
}

impl GenerationConfig {
    pub fn new(modality: Modality) -> Self {
        Self {
            response_modalities: vec![modality],
            speech_config: None,
        }
    }

    pub fn with_voice(mut self, voice_name: &str) -> Self {
        self.speech_config = Some(SpeechConfig::prebuilt(voice_name));
        self
    }

    pub fn response_modalities(&self) -> &[Modality] {
        &self.response_modalities
    }

    pub fn speech_config(&self) -> Option<&SpeechConfig> {
        self.speech_config.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

impl SpeechConfig {
    pub fn prebuilt(voice_name: &str) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            },
        }
    }

    pub fn voice_name(&self) -> &str {
        &self.voice_config.prebuilt_voice_config.voice_name
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionConfig {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    handle: Option<String>,
}

impl SessionResumptionConfig {
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_setup_matches_wire_shape() {
        let setup = Setup::new("models/gemini-2.0-flash-exp")
            .with_generation_config(GenerationConfig::new(Modality::Audio).with_voice("Puck"))
            .with_system_instruction("be brief")
            .with_session_resumption(Some("h-1"));

        let json = serde_json::to_value(&setup).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "models/gemini-2.0-flash-exp",
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Puck" } }
                    }
                },
                "systemInstruction": { "parts": [{ "text": "be brief" }] },
                "sessionResumption": { "handle": "h-1" }
            })
        );
    }

    #[test]
    fn fresh_resumption_request_is_an_empty_object() {
        let setup = Setup::new("m").with_session_resumption(None);
        let json = serde_json::to_value(&setup).unwrap();
        assert_eq!(json["sessionResumption"], serde_json::json!({}));
        assert!(json.get("generationConfig").is_none());
    }
}
