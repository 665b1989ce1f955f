/// A turn of conversation content: an optional role and a list of parts.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single text part attributed to the user.
    pub fn user_text(text: &str) -> Self {
        Self::new().with_role("user").with_part(Part::text(text))
    }

    /// A role-less text content, the shape used for system instructions.
    pub fn text(text: &str) -> Self {
        Self::new().with_part(Part::text(text))
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }
}

/// One piece of content. The server sends either text or inline media.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    pub fn inline_data(blob: Blob) -> Self {
        Self {
            text: None,
            inline_data: Some(blob),
        }
    }

    pub fn text_value(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn blob(&self) -> Option<&Blob> {
        self.inline_data.as_ref()
    }
}

/// Base64 encoded media with its mime type, e.g. `audio/pcm;rate=16000`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    mime_type: String,
    data: String,
}

impl Blob {
    pub fn new(mime_type: &str, data: String) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data,
        }
    }

    /// Raw 16-bit little-endian PCM at the given sample rate.
    pub fn pcm(sample_rate: u32, data: String) -> Self {
        Self::new(&format!("audio/pcm;rate={sample_rate}"), data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    /// Parses the `rate=` parameter of the mime type, if present.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_rate_is_parsed_from_mime_type() {
        let blob = Blob::pcm(24000, String::new());
        assert_eq!(blob.mime_type(), "audio/pcm;rate=24000");
        assert_eq!(blob.sample_rate(), Some(24000));
        assert!(blob.is_audio());

        let no_rate = Blob::new("audio/pcm", String::new());
        assert_eq!(no_rate.sample_rate(), None);
    }

    #[test]
    fn user_text_serializes_with_role() {
        let json = serde_json::to_value(Content::user_text("hi")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "role": "user", "parts": [{ "text": "hi" }] })
        );
    }
}
