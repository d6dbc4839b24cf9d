use serde::{Deserialize, Serialize};

/// What content types and built-in tools an agent accepts.
///
/// Checked before the provider is invoked so unsupported attachments are
/// rejected with a validation error instead of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCapabilitySet {
    pub text: bool,
    pub image: bool,
    pub audio: bool,
    pub video: bool,
    pub pdf: bool,
    pub web_search: bool,
    pub image_generation: bool,
}

impl Default for AgentCapabilitySet {
    fn default() -> Self {
        Self {
            text: true,
            image: false,
            audio: false,
            video: false,
            pdf: false,
            web_search: false,
            image_generation: false,
        }
    }
}

/// A single capability an attachment or request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Image,
    Audio,
    Video,
    Pdf,
    WebSearch,
    ImageGeneration,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Image => "image",
            Capability::Audio => "audio",
            Capability::Video => "video",
            Capability::Pdf => "pdf",
            Capability::WebSearch => "web_search",
            Capability::ImageGeneration => "image_generation",
        }
    }

    /// Classify a MIME type. Unknown types are treated as text documents.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            Capability::Image
        } else if mime.starts_with("audio/") {
            Capability::Audio
        } else if mime.starts_with("video/") {
            Capability::Video
        } else if mime == "application/pdf" {
            Capability::Pdf
        } else {
            Capability::Text
        }
    }
}

impl AgentCapabilitySet {
    pub fn supports(&self, cap: Capability) -> bool {
        match cap {
            Capability::Text => self.text,
            Capability::Image => self.image,
            Capability::Audio => self.audio,
            Capability::Video => self.video,
            Capability::Pdf => self.pdf,
            Capability::WebSearch => self.web_search,
            Capability::ImageGeneration => self.image_generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_text_only() {
        let caps = AgentCapabilitySet::default();
        assert!(caps.supports(Capability::Text));
        assert!(!caps.supports(Capability::Image));
        assert!(!caps.supports(Capability::ImageGeneration));
    }

    #[test]
    fn mime_classification() {
        assert_eq!(Capability::from_mime("image/PNG"), Capability::Image);
        assert_eq!(Capability::from_mime("application/pdf"), Capability::Pdf);
        assert_eq!(Capability::from_mime("audio/mpeg"), Capability::Audio);
        assert_eq!(Capability::from_mime("text/markdown"), Capability::Text);
    }

    #[test]
    fn partial_toml_keeps_text_default() {
        let caps: AgentCapabilitySet = serde_json::from_str(r#"{"image": true}"#).unwrap();
        assert!(caps.text);
        assert!(caps.image);
    }
}
