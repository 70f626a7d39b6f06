//! Canonical, provider-independent request shapes.
//!
//! Requests are tagged variants with small, enumerated parameter structs.
//! Unknown fields are rejected at the HTTP edge (`deny_unknown_fields`), not
//! silently carried.

use core::fmt;
use serde::{Deserialize, Serialize};
use switchboard_types::Capability;

/// The kind of work a canonical request asks for.
///
/// Distinct from [`Capability`]: a chat request with `stream: true` is still
/// kind `Chat` but routes for capability `ChatStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// Chat completion.
    Chat,
    /// Text embedding.
    Embed,
    /// Image generation.
    Image,
    /// Speech-to-text.
    SpeechToText,
    /// Text-to-speech.
    TextToSpeech,
}

impl RequestKind {
    /// Stable identifier for config keys and telemetry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embed => "embed",
            Self::Image => "image",
            Self::SpeechToText => "speech-to-text",
            Self::TextToSpeech => "text-to-speech",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The client's model request: either a concrete model id or `auto`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelHint(String);

impl ModelHint {
    /// Wrap a raw model string as presented by the client.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The literal hint requesting automatic model selection.
    #[must_use]
    pub fn auto() -> Self {
        Self("auto".to_string())
    }

    /// True when the router is free to pick any eligible model.
    #[must_use]
    pub fn is_auto(&self) -> bool {
        self.0.eq_ignore_ascii_case("auto") || self.0.is_empty()
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System / instruction message.
    System,
    /// End-user message.
    User,
    /// Prior assistant turn.
    Assistant,
}

impl Role {
    /// Wire-stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Enumerated decoding parameters.
///
/// This is deliberately a closed set: anything a provider cannot express is
/// dropped by its adapter, and anything a client sends outside this set is
/// rejected at the edge.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingParams {
    /// Sampling temperature, `0.0..=2.0`.
    pub temperature: Option<f32>,
    /// Nucleus sampling mass.
    pub top_p: Option<f32>,
    /// Output token cap.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop: Vec<String>,
}

impl DecodingParams {
    /// Validate parameter ranges.
    ///
    /// # Errors
    /// Returns the offending field name and reason.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(("temperature", format!("{t} outside 0.0..=2.0")));
        }
        if let Some(p) = self.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(("top_p", format!("{p} outside 0.0..=1.0")));
        }
        if let Some(m) = self.max_tokens
            && m == 0
        {
            return Err(("max_tokens", "must be positive".to_string()));
        }
        Ok(())
    }
}

/// Canonical chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model or `auto`.
    pub model: ModelHint,
    /// Conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Decoding parameters.
    #[serde(default)]
    pub params: DecodingParams,
    /// Whether the client wants server-sent events.
    #[serde(default)]
    pub stream: bool,
}

/// Canonical embedding request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedRequest {
    /// Requested model or `auto`.
    pub model: ModelHint,
    /// Inputs to embed, order preserved in the response.
    pub input: Vec<String>,
}

/// Canonical image generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Requested model or `auto`.
    pub model: ModelHint,
    /// Text prompt.
    pub prompt: String,
    /// Number of images.
    #[serde(default = "default_image_count")]
    pub count: u8,
    /// Size hint such as `1024x1024`, provider-interpreted.
    #[serde(default)]
    pub size: Option<String>,
}

const fn default_image_count() -> u8 {
    1
}

/// Canonical speech-to-text request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttRequest {
    /// Requested model or `auto`.
    pub model: ModelHint,
    /// Raw audio bytes.
    #[serde(with = "serde_bytes_b64")]
    pub audio: Vec<u8>,
    /// MIME type of `audio`.
    pub mime: String,
    /// Optional BCP-47 language hint.
    #[serde(default)]
    pub language: Option<String>,
}

/// Canonical text-to-speech request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsRequest {
    /// Requested model or `auto`.
    pub model: ModelHint,
    /// Text to synthesize.
    pub text: String,
    /// Provider-interpreted voice name.
    #[serde(default)]
    pub voice: Option<String>,
    /// Output format such as `mp3` or `wav`.
    #[serde(default)]
    pub format: Option<String>,
}

/// A provider-independent request, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CanonicalRequest {
    /// Chat completion (streaming or not).
    Chat(ChatRequest),
    /// Text embedding.
    Embed(EmbedRequest),
    /// Image generation.
    Image(ImageRequest),
    /// Speech-to-text.
    SpeechToText(SttRequest),
    /// Text-to-speech.
    TextToSpeech(TtsRequest),
}

impl CanonicalRequest {
    /// The request kind.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Chat(_) => RequestKind::Chat,
            Self::Embed(_) => RequestKind::Embed,
            Self::Image(_) => RequestKind::Image,
            Self::SpeechToText(_) => RequestKind::SpeechToText,
            Self::TextToSpeech(_) => RequestKind::TextToSpeech,
        }
    }

    /// The capability required to serve this request.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::Chat(c) => {
                if c.stream {
                    Capability::ChatStream
                } else {
                    Capability::Chat
                }
            }
            Self::Embed(_) => Capability::Embed,
            Self::Image(_) => Capability::ImageGenerate,
            Self::SpeechToText(_) => Capability::SpeechToText,
            Self::TextToSpeech(_) => Capability::TextToSpeech,
        }
    }

    /// The client's model hint.
    #[must_use]
    pub const fn model_hint(&self) -> &ModelHint {
        match self {
            Self::Chat(r) => &r.model,
            Self::Embed(r) => &r.model,
            Self::Image(r) => &r.model,
            Self::SpeechToText(r) => &r.model,
            Self::TextToSpeech(r) => &r.model,
        }
    }

    /// True for streaming chat.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Chat(c) if c.stream)
    }

    /// The effective sampling temperature, when the kind has one.
    #[must_use]
    pub fn temperature(&self) -> Option<f32> {
        match self {
            Self::Chat(c) => c.params.temperature,
            _ => None,
        }
    }
}

pub(crate) mod serde_bytes_b64 {
    //! Audio payloads travel as base64 strings in JSON.
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        B64.decode(s).map_err(serde::de::Error::custom)
    }
}
