//! Canonical, provider-independent response shapes.

use serde::{Deserialize, Serialize};
use switchboard_types::ModelId;

/// Token counts reported by an adapter, or estimated when the provider
/// omits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced by the completion.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Convenience constructor.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FinishReason {
    /// Natural stop or stop sequence.
    #[default]
    Stop,
    /// Output token cap reached.
    Length,
    /// The model requested a tool invocation.
    ToolCall,
    /// Provider-side content filter intervened.
    ContentFilter,
    /// Anything else, preserved for telemetry.
    Other,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// JSON arguments as produced by the model.
    pub arguments: serde_json::Value,
}

/// Canonical chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    /// Model that actually served the request.
    pub model: ModelId,
    /// Assistant text.
    pub content: String,
    /// Tool calls, if any.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Stop reason.
    #[serde(default)]
    pub finish_reason: FinishReason,
    /// Token accounting.
    pub usage: TokenUsage,
}

/// Canonical embedding response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Model that served the request.
    pub model: ModelId,
    /// One vector per input, input order preserved.
    pub vectors: Vec<Vec<f32>>,
    /// Token accounting (output is always zero).
    pub usage: TokenUsage,
}

/// Status of an asynchronous image job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not finished.
    Pending,
    /// Finished; URLs are populated.
    Succeeded,
    /// Failed terminally.
    Failed,
}

/// Canonical image generation result: an async job envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageJob {
    /// Gateway job id for polling.
    pub job_id: String,
    /// Model that serves the job.
    pub model: ModelId,
    /// Current status.
    pub status: JobStatus,
    /// Result URLs when succeeded.
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Canonical transcription result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Model that served the request.
    pub model: ModelId,
    /// Transcribed text.
    pub text: String,
    /// Audio duration in seconds, when the provider reports it.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Canonical synthesized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechAudio {
    /// Model that served the request.
    pub model: ModelId,
    /// Raw audio bytes.
    #[serde(with = "crate::request::serde_bytes_b64")]
    pub audio: Vec<u8>,
    /// MIME type of `audio`.
    pub mime: String,
}

/// A provider-independent response, one variant per request kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CanonicalResponse {
    /// Chat completion.
    Chat(ChatCompletion),
    /// Embedding vectors.
    Embed(Embedding),
    /// Image job envelope.
    Image(ImageJob),
    /// Transcription.
    SpeechToText(Transcript),
    /// Synthesized speech.
    TextToSpeech(SpeechAudio),
}

impl CanonicalResponse {
    /// Token accounting for the response; zero for kinds without tokens.
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        match self {
            Self::Chat(c) => c.usage,
            Self::Embed(e) => e.usage,
            Self::Image(_) | Self::SpeechToText(_) | Self::TextToSpeech(_) => TokenUsage::default(),
        }
    }

    /// The model that served the response.
    #[must_use]
    pub const fn model(&self) -> &ModelId {
        match self {
            Self::Chat(c) => &c.model,
            Self::Embed(e) => &e.model,
            Self::Image(i) => &i.model,
            Self::SpeechToText(t) => &t.model,
            Self::TextToSpeech(s) => &s.model,
        }
    }
}
