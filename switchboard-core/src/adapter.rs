//! Adapter capability traits and the primary `ProviderAdapter` interface.
//!
//! Each wire family implements `ProviderAdapter` and advertises the
//! capabilities it actually supports by returning `Some` from the matching
//! accessor. The router consults the accessors; there is no central switch
//! over provider names.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::GatewayError;
use crate::request::{ChatRequest, EmbedRequest, ImageRequest, SttRequest, TtsRequest};
use crate::response::{ChatCompletion, Embedding, ImageJob, SpeechAudio, Transcript};
use crate::stream::{StreamEvent, StreamHandle};
use switchboard_types::{Capability, ModelId, ProviderId, Secret, WireFamily};

/// Focused role trait for adapters that serve non-streaming chat.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Execute a chat completion using the given upstream key.
    async fn chat(&self, req: &ChatRequest, key: &Secret) -> Result<ChatCompletion, GatewayError>;
}

/// Focused role trait for adapters that serve streaming chat.
#[async_trait]
pub trait ChatStreamProvider: Send + Sync {
    /// Start a streaming chat session.
    ///
    /// The receiver yields events in provider order, ending with `Done` or
    /// `Error`. Dropping the handle closes the upstream transport promptly.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        key: &Secret,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), GatewayError>;
}

/// Focused role trait for adapters that serve embeddings.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Compute embedding vectors for the request inputs.
    async fn embed(&self, req: &EmbedRequest, key: &Secret) -> Result<Embedding, GatewayError>;
}

/// Focused role trait for adapters that generate images.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Submit an image generation job.
    async fn generate(&self, req: &ImageRequest, key: &Secret) -> Result<ImageJob, GatewayError>;

    /// Whether submission is safe to retry on an ambiguous outcome.
    ///
    /// Providers that bill on submit must leave this `false`; the retry layer
    /// will not re-submit after a timeout whose outcome is unknown.
    fn idempotent_submission(&self) -> bool {
        false
    }
}

/// Focused role trait for adapters that transcribe audio.
#[async_trait]
pub trait SpeechToTextProvider: Send + Sync {
    /// Transcribe the request audio.
    async fn transcribe(&self, req: &SttRequest, key: &Secret) -> Result<Transcript, GatewayError>;
}

/// Focused role trait for adapters that synthesize speech.
#[async_trait]
pub trait TextToSpeechProvider: Send + Sync {
    /// Synthesize speech for the request text.
    async fn synthesize(&self, req: &TtsRequest, key: &Secret)
    -> Result<SpeechAudio, GatewayError>;
}

/// Main adapter trait implemented by wire-family crates. Exposes capability
/// discovery.
pub trait ProviderAdapter: Send + Sync {
    /// The configured provider this adapter instance speaks for.
    fn id(&self) -> &ProviderId;

    /// Wire-protocol family.
    fn family(&self) -> WireFamily;

    /// Whether this adapter's provider serves the given model.
    fn supports_model(&self, model: &ModelId) -> bool;

    /// Advertise chat capability by returning a usable trait object when supported.
    fn as_chat_provider(&self) -> Option<&dyn ChatProvider> {
        None
    }

    /// Advertise streaming-chat capability.
    fn as_chat_stream_provider(&self) -> Option<&dyn ChatStreamProvider> {
        None
    }

    /// Advertise embedding capability.
    fn as_embed_provider(&self) -> Option<&dyn EmbedProvider> {
        None
    }

    /// Advertise image generation capability.
    fn as_image_provider(&self) -> Option<&dyn ImageProvider> {
        None
    }

    /// Advertise speech-to-text capability.
    fn as_speech_to_text_provider(&self) -> Option<&dyn SpeechToTextProvider> {
        None
    }

    /// Advertise text-to-speech capability.
    fn as_text_to_speech_provider(&self) -> Option<&dyn TextToSpeechProvider> {
        None
    }

    /// Capability check derived from the accessors.
    fn supports(&self, cap: Capability) -> bool {
        match cap {
            Capability::Chat => self.as_chat_provider().is_some(),
            Capability::ChatStream => self.as_chat_stream_provider().is_some(),
            Capability::Embed => self.as_embed_provider().is_some(),
            Capability::ImageGenerate => self.as_image_provider().is_some(),
            Capability::SpeechToText => self.as_speech_to_text_provider().is_some(),
            Capability::TextToSpeech => self.as_text_to_speech_provider().is_some(),
            _ => unreachable!("Capability is non_exhaustive only across crate boundaries"),
        }
    }
}
