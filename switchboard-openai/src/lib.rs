//! switchboard-openai
//!
//! Adapter for the OpenAI-compatible wire family: `/chat/completions`,
//! `/embeddings`, `/images/generations`, `/audio/transcriptions`, and
//! `/audio/speech` under a configurable base URL. Covers hosted OpenAI as
//! well as the many self-hosted servers that speak the same protocol.
#![warn(missing_docs)]

mod wire;

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use switchboard_core::adapter::{
    ChatProvider, ChatStreamProvider, EmbedProvider, ImageProvider, ProviderAdapter,
    SpeechToTextProvider, TextToSpeechProvider,
};
use switchboard_core::request::{ChatRequest, EmbedRequest, ImageRequest, SttRequest, TtsRequest};
use switchboard_core::response::{
    ChatCompletion, Embedding, ImageJob, JobStatus, SpeechAudio, TokenUsage, Transcript,
};
use switchboard_core::stream::{EVENT_BUFFER, StreamEvent, StreamHandle, event_channel};
use switchboard_core::{GatewayError, ModelHint, cancel_pair};
use switchboard_types::{AuthScheme, ModelId, ProviderConfig, ProviderId, Secret, WireFamily};

/// Builder for [`OpenAiAdapter`].
///
/// Defaults are conservative: 10s connect, 120s overall, 30s stream idle.
pub struct OpenAiAdapterBuilder {
    provider: ProviderConfig,
    connect_timeout: Duration,
    overall_timeout: Duration,
    idle_timeout: Duration,
}

impl OpenAiAdapterBuilder {
    /// Start a builder for the given provider configuration.
    #[must_use]
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            connect_timeout: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Connect/first-byte timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overall deadline for non-streaming calls.
    #[must_use]
    pub const fn overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }

    /// Inter-event idle timeout for streams (replaces the overall deadline).
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Build the adapter.
    ///
    /// # Errors
    /// `validation.invalid` when the base URL does not parse.
    pub fn build(self) -> Result<OpenAiAdapter, GatewayError> {
        url::Url::parse(&self.provider.base_url)
            .map_err(|e| GatewayError::validation("base_url", e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("http client: {e}")))?;
        Ok(OpenAiAdapter {
            provider: self.provider,
            client,
            overall_timeout: self.overall_timeout,
            idle_timeout: self.idle_timeout,
        })
    }
}

/// Adapter instance bound to one configured provider.
pub struct OpenAiAdapter {
    provider: ProviderConfig,
    client: reqwest::Client,
    overall_timeout: Duration,
    idle_timeout: Duration,
}

impl OpenAiAdapter {
    /// Builder entry point.
    #[must_use]
    pub fn builder(provider: ProviderConfig) -> OpenAiAdapterBuilder {
        OpenAiAdapterBuilder::new(provider)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.provider.base_url.trim_end_matches('/'), path)
    }

    fn resolve_model(&self, hint: &ModelHint) -> ModelId {
        if hint.is_auto() {
            self.provider
                .models
                .first()
                .map_or_else(|| ModelId::new("default"), |m| m.id.clone())
        } else {
            ModelId::new(hint.as_str())
        }
    }

    fn authed(&self, rb: reqwest::RequestBuilder, key: &Secret) -> reqwest::RequestBuilder {
        match self.provider.auth {
            AuthScheme::Bearer => rb.bearer_auth(key.expose()),
            AuthScheme::XApiKey => rb.header("x-api-key", key.expose()),
            AuthScheme::QueryParam => rb.query(&[("key", key.expose())]),
            _ => unreachable!("AuthScheme is non_exhaustive only across crate boundaries"),
        }
    }

    fn transport_error(&self, e: &reqwest::Error) -> GatewayError {
        let provider = self.provider.id.to_string();
        if e.is_timeout() {
            GatewayError::UpstreamTimeout { provider }
        } else {
            GatewayError::unavailable(provider, e.to_string())
        }
    }

    async fn fail_from_status(&self, resp: reqwest::Response) -> GatewayError {
        let provider = self.provider.id.to_string();
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<wire::WireErrorEnvelope>(&body)
            .map_or(body, |e| e.error.message);
        match status {
            429 => GatewayError::UpstreamRateLimited {
                provider,
                retry_after_secs: retry_after,
            },
            400..=499 => GatewayError::UpstreamClientError {
                provider,
                status,
                message,
            },
            _ => GatewayError::UpstreamServerError {
                provider,
                status,
                message,
            },
        }
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        key: &Secret,
    ) -> Result<T, GatewayError> {
        let rb = self
            .client
            .post(self.endpoint(path))
            .timeout(self.overall_timeout)
            .json(body);
        let resp = self
            .authed(rb, key)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        if !resp.status().is_success() {
            return Err(self.fail_from_status(resp).await);
        }
        resp.json::<T>()
            .await
            .map_err(|e| self.transport_error(&e))
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &ProviderId {
        &self.provider.id
    }

    fn family(&self) -> WireFamily {
        WireFamily::OpenAiCompatible
    }

    fn supports_model(&self, model: &ModelId) -> bool {
        self.provider.model(model).is_some()
    }

    fn as_chat_provider(&self) -> Option<&dyn ChatProvider> {
        Some(self as &dyn ChatProvider)
    }
    fn as_chat_stream_provider(&self) -> Option<&dyn ChatStreamProvider> {
        Some(self as &dyn ChatStreamProvider)
    }
    fn as_embed_provider(&self) -> Option<&dyn EmbedProvider> {
        Some(self as &dyn EmbedProvider)
    }
    fn as_image_provider(&self) -> Option<&dyn ImageProvider> {
        Some(self as &dyn ImageProvider)
    }
    fn as_speech_to_text_provider(&self) -> Option<&dyn SpeechToTextProvider> {
        Some(self as &dyn SpeechToTextProvider)
    }
    fn as_text_to_speech_provider(&self) -> Option<&dyn TextToSpeechProvider> {
        Some(self as &dyn TextToSpeechProvider)
    }
}

#[async_trait]
impl ChatProvider for OpenAiAdapter {
    async fn chat(&self, req: &ChatRequest, key: &Secret) -> Result<ChatCompletion, GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_chat(req, &model, false);
        let resp: wire::WireChatResponse =
            self.post_json("chat/completions", &body, key).await?;
        Ok(wire::decode_chat(resp, &model))
    }
}

#[async_trait]
impl ChatStreamProvider for OpenAiAdapter {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        key: &Secret,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_chat(req, &model, true);
        // Streams get no overall deadline; idleness is policed per event.
        let rb = self.client.post(self.endpoint("chat/completions")).json(&body);
        let resp = self
            .authed(rb, key)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        if !resp.status().is_success() {
            return Err(self.fail_from_status(resp).await);
        }

        let provider = self.provider.id.to_string();
        let idle = self.idle_timeout;
        let (tx, rx) = event_channel(EVENT_BUFFER);
        let (stop, mut stop_token) = cancel_pair();

        let task = tokio::spawn(async move {
            let mut source = resp.bytes_stream().eventsource();
            let mut usage: Option<TokenUsage> = None;
            loop {
                let next = tokio::select! {
                    () = stop_token.cancelled() => return,
                    next = tokio::time::timeout(idle, source.next()) => next,
                };
                let item = match next {
                    Err(_) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                error: GatewayError::UpstreamTimeout {
                                    provider: provider.clone(),
                                },
                            })
                            .await;
                        return;
                    }
                    Ok(None) => {
                        // Upstream closed without a sentinel; finish what we have.
                        if let Some(u) = usage.take() {
                            let _ = tx.send(StreamEvent::Usage { usage: u }).await;
                        }
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                    Ok(Some(item)) => item,
                };
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                error: GatewayError::unavailable(provider.clone(), e.to_string()),
                            })
                            .await;
                        return;
                    }
                };
                if event.data.trim() == "[DONE]" {
                    if let Some(u) = usage.take() {
                        let _ = tx.send(StreamEvent::Usage { usage: u }).await;
                    }
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
                let Ok(chunk) = serde_json::from_str::<wire::WireChunk>(&event.data) else {
                    continue; // tolerate unknown frames
                };
                if let Some(u) = chunk.usage {
                    usage = Some(TokenUsage::new(u.prompt_tokens, u.completion_tokens));
                }
                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content
                        && !text.is_empty()
                        && tx.send(StreamEvent::Delta { text }).await.is_err()
                    {
                        return;
                    }
                    for tc in choice.delta.tool_calls {
                        let call = wire::decode_tool_call(tc);
                        if tx.send(StreamEvent::ToolCall { call }).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok((StreamHandle::new(task, stop), rx))
    }
}

#[async_trait]
impl EmbedProvider for OpenAiAdapter {
    async fn embed(&self, req: &EmbedRequest, key: &Secret) -> Result<Embedding, GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_embed(req, &model);
        let resp: wire::WireEmbedResponse = self.post_json("embeddings", &body, key).await?;
        Ok(wire::decode_embed(resp, &model))
    }
}

#[async_trait]
impl ImageProvider for OpenAiAdapter {
    async fn generate(&self, req: &ImageRequest, key: &Secret) -> Result<ImageJob, GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::WireImageRequest {
            model: model.as_str().to_string(),
            prompt: req.prompt.clone(),
            n: req.count,
            size: req.size.clone(),
        };
        let resp: wire::WireImageResponse =
            self.post_json("images/generations", &body, key).await?;
        // The wire API is synchronous; the canonical envelope is a finished job.
        let urls = resp
            .data
            .into_iter()
            .filter_map(|row| {
                row.url
                    .or_else(|| row.b64_json.map(|b| format!("data:image/png;base64,{b}")))
            })
            .collect();
        Ok(ImageJob {
            job_id: String::new(), // assigned by the gateway's job store
            model,
            status: JobStatus::Succeeded,
            urls,
        })
    }
}

#[async_trait]
impl SpeechToTextProvider for OpenAiAdapter {
    async fn transcribe(&self, req: &SttRequest, key: &Secret) -> Result<Transcript, GatewayError> {
        let model = self.resolve_model(&req.model);
        let part = reqwest::multipart::Part::bytes(req.audio.clone())
            .file_name("audio")
            .mime_str(&req.mime)
            .map_err(|e| GatewayError::validation("mime", e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", model.as_str().to_string())
            .part("file", part);
        if let Some(lang) = &req.language {
            form = form.text("language", lang.clone());
        }
        let rb = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .timeout(self.overall_timeout)
            .multipart(form);
        let resp = self
            .authed(rb, key)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        if !resp.status().is_success() {
            return Err(self.fail_from_status(resp).await);
        }
        let body: wire::WireTranscription =
            resp.json().await.map_err(|e| self.transport_error(&e))?;
        Ok(Transcript {
            model,
            text: body.text,
            duration_secs: body.duration,
        })
    }
}

#[async_trait]
impl TextToSpeechProvider for OpenAiAdapter {
    async fn synthesize(&self, req: &TtsRequest, key: &Secret) -> Result<SpeechAudio, GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::WireSpeechRequest {
            model: model.as_str().to_string(),
            input: req.text.clone(),
            voice: req.voice.clone().unwrap_or_else(|| "alloy".to_string()),
            response_format: req.format.clone(),
        };
        let rb = self
            .client
            .post(self.endpoint("audio/speech"))
            .timeout(self.overall_timeout)
            .json(&body);
        let resp = self
            .authed(rb, key)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        if !resp.status().is_success() {
            return Err(self.fail_from_status(resp).await);
        }
        let mime = match req.format.as_deref() {
            Some("wav") => "audio/wav",
            Some("opus") => "audio/opus",
            _ => "audio/mpeg",
        }
        .to_string();
        let audio = resp
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e))?
            .to_vec();
        Ok(SpeechAudio { model, audio, mime })
    }
}
