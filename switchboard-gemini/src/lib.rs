//! switchboard-gemini
//!
//! Adapter for the Gemini wire family: `models/{model}:generateContent`,
//! `:streamGenerateContent` (SSE), and `:batchEmbedContents`.
#![warn(missing_docs)]

mod wire;

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use switchboard_core::adapter::{ChatProvider, ChatStreamProvider, EmbedProvider, ProviderAdapter};
use switchboard_core::request::{ChatRequest, EmbedRequest};
use switchboard_core::response::{ChatCompletion, Embedding, TokenUsage};
use switchboard_core::stream::{EVENT_BUFFER, StreamEvent, StreamHandle, event_channel};
use switchboard_core::{GatewayError, ModelHint, cancel_pair};
use switchboard_types::{AuthScheme, ModelId, ProviderConfig, ProviderId, Secret, WireFamily};

/// Builder for [`GeminiAdapter`].
pub struct GeminiAdapterBuilder {
    provider: ProviderConfig,
    connect_timeout: Duration,
    overall_timeout: Duration,
    idle_timeout: Duration,
}

impl GeminiAdapterBuilder {
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

    /// Inter-event idle timeout for streams.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Build the adapter.
    ///
    /// # Errors
    /// `validation.invalid` when the base URL does not parse.
    pub fn build(self) -> Result<GeminiAdapter, GatewayError> {
        url::Url::parse(&self.provider.base_url)
            .map_err(|e| GatewayError::validation("base_url", e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("http client: {e}")))?;
        Ok(GeminiAdapter {
            provider: self.provider,
            client,
            overall_timeout: self.overall_timeout,
            idle_timeout: self.idle_timeout,
        })
    }
}

/// Adapter instance bound to one configured Gemini-family provider.
pub struct GeminiAdapter {
    provider: ProviderConfig,
    client: reqwest::Client,
    overall_timeout: Duration,
    idle_timeout: Duration,
}

impl GeminiAdapter {
    /// Builder entry point.
    #[must_use]
    pub fn builder(provider: ProviderConfig) -> GeminiAdapterBuilder {
        GeminiAdapterBuilder::new(provider)
    }

    fn endpoint(&self, model: &ModelId, verb: &str) -> String {
        format!(
            "{}/models/{}:{verb}",
            self.provider.base_url.trim_end_matches('/'),
            model.as_str()
        )
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
            AuthScheme::QueryParam => rb.query(&[("key", key.expose())]),
            AuthScheme::XApiKey => rb.header("x-goog-api-key", key.expose()),
            AuthScheme::Bearer => rb.bearer_auth(key.expose()),
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
}

impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> &ProviderId {
        &self.provider.id
    }

    fn family(&self) -> WireFamily {
        WireFamily::Gemini
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
}

#[async_trait]
impl ChatProvider for GeminiAdapter {
    async fn chat(&self, req: &ChatRequest, key: &Secret) -> Result<ChatCompletion, GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_generate(req);
        let rb = self
            .client
            .post(self.endpoint(&model, "generateContent"))
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
        let parsed: wire::WireGenerateResponse =
            resp.json().await.map_err(|e| self.transport_error(&e))?;
        Ok(wire::decode_generate(parsed, &model))
    }
}

#[async_trait]
impl ChatStreamProvider for GeminiAdapter {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        key: &Secret,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_generate(req);
        let rb = self
            .client
            .post(self.endpoint(&model, "streamGenerateContent"))
            .query(&[("alt", "sse")])
            .json(&body);
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
            let mut usage = TokenUsage::default();
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
                        // The wire has no terminal sentinel; end-of-body is it.
                        let _ = tx.send(StreamEvent::Usage { usage }).await;
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
                let Ok(frame) = serde_json::from_str::<wire::WireGenerateResponse>(&event.data)
                else {
                    continue;
                };
                if let Some(meta) = frame.usage_metadata {
                    usage = TokenUsage::new(meta.prompt_token_count, meta.candidates_token_count);
                }
                for candidate in frame.candidates {
                    let Some(content) = candidate.content else {
                        continue;
                    };
                    for part in content.parts {
                        if !part.text.is_empty()
                            && tx
                                .send(StreamEvent::Delta { text: part.text })
                                .await
                                .is_err()
                        {
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
impl EmbedProvider for GeminiAdapter {
    async fn embed(&self, req: &EmbedRequest, key: &Secret) -> Result<Embedding, GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_batch_embed(req, &model);
        let rb = self
            .client
            .post(self.endpoint(&model, "batchEmbedContents"))
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
        let parsed: wire::WireBatchEmbedResponse =
            resp.json().await.map_err(|e| self.transport_error(&e))?;
        Ok(wire::decode_batch_embed(parsed, &model))
    }
}
