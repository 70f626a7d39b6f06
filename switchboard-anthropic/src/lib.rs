//! switchboard-anthropic
//!
//! Adapter for the Anthropic wire family (`/v1/messages`). Serves chat and
//! streaming chat; the family has no embedding, image, or audio surface.
#![warn(missing_docs)]

mod wire;

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use switchboard_core::adapter::{ChatProvider, ChatStreamProvider, ProviderAdapter};
use switchboard_core::request::ChatRequest;
use switchboard_core::response::{ChatCompletion, TokenUsage};
use switchboard_core::stream::{EVENT_BUFFER, StreamEvent, StreamHandle, event_channel};
use switchboard_core::{GatewayError, ModelHint, cancel_pair};
use switchboard_types::{ModelId, ProviderConfig, ProviderId, Secret, WireFamily};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const FALLBACK_MAX_TOKENS: u32 = 1_024;

/// Builder for [`AnthropicAdapter`].
pub struct AnthropicAdapterBuilder {
    provider: ProviderConfig,
    connect_timeout: Duration,
    overall_timeout: Duration,
    idle_timeout: Duration,
}

impl AnthropicAdapterBuilder {
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
    pub fn build(self) -> Result<AnthropicAdapter, GatewayError> {
        url::Url::parse(&self.provider.base_url)
            .map_err(|e| GatewayError::validation("base_url", e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("http client: {e}")))?;
        Ok(AnthropicAdapter {
            provider: self.provider,
            client,
            overall_timeout: self.overall_timeout,
            idle_timeout: self.idle_timeout,
        })
    }
}

/// Adapter instance bound to one configured Anthropic-family provider.
pub struct AnthropicAdapter {
    provider: ProviderConfig,
    client: reqwest::Client,
    overall_timeout: Duration,
    idle_timeout: Duration,
}

impl AnthropicAdapter {
    /// Builder entry point.
    #[must_use]
    pub fn builder(provider: ProviderConfig) -> AnthropicAdapterBuilder {
        AnthropicAdapterBuilder::new(provider)
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.provider.base_url.trim_end_matches('/'))
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

    fn default_max_tokens(&self, model: &ModelId) -> u32 {
        self.provider
            .model(model)
            .map_or(FALLBACK_MAX_TOKENS, |m| m.max_output_tokens)
    }

    fn request(&self, key: &Secret) -> reqwest::RequestBuilder {
        // The family always authenticates with x-api-key plus a version pin.
        self.client
            .post(self.endpoint())
            .header("x-api-key", key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
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

impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &ProviderId {
        &self.provider.id
    }

    fn family(&self) -> WireFamily {
        WireFamily::Anthropic
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
}

#[async_trait]
impl ChatProvider for AnthropicAdapter {
    async fn chat(&self, req: &ChatRequest, key: &Secret) -> Result<ChatCompletion, GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_messages(req, &model, self.default_max_tokens(&model), false);
        let resp = self
            .request(key)
            .timeout(self.overall_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        if !resp.status().is_success() {
            return Err(self.fail_from_status(resp).await);
        }
        let parsed: wire::WireMessagesResponse =
            resp.json().await.map_err(|e| self.transport_error(&e))?;
        Ok(wire::decode_messages(parsed, &model))
    }
}

#[async_trait]
impl ChatStreamProvider for AnthropicAdapter {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        key: &Secret,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), GatewayError> {
        let model = self.resolve_model(&req.model);
        let body = wire::encode_messages(req, &model, self.default_max_tokens(&model), true);
        let resp = self
            .request(key)
            .json(&body)
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
            let mut input_tokens: u64 = 0;
            let mut output_tokens: u64 = 0;
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
                        let _ = tx
                            .send(StreamEvent::Usage {
                                usage: TokenUsage::new(input_tokens, output_tokens),
                            })
                            .await;
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
                let Ok(frame) = serde_json::from_str::<wire::WireStreamFrame>(&event.data) else {
                    continue;
                };
                match frame {
                    wire::WireStreamFrame::MessageStart { message } => {
                        input_tokens = message.usage.input_tokens;
                    }
                    wire::WireStreamFrame::ContentBlockDelta { delta } => {
                        if let wire::WireTextDelta::Text { text } = delta
                            && !text.is_empty()
                            && tx.send(StreamEvent::Delta { text }).await.is_err()
                        {
                            return;
                        }
                    }
                    wire::WireStreamFrame::MessageDelta { usage } => {
                        output_tokens = usage.output_tokens;
                    }
                    wire::WireStreamFrame::MessageStop => {
                        let _ = tx
                            .send(StreamEvent::Usage {
                                usage: TokenUsage::new(input_tokens, output_tokens),
                            })
                            .await;
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                    wire::WireStreamFrame::Ignored => {}
                }
            }
        });

        Ok((StreamHandle::new(task, stop), rx))
    }
}
