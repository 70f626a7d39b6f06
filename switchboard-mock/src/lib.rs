//! Scripted in-memory provider adapter.
//!
//! `MockAdapter` answers every capability with deterministic defaults and
//! can be driven from the outside through a [`MockController`]: queue
//! per-capability behaviors (reply, fail, hang), script stream event
//! sequences, and read call counters back. Tests use it to stand in for an
//! entire wire family without touching the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use switchboard_core::adapter::{
    ChatProvider, ChatStreamProvider, EmbedProvider, ImageProvider, ProviderAdapter,
    SpeechToTextProvider, TextToSpeechProvider,
};
use switchboard_core::request::{ChatRequest, EmbedRequest, ImageRequest, SttRequest, TtsRequest};
use switchboard_core::response::{
    ChatCompletion, Embedding, FinishReason, ImageJob, JobStatus, SpeechAudio, TokenUsage,
    Transcript,
};
use switchboard_core::stream::{EVENT_BUFFER, StreamEvent, StreamHandle, event_channel};
use switchboard_core::{Capability, GatewayError, cancel_pair};
use switchboard_types::{ModelId, ProviderId, Secret, WireFamily};

/// Instruction for how the next call of a capability should behave.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Succeed with this completion text (chat) or the capability default.
    Reply(String),
    /// Fail immediately with the provided error.
    Fail(GatewayError),
    /// Sleep before succeeding, to simulate a slow upstream.
    Slow(Duration, String),
    /// Hang until cancelled (simulate a stalled connection).
    Hang,
}

/// Instruction for how a scripted stream session behaves.
#[derive(Debug, Clone)]
pub enum StreamBehavior {
    /// Emit these events with the given inter-event gap, then stop.
    ///
    /// The script should normally end with `Done`; the mock does not append
    /// one.
    Events(Vec<StreamEvent>, Duration),
    /// Fail the `chat_stream` call itself.
    Fail(GatewayError),
    /// Emit events pushed through [`MockController::push_stream_event`];
    /// never ends on its own.
    Manual,
}

#[derive(Default)]
struct InternalState {
    behaviors: HashMap<Capability, VecDeque<MockBehavior>>,
    stream_behavior: Option<StreamBehavior>,
    calls: HashMap<Capability, u32>,
    manual_tx: Option<mpsc::Sender<StreamEvent>>,
}

/// Controller handle used by tests to drive the mock from the outside.
pub struct MockController {
    state: Arc<Mutex<InternalState>>,
    stream_open: Arc<AtomicBool>,
}

impl MockController {
    /// Queue a behavior for the next call of `cap`.
    pub fn push_behavior(&self, cap: Capability, behavior: MockBehavior) {
        let mut st = self.state.lock().expect("mutex poisoned");
        st.behaviors.entry(cap).or_default().push_back(behavior);
    }

    /// Queue the same behavior `n` times.
    pub fn push_behavior_n(&self, cap: Capability, behavior: &MockBehavior, n: usize) {
        for _ in 0..n {
            self.push_behavior(cap, behavior.clone());
        }
    }

    /// Set the behavior for the next stream session.
    pub fn set_stream_behavior(&self, behavior: StreamBehavior) {
        let mut st = self.state.lock().expect("mutex poisoned");
        st.stream_behavior = Some(behavior);
    }

    /// Push one event into an active `Manual` stream session.
    ///
    /// Returns `false` when no manual session is accepting events.
    pub async fn push_stream_event(&self, event: StreamEvent) -> bool {
        let tx = {
            let st = self.state.lock().expect("mutex poisoned");
            st.manual_tx.clone()
        };
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// How many times `cap` has been called.
    #[must_use]
    pub fn calls(&self, cap: Capability) -> u32 {
        let st = self.state.lock().expect("mutex poisoned");
        st.calls.get(&cap).copied().unwrap_or(0)
    }

    /// True while a stream producer task is alive.
    ///
    /// Flips to `false` when the task finishes or is aborted, which is how
    /// tests observe that client cancellation reached the upstream.
    #[must_use]
    pub fn stream_open(&self) -> bool {
        self.stream_open.load(Ordering::SeqCst)
    }
}

/// Mock adapter advertising every capability.
pub struct MockAdapter {
    id: ProviderId,
    models: Option<Vec<ModelId>>,
    state: Arc<Mutex<InternalState>>,
    stream_open: Arc<AtomicBool>,
}

impl MockAdapter {
    /// Create an adapter and its external controller.
    #[must_use]
    pub fn scripted(id: ProviderId) -> (Arc<Self>, MockController) {
        let state = Arc::new(Mutex::new(InternalState::default()));
        let stream_open = Arc::new(AtomicBool::new(false));
        let adapter = Arc::new(Self {
            id,
            models: None,
            state: Arc::clone(&state),
            stream_open: Arc::clone(&stream_open),
        });
        let controller = MockController { state, stream_open };
        (adapter, controller)
    }

    /// Create an adapter with default behavior only.
    #[must_use]
    pub fn new(id: ProviderId) -> Arc<Self> {
        Self::scripted(id).0
    }

    /// Create an adapter that only claims the given models, plus its
    /// controller.
    #[must_use]
    pub fn with_models(id: ProviderId, models: Vec<ModelId>) -> (Arc<Self>, MockController) {
        let (adapter, controller) = Self::scripted(id);
        // Arc was just created; the only clone lives in the controller state.
        let mut adapter = Arc::into_inner(adapter).expect("fresh adapter is unshared");
        adapter.models = Some(models);
        (Arc::new(adapter), controller)
    }

    fn take_behavior(&self, cap: Capability) -> Option<MockBehavior> {
        let mut st = self.state.lock().expect("mutex poisoned");
        *st.calls.entry(cap).or_insert(0) += 1;
        st.behaviors.get_mut(&cap).and_then(VecDeque::pop_front)
    }

    async fn run_behavior(&self, cap: Capability, default_reply: String) -> Result<String, GatewayError> {
        match self.take_behavior(cap) {
            None => Ok(default_reply),
            Some(MockBehavior::Reply(text)) => Ok(text),
            Some(MockBehavior::Fail(err)) => Err(err),
            Some(MockBehavior::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(MockBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn model_for(req_model: &switchboard_core::request::ModelHint) -> ModelId {
        if req_model.is_auto() {
            ModelId::new("mock-default")
        } else {
            ModelId::new(req_model.as_str())
        }
    }
}

impl ProviderAdapter for MockAdapter {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn family(&self) -> WireFamily {
        WireFamily::OpenAiCompatible
    }

    fn supports_model(&self, model: &ModelId) -> bool {
        self.models.as_ref().is_none_or(|m| m.contains(model))
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
impl ChatProvider for MockAdapter {
    async fn chat(&self, req: &ChatRequest, _key: &Secret) -> Result<ChatCompletion, GatewayError> {
        let last = req.messages.last().map_or("", |m| m.content.as_str());
        let text = self
            .run_behavior(Capability::Chat, format!("mock reply to: {last}"))
            .await?;
        let input: u64 = req.messages.iter().map(|m| m.content.len() as u64 / 4).sum();
        Ok(ChatCompletion {
            model: Self::model_for(&req.model),
            content: text.clone(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::new(input.max(1), (text.len() as u64 / 4).max(1)),
        })
    }
}

#[async_trait]
impl ChatStreamProvider for MockAdapter {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        _key: &Secret,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), GatewayError> {
        let behavior = {
            let mut st = self.state.lock().expect("mutex poisoned");
            *st.calls.entry(Capability::ChatStream).or_insert(0) += 1;
            st.stream_behavior.take()
        };

        let behavior = behavior.unwrap_or_else(|| {
            let last = req.messages.last().map_or("", |m| m.content.as_str());
            StreamBehavior::Events(
                vec![
                    StreamEvent::Delta {
                        text: format!("mock stream for: {last}"),
                    },
                    StreamEvent::Usage {
                        usage: TokenUsage::new(4, 6),
                    },
                    StreamEvent::Done,
                ],
                Duration::from_millis(1),
            )
        });

        let behavior = match behavior {
            StreamBehavior::Fail(err) => return Err(err),
            other => other,
        };

        let (tx, rx) = event_channel(EVENT_BUFFER);
        let (stop, mut stop_token) = cancel_pair();
        let open_flag = Arc::clone(&self.stream_open);
        open_flag.store(true, Ordering::SeqCst);

        let manual_rx = if matches!(behavior, StreamBehavior::Manual) {
            let (mtx, mrx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
            self.state.lock().expect("mutex poisoned").manual_tx = Some(mtx);
            Some(mrx)
        } else {
            None
        };

        let task = tokio::spawn(async move {
            // Guard flips the open flag even when the task is aborted.
            let _guard = OpenGuard(open_flag);
            match behavior {
                StreamBehavior::Events(events, gap) => {
                    for event in events {
                        tokio::select! {
                            () = stop_token.cancelled() => return,
                            () = tokio::time::sleep(gap) => {}
                        }
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                StreamBehavior::Manual => {
                    let mut manual_rx = manual_rx.expect("manual channel present");
                    loop {
                        tokio::select! {
                            () = stop_token.cancelled() => return,
                            event = manual_rx.recv() => {
                                let Some(event) = event else { return };
                                let terminal = event.is_terminal();
                                if tx.send(event).await.is_err() || terminal {
                                    return;
                                }
                            }
                        }
                    }
                }
                StreamBehavior::Fail(_) => unreachable!("handled before spawn"),
            }
        });

        Ok((StreamHandle::new(task, stop), rx))
    }
}

struct OpenGuard(Arc<AtomicBool>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbedProvider for MockAdapter {
    async fn embed(&self, req: &EmbedRequest, _key: &Secret) -> Result<Embedding, GatewayError> {
        let _ = self.run_behavior(Capability::Embed, String::new()).await?;
        let vectors = req
            .input
            .iter()
            .map(|s| {
                // Deterministic toy embedding: length and byte sum, normalized.
                let len = s.len() as f32;
                let sum: u32 = s.bytes().map(u32::from).sum();
                vec![len / 100.0, (sum % 1000) as f32 / 1000.0, 0.5]
            })
            .collect();
        let tokens: u64 = req.input.iter().map(|s| s.len() as u64 / 4).sum();
        Ok(Embedding {
            model: Self::model_for(&req.model),
            vectors,
            usage: TokenUsage::new(tokens.max(1), 0),
        })
    }
}

#[async_trait]
impl ImageProvider for MockAdapter {
    async fn generate(&self, req: &ImageRequest, _key: &Secret) -> Result<ImageJob, GatewayError> {
        let _ = self
            .run_behavior(Capability::ImageGenerate, String::new())
            .await?;
        Ok(ImageJob {
            job_id: format!("mock-job-{}", req.prompt.len()),
            model: Self::model_for(&req.model),
            status: JobStatus::Succeeded,
            urls: (0..req.count)
                .map(|i| format!("mock://image/{i}"))
                .collect(),
        })
    }
}

#[async_trait]
impl SpeechToTextProvider for MockAdapter {
    async fn transcribe(&self, req: &SttRequest, _key: &Secret) -> Result<Transcript, GatewayError> {
        let text = self
            .run_behavior(
                Capability::SpeechToText,
                format!("mock transcript of {} bytes", req.audio.len()),
            )
            .await?;
        Ok(Transcript {
            model: Self::model_for(&req.model),
            text,
            duration_secs: Some(req.audio.len() as f64 / 16_000.0),
        })
    }
}

#[async_trait]
impl TextToSpeechProvider for MockAdapter {
    async fn synthesize(&self, req: &TtsRequest, _key: &Secret) -> Result<SpeechAudio, GatewayError> {
        let _ = self
            .run_behavior(Capability::TextToSpeech, String::new())
            .await?;
        Ok(SpeechAudio {
            model: Self::model_for(&req.model),
            audio: req.text.as_bytes().to_vec(),
            mime: "audio/wav".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::request::{ChatMessage, DecodingParams, ModelHint, Role};

    fn chat_req(text: &str) -> ChatRequest {
        ChatRequest {
            model: ModelHint::auto(),
            messages: vec![ChatMessage::new(Role::User, text)],
            params: DecodingParams::default(),
            stream: false,
        }
    }

    #[tokio::test]
    async fn default_reply_echoes_prompt() {
        let adapter = MockAdapter::new(ProviderId::new("mock"));
        let out = adapter
            .chat(&chat_req("ping"), &Secret::new("k"))
            .await
            .unwrap();
        assert_eq!(out.content, "mock reply to: ping");
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let (adapter, ctl) = MockAdapter::scripted(ProviderId::new("mock"));
        ctl.push_behavior(
            Capability::Chat,
            MockBehavior::Fail(GatewayError::UpstreamServerError {
                provider: "mock".into(),
                status: 500,
                message: "scripted".into(),
            }),
        );
        assert!(adapter.chat(&chat_req("x"), &Secret::new("k")).await.is_err());
        assert!(adapter.chat(&chat_req("x"), &Secret::new("k")).await.is_ok());
        assert_eq!(ctl.calls(Capability::Chat), 2);
    }

    #[tokio::test]
    async fn scripted_stream_plays_events_in_order() {
        let (adapter, ctl) = MockAdapter::scripted(ProviderId::new("mock"));
        ctl.set_stream_behavior(StreamBehavior::Events(
            vec![
                StreamEvent::Delta { text: "a".into() },
                StreamEvent::Delta { text: "b".into() },
                StreamEvent::Done,
            ],
            Duration::from_millis(1),
        ));
        let (_handle, mut rx) = adapter
            .chat_stream(&chat_req("x"), &Secret::new("k"))
            .await
            .unwrap();
        let mut texts = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta { text } => texts.push(text),
                StreamEvent::Done => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dropping_handle_closes_the_session() {
        let (adapter, ctl) = MockAdapter::scripted(ProviderId::new("mock"));
        ctl.set_stream_behavior(StreamBehavior::Manual);
        let (handle, _rx) = adapter
            .chat_stream(&chat_req("x"), &Secret::new("k"))
            .await
            .unwrap();
        assert!(ctl.stream_open());
        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ctl.stream_open());
    }
}
