//! Client data plane.
//!
//! One stable surface for chat, embeddings, images, and audio. Bodies are
//! strict (`deny_unknown_fields`); responses mirror the OpenAI-compatible
//! shape and always carry the gateway headers: `x-ai-provider`,
//! `x-ai-model`, `x-cache-status`, `x-request-id`, and `x-trace-id` when
//! tracing is on.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header::HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt as _;

use crate::core::Gateway;
use crate::pipeline::{CacheStatus, StreamSession};
use crate::usage::Outcome;
use switchboard_core::request::{
    CanonicalRequest, ChatMessage, ChatRequest, DecodingParams, EmbedRequest, ImageRequest,
    ModelHint, Role, SttRequest, TtsRequest,
};
use switchboard_core::response::{CanonicalResponse, TokenUsage};
use switchboard_core::stream::StreamEvent;
use switchboard_core::{GatewayError, cancel_pair};
use switchboard_types::Secret;

/// Build the data-plane router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/api/v1/ai/chat/completions", post(chat_completions))
        .route("/api/v1/ai/embeddings", post(embeddings))
        .route("/api/v1/ai/images/generations", post(image_generations))
        .route("/api/v1/ai/jobs/:id", get(job_status))
        .route("/api/v1/ai/audio/transcriptions", post(transcriptions))
        .route("/api/v1/ai/audio/speech", post(speech))
        .with_state(gateway)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MessageBody {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChatBody {
    model: Option<String>,
    messages: Vec<MessageBody>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    stop: Option<Vec<String>>,
    stream: Option<bool>,
    parameter_preset: Option<String>,
    prompt_template: Option<String>,
    template_variables: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmbedBody {
    model: Option<String>,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageBody {
    model: Option<String>,
    prompt: String,
    n: Option<u8>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpeechBody {
    model: Option<String>,
    input: String,
    voice: Option<String>,
    response_format: Option<String>,
}

struct Ingress {
    request_id: String,
    presented: Option<Secret>,
    trace_id: Option<String>,
}

fn ingress(headers: &HeaderMap) -> Ingress {
    Ingress {
        request_id: uuid::Uuid::new_v4().to_string(),
        presented: headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(Secret::new),
        trace_id: headers
            .get("x-trace-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

fn base_headers(request_id: &str, trace_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-request-id"),
        request_id.parse().expect("uuid is a valid header value"),
    );
    if let Some(trace) = trace_id
        && let Ok(value) = trace.parse()
    {
        headers.insert(HeaderName::from_static("x-trace-id"), value);
    }
    headers
}

fn error_response(request_id: &str, trace_id: Option<&str>, error: &GatewayError) -> Response {
    let mut body = json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
        }
    });
    if let Some(retry) = error.retry_after_secs() {
        body["error"]["retryAfter"] = json!(retry);
    }
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, base_headers(request_id, trace_id), axum::Json(body)).into_response()
}

fn success_headers(
    request_id: &str,
    trace_id: Option<&str>,
    provider: &str,
    model: &str,
    cache: CacheStatus,
) -> HeaderMap {
    let mut headers = base_headers(request_id, trace_id);
    if let Ok(v) = provider.parse() {
        headers.insert(HeaderName::from_static("x-ai-provider"), v);
    }
    if let Ok(v) = model.parse() {
        headers.insert(HeaderName::from_static("x-ai-model"), v);
    }
    headers.insert(
        HeaderName::from_static("x-cache-status"),
        cache
            .as_str()
            .parse()
            .expect("cache status is a valid header value"),
    );
    headers
}

/// Resolve preset + template into final messages and params.
fn assemble_chat(
    gateway: &Gateway,
    body: ChatBody,
) -> Result<ChatRequest, GatewayError> {
    let snapshot = gateway.snapshot();

    let mut params = match &body.parameter_preset {
        Some(name) => snapshot
            .presets
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::validation("parameter_preset", format!("unknown preset {name}")))?,
        None => DecodingParams::default(),
    };
    // Explicit fields override the preset.
    if body.temperature.is_some() {
        params.temperature = body.temperature;
    }
    if body.top_p.is_some() {
        params.top_p = body.top_p;
    }
    if body.max_tokens.is_some() {
        params.max_tokens = body.max_tokens;
    }
    if let Some(stop) = body.stop {
        params.stop = stop;
    }

    let mut messages = Vec::with_capacity(body.messages.len() + 1);
    for m in body.messages {
        let role = match m.role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(GatewayError::validation(
                    "messages.role",
                    format!("unknown role {other}"),
                ));
            }
        };
        messages.push(ChatMessage::new(role, m.content));
    }

    // A prompt template renders into one more user message.
    if let Some(name) = &body.prompt_template {
        let template = snapshot.templates.get(name).ok_or_else(|| {
            GatewayError::validation("prompt_template", format!("unknown template {name}"))
        })?;
        let vars = body.template_variables.unwrap_or_default();
        let mut rendered = template.clone();
        for (k, v) in &vars {
            rendered = rendered.replace(&format!("{{{{{k}}}}}"), v);
        }
        messages.push(ChatMessage::new(Role::User, rendered));
    }

    Ok(ChatRequest {
        model: body.model.map_or_else(ModelHint::auto, ModelHint::new),
        messages,
        params,
        stream: body.stream.unwrap_or(false),
    })
}

/// Strict-body extraction: malformed or unknown-field JSON becomes the
/// canonical `validation.invalid` envelope instead of a bare 422.
fn strict_body<T>(
    ing: &Ingress,
    body: Result<axum::Json<T>, JsonRejection>,
) -> Result<T, Response> {
    body.map(|axum::Json(inner)| inner).map_err(|rej| {
        let err = GatewayError::validation("body", rej.body_text());
        error_response(&ing.request_id, ing.trace_id.as_deref(), &err)
    })
}

async fn chat_completions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<axum::Json<ChatBody>, JsonRejection>,
) -> Response {
    let ing = ingress(&headers);
    let body = match strict_body(&ing, body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let chat = match assemble_chat(&gateway, body) {
        Ok(c) => c,
        Err(e) => return error_response(&ing.request_id, ing.trace_id.as_deref(), &e),
    };

    if chat.stream {
        return chat_stream_response(gateway, ing, chat).await;
    }

    let (_cancel_handle, cancel) = cancel_pair();
    let result = gateway
        .handle(
            ing.request_id.clone(),
            ing.presented,
            CanonicalRequest::Chat(chat),
            ing.trace_id.clone(),
            cancel,
        )
        .await;

    match result {
        Ok(out) => {
            let CanonicalResponse::Chat(c) = &out.response else {
                let e = GatewayError::internal("non-chat response for chat request");
                return error_response(&ing.request_id, ing.trace_id.as_deref(), &e);
            };
            let headers = success_headers(
                &ing.request_id,
                ing.trace_id.as_deref(),
                out.provider.as_str(),
                out.model.as_str(),
                out.cache_status,
            );
            let body = json!({
                "id": ing.request_id,
                "object": "chat.completion",
                "created": chrono::Utc::now().timestamp(),
                "model": c.model.as_str(),
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": c.content,
                        "tool_calls": c.tool_calls,
                    },
                    "finish_reason": c.finish_reason,
                }],
                "usage": {
                    "prompt_tokens": c.usage.input_tokens,
                    "completion_tokens": c.usage.output_tokens,
                    "total_tokens": c.usage.total(),
                },
            });
            (StatusCode::OK, headers, axum::Json(body)).into_response()
        }
        Err(e) => error_response(&ing.request_id, ing.trace_id.as_deref(), &e),
    }
}

/// Finishes the stream's usage record exactly once, even when the client
/// vanishes and the SSE generator is simply dropped.
struct StreamFinishGuard {
    gateway: Arc<Gateway>,
    session: Option<StreamSession>,
    usage: TokenUsage,
}

impl StreamFinishGuard {
    fn finish(&mut self, outcome: Outcome, error: Option<&GatewayError>) {
        if let Some(session) = self.session.take() {
            self.gateway.finish_stream(session, self.usage, outcome, error);
        }
    }
}

impl Drop for StreamFinishGuard {
    fn drop(&mut self) {
        // Reaching Drop with a live session means the client disconnected.
        self.finish(Outcome::Cancelled, None);
    }
}

async fn chat_stream_response(gateway: Arc<Gateway>, ing: Ingress, chat: ChatRequest) -> Response {
    let (cancel_handle, cancel) = cancel_pair();
    let opened = gateway
        .open_stream(
            ing.request_id.clone(),
            ing.presented,
            CanonicalRequest::Chat(chat),
            ing.trace_id.clone(),
            cancel,
        )
        .await;

    let (mut session, mut ticket) = match opened {
        Ok(pair) => pair,
        Err(e) => return error_response(&ing.request_id, ing.trace_id.as_deref(), &e),
    };

    let headers = success_headers(
        &ing.request_id,
        ing.trace_id.as_deref(),
        session.provider.as_str(),
        session.model.as_str(),
        CacheStatus::Bypass,
    );

    let (handle, mut events) = session.take_io();
    let mut guard = StreamFinishGuard {
        gateway,
        session: Some(session),
        usage: TokenUsage::default(),
    };

    let stream = async_stream::stream! {
        // Owning these here ties upstream lifetime to the response body:
        // when the client disconnects the generator drops, the handle drops,
        // and the upstream transport closes.
        let _cancel_handle = cancel_handle;
        let _upstream = handle;

        loop {
            tokio::select! {
                () = ticket.closed.cancelled() => {
                    let payload = json!({"done": true, "reason": "closed_by_operator"});
                    ticket.note_event(payload.to_string().len());
                    yield Event::default().data(payload.to_string());
                    guard.finish(Outcome::Cancelled, None);
                    break;
                }
                Some(injected) = ticket.admin_rx.recv() => {
                    if let StreamEvent::Delta { text } = injected {
                        let payload = json!({"delta": text, "injected": true});
                        ticket.note_event(payload.to_string().len());
                        yield Event::default().data(payload.to_string());
                    }
                }
                upstream = events.recv() => {
                    match upstream {
                        Some(StreamEvent::Delta { text }) => {
                            let payload = json!({"delta": text});
                            ticket.note_event(payload.to_string().len());
                            yield Event::default().data(payload.to_string());
                        }
                        Some(StreamEvent::ToolCall { call }) => {
                            let payload = json!({"delta": "", "tool_call": call});
                            ticket.note_event(payload.to_string().len());
                            yield Event::default().data(payload.to_string());
                        }
                        Some(StreamEvent::Usage { usage }) => {
                            guard.usage = usage;
                            let payload = json!({"usage": {
                                "prompt_tokens": usage.input_tokens,
                                "completion_tokens": usage.output_tokens,
                            }});
                            ticket.note_event(payload.to_string().len());
                            yield Event::default().data(payload.to_string());
                        }
                        Some(StreamEvent::Error { error }) => {
                            let payload = json!({"error": {
                                "code": error.code(),
                                "message": error.to_string(),
                            }});
                            ticket.note_event(payload.to_string().len());
                            yield Event::default().data(payload.to_string());
                            guard.finish(Outcome::Failed(error.code().to_string()), Some(&error));
                            break;
                        }
                        Some(StreamEvent::Done) | None => {
                            let payload = json!({"done": true});
                            ticket.note_event(payload.to_string().len());
                            yield Event::default().data(payload.to_string());
                            yield Event::default().data("[DONE]");
                            guard.finish(Outcome::Upstream, None);
                            break;
                        }
                    }
                }
            }
        }
    };

    let sse = Sse::new(stream.map(Ok::<_, Infallible>)).keep_alive(KeepAlive::default());
    (headers, sse).into_response()
}

async fn embeddings(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<axum::Json<EmbedBody>, JsonRejection>,
) -> Response {
    let ing = ingress(&headers);
    let body = match strict_body(&ing, body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let (_cancel_handle, cancel) = cancel_pair();
    let req = CanonicalRequest::Embed(EmbedRequest {
        model: body.model.map_or_else(ModelHint::auto, ModelHint::new),
        input: body.input,
    });
    let result = gateway
        .handle(ing.request_id.clone(), ing.presented, req, ing.trace_id.clone(), cancel)
        .await;

    match result {
        Ok(out) => {
            let CanonicalResponse::Embed(e) = &out.response else {
                let err = GatewayError::internal("non-embed response for embed request");
                return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
            };
            let headers = success_headers(
                &ing.request_id,
                ing.trace_id.as_deref(),
                out.provider.as_str(),
                out.model.as_str(),
                out.cache_status,
            );
            let body = json!({
                "object": "list",
                "model": e.model.as_str(),
                "data": e.vectors.iter().enumerate().map(|(i, v)| json!({
                    "object": "embedding", "index": i, "embedding": v,
                })).collect::<Vec<_>>(),
                "usage": {"prompt_tokens": e.usage.input_tokens, "total_tokens": e.usage.total()},
            });
            (StatusCode::OK, headers, axum::Json(body)).into_response()
        }
        Err(e) => error_response(&ing.request_id, ing.trace_id.as_deref(), &e),
    }
}

async fn image_generations(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<axum::Json<ImageBody>, JsonRejection>,
) -> Response {
    let ing = ingress(&headers);
    let body = match strict_body(&ing, body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let (_cancel_handle, cancel) = cancel_pair();
    let req = CanonicalRequest::Image(ImageRequest {
        model: body.model.map_or_else(ModelHint::auto, ModelHint::new),
        prompt: body.prompt,
        count: body.n.unwrap_or(1),
        size: body.size,
    });
    let result = gateway
        .handle(ing.request_id.clone(), ing.presented, req, ing.trace_id.clone(), cancel)
        .await;

    match result {
        Ok(out) => {
            let CanonicalResponse::Image(job) = &out.response else {
                let err = GatewayError::internal("non-image response for image request");
                return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
            };
            let headers = success_headers(
                &ing.request_id,
                ing.trace_id.as_deref(),
                out.provider.as_str(),
                out.model.as_str(),
                out.cache_status,
            );
            (StatusCode::ACCEPTED, headers, axum::Json(json!(job))).into_response()
        }
        Err(e) => error_response(&ing.request_id, ing.trace_id.as_deref(), &e),
    }
}

async fn job_status(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let ing = ingress(&headers);
    match gateway.jobs().get(&id) {
        Some(job) => (
            StatusCode::OK,
            base_headers(&ing.request_id, ing.trace_id.as_deref()),
            axum::Json(json!(job)),
        )
            .into_response(),
        None => error_response(
            &ing.request_id,
            ing.trace_id.as_deref(),
            &GatewayError::validation("id", format!("unknown job {id}")),
        ),
    }
}

async fn transcriptions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let ing = ingress(&headers);

    let mut model: Option<String> = None;
    let mut language: Option<String> = None;
    let mut audio: Option<(Bytes, String)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                match name.as_str() {
                    "model" => model = field.text().await.ok(),
                    "language" => language = field.text().await.ok(),
                    "file" => {
                        let mime = field
                            .content_type()
                            .unwrap_or("application/octet-stream")
                            .to_string();
                        match field.bytes().await {
                            Ok(bytes) => audio = Some((bytes, mime)),
                            Err(e) => {
                                let err = GatewayError::validation("file", e.to_string());
                                return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
                            }
                        }
                    }
                    _ => {
                        let err = GatewayError::validation(name, "unknown multipart field");
                        return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                let err = GatewayError::validation("multipart", e.to_string());
                return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
            }
        }
    }
    let Some((bytes, mime)) = audio else {
        let err = GatewayError::validation("file", "missing audio part");
        return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
    };

    let (_cancel_handle, cancel) = cancel_pair();
    let req = CanonicalRequest::SpeechToText(SttRequest {
        model: model.map_or_else(ModelHint::auto, ModelHint::new),
        audio: bytes.to_vec(),
        mime,
        language,
    });
    let result = gateway
        .handle(ing.request_id.clone(), ing.presented, req, ing.trace_id.clone(), cancel)
        .await;

    match result {
        Ok(out) => {
            let CanonicalResponse::SpeechToText(t) = &out.response else {
                let err = GatewayError::internal("non-transcript response");
                return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
            };
            let headers = success_headers(
                &ing.request_id,
                ing.trace_id.as_deref(),
                out.provider.as_str(),
                out.model.as_str(),
                out.cache_status,
            );
            (
                StatusCode::OK,
                headers,
                axum::Json(json!({"text": t.text, "duration": t.duration_secs})),
            )
                .into_response()
        }
        Err(e) => error_response(&ing.request_id, ing.trace_id.as_deref(), &e),
    }
}

async fn speech(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<axum::Json<SpeechBody>, JsonRejection>,
) -> Response {
    let ing = ingress(&headers);
    let body = match strict_body(&ing, body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let (_cancel_handle, cancel) = cancel_pair();
    let req = CanonicalRequest::TextToSpeech(TtsRequest {
        model: body.model.map_or_else(ModelHint::auto, ModelHint::new),
        text: body.input,
        voice: body.voice,
        format: body.response_format,
    });
    let result = gateway
        .handle(ing.request_id.clone(), ing.presented, req, ing.trace_id.clone(), cancel)
        .await;

    match result {
        Ok(out) => {
            let CanonicalResponse::TextToSpeech(s) = &out.response else {
                let err = GatewayError::internal("non-audio response");
                return error_response(&ing.request_id, ing.trace_id.as_deref(), &err);
            };
            let mut headers = success_headers(
                &ing.request_id,
                ing.trace_id.as_deref(),
                out.provider.as_str(),
                out.model.as_str(),
                out.cache_status,
            );
            if let Ok(v) = s.mime.parse() {
                headers.insert(axum::http::header::CONTENT_TYPE, v);
            }
            (StatusCode::OK, headers, s.audio.clone()).into_response()
        }
        Err(e) => error_response(&ing.request_id, ing.trace_id.as_deref(), &e),
    }
}
