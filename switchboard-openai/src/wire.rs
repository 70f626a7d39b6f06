//! OpenAI-compatible wire shapes and canonical translation.
//!
//! Only the documented field set is mapped; anything the canonical model
//! cannot express is dropped here, in both directions.

use serde::{Deserialize, Serialize};

use switchboard_core::request::{ChatRequest, EmbedRequest, Role};
use switchboard_core::response::{
    ChatCompletion, Embedding, FinishReason, TokenUsage, ToolCall,
};
use switchboard_types::ModelId;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<WireStreamOptions>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireStreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Deserialize)]
pub struct WireChatResponse {
    pub model: Option<String>,
    pub choices: Vec<WireChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct WireChoice {
    pub message: WireResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    pub function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    /// JSON-encoded arguments, as the wire carries them.
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct WireUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Streaming chunk (`chat.completion.chunk`).
#[derive(Debug, Deserialize)]
pub struct WireChunk {
    #[serde(default)]
    pub choices: Vec<WireChunkChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct WireChunkChoice {
    pub delta: WireDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct WireDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireEmbedRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireEmbedResponse {
    pub data: Vec<WireEmbeddingRow>,
    pub model: Option<String>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct WireEmbeddingRow {
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireImageRequest {
    pub model: String,
    pub prompt: String,
    pub n: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireImageResponse {
    pub data: Vec<WireImageRow>,
}

#[derive(Debug, Deserialize)]
pub struct WireImageRow {
    pub url: Option<String>,
    pub b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireTranscription {
    pub text: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct WireSpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

/// Upstream error envelope: `{"error": {"message", "type", "code"}}`.
#[derive(Debug, Deserialize)]
pub struct WireErrorEnvelope {
    pub error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct WireErrorBody {
    pub message: String,
}

/// Canonical chat request → wire, with the resolved model id substituted
/// for the client's hint.
pub fn encode_chat(req: &ChatRequest, model: &ModelId, stream: bool) -> WireChatRequest {
    WireChatRequest {
        model: model.as_str().to_string(),
        messages: req
            .messages
            .iter()
            .map(|m| WireMessage {
                role: role_name(m.role).to_string(),
                content: m.content.clone(),
            })
            .collect(),
        temperature: req.params.temperature,
        top_p: req.params.top_p,
        max_tokens: req.params.max_tokens,
        stop: req.params.stop.clone(),
        stream,
        stream_options: stream.then_some(WireStreamOptions {
            include_usage: true,
        }),
    }
}

pub const fn role_name(role: Role) -> &'static str {
    role.as_str()
}

/// Wire response → canonical completion.
pub fn decode_chat(resp: WireChatResponse, fallback_model: &ModelId) -> ChatCompletion {
    let model = resp
        .model
        .map_or_else(|| fallback_model.clone(), ModelId::new);
    let usage = resp.usage.map_or_else(TokenUsage::default, |u| {
        TokenUsage::new(u.prompt_tokens, u.completion_tokens)
    });
    let choice = resp.choices.into_iter().next();
    let (content, tool_calls, finish_reason) = choice.map_or_else(
        || (String::new(), Vec::new(), FinishReason::Other),
        |c| {
            (
                c.message.content.unwrap_or_default(),
                c.message.tool_calls.into_iter().map(decode_tool_call).collect(),
                decode_finish(c.finish_reason.as_deref()),
            )
        },
    );
    ChatCompletion {
        model,
        content,
        tool_calls,
        finish_reason,
        usage,
    }
}

pub fn decode_tool_call(tc: WireToolCall) -> ToolCall {
    let arguments = serde_json::from_str(&tc.function.arguments)
        .unwrap_or(serde_json::Value::String(tc.function.arguments));
    ToolCall {
        id: tc.id,
        name: tc.function.name,
        arguments,
    }
}

pub fn decode_finish(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCall,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Canonical embed request → wire.
pub fn encode_embed(req: &EmbedRequest, model: &ModelId) -> WireEmbedRequest {
    WireEmbedRequest {
        model: model.as_str().to_string(),
        input: req.input.clone(),
    }
}

/// Wire embed response → canonical.
pub fn decode_embed(resp: WireEmbedResponse, fallback_model: &ModelId) -> Embedding {
    Embedding {
        model: resp
            .model
            .map_or_else(|| fallback_model.clone(), ModelId::new),
        vectors: resp.data.into_iter().map(|r| r.embedding).collect(),
        usage: resp
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage::new(u.prompt_tokens, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::request::{ChatMessage, DecodingParams, ModelHint};

    fn sample_chat() -> ChatRequest {
        ChatRequest {
            model: ModelHint::new("auto"),
            messages: vec![
                ChatMessage::new(Role::System, "be brief"),
                ChatMessage::new(Role::User, "hi"),
            ],
            params: DecodingParams {
                temperature: Some(0.5),
                top_p: None,
                max_tokens: Some(128),
                stop: vec!["END".to_string()],
            },
            stream: false,
        }
    }

    #[test]
    fn encode_decode_round_trip_on_documented_fields() {
        let wire = encode_chat(&sample_chat(), &ModelId::new("gpt-test"), false);
        let json = serde_json::to_string(&wire).unwrap();
        let back: WireChatRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wire);
        assert_eq!(back.model, "gpt-test");
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.messages[0].role, "system");
        assert_eq!(back.stop, vec!["END"]);
        assert!(!json.contains("top_p"), "unset fields stay off the wire");
    }

    #[test]
    fn stream_encoding_asks_for_usage() {
        let wire = encode_chat(&sample_chat(), &ModelId::new("m"), true);
        assert!(wire.stream);
        assert!(wire.stream_options.is_some_and(|o| o.include_usage));
    }

    #[test]
    fn decode_maps_finish_reasons() {
        assert_eq!(decode_finish(Some("stop")), FinishReason::Stop);
        assert_eq!(decode_finish(Some("length")), FinishReason::Length);
        assert_eq!(decode_finish(Some("weird")), FinishReason::Other);
        assert_eq!(decode_finish(None), FinishReason::Other);
    }

    #[test]
    fn tool_call_arguments_parse_to_json() {
        let call = decode_tool_call(WireToolCall {
            id: "c1".into(),
            function: WireFunction {
                name: "lookup".into(),
                arguments: r#"{"q": "rust"}"#.into(),
            },
        });
        assert_eq!(call.arguments["q"], "rust");
    }
}
