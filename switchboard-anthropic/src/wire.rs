//! Anthropic `/v1/messages` wire shapes and canonical translation.

use serde::{Deserialize, Serialize};

use switchboard_core::request::{ChatRequest, Role};
use switchboard_core::response::{ChatCompletion, FinishReason, TokenUsage};
use switchboard_types::ModelId;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireMessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct WireMessagesResponse {
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<WireContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WireContentBlock {
    /// Plain text block.
    #[serde(rename = "text")]
    Text {
        /// Block text.
        text: String,
    },
    /// Anything else (tool use blocks and future types) is skipped.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct WireUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One streaming frame, discriminated by its `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WireStreamFrame {
    #[serde(rename = "message_start")]
    MessageStart { message: WireStartMessage },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: WireTextDelta },
    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        usage: WireUsage,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
pub struct WireStartMessage {
    #[serde(default)]
    pub usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WireTextDelta {
    #[serde(rename = "text_delta")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct WireErrorEnvelope {
    pub error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct WireErrorBody {
    pub message: String,
}

/// Canonical chat request → wire.
///
/// System messages collapse into the dedicated `system` field; the wire
/// requires `max_tokens`, so an unset cap falls back to the model's
/// configured output ceiling.
pub fn encode_messages(
    req: &ChatRequest,
    model: &ModelId,
    default_max_tokens: u32,
    stream: bool,
) -> WireMessagesRequest {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages = Vec::new();
    for m in &req.messages {
        match m.role {
            Role::System => system_parts.push(&m.content),
            Role::User | Role::Assistant => messages.push(WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            }),
        }
    }
    WireMessagesRequest {
        model: model.as_str().to_string(),
        max_tokens: req.params.max_tokens.unwrap_or(default_max_tokens),
        messages,
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n")),
        temperature: req.params.temperature,
        top_p: req.params.top_p,
        stop_sequences: req.params.stop.clone(),
        stream,
    }
}

/// Wire response → canonical completion.
pub fn decode_messages(resp: WireMessagesResponse, fallback_model: &ModelId) -> ChatCompletion {
    let content = resp
        .content
        .into_iter()
        .filter_map(|b| match b {
            WireContentBlock::Text { text } => Some(text),
            WireContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");
    let usage = resp.usage.map_or_else(TokenUsage::default, |u| {
        TokenUsage::new(u.input_tokens, u.output_tokens)
    });
    ChatCompletion {
        model: resp
            .model
            .map_or_else(|| fallback_model.clone(), ModelId::new),
        content,
        tool_calls: vec![],
        finish_reason: decode_stop_reason(resp.stop_reason.as_deref()),
        usage,
    }
}

pub fn decode_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn" | "stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCall,
        _ => FinishReason::Other,
    }
}
