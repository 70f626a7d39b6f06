//! Gemini `generateContent` wire shapes and canonical translation.

use serde::{Deserialize, Serialize};

use switchboard_core::request::{ChatRequest, EmbedRequest, Role};
use switchboard_core::response::{ChatCompletion, Embedding, FinishReason, TokenUsage};
use switchboard_types::ModelId;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WirePart {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireGenerateRequest {
    pub contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<WireGenerationConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGenerateResponse {
    #[serde(default)]
    pub candidates: Vec<WireCandidate>,
    pub usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCandidate {
    pub content: Option<WireContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WireUsageMetadata {
    pub prompt_token_count: u64,
    pub candidates_token_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBatchEmbedRequest {
    pub requests: Vec<WireEmbedOne>,
}

#[derive(Debug, Serialize)]
pub struct WireEmbedOne {
    pub model: String,
    pub content: WireContent,
}

#[derive(Debug, Deserialize)]
pub struct WireBatchEmbedResponse {
    #[serde(default)]
    pub embeddings: Vec<WireEmbeddingValues>,
}

#[derive(Debug, Deserialize)]
pub struct WireEmbeddingValues {
    pub values: Vec<f32>,
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
/// System messages become `systemInstruction`; assistant turns use the
/// wire's `model` role.
pub fn encode_generate(req: &ChatRequest) -> WireGenerateRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for m in &req.messages {
        match m.role {
            Role::System => system_parts.push(WirePart {
                text: m.content.clone(),
            }),
            Role::User => contents.push(WireContent {
                role: Some("user".to_string()),
                parts: vec![WirePart {
                    text: m.content.clone(),
                }],
            }),
            Role::Assistant => contents.push(WireContent {
                role: Some("model".to_string()),
                parts: vec![WirePart {
                    text: m.content.clone(),
                }],
            }),
        }
    }
    let p = &req.params;
    let generation_config = (p.temperature.is_some()
        || p.top_p.is_some()
        || p.max_tokens.is_some()
        || !p.stop.is_empty())
    .then(|| WireGenerationConfig {
        temperature: p.temperature,
        top_p: p.top_p,
        max_output_tokens: p.max_tokens,
        stop_sequences: p.stop.clone(),
    });
    WireGenerateRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then(|| WireContent {
            role: None,
            parts: system_parts,
        }),
        generation_config,
    }
}

/// Wire response → canonical completion.
pub fn decode_generate(resp: WireGenerateResponse, model: &ModelId) -> ChatCompletion {
    let usage = resp.usage_metadata.map_or_else(TokenUsage::default, |u| {
        TokenUsage::new(u.prompt_token_count, u.candidates_token_count)
    });
    let candidate = resp.candidates.into_iter().next();
    let (content, finish_reason) = candidate.map_or_else(
        || (String::new(), FinishReason::Other),
        |c| {
            let text = c
                .content
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            (text, decode_finish(c.finish_reason.as_deref()))
        },
    );
    ChatCompletion {
        model: model.clone(),
        content,
        tool_calls: vec![],
        finish_reason,
        usage,
    }
}

pub fn decode_finish(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY" | "RECITATION") => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Canonical embed request → batch wire form.
pub fn encode_batch_embed(req: &EmbedRequest, model: &ModelId) -> WireBatchEmbedRequest {
    WireBatchEmbedRequest {
        requests: req
            .input
            .iter()
            .map(|text| WireEmbedOne {
                model: format!("models/{}", model.as_str()),
                content: WireContent {
                    role: None,
                    parts: vec![WirePart { text: text.clone() }],
                },
            })
            .collect(),
    }
}

/// Batch wire response → canonical embedding.
pub fn decode_batch_embed(resp: WireBatchEmbedResponse, model: &ModelId) -> Embedding {
    Embedding {
        model: model.clone(),
        vectors: resp.embeddings.into_iter().map(|e| e.values).collect(),
        usage: TokenUsage::default(), // the wire reports no token counts
    }
}
