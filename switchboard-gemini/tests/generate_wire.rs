use httpmock::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;

use switchboard_core::GatewayError;
use switchboard_core::adapter::{ChatProvider, EmbedProvider, ProviderAdapter};
use switchboard_core::request::{
    ChatMessage, ChatRequest, DecodingParams, EmbedRequest, ModelHint, Role,
};
use switchboard_core::response::FinishReason;
use switchboard_gemini::GeminiAdapter;
use switchboard_types::{
    AuthScheme, ModelCaps, ModelConfig, ModelId, PriceEntry, ProviderConfig, ProviderId, Secret,
    WireFamily,
};

fn provider(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        id: ProviderId::new("charlie"),
        family: WireFamily::Gemini,
        base_url: base_url.to_string(),
        auth: AuthScheme::QueryParam,
        region: None,
        models: vec![ModelConfig {
            id: ModelId::new("gemini-test"),
            context_length: 1_000_000,
            max_output_tokens: 8_192,
            capabilities: ModelCaps::VISION | ModelCaps::LONG_CONTEXT,
            quality_tier: 4,
            pricing: PriceEntry {
                input_per_1k: Decimal::new(1, 3),
                output_per_1k: Decimal::new(2, 3),
                per_image: None,
                per_audio_second: None,
            },
        }],
    }
}

fn chat_request() -> ChatRequest {
    ChatRequest {
        model: ModelHint::new("gemini-test"),
        messages: vec![ChatMessage::new(Role::User, "hello")],
        params: DecodingParams::default(),
        stream: false,
    }
}

#[tokio::test]
async fn chat_uses_key_query_param_and_decodes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:generateContent")
                .query_param("key", "g-key");
            then.status(200).json_body(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "hi!"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
            }));
        })
        .await;

    let adapter = GeminiAdapter::builder(provider(&format!("{}/v1beta", server.base_url())))
        .build()
        .unwrap();
    let out = adapter
        .chat(&chat_request(), &Secret::new("g-key"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(out.content, "hi!");
    assert_eq!(out.finish_reason, FinishReason::Stop);
    assert_eq!(out.usage.input_tokens, 4);
    assert_eq!(out.usage.output_tokens, 2);
}

#[tokio::test]
async fn safety_block_maps_to_content_filter() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:generateContent");
            then.status(200).json_body(json!({
                "candidates": [{"finishReason": "SAFETY"}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 0}
            }));
        })
        .await;

    let adapter = GeminiAdapter::builder(provider(&format!("{}/v1beta", server.base_url())))
        .build()
        .unwrap();
    let out = adapter
        .chat(&chat_request(), &Secret::new("g-key"))
        .await
        .unwrap();
    assert_eq!(out.finish_reason, FinishReason::ContentFilter);
    assert!(out.content.is_empty());
}

#[tokio::test]
async fn google_error_envelope_is_surfaced() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:generateContent");
            then.status(400).json_body(json!({
                "error": {"code": 400, "message": "Invalid argument", "status": "INVALID_ARGUMENT"}
            }));
        })
        .await;

    let adapter = GeminiAdapter::builder(provider(&format!("{}/v1beta", server.base_url())))
        .build()
        .unwrap();
    let err = adapter
        .chat(&chat_request(), &Secret::new("g-key"))
        .await
        .unwrap_err();
    match err {
        GatewayError::UpstreamClientError { message, .. } => {
            assert_eq!(message, "Invalid argument");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn batch_embed_preserves_input_order() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:batchEmbedContents");
            then.status(200).json_body(json!({
                "embeddings": [
                    {"values": [0.1, 0.2]},
                    {"values": [0.3, 0.4]}
                ]
            }));
        })
        .await;

    let adapter = GeminiAdapter::builder(provider(&format!("{}/v1beta", server.base_url())))
        .build()
        .unwrap();
    let out = adapter
        .embed(
            &EmbedRequest {
                model: ModelHint::new("gemini-test"),
                input: vec!["first".into(), "second".into()],
            },
            &Secret::new("g-key"),
        )
        .await
        .unwrap();
    assert_eq!(out.vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
}

#[test]
fn family_advertises_chat_and_embed() {
    let adapter = GeminiAdapter::builder(provider("http://localhost/v1beta"))
        .build()
        .unwrap();
    assert!(adapter.as_chat_provider().is_some());
    assert!(adapter.as_chat_stream_provider().is_some());
    assert!(adapter.as_embed_provider().is_some());
    assert!(adapter.as_image_provider().is_none());
    assert!(adapter.as_speech_to_text_provider().is_none());
    assert!(adapter.as_text_to_speech_provider().is_none());
}
