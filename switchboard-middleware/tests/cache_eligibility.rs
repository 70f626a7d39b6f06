use switchboard_core::analyzer::{AnalyzerConfig, analyze};
use switchboard_core::request::{ChatMessage, ChatRequest, DecodingParams, ModelHint, Role};
use switchboard_core::{CanonicalRequest, RequestKind};
use switchboard_middleware::{CacheConfig, ResponseCache};

fn chat(content: &str, temperature: Option<f32>, stream: bool) -> CanonicalRequest {
    CanonicalRequest::Chat(ChatRequest {
        model: ModelHint::auto(),
        messages: vec![ChatMessage::new(Role::User, content)],
        params: DecodingParams {
            temperature,
            ..DecodingParams::default()
        },
        stream,
    })
}

fn eligible(req: &CanonicalRequest) -> bool {
    let cache = ResponseCache::new(CacheConfig::default());
    let hint = analyze(req, &AnalyzerConfig::default());
    cache.is_cacheable(req, &hint)
}

#[test]
fn plain_deterministic_chat_is_cacheable() {
    assert!(eligible(&chat("what is 2+2?", None, false)));
    assert!(eligible(&chat("what is 2+2?", Some(0.2), false)));
}

#[test]
fn streams_bypass() {
    assert!(!eligible(&chat("what is 2+2?", None, true)));
}

#[test]
fn hot_temperature_bypasses() {
    assert!(!eligible(&chat("what is 2+2?", Some(0.9), false)));
}

#[test]
fn volatile_prompts_bypass() {
    assert!(!eligible(&chat("what is the weather today?", None, false)));
}

#[test]
fn image_kind_has_no_ttl_by_default() {
    let cfg = CacheConfig::default();
    assert!(cfg.ttl_for(RequestKind::Image).is_none());
    assert!(cfg.ttl_for(RequestKind::Chat).is_some());
}
