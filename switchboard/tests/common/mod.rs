//! Shared test bed: a gateway wired to scripted mock adapters.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use switchboard::config::{FileTenantKey, FileUpstreamKey, GatewayFile};
use switchboard::{Gateway, GatewayBuilder, snapshot_from_file};
use switchboard_core::request::{
    CanonicalRequest, ChatMessage, ChatRequest, DecodingParams, ModelHint, Role,
};
use switchboard_mock::{MockAdapter, MockController};
use switchboard_types::{
    ModelCaps, ModelConfig, ModelId, PriceEntry, ProviderConfig, ProviderId, Secret, WireFamily,
};

pub const TENANT_KEY: &str = "tk-test-secret";

pub struct TestBed {
    pub gateway: Arc<Gateway>,
    pub controllers: HashMap<&'static str, MockController>,
}

pub fn price(input_milli: i64, output_milli: i64) -> PriceEntry {
    PriceEntry {
        input_per_1k: Decimal::new(input_milli, 3),
        output_per_1k: Decimal::new(output_milli, 3),
        per_image: None,
        per_audio_second: None,
    }
}

pub fn provider(id: &str, model: &str, pricing: PriceEntry, quality: u8) -> ProviderConfig {
    ProviderConfig {
        id: ProviderId::new(id),
        family: WireFamily::OpenAiCompatible,
        base_url: "http://127.0.0.1:9/unused".to_string(),
        auth: switchboard_types::AuthScheme::Bearer,
        region: None,
        models: vec![ModelConfig {
            id: ModelId::new(model),
            context_length: 32_768,
            max_output_tokens: 4_096,
            capabilities: ModelCaps::empty(),
            quality_tier: quality,
            pricing,
        }],
    }
}

/// A gateway with two mock providers: `alpha` (pricier, higher tier) and
/// `bravo` (cheaper, lower tier). Callers tweak the file before build.
pub fn bed_with<F>(mutate: F) -> TestBed
where
    F: FnOnce(&mut GatewayFile),
{
    let mut file = GatewayFile::default();
    file.providers = vec![
        provider("alpha", "alpha-m1", price(2, 4), 5),
        provider("bravo", "bravo-m1", price(1, 2), 2),
    ];
    file.upstream_keys = vec![
        FileUpstreamKey {
            provider: "alpha".to_string(),
            key: Secret::new("sk-alpha"),
            label: None,
            quotas: switchboard_types::QuotaLimits::default(),
        },
        FileUpstreamKey {
            provider: "bravo".to_string(),
            key: Secret::new("sk-bravo"),
            label: None,
            quotas: switchboard_types::QuotaLimits::default(),
        },
    ];
    file.tenant_keys = vec![FileTenantKey {
        key: Secret::new(TENANT_KEY),
        tenant: "acme".to_string(),
        quotas: switchboard_types::QuotaLimits::default(),
        permissions: switchboard_types::PermissionSet::default(),
        prefs: switchboard_types::TenantPreferences::default(),
    }];
    mutate(&mut file);

    let snapshot = snapshot_from_file(file).expect("test config is valid");

    let (alpha, alpha_ctl) = MockAdapter::scripted(ProviderId::new("alpha"));
    let (bravo, bravo_ctl) = MockAdapter::scripted(ProviderId::new("bravo"));
    let gateway = GatewayBuilder::new(snapshot)
        .with_adapter(alpha)
        .with_adapter(bravo)
        .build()
        .expect("gateway builds");

    let mut controllers = HashMap::new();
    controllers.insert("alpha", alpha_ctl);
    controllers.insert("bravo", bravo_ctl);
    TestBed {
        gateway,
        controllers,
    }
}

pub fn bed() -> TestBed {
    bed_with(|_| {})
}

pub fn presented() -> Option<Secret> {
    Some(Secret::new(TENANT_KEY))
}

pub fn chat(text: &str) -> CanonicalRequest {
    CanonicalRequest::Chat(ChatRequest {
        model: ModelHint::auto(),
        messages: vec![ChatMessage::new(Role::User, text)],
        params: DecodingParams::default(),
        stream: false,
    })
}

pub fn chat_stream(text: &str) -> CanonicalRequest {
    CanonicalRequest::Chat(ChatRequest {
        model: ModelHint::auto(),
        messages: vec![ChatMessage::new(Role::User, text)],
        params: DecodingParams::default(),
        stream: true,
    })
}

pub fn rid() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn never_cancel() -> switchboard_core::CancelToken {
    switchboard_core::CancelToken::never()
}
