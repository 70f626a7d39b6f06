mod common;

use common::{bed_with, chat, never_cancel, presented, rid};
use switchboard_types::{ProviderId, RouterStrategy};

// Candidates: alpha at $0.002/1K in, bravo at $0.001/1K in. Model hint is
// "auto" and both breakers are closed, so cost_first must pick bravo.
#[tokio::test]
async fn cost_first_picks_the_cheaper_provider() {
    let bed = bed_with(|file| file.strategy = RouterStrategy::CostFirst);
    let out = bed
        .gateway
        .handle(rid(), presented(), chat("hello"), None, never_cancel())
        .await
        .unwrap();
    assert_eq!(out.provider, ProviderId::new("bravo"));
    assert_eq!(
        bed.controllers["alpha"].calls(switchboard_types::Capability::Chat),
        0
    );
    assert_eq!(
        bed.controllers["bravo"].calls(switchboard_types::Capability::Chat),
        1
    );
}

#[tokio::test]
async fn quality_first_picks_the_higher_tier() {
    let bed = bed_with(|file| file.strategy = RouterStrategy::QualityFirst);
    let out = bed
        .gateway
        .handle(rid(), presented(), chat("hello"), None, never_cancel())
        .await
        .unwrap();
    // alpha carries quality tier 5 against bravo's 2.
    assert_eq!(out.provider, ProviderId::new("alpha"));
}

#[tokio::test]
async fn preferred_provider_outranks_strategy_order() {
    let bed = bed_with(|file| {
        file.strategy = RouterStrategy::CostFirst;
        file.tenant_keys[0]
            .prefs
            .preferred_providers
            .push(ProviderId::new("alpha"));
    });
    let out = bed
        .gateway
        .handle(rid(), presented(), chat("hello"), None, never_cancel())
        .await
        .unwrap();
    assert_eq!(out.provider, ProviderId::new("alpha"));
}

#[tokio::test]
async fn specific_model_hint_pins_the_provider() {
    let bed = bed_with(|file| file.strategy = RouterStrategy::CostFirst);
    let req = switchboard_core::CanonicalRequest::Chat(switchboard_core::request::ChatRequest {
        model: switchboard_core::ModelHint::new("alpha-m1"),
        messages: vec![switchboard_core::request::ChatMessage::new(
            switchboard_core::request::Role::User,
            "hello",
        )],
        params: switchboard_core::request::DecodingParams::default(),
        stream: false,
    });
    let out = bed
        .gateway
        .handle(rid(), presented(), req, None, never_cancel())
        .await
        .unwrap();
    assert_eq!(out.provider, ProviderId::new("alpha"));
    assert_eq!(out.model.as_str(), "alpha-m1");
}

#[tokio::test]
async fn transient_failure_retries_same_candidate_while_breaker_closed() {
    let bed = bed_with(|file| {
        file.strategy = RouterStrategy::CostFirst;
        // One attempt per candidate keeps the walk visible in call counts.
        file.retry.max_attempts = 2;
        file.retry.budget_ms = 10_000;
    });
    bed.controllers["bravo"].push_behavior(
        switchboard_types::Capability::Chat,
        switchboard_mock::MockBehavior::Fail(switchboard_core::GatewayError::UpstreamServerError {
            provider: "bravo".into(),
            status: 500,
            message: "boom".into(),
        }),
    );
    let out = bed
        .gateway
        .handle(rid(), presented(), chat("hello"), None, never_cancel())
        .await
        .unwrap();
    // bravo (cheapest) failed once; the retry stayed on bravo and succeeded.
    assert_eq!(out.provider, ProviderId::new("bravo"));
    assert_eq!(
        bed.controllers["bravo"].calls(switchboard_types::Capability::Chat),
        2
    );
}

#[tokio::test]
async fn upstream_client_error_surfaces_without_failover() {
    let bed = bed_with(|file| file.strategy = RouterStrategy::CostFirst);
    bed.controllers["bravo"].push_behavior(
        switchboard_types::Capability::Chat,
        switchboard_mock::MockBehavior::Fail(switchboard_core::GatewayError::UpstreamClientError {
            provider: "bravo".into(),
            status: 422,
            message: "malformed".into(),
        }),
    );
    let err = bed
        .gateway
        .handle(rid(), presented(), chat("hello"), None, never_cancel())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "upstream.client_error");
    // 4xx surface immediately: no retry, no fallback to alpha.
    assert_eq!(
        bed.controllers["bravo"].calls(switchboard_types::Capability::Chat),
        1
    );
    assert_eq!(
        bed.controllers["alpha"].calls(switchboard_types::Capability::Chat),
        0
    );
}
