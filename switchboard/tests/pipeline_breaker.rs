mod common;

use common::{bed_with, never_cancel, presented, rid};
use switchboard_core::request::{
    CanonicalRequest, ChatMessage, ChatRequest, DecodingParams, ModelHint, Role,
};
use switchboard_mock::MockBehavior;
use switchboard_types::{Capability, ProviderId, RouterStrategy};

fn unique_chat(i: usize) -> CanonicalRequest {
    // Distinct prompts defeat the response cache and the decision cache so
    // every request re-routes and re-dispatches.
    CanonicalRequest::Chat(ChatRequest {
        model: ModelHint::auto(),
        messages: vec![ChatMessage::new(Role::User, format!("breaker probe {i}"))],
        params: DecodingParams::default(),
        stream: false,
    })
}

// Consecutive 5xx on the preferred target open its breaker; the next
// request routes to the remaining candidate.
#[tokio::test]
async fn repeated_5xx_open_the_breaker_and_traffic_moves() {
    let bed = bed_with(|file| {
        file.strategy = RouterStrategy::CostFirst; // bravo first
        file.breaker.sample_min = 5;
        file.breaker.fail_ratio = 0.5;
        file.breaker.window_secs = 60;
        file.breaker.cooldown_secs = 3_600; // no probe during the test
        file.retry.max_attempts = 3;
        file.retry.budget_ms = 10_000;
        file.retry.base_delay_ms = 1;
        file.retry.max_delay_ms = 2;
        file.limits.decision_cache_ttl_ms = 0;
    });
    bed.controllers["bravo"].push_behavior_n(
        Capability::Chat,
        &MockBehavior::Fail(switchboard_core::GatewayError::UpstreamServerError {
            provider: "bravo".into(),
            status: 500,
            message: "dead".into(),
        }),
        64,
    );

    // Drive failing requests until bravo's breaker opens. Each request
    // burns up to three attempts; two requests reach the 5-sample minimum.
    let mut saw_failure = false;
    for i in 0..4 {
        match bed
            .gateway
            .handle(rid(), presented(), unique_chat(i), None, never_cancel())
            .await
        {
            Err(_) => saw_failure = true,
            Ok(out) => {
                // Once the breaker opened mid-request, fallback lands on alpha.
                assert_eq!(out.provider, ProviderId::new("alpha"));
            }
        }
    }
    assert!(saw_failure, "bravo should have failed at least once");

    // Breaker is now open: fresh requests route straight to alpha without
    // touching bravo again.
    let before = bed.controllers["bravo"].calls(Capability::Chat);
    let out = bed
        .gateway
        .handle(rid(), presented(), unique_chat(99), None, never_cancel())
        .await
        .unwrap();
    assert_eq!(out.provider, ProviderId::new("alpha"));
    assert_eq!(bed.controllers["bravo"].calls(Capability::Chat), before);
}

// With a single candidate whose breaker is open, the router still lets the
// head candidate through as the half-open probe after cooldown.
#[tokio::test]
async fn sole_open_candidate_still_probes() {
    let bed = bed_with(|file| {
        file.providers.truncate(1); // alpha only
        file.upstream_keys.truncate(1);
        file.breaker.sample_min = 2;
        file.breaker.fail_ratio = 0.5;
        file.breaker.cooldown_secs = 0; // probe immediately
        file.retry.max_attempts = 1;
        file.limits.decision_cache_ttl_ms = 0;
    });
    bed.controllers["alpha"].push_behavior_n(
        Capability::Chat,
        &MockBehavior::Fail(switchboard_core::GatewayError::UpstreamServerError {
            provider: "alpha".into(),
            status: 500,
            message: "dead".into(),
        }),
        2,
    );

    for i in 0..2 {
        let _ = bed
            .gateway
            .handle(rid(), presented(), unique_chat(i), None, never_cancel())
            .await;
    }

    // Breaker opened after two counted failures; cooldown is zero, so the
    // next request is admitted as the probe and succeeds, closing it.
    let out = bed
        .gateway
        .handle(rid(), presented(), unique_chat(7), None, never_cancel())
        .await
        .unwrap();
    assert_eq!(out.provider, ProviderId::new("alpha"));
}

// Retry budget: a single always-failing candidate consumes at most
// RETRY_MAX_ATTEMPTS upstream calls for one request.
#[tokio::test]
async fn retry_budget_bounds_upstream_calls() {
    let bed = bed_with(|file| {
        file.providers.truncate(1);
        file.upstream_keys.truncate(1);
        file.breaker.sample_min = 100; // keep the breaker out of the way
        file.retry.max_attempts = 3;
        file.retry.budget_ms = 10_000;
        file.retry.base_delay_ms = 1;
        file.retry.max_delay_ms = 2;
    });
    bed.controllers["alpha"].push_behavior_n(
        Capability::Chat,
        &MockBehavior::Fail(switchboard_core::GatewayError::UpstreamServerError {
            provider: "alpha".into(),
            status: 500,
            message: "dead".into(),
        }),
        16,
    );

    let err = bed
        .gateway
        .handle(rid(), presented(), unique_chat(0), None, never_cancel())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "upstream.server_error");
    assert_eq!(bed.controllers["alpha"].calls(Capability::Chat), 3);
}
