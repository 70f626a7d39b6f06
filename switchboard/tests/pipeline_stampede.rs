mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bed, chat, never_cancel, presented, rid};
use switchboard::Outcome;
use switchboard_core::CanonicalResponse;
use switchboard_mock::MockBehavior;
use switchboard_types::Capability;

// 100 identical requests dispatched concurrently: exactly one upstream
// call, 100 identical responses, 1 `upstream` record and 99 `cache.synth`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_identical_requests_one_upstream_call() {
    let bed = Arc::new(bed());
    // Make the single upstream call slow enough that all callers coalesce.
    for ctl in bed.controllers.values() {
        ctl.push_behavior_n(
            Capability::Chat,
            &MockBehavior::Slow(Duration::from_millis(100), "the answer".to_string()),
            4,
        );
    }

    let mut tasks = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..100 {
        let bed = Arc::clone(&bed);
        let id = rid();
        ids.push(id.clone());
        tasks.push(tokio::spawn(async move {
            bed.gateway
                .handle(
                    id,
                    presented(),
                    chat("the one true prompt"),
                    None,
                    never_cancel(),
                )
                .await
        }));
    }

    let mut contents = Vec::new();
    for task in tasks {
        let out = task.await.unwrap().unwrap();
        match out.response {
            CanonicalResponse::Chat(c) => contents.push(c.content),
            other => panic!("unexpected kind: {other:?}"),
        }
    }
    assert_eq!(contents.len(), 100);
    assert!(contents.iter().all(|c| c == &contents[0]));

    let upstream_calls: u32 = bed
        .controllers
        .values()
        .map(|c| c.calls(Capability::Chat))
        .sum();
    assert_eq!(upstream_calls, 1);

    bed.gateway.usage().flush().await;
    let records = bed.gateway.usage().recent(200);
    let upstream = records
        .iter()
        .filter(|r| r.outcome == Outcome::Upstream)
        .count();
    let synth = records
        .iter()
        .filter(|r| r.outcome == Outcome::CacheSynth || r.outcome == Outcome::CacheHit)
        .count();
    assert_eq!(upstream, 1);
    assert_eq!(synth, 99);
    // Every request id accounted exactly once.
    for id in &ids {
        assert_eq!(bed.gateway.usage().records_for(id), 1);
    }
}

// A failing leader shares its failure: waiters see cache.miss_then_failed,
// not a retry storm.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalesced_failure_is_shared_not_retried() {
    let bed = Arc::new(bed());
    for ctl in bed.controllers.values() {
        // Enough scripted failures for the leader's retries, slow so that
        // followers coalesce behind the first call.
        for _ in 0..8 {
            ctl.push_behavior(
                Capability::Chat,
                MockBehavior::Fail(switchboard_core::GatewayError::UpstreamServerError {
                    provider: "mock".into(),
                    status: 503,
                    message: "down".into(),
                }),
            );
        }
    }

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let bed = Arc::clone(&bed);
        tasks.push(tokio::spawn(async move {
            bed.gateway
                .handle(rid(), presented(), chat("doomed prompt"), None, never_cancel())
                .await
        }));
    }

    let mut leader_failures = 0;
    let mut shared_failures = 0;
    for task in tasks {
        match task.await.unwrap() {
            Err(e) if e.code() == "cache.miss_then_failed" => shared_failures += 1,
            Err(_) => leader_failures += 1,
            Ok(out) => panic!("unexpected success: {out:?}"),
        }
    }
    assert_eq!(leader_failures, 1);
    assert_eq!(shared_failures, 9);
}
