use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use switchboard_core::request::{ChatMessage, ChatRequest, DecodingParams, ModelHint, Role};
use switchboard_core::response::{ChatCompletion, FinishReason, TokenUsage};
use switchboard_core::{CanonicalRequest, CanonicalResponse, GatewayError, fingerprint};
use switchboard_middleware::{CacheConfig, CacheOutcome, CachedResponse, ResponseCache};
use switchboard_types::{ModelId, ProviderId};

fn chat_request(content: &str) -> CanonicalRequest {
    CanonicalRequest::Chat(ChatRequest {
        model: ModelHint::auto(),
        messages: vec![ChatMessage::new(Role::User, content)],
        params: DecodingParams::default(),
        stream: false,
    })
}

fn stored(content: &str) -> CachedResponse {
    CachedResponse {
        response: CanonicalResponse::Chat(ChatCompletion {
            model: ModelId::new("m1"),
            content: content.to_string(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::new(10, 20),
        }),
        cost: Decimal::new(42, 4),
        provider: ProviderId::new("alpha"),
        stored_at: Utc::now(),
        ttl: Duration::from_secs(60),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_concurrent_callers_one_upstream_call() {
    let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
    let fp = fingerprint(&chat_request("what is the airspeed of an unladen swallow?"));
    let upstream_calls = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..100 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&upstream_calls);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_dispatch(&fp, async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(stored("an African or European swallow?"))
                })
                .await
        }));
    }

    let mut misses = 0;
    let mut coalesced = 0;
    let mut hits = 0;
    for task in tasks {
        let (result, outcome) = task.await.unwrap();
        let value = result.unwrap();
        match &value.response {
            CanonicalResponse::Chat(c) => {
                assert_eq!(c.content, "an African or European swallow?");
            }
            other => panic!("unexpected response kind: {other:?}"),
        }
        match outcome {
            CacheOutcome::Miss => misses += 1,
            CacheOutcome::Coalesced => coalesced += 1,
            CacheOutcome::Hit => hits += 1,
        }
    }

    assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(misses, 1);
    assert_eq!(coalesced + hits, 99);
}

#[tokio::test(flavor = "multi_thread")]
async fn waiters_share_the_leaders_failure() {
    let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
    let fp = fingerprint(&chat_request("doomed"));
    let upstream_calls = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&upstream_calls);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_dispatch(&fp, async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err::<CachedResponse, _>(GatewayError::UpstreamServerError {
                        provider: "alpha".into(),
                        status: 503,
                        message: "overloaded".into(),
                    })
                })
                .await
        }));
    }

    let mut leader_errors = 0;
    let mut waiter_errors = 0;
    for task in tasks {
        let (result, outcome) = task.await.unwrap();
        match (result, outcome) {
            (Err(GatewayError::UpstreamServerError { .. }), CacheOutcome::Miss) => {
                leader_errors += 1;
            }
            (Err(GatewayError::MissThenFailed), CacheOutcome::Coalesced) => waiter_errors += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(leader_errors, 1);
    assert_eq!(waiter_errors, 9);

    // Failures are not cached: the next caller runs a fresh load.
    let (result, outcome) = cache
        .get_or_dispatch(&fp, async { Ok(stored("recovered")) })
        .await;
    assert!(result.is_ok());
    assert_eq!(outcome, CacheOutcome::Miss);
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_call_is_a_hit_within_ttl() {
    let cache = ResponseCache::new(CacheConfig::default());
    let fp = fingerprint(&chat_request("cacheable"));

    let (first, outcome) = cache
        .get_or_dispatch(&fp, async { Ok(stored("answer")) })
        .await;
    assert_eq!(outcome, CacheOutcome::Miss);
    let first = first.unwrap();

    let (second, outcome) = cache
        .get_or_dispatch(&fp, async {
            panic!("must not load on a hit");
            #[allow(unreachable_code)]
            Err::<CachedResponse, _>(GatewayError::MissThenFailed)
        })
        .await;
    assert_eq!(outcome, CacheOutcome::Hit);
    let second = second.unwrap();
    assert_eq!(first.response, second.response);
    assert_eq!(first.cost, second.cost);
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let cache = ResponseCache::new(CacheConfig::default());
    let fp = fingerprint(&chat_request("short lived"));

    let mut entry = stored("x");
    entry.ttl = Duration::from_millis(40);
    let (_, outcome) = cache.get_or_dispatch(&fp, async { Ok(entry) }).await;
    assert_eq!(outcome, CacheOutcome::Miss);
    assert!(cache.peek(&fp).await.is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;
    cache.sync().await;
    assert!(cache.peek(&fp).await.is_none());
}
