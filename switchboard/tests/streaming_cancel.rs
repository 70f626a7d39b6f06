mod common;

use std::time::Duration;

use common::{bed, bed_with, chat_stream, never_cancel, presented, rid};
use switchboard::Outcome;
use switchboard_core::TokenUsage;
use switchboard_core::stream::StreamEvent;
use switchboard_mock::StreamBehavior;

// Client disconnects after five deltas: the upstream session observes the
// cancellation within the bound, and the single usage record reflects the
// partial tokens with a cancelled outcome.
#[tokio::test(flavor = "multi_thread")]
async fn disconnect_closes_upstream_within_bound() {
    let bed = bed();
    for ctl in bed.controllers.values() {
        ctl.set_stream_behavior(StreamBehavior::Manual);
    }

    let request_id = rid();
    let (mut session, _ticket) = bed
        .gateway
        .open_stream(
            request_id.clone(),
            presented(),
            chat_stream("stream me"),
            None,
            never_cancel(),
        )
        .await
        .unwrap();

    let serving = bed
        .controllers
        .iter()
        .find(|(_, c)| c.stream_open())
        .map(|(name, _)| *name)
        .expect("one mock is serving the stream");
    let ctl = &bed.controllers[serving];

    let (handle, mut events) = session.take_io();
    for i in 0..5 {
        assert!(
            ctl.push_stream_event(StreamEvent::Delta {
                text: format!("chunk {i}"),
            })
            .await
        );
    }
    let mut received = 0;
    while received < 5 {
        match events.recv().await {
            Some(StreamEvent::Delta { .. }) => received += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // Client goes away: the transport handle drops.
    drop(handle);
    drop(events);

    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while ctl.stream_open() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "upstream not closed within 500ms"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The SSE layer writes the record with whatever usage it saw.
    bed.gateway
        .finish_stream(session, TokenUsage::new(12, 5), Outcome::Cancelled, None);
    bed.gateway.usage().flush().await;
    assert_eq!(bed.gateway.usage().records_for(&request_id), 1);
    let record = bed
        .gateway
        .usage()
        .recent(10)
        .into_iter()
        .find(|r| r.request_id == request_id)
        .unwrap();
    assert_eq!(record.outcome, Outcome::Cancelled);
    assert_eq!(record.input_tokens, 12);
    assert_eq!(record.output_tokens, 5);
}

// Events arrive at the session receiver in exactly the order the adapter
// produced them.
#[tokio::test(flavor = "multi_thread")]
async fn stream_preserves_event_order() {
    let bed = bed();
    for ctl in bed.controllers.values() {
        ctl.set_stream_behavior(StreamBehavior::Events(
            vec![
                StreamEvent::Delta { text: "a".into() },
                StreamEvent::Delta { text: "b".into() },
                StreamEvent::Delta { text: "c".into() },
                StreamEvent::Usage {
                    usage: TokenUsage::new(3, 3),
                },
                StreamEvent::Done,
            ],
            Duration::from_millis(1),
        ));
    }

    let (mut session, _ticket) = bed
        .gateway
        .open_stream(rid(), presented(), chat_stream("ordered"), None, never_cancel())
        .await
        .unwrap();
    let (_handle, mut events) = session.take_io();

    let mut deltas = Vec::new();
    let mut saw_done = false;
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Delta { text } => deltas.push(text),
            StreamEvent::Usage { .. } => {}
            StreamEvent::Done => {
                saw_done = true;
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(deltas, vec!["a", "b", "c"]);
    assert!(saw_done);
    bed.gateway
        .finish_stream(session, TokenUsage::new(3, 3), Outcome::Upstream, None);
}

// The per-tenant concurrent stream cap rejects the excess stream with a
// quota-style error.
#[tokio::test(flavor = "multi_thread")]
async fn tenant_stream_cap_is_enforced() {
    let bed = bed_with(|file| file.limits.max_streams_per_tenant = 1);
    for ctl in bed.controllers.values() {
        ctl.set_stream_behavior(StreamBehavior::Manual);
    }

    let first = bed
        .gateway
        .open_stream(rid(), presented(), chat_stream("one"), None, never_cancel())
        .await;
    assert!(first.is_ok());

    let err = bed
        .gateway
        .open_stream(rid(), presented(), chat_stream("two"), None, never_cancel())
        .await
        .map(|_| ())
        .unwrap_err();
    assert_eq!(err.code(), "quota.exceeded");
}
