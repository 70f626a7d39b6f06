use switchboard_core::cancel_pair;
use switchboard_core::stream::{StreamEvent, StreamHandle, event_channel};

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_lets_the_producer_wind_down() {
    let (stop, mut token) = cancel_pair();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        // A cooperative producer: close up shop only when told to.
        token.cancelled().await;
        let _ = done_tx.send(());
    });

    StreamHandle::new(task, stop).shutdown().await;

    // The producer observed the signal and finished on its own terms.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(100), done_rx)
        .await
        .expect("producer did not finish after shutdown()");
}

#[tokio::test(flavor = "multi_thread")]
async fn drop_tears_down_a_busy_producer() {
    let (stop, _token) = cancel_pair();
    let (tx, mut rx) = event_channel(4);

    // This producer ignores its token entirely; drop must still kill it.
    let task = tokio::spawn(async move {
        loop {
            if tx.send(StreamEvent::Delta { text: "x".into() }).await.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    let handle = StreamHandle::new(task, stop);
    let first = rx.recv().await;
    assert!(matches!(first, Some(StreamEvent::Delta { .. })));

    drop(handle);

    // Once the producer is gone the channel drains and closes.
    tokio::time::timeout(std::time::Duration::from_millis(500), async {
        while rx.recv().await.is_some() {}
    })
    .await
    .expect("channel did not close after drop");
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_does_not_wait_for_the_producer() {
    let (stop, mut token) = cancel_pair();
    let task = tokio::spawn(async move {
        token.cancelled().await;
        // Simulate a slow transport close that abort() must not wait on.
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    });

    let started = std::time::Instant::now();
    StreamHandle::new(task, stop).abort();
    assert!(started.elapsed() < std::time::Duration::from_millis(100));
}

#[test]
fn terminal_events_are_terminal() {
    assert!(StreamEvent::Done.is_terminal());
    assert!(
        StreamEvent::Error {
            error: switchboard_core::GatewayError::MissThenFailed
        }
        .is_terminal()
    );
    assert!(!StreamEvent::Delta { text: String::new() }.is_terminal());
}
