//! Per-request context threaded through the dispatch pipeline.

use std::time::{Duration, Instant};
use tokio::sync::watch;

use switchboard_types::{KeyId, TenantId};

/// Create a linked cancellation pair.
///
/// The handle side lives with whatever owns the connection (the HTTP layer);
/// the token side is cloned into every suspension point of the pipeline.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelToken(rx))
}

/// Fires cancellation; owned by the connection side.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Signal all tokens. Idempotent.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }

    /// True once [`cancel`](Self::cancel) has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Observes cancellation; cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// Non-blocking check.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Suspend until cancellation fires.
    ///
    /// If the handle is dropped without firing, this never resolves: an
    /// abandoned handle is not a cancellation.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// A token that can never fire, for contexts without a client connection.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open and the token stays quiet.
        std::mem::forget(tx);
        Self(rx)
    }
}

/// Everything a pipeline stage needs to know about the request besides its
/// payload.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Gateway-assigned request id, surfaced in `x-request-id`.
    pub request_id: String,
    /// Propagated trace id, when the client supplied one.
    pub trace_id: Option<String>,
    /// Authenticated tenant.
    pub tenant: TenantId,
    /// The tenant key that authenticated this request.
    pub tenant_key: KeyId,
    /// Absolute deadline established at ingress.
    pub deadline: Option<Instant>,
    /// Cancellation token fired on client disconnect.
    pub cancel: CancelToken,
    /// When the request entered the pipeline.
    pub accepted_at: Instant,
}

impl RequestContext {
    /// Time left before the ingress deadline, if one is set.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True once the deadline has elapsed or the client has gone away.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().is_some_and(|r| r.is_zero())
    }
}
