//! Stream events and the handle contract for live upstream streams.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::CancelHandle;
use crate::error::GatewayError;
use crate::response::{TokenUsage, ToolCall};

/// One event in an adapter-produced chat stream.
///
/// The sequence is finite, non-restartable, and preserves provider order.
/// `Done` or `Error` is always the final event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    Delta {
        /// The appended text fragment.
        text: String,
    },
    /// A tool invocation requested mid-stream.
    ToolCall {
        /// The requested call.
        call: ToolCall,
    },
    /// Token accounting, emitted at most once near the end of the stream.
    Usage {
        /// Reported counts.
        usage: TokenUsage,
    },
    /// Normal termination.
    Done,
    /// Abnormal termination; no further events follow.
    Error {
        /// The failure, mapped into the canonical taxonomy.
        error: GatewayError,
    },
}

impl StreamEvent {
    /// True for `Done` and `Error`, the two terminal variants.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Default bound for adapter event channels. Adapters must not buffer more
/// than this many undelivered events; the producer task suspends instead.
pub const EVENT_BUFFER: usize = 64;

/// Create the bounded event channel adapters hand back to the hub.
#[must_use]
pub fn event_channel(capacity: usize) -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Owner's end of the task pumping one upstream stream.
///
/// The SSE layer keeps this handle alive for exactly as long as the client
/// connection: the producer task reads provider frames and feeds the event
/// channel until the handle goes away. Teardown — client disconnect, admin
/// close, or normal end — first fires the producer's
/// [`CancelToken`](crate::context::CancelToken) so a cooperative producer
/// can close its transport, and then force-cancels the task if it is still
/// running. Either way the upstream connection does not outlive the handle.
///
/// Producers obtain their stop token from [`crate::context::cancel_pair`]
/// before spawning and select on it at every suspension point:
///
/// ```ignore
/// let (stop, mut token) = cancel_pair();
/// let task = tokio::spawn(async move {
///     tokio::select! {
///         () = token.cancelled() => return, // transport closes on return
///         // ... pump provider frames ...
///     }
/// });
/// let handle = StreamHandle::new(task, stop);
/// ```
///
/// Use [`shutdown`](Self::shutdown) where the caller must observe the
/// producer finishing, and plain `drop` everywhere else.
#[derive(Debug)]
pub struct StreamHandle {
    producer: JoinHandle<()>,
    stop: CancelHandle,
}

impl StreamHandle {
    /// Bind a spawned producer task to the cancel handle it watches.
    #[must_use]
    pub const fn new(producer: JoinHandle<()>, stop: CancelHandle) -> Self {
        Self { producer, stop }
    }

    /// Signal the producer and wait for it to finish.
    ///
    /// Meant for orderly teardown paths that must observe transport close
    /// before proceeding; drop-based teardown does not wait.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        let _ = (&mut self.producer).await;
    }

    /// Tear down immediately without waiting for the producer.
    pub fn abort(self) {
        // Drop does the signalling and the force-cancel.
        drop(self);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop.cancel();
        if !self.producer.is_finished() {
            self.producer.abort();
        }
    }
}
