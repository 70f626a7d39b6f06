//! Registry of open outbound streams.
//!
//! Each live SSE response registers here. The hub enforces per-tenant
//! concurrent-stream caps, exposes list/inspect/close to the control plane,
//! and fans admin events out to filtered subsets with bounded queues (a
//! slow consumer is dropped with a warning rather than stalling the hub).
//! The registry is sharded so registration never contends across streams.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use switchboard_core::stream::StreamEvent;
use switchboard_core::{CancelHandle, CancelToken, GatewayError, cancel_pair};
use switchboard_types::TenantId;

const SHARDS: usize = 16;
const ADMIN_QUEUE: usize = 16;

/// Control-plane view of one open stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Stream id (the request id).
    pub id: String,
    /// Owning tenant.
    pub tenant: TenantId,
    /// When the stream opened.
    pub started_at: DateTime<Utc>,
    /// Events delivered so far.
    pub events: u64,
    /// Payload bytes delivered so far.
    pub bytes: u64,
}

struct ActiveStream {
    tenant: TenantId,
    started_at: DateTime<Utc>,
    events: AtomicU64,
    bytes: AtomicU64,
    admin_tx: mpsc::Sender<StreamEvent>,
    cancel: CancelHandle,
}

/// Ticket held by the data-plane loop for one registered stream.
///
/// Dropping the ticket deregisters the stream and releases its tenant slot.
pub struct StreamTicket {
    hub: Arc<HubInner>,
    id: String,
    stream: Arc<ActiveStream>,
    /// Admin-injected events to splice into the outbound stream.
    pub admin_rx: mpsc::Receiver<StreamEvent>,
    /// Fired by admin close; the SSE loop must also watch its client token.
    pub closed: CancelToken,
}

impl StreamTicket {
    /// The stream id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Account one delivered event of `bytes` payload.
    pub fn note_event(&self, bytes: usize) {
        self.stream.events.fetch_add(1, Ordering::Relaxed);
        self.stream.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

impl Drop for StreamTicket {
    fn drop(&mut self) {
        self.hub.deregister(&self.id, &self.stream.tenant);
    }
}

struct HubInner {
    max_per_tenant: u32,
    shards: Vec<Mutex<HashMap<String, Arc<ActiveStream>>>>,
    tenant_counts: Mutex<HashMap<TenantId, u32>>,
}

impl HubInner {
    fn shard(&self, id: &str) -> &Mutex<HashMap<String, Arc<ActiveStream>>> {
        let mut h = DefaultHasher::new();
        id.hash(&mut h);
        &self.shards[(h.finish() as usize) % SHARDS]
    }

    fn deregister(&self, id: &str, tenant: &TenantId) {
        self.shard(id).lock().expect("mutex poisoned").remove(id);
        let mut counts = self.tenant_counts.lock().expect("mutex poisoned");
        if let Some(n) = counts.get_mut(tenant) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                counts.remove(tenant);
            }
        }
    }
}

/// The hub itself.
pub struct StreamHub {
    inner: Arc<HubInner>,
}

impl StreamHub {
    /// Create a hub with the given per-tenant cap.
    #[must_use]
    pub fn new(max_per_tenant: u32) -> Self {
        Self {
            inner: Arc::new(HubInner {
                max_per_tenant,
                shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
                tenant_counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new outbound stream.
    ///
    /// # Errors
    /// `quota.exceeded` (`StreamLimit`) when the tenant is at its cap.
    pub fn open(&self, id: String, tenant: TenantId) -> Result<StreamTicket, GatewayError> {
        {
            let mut counts = self.inner.tenant_counts.lock().expect("mutex poisoned");
            let n = counts.entry(tenant.clone()).or_insert(0);
            if *n >= self.inner.max_per_tenant {
                return Err(GatewayError::StreamLimit {
                    limit: self.inner.max_per_tenant,
                });
            }
            *n += 1;
        }

        let (admin_tx, admin_rx) = mpsc::channel(ADMIN_QUEUE);
        let (cancel, closed) = cancel_pair();
        let stream = Arc::new(ActiveStream {
            tenant: tenant.clone(),
            started_at: Utc::now(),
            events: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            admin_tx,
            cancel,
        });
        self.inner
            .shard(&id)
            .lock()
            .expect("mutex poisoned")
            .insert(id.clone(), Arc::clone(&stream));

        Ok(StreamTicket {
            hub: Arc::clone(&self.inner),
            id,
            stream,
            admin_rx,
            closed,
        })
    }

    /// Snapshot of all open streams.
    #[must_use]
    pub fn list(&self) -> Vec<StreamInfo> {
        let mut out = Vec::new();
        for shard in &self.inner.shards {
            let shard = shard.lock().expect("mutex poisoned");
            for (id, s) in shard.iter() {
                out.push(StreamInfo {
                    id: id.clone(),
                    tenant: s.tenant.clone(),
                    started_at: s.started_at,
                    events: s.events.load(Ordering::Relaxed),
                    bytes: s.bytes.load(Ordering::Relaxed),
                });
            }
        }
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }

    /// Open-stream count per tenant.
    #[must_use]
    pub fn connection_counts(&self) -> HashMap<TenantId, u32> {
        self.inner
            .tenant_counts
            .lock()
            .expect("mutex poisoned")
            .clone()
    }

    /// Inject an admin event into one stream's outbound sequence.
    ///
    /// Returns `false` when the stream is unknown or its queue is full
    /// (the event is dropped, never queued unboundedly).
    #[must_use]
    pub fn send(&self, id: &str, event: StreamEvent) -> bool {
        let stream = {
            let shard = self.inner.shard(id).lock().expect("mutex poisoned");
            shard.get(id).cloned()
        };
        match stream {
            Some(s) => match s.admin_tx.try_send(event) {
                Ok(()) => true,
                Err(_) => {
                    tracing::warn!(stream = id, "dropping admin event: consumer queue full");
                    false
                }
            },
            None => false,
        }
    }

    /// Broadcast an admin event to every stream, or to one tenant's.
    ///
    /// Returns how many streams accepted the event. Full queues are skipped
    /// with a warning.
    pub fn broadcast(&self, event: &StreamEvent, tenant: Option<&TenantId>) -> usize {
        let mut delivered = 0;
        for shard in &self.inner.shards {
            let targets: Vec<(String, Arc<ActiveStream>)> = {
                let shard = shard.lock().expect("mutex poisoned");
                shard
                    .iter()
                    .filter(|(_, s)| tenant.is_none_or(|t| &s.tenant == t))
                    .map(|(id, s)| (id.clone(), Arc::clone(s)))
                    .collect()
            };
            for (id, s) in targets {
                match s.admin_tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => {
                        tracing::warn!(stream = %id, "dropping broadcast: consumer queue full");
                    }
                }
            }
        }
        delivered
    }

    /// Forcibly terminate a stream. The data-plane loop observes the signal,
    /// emits a documented terminal event, and tears down its upstream.
    #[must_use]
    pub fn close(&self, id: &str) -> bool {
        let shard = self.inner.shard(id).lock().expect("mutex poisoned");
        shard.get(id).map(|s| s.cancel.cancel()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cap_rejects_and_drop_releases() {
        let hub = StreamHub::new(2);
        let t = TenantId::new("t1");
        let a = hub.open("s1".into(), t.clone()).unwrap();
        let _b = hub.open("s2".into(), t.clone()).unwrap();
        let err = hub.open("s3".into(), t.clone()).unwrap_err();
        assert!(matches!(err, GatewayError::StreamLimit { limit: 2 }));

        drop(a);
        assert!(hub.open("s4".into(), t).is_ok());
    }

    #[tokio::test]
    async fn close_fires_the_ticket_token() {
        let hub = StreamHub::new(4);
        let mut ticket = hub.open("s1".into(), TenantId::new("t1")).unwrap();
        assert!(hub.close("s1"));
        ticket.closed.cancelled().await;
        assert!(ticket.closed.is_cancelled());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_the_tenant() {
        let hub = StreamHub::new(4);
        let mut a = hub.open("s1".into(), TenantId::new("t1")).unwrap();
        let mut b = hub.open("s2".into(), TenantId::new("t2")).unwrap();

        let n = hub.broadcast(
            &StreamEvent::Delta {
                text: "maintenance".into(),
            },
            Some(&TenantId::new("t1")),
        );
        assert_eq!(n, 1);
        assert!(a.admin_rx.try_recv().is_ok());
        assert!(b.admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn list_reports_counters() {
        let hub = StreamHub::new(4);
        let ticket = hub.open("s1".into(), TenantId::new("t1")).unwrap();
        ticket.note_event(5);
        ticket.note_event(7);
        let infos = hub.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].events, 2);
        assert_eq!(infos[0].bytes, 12);
    }
}
