//! Usage accounting and price telemetry.
//!
//! Every completed request (success, billable failure, or cancelled stream)
//! emits exactly one [`UsageRecord`] into an append-only sink: an mpsc
//! channel drained by a writer task into a bounded in-memory ring plus
//! rolling aggregates. The router never talks to this engine directly; it
//! reads the published [`StatsSnapshot`], which breaks the router/usage
//! cycle.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use switchboard_types::{
    KeyId, ModelId, PriceAlert, PriceTable, ProviderId, QuotaWindow, TenantId,
};

/// Terminal classification of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Served by an upstream call.
    Upstream,
    /// Served from the response cache.
    CacheHit,
    /// Served by waiting on another caller's in-flight upstream call.
    CacheSynth,
    /// Client went away before completion.
    Cancelled,
    /// Failed terminally; carries the canonical error code.
    Failed(String),
}

impl Outcome {
    /// Stable label for aggregation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Upstream => "upstream",
            Self::CacheHit => "cache.hit",
            Self::CacheSynth => "cache.synth",
            Self::Cancelled => "cancelled",
            Self::Failed(code) => code,
        }
    }

    /// Successful outcomes count toward the router's success rate.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Upstream | Self::CacheHit | Self::CacheSynth)
    }
}

/// One append-only accounting record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Gateway request id.
    pub request_id: String,
    /// Tenant that issued the request.
    pub tenant: TenantId,
    /// Provider that served it, when dispatch happened.
    pub provider: Option<ProviderId>,
    /// Model that served it.
    pub model: Option<ModelId>,
    /// Upstream key used.
    pub key: Option<KeyId>,
    /// Request kind label.
    pub kind: String,
    /// Input tokens (possibly partial for cancelled streams).
    pub input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Cost charged.
    pub cost: Decimal,
    /// Terminal outcome.
    pub outcome: Outcome,
    /// End-to-end latency, milliseconds.
    pub latency_ms: u64,
    /// When the request entered the pipeline.
    pub started_at: DateTime<Utc>,
    /// When the record was written.
    pub finished_at: DateTime<Utc>,
}

/// Read-only per-target statistics consumed by the router.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TargetStats {
    /// Requests observed in the rolling window.
    pub requests: u64,
    /// Fraction of failed requests.
    pub error_rate: f64,
    /// 1 − `error_rate`, kept for tie-breaking readability.
    pub success_rate: f64,
    /// Median latency over recent requests, milliseconds.
    pub p50_latency_ms: u64,
}

/// Immutable statistics view published for the router.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    per_target: HashMap<(ProviderId, ModelId), TargetStats>,
}

impl StatsSnapshot {
    /// Stats for one (provider, model), defaults when never dispatched.
    #[must_use]
    pub fn target(&self, provider: &ProviderId, model: &ModelId) -> TargetStats {
        self.per_target
            .get(&(provider.clone(), model.clone()))
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone)]
struct DimensionAgg {
    requests: u64,
    input_tokens: u64,
    output_tokens: u64,
    cost: Decimal,
    failures: u64,
}

#[derive(Debug, Default)]
struct WindowedAgg {
    start: i64,
    agg: DimensionAgg,
}

#[derive(Default)]
struct TargetHistory {
    latencies_ms: VecDeque<u64>,
    outcomes: VecDeque<bool>,
}

const HISTORY_BOUND: usize = 256;

struct EngineState {
    ring: VecDeque<UsageRecord>,
    ring_capacity: usize,
    per_target: HashMap<(ProviderId, ModelId), TargetHistory>,
    by_tenant: HashMap<TenantId, [WindowedAgg; 3]>,
    by_provider: HashMap<ProviderId, [WindowedAgg; 3]>,
    by_model: HashMap<ModelId, [WindowedAgg; 3]>,
    by_key: HashMap<KeyId, [WindowedAgg; 3]>,
    alerts: Vec<PriceAlert>,
}

enum Msg {
    Record(Box<UsageRecord>),
    Flush(oneshot::Sender<()>),
}

/// The usage engine: sink handle plus queryable aggregates.
pub struct UsageEngine {
    tx: mpsc::UnboundedSender<Msg>,
    state: Arc<Mutex<EngineState>>,
}

const WINDOWS: [QuotaWindow; 3] = [QuotaWindow::Minute, QuotaWindow::Hour, QuotaWindow::Day];

fn fold_windows(slots: &mut [WindowedAgg; 3], ts: i64, record: &UsageRecord) {
    for (i, window) in WINDOWS.iter().enumerate() {
        let aligned = ts - ts.rem_euclid(window.seconds());
        let slot = &mut slots[i];
        if slot.start != aligned {
            slot.start = aligned;
            slot.agg = DimensionAgg::default();
        }
        slot.agg.requests += 1;
        slot.agg.input_tokens += record.input_tokens;
        slot.agg.output_tokens += record.output_tokens;
        slot.agg.cost += record.cost;
        if !record.outcome.is_success() {
            slot.agg.failures += 1;
        }
    }
}

impl UsageEngine {
    /// Start the engine and its writer task.
    ///
    /// With `log_path` set, every record is also appended as one JSON line
    /// to that file (the durable, append-only sink; the ring is the query
    /// window).
    #[must_use]
    pub fn start(ring_capacity: usize, log_path: Option<std::path::PathBuf>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(EngineState {
            ring: VecDeque::new(),
            ring_capacity: ring_capacity.max(1),
            per_target: HashMap::new(),
            by_tenant: HashMap::new(),
            by_provider: HashMap::new(),
            by_model: HashMap::new(),
            by_key: HashMap::new(),
            alerts: Vec::new(),
        }));
        let writer_state = Arc::clone(&state);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut log = match &log_path {
                Some(path) => tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| tracing::warn!(path = %path.display(), error = %e, "usage log disabled"))
                    .ok(),
                None => None,
            };
            while let Some(msg) = rx.recv().await {
                match msg {
                    Msg::Record(record) => {
                        if let Some(file) = &mut log
                            && let Ok(mut line) = serde_json::to_vec(&*record)
                        {
                            line.push(b'\n');
                            if let Err(e) = file.write_all(&line).await {
                                tracing::warn!(error = %e, "usage log write failed; disabling");
                                log = None;
                            }
                        }
                        let mut st = writer_state.lock().expect("mutex poisoned");
                        apply(&mut st, *record);
                    }
                    Msg::Flush(done) => {
                        if let Some(file) = &mut log {
                            let _ = file.flush().await;
                        }
                        let _ = done.send(());
                    }
                }
            }
        });
        Arc::new(Self { tx, state })
    }

    /// Append one record. Exactly-once is the caller's contract: the
    /// pipeline emits after the response terminates, never before, never
    /// twice.
    pub fn record(&self, record: UsageRecord) {
        let _ = self.tx.send(Msg::Record(Box::new(record)));
    }

    /// Wait until every record sent before this call is applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Msg::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Publish the router's statistics view.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let st = self.state.lock().expect("mutex poisoned");
        let mut per_target = HashMap::new();
        for (target, history) in &st.per_target {
            let requests = history.outcomes.len() as u64;
            if requests == 0 {
                continue;
            }
            let failures = history.outcomes.iter().filter(|ok| !**ok).count() as f64;
            let error_rate = failures / requests as f64;
            let mut sorted: Vec<u64> = history.latencies_ms.iter().copied().collect();
            sorted.sort_unstable();
            let p50 = sorted.get(sorted.len() / 2).copied().unwrap_or(0);
            per_target.insert(
                target.clone(),
                TargetStats {
                    requests,
                    error_rate,
                    success_rate: 1.0 - error_rate,
                    p50_latency_ms: p50,
                },
            );
        }
        StatsSnapshot { per_target }
    }

    /// Recent records, newest last, bounded by the ring.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        let st = self.state.lock().expect("mutex poisoned");
        st.ring
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Count records for one request id; the at-most-once invariant says
    /// this is 0 or 1.
    #[must_use]
    pub fn records_for(&self, request_id: &str) -> usize {
        let st = self.state.lock().expect("mutex poisoned");
        st.ring
            .iter()
            .filter(|r| r.request_id == request_id)
            .count()
    }

    /// Aggregate view for the analytics endpoints.
    #[must_use]
    pub fn aggregates(&self) -> serde_json::Value {
        let st = self.state.lock().expect("mutex poisoned");
        let now = Utc::now().timestamp();
        let render = |m: &HashMap<TenantId, [WindowedAgg; 3]>| {
            serde_json::Value::Object(
                m.iter()
                    .map(|(k, slots)| (k.to_string(), render_slots(slots, now)))
                    .collect(),
            )
        };
        serde_json::json!({
            "tenants": render(&st.by_tenant),
            "providers": serde_json::Value::Object(
                st.by_provider.iter().map(|(k, s)| (k.to_string(), render_slots(s, now))).collect()
            ),
            "models": serde_json::Value::Object(
                st.by_model.iter().map(|(k, s)| (k.to_string(), render_slots(s, now))).collect()
            ),
            "keys": serde_json::Value::Object(
                st.by_key.iter().map(|(k, s)| (k.to_string(), render_slots(s, now))).collect()
            ),
        })
    }

    /// Compare price tables on a snapshot swap and raise alerts for moves
    /// beyond `threshold`.
    pub fn price_table_swapped(&self, previous: &PriceTable, current: &PriceTable, threshold: Decimal) {
        let mut fresh = Vec::new();
        for change in current.changes_since(previous) {
            let input_ratio = relative_move(change.previous.input_per_1k, change.current.input_per_1k);
            let output_ratio =
                relative_move(change.previous.output_per_1k, change.current.output_per_1k);
            if input_ratio >= threshold || output_ratio >= threshold {
                fresh.push(PriceAlert {
                    change,
                    input_ratio,
                    output_ratio,
                    table_version: current.version,
                    at: Utc::now(),
                });
            }
        }
        if !fresh.is_empty() {
            let mut st = self.state.lock().expect("mutex poisoned");
            st.alerts.extend(fresh);
        }
    }

    /// Alerts raised so far, newest last.
    #[must_use]
    pub fn price_alerts(&self) -> Vec<PriceAlert> {
        self.state.lock().expect("mutex poisoned").alerts.clone()
    }
}

fn apply(st: &mut EngineState, record: UsageRecord) {
    let ts = record.finished_at.timestamp();
    fold_windows(st.by_tenant.entry(record.tenant.clone()).or_default(), ts, &record);
    if let Some(p) = &record.provider {
        fold_windows(st.by_provider.entry(p.clone()).or_default(), ts, &record);
    }
    if let Some(m) = &record.model {
        fold_windows(st.by_model.entry(m.clone()).or_default(), ts, &record);
    }
    if let Some(k) = &record.key {
        fold_windows(st.by_key.entry(k.clone()).or_default(), ts, &record);
    }

    // Router statistics only reflect real upstream dispatches; cache hits
    // would otherwise make a dead provider look healthy and fast.
    if let (Some(p), Some(m)) = (&record.provider, &record.model)
        && !matches!(record.outcome, Outcome::CacheHit | Outcome::CacheSynth)
    {
        let history = st.per_target.entry((p.clone(), m.clone())).or_default();
        history.latencies_ms.push_back(record.latency_ms);
        history.outcomes.push_back(record.outcome.is_success());
        if history.latencies_ms.len() > HISTORY_BOUND {
            history.latencies_ms.pop_front();
            history.outcomes.pop_front();
        }
    }

    if st.ring.len() == st.ring_capacity {
        st.ring.pop_front();
    }
    st.ring.push_back(record);
}

fn render_slots(slots: &[WindowedAgg; 3], now: i64) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for (i, window) in WINDOWS.iter().enumerate() {
        let slot = &slots[i];
        let live = slot.start == now - now.rem_euclid(window.seconds());
        let agg = if live { slot.agg.clone() } else { DimensionAgg::default() };
        out.insert(
            window.as_str().to_string(),
            serde_json::json!({
                "requests": agg.requests,
                "input_tokens": agg.input_tokens,
                "output_tokens": agg.output_tokens,
                "cost": agg.cost.to_string(),
                "failures": agg.failures,
            }),
        );
    }
    serde_json::Value::Object(out)
}

fn relative_move(old: Decimal, new: Decimal) -> Decimal {
    if old.is_zero() {
        return if new.is_zero() { Decimal::ZERO } else { Decimal::ONE };
    }
    ((new - old) / old).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: &str, model: &str, ok: bool, latency: u64) -> UsageRecord {
        UsageRecord {
            request_id: uuid::Uuid::new_v4().to_string(),
            tenant: TenantId::new("t1"),
            provider: Some(ProviderId::new(provider)),
            model: Some(ModelId::new(model)),
            key: Some(KeyId::new("uk-0001")),
            kind: "chat".to_string(),
            input_tokens: 10,
            output_tokens: 20,
            cost: Decimal::new(5, 4),
            outcome: if ok {
                Outcome::Upstream
            } else {
                Outcome::Failed("upstream.server_error".to_string())
            },
            latency_ms: latency,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stats_reflect_error_rate_and_p50() {
        let engine = UsageEngine::start(100, None);
        for i in 0..10 {
            engine.record(record("alpha", "m1", i < 8, 100 + i * 10));
        }
        engine.flush().await;
        let stats = engine.stats_snapshot();
        let t = stats.target(&ProviderId::new("alpha"), &ModelId::new("m1"));
        assert_eq!(t.requests, 10);
        assert!((t.error_rate - 0.2).abs() < 1e-9);
        assert_eq!(t.p50_latency_ms, 150);
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let engine = UsageEngine::start(5, None);
        for _ in 0..12 {
            engine.record(record("alpha", "m1", true, 10));
        }
        engine.flush().await;
        assert_eq!(engine.recent(100).len(), 5);
    }

    #[tokio::test]
    async fn cache_hits_do_not_skew_router_stats() {
        let engine = UsageEngine::start(100, None);
        let mut hit = record("alpha", "m1", true, 0);
        hit.outcome = Outcome::CacheHit;
        engine.record(hit);
        engine.flush().await;
        let stats = engine.stats_snapshot();
        assert_eq!(stats.target(&ProviderId::new("alpha"), &ModelId::new("m1")).requests, 0);
    }

    #[tokio::test]
    async fn price_alerts_fire_above_threshold() {
        use switchboard_types::PriceEntry;
        let engine = UsageEngine::start(10, None);
        let entry = |milli: i64| PriceEntry {
            input_per_1k: Decimal::new(milli, 3),
            output_per_1k: Decimal::new(milli * 2, 3),
            per_image: None,
            per_audio_second: None,
        };
        let old = PriceTable {
            version: 1,
            updated_at: None,
            entries: vec![(ProviderId::new("alpha"), ModelId::new("m1"), entry(2))],
        };
        let new = PriceTable {
            version: 2,
            updated_at: None,
            entries: vec![(ProviderId::new("alpha"), ModelId::new("m1"), entry(3))],
        };
        engine.price_table_swapped(&old, &new, Decimal::new(2, 1));
        let alerts = engine.price_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].table_version, 2);
    }
}
