//! Per-(provider, model) circuit breaker.
//!
//! Transitions:
//! - closed → open when the failure ratio over the rolling window exceeds
//!   the threshold AND the sample count meets the minimum (one-off noise
//!   cannot open a circuit).
//! - open → half-open: the first admission after `next_probe_at` goes
//!   through as the probe; concurrent admissions still see open.
//! - half-open → closed on probe success; half-open → open on probe
//!   failure, with the cooldown doubling up to a cap.
//!
//! Only network errors, timeouts, and upstream 5xx count as failures.
//! Upstream 4xx never move a breaker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use switchboard_core::GatewayError;
use switchboard_types::{ModelId, ProviderId};

/// Breaker tuning, sourced from `BREAKER_*` environment options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Rolling failure-accounting window, seconds.
    pub window_secs: u64,
    /// Failure ratio in `0.0..=1.0` that opens the circuit.
    pub fail_ratio: f64,
    /// Minimum counted samples before the ratio is meaningful.
    pub sample_min: u32,
    /// Initial cooldown before the first probe, seconds.
    pub cooldown_secs: u64,
    /// Cooldown ceiling for repeated failed probes, seconds.
    pub max_cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            fail_ratio: 0.5,
            sample_min: 5,
            cooldown_secs: 10,
            max_cooldown_secs: 300,
        }
    }
}

/// Public breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    /// Admitting traffic.
    Closed,
    /// Rejecting traffic until the next probe time.
    Open,
    /// A probe is deciding the circuit's fate.
    HalfOpen,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; proceed normally.
    Allowed,
    /// Circuit half-open and this caller won the single probe slot. The
    /// caller must report the outcome via `on_success`/`on_failure` with
    /// `was_probe = true`.
    Probe,
    /// Circuit open; do not dispatch.
    Rejected,
}

/// The (provider, model) pair a breaker guards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BreakerTarget {
    /// Guarded provider.
    pub provider: ProviderId,
    /// Guarded model.
    pub model: ModelId,
}

#[derive(Debug)]
struct Slot {
    status: BreakerStatus,
    failures: u32,
    samples: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
}

impl Slot {
    fn new(cfg: &BreakerConfig, now: Instant) -> Self {
        Self {
            status: BreakerStatus::Closed,
            failures: 0,
            samples: 0,
            window_start: now,
            opened_at: None,
            next_probe_at: None,
            cooldown: Duration::from_secs(cfg.cooldown_secs),
            probe_in_flight: false,
        }
    }

    fn roll_window(&mut self, cfg: &BreakerConfig, now: Instant) {
        if now.duration_since(self.window_start) >= Duration::from_secs(cfg.window_secs) {
            self.window_start = now;
            self.failures = 0;
            self.samples = 0;
        }
    }

    fn open(&mut self, now: Instant) {
        self.status = BreakerStatus::Open;
        self.opened_at = Some(now);
        self.next_probe_at = Some(now + self.cooldown);
        self.probe_in_flight = false;
        self.failures = 0;
        self.samples = 0;
    }
}

/// Point-in-time view of one breaker, for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Guarded pair.
    pub target: BreakerTarget,
    /// Current status.
    pub status: BreakerStatus,
    /// Counted failures in the current window.
    pub failures: u32,
    /// Counted samples in the current window.
    pub samples: u32,
    /// Seconds until the next probe, when open.
    pub next_probe_in_secs: Option<u64>,
}

/// Registry of breakers, one per dispatched-to (provider, model).
///
/// The registry lock only guards the map; each breaker has its own short
/// mutex, so admission checks on different targets never contend.
#[derive(Debug)]
pub struct BreakerRegistry {
    cfg: BreakerConfig,
    slots: RwLock<HashMap<BreakerTarget, Arc<Mutex<Slot>>>>,
}

impl BreakerRegistry {
    /// Create a registry with the given tuning.
    #[must_use]
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, target: &BreakerTarget) -> Arc<Mutex<Slot>> {
        if let Some(s) = self.slots.read().expect("lock poisoned").get(target) {
            return Arc::clone(s);
        }
        let mut map = self.slots.write().expect("lock poisoned");
        Arc::clone(
            map.entry(target.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::new(&self.cfg, Instant::now())))),
        )
    }

    /// Check admission for a dispatch to `target`.
    pub fn admit(&self, target: &BreakerTarget) -> Admission {
        self.admit_at(target, Instant::now())
    }

    /// [`admit`](Self::admit) with an explicit clock, for tests.
    pub fn admit_at(&self, target: &BreakerTarget, now: Instant) -> Admission {
        let slot = self.slot(target);
        let mut s = slot.lock().expect("lock poisoned");
        match s.status {
            BreakerStatus::Closed => {
                s.roll_window(&self.cfg, now);
                Admission::Allowed
            }
            BreakerStatus::Open => {
                if s.next_probe_at.is_some_and(|t| now >= t) && !s.probe_in_flight {
                    s.status = BreakerStatus::HalfOpen;
                    s.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            BreakerStatus::HalfOpen => {
                if s.probe_in_flight {
                    Admission::Rejected
                } else {
                    s.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful dispatch outcome.
    pub fn on_success(&self, target: &BreakerTarget, was_probe: bool) {
        let slot = self.slot(target);
        let mut s = slot.lock().expect("lock poisoned");
        if was_probe && s.status == BreakerStatus::HalfOpen {
            s.status = BreakerStatus::Closed;
            s.probe_in_flight = false;
            s.failures = 0;
            s.samples = 0;
            s.opened_at = None;
            s.next_probe_at = None;
            s.cooldown = Duration::from_secs(self.cfg.cooldown_secs);
        } else if s.status == BreakerStatus::Closed {
            s.samples += 1;
        }
    }

    /// Record a failed dispatch outcome.
    ///
    /// Errors for which [`GatewayError::counts_for_breaker`] is false are
    /// ignored entirely.
    pub fn on_failure(&self, target: &BreakerTarget, was_probe: bool, error: &GatewayError) {
        self.on_failure_at(target, was_probe, error, Instant::now());
    }

    /// [`on_failure`](Self::on_failure) with an explicit clock.
    pub fn on_failure_at(
        &self,
        target: &BreakerTarget,
        was_probe: bool,
        error: &GatewayError,
        now: Instant,
    ) {
        if !error.counts_for_breaker() {
            return;
        }
        let slot = self.slot(target);
        let mut s = slot.lock().expect("lock poisoned");
        match s.status {
            BreakerStatus::HalfOpen if was_probe => {
                // Failed probe: back to open with doubled cooldown.
                s.cooldown = (s.cooldown * 2).min(Duration::from_secs(self.cfg.max_cooldown_secs));
                s.open(now);
            }
            BreakerStatus::Closed => {
                s.roll_window(&self.cfg, now);
                s.failures += 1;
                s.samples += 1;
                let ratio = f64::from(s.failures) / f64::from(s.samples);
                if s.samples >= self.cfg.sample_min && ratio >= self.cfg.fail_ratio {
                    s.open(now);
                }
            }
            _ => {}
        }
    }

    /// Current status for routing filters. Targets never dispatched to are
    /// closed by definition.
    #[must_use]
    pub fn status(&self, target: &BreakerTarget) -> BreakerStatus {
        self.slots
            .read()
            .expect("lock poisoned")
            .get(target)
            .map_or(BreakerStatus::Closed, |s| {
                s.lock().expect("lock poisoned").status
            })
    }

    /// True when a probe would be admitted right now.
    #[must_use]
    pub fn probe_due(&self, target: &BreakerTarget) -> bool {
        self.probe_due_at(target, Instant::now())
    }

    /// [`probe_due`](Self::probe_due) with an explicit clock.
    #[must_use]
    pub fn probe_due_at(&self, target: &BreakerTarget, now: Instant) -> bool {
        self.slots
            .read()
            .expect("lock poisoned")
            .get(target)
            .is_some_and(|s| {
                let s = s.lock().expect("lock poisoned");
                s.status == BreakerStatus::Open
                    && !s.probe_in_flight
                    && s.next_probe_at.is_some_and(|t| now >= t)
            })
    }

    /// Snapshot every known breaker, for `/health` and diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        self.slots
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(target, slot)| {
                let s = slot.lock().expect("lock poisoned");
                BreakerSnapshot {
                    target: target.clone(),
                    status: s.status,
                    failures: s.failures,
                    samples: s.samples,
                    next_probe_in_secs: s
                        .next_probe_at
                        .map(|t| t.saturating_duration_since(now).as_secs()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> BreakerTarget {
        BreakerTarget {
            provider: ProviderId::new("alpha"),
            model: ModelId::new("m1"),
        }
    }

    fn server_error() -> GatewayError {
        GatewayError::UpstreamServerError {
            provider: "alpha".into(),
            status: 500,
            message: "boom".into(),
        }
    }

    fn registry() -> BreakerRegistry {
        BreakerRegistry::new(BreakerConfig {
            window_secs: 60,
            fail_ratio: 0.5,
            sample_min: 5,
            cooldown_secs: 10,
            max_cooldown_secs: 40,
        })
    }

    #[test]
    fn opens_only_after_sample_min() {
        let reg = registry();
        let t = target();
        let now = Instant::now();
        for _ in 0..4 {
            reg.on_failure_at(&t, false, &server_error(), now);
        }
        assert_eq!(reg.status(&t), BreakerStatus::Closed);
        reg.on_failure_at(&t, false, &server_error(), now);
        assert_eq!(reg.status(&t), BreakerStatus::Open);
    }

    #[test]
    fn client_errors_never_open() {
        let reg = registry();
        let t = target();
        let e = GatewayError::UpstreamClientError {
            provider: "alpha".into(),
            status: 400,
            message: "bad".into(),
        };
        for _ in 0..20 {
            reg.on_failure(&t, false, &e);
        }
        assert_eq!(reg.status(&t), BreakerStatus::Closed);
    }

    #[test]
    fn single_probe_after_cooldown() {
        let reg = registry();
        let t = target();
        let now = Instant::now();
        for _ in 0..5 {
            reg.on_failure_at(&t, false, &server_error(), now);
        }
        assert_eq!(reg.admit_at(&t, now), Admission::Rejected);

        let later = now + Duration::from_secs(11);
        assert_eq!(reg.admit_at(&t, later), Admission::Probe);
        // Concurrent admission while the probe is in flight stays rejected.
        assert_eq!(reg.admit_at(&t, later), Admission::Rejected);

        reg.on_success(&t, true);
        assert_eq!(reg.status(&t), BreakerStatus::Closed);
        assert_eq!(reg.admit_at(&t, later), Admission::Allowed);
    }

    #[test]
    fn failed_probe_doubles_cooldown_to_cap() {
        let reg = registry();
        let t = target();
        let mut now = Instant::now();
        for _ in 0..5 {
            reg.on_failure_at(&t, false, &server_error(), now);
        }

        // First probe after 10s fails: cooldown becomes 20s.
        now += Duration::from_secs(11);
        assert_eq!(reg.admit_at(&t, now), Admission::Probe);
        reg.on_failure_at(&t, true, &server_error(), now);
        assert_eq!(reg.admit_at(&t, now + Duration::from_secs(15)), Admission::Rejected);

        now += Duration::from_secs(21);
        assert_eq!(reg.admit_at(&t, now), Admission::Probe);
        reg.on_failure_at(&t, true, &server_error(), now);

        // 20s doubles to 40s (the cap); a further failure stays at 40s.
        now += Duration::from_secs(41);
        assert_eq!(reg.admit_at(&t, now), Admission::Probe);
        reg.on_failure_at(&t, true, &server_error(), now);
        assert_eq!(reg.admit_at(&t, now + Duration::from_secs(39)), Admission::Rejected);
        assert_eq!(reg.admit_at(&t, now + Duration::from_secs(41)), Admission::Probe);
    }
}
