//! Quota ledgers with wall-clock-aligned windows.
//!
//! Two independent tracks use the same ledger type: per-tenant (ingress
//! fairness) and per-upstream-key (supplier compliance). A ledger keeps
//! three rolling request counters (minute, hour, day) plus daily token and
//! cost accumulators. Check-and-charge happens under one short lock, so a
//! rejected request never leaves a partial increment behind.
//!
//! Windows reset at aligned boundaries (top of minute/hour, UTC midnight).
//! The burst admitted across a boundary is a documented trade-off for O(1)
//! counters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Mutex;

use switchboard_core::GatewayError;
use switchboard_types::{QuotaLimits, QuotaWindow};

/// Which track a ledger enforces; carried into `quota.exceeded` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    /// Ingress fairness for a tenant key.
    Tenant,
    /// Supplier compliance for an upstream key.
    UpstreamKey,
}

impl QuotaScope {
    /// Stable label for errors and telemetry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::UpstreamKey => "upstream-key",
        }
    }
}

/// What a successful check charged, kept for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaCharge {
    /// Estimated tokens charged against the daily accumulator.
    pub tokens: u64,
    /// Estimated cost charged against the daily accumulator.
    pub cost: Decimal,
}

#[derive(Debug, Default, Clone, Copy)]
struct WindowSlot {
    start: i64,
    requests: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    minute: WindowSlot,
    hour: WindowSlot,
    day: WindowSlot,
    day_tokens: u64,
    day_cost: Decimal,
}

/// A rolling-window quota ledger for one key.
#[derive(Debug)]
pub struct QuotaLedger {
    scope: QuotaScope,
    limits: QuotaLimits,
    state: Mutex<LedgerState>,
}

const fn align(ts: i64, window: QuotaWindow) -> i64 {
    let w = window.seconds();
    ts - ts.rem_euclid(w)
}

impl QuotaLedger {
    /// Create a ledger for the given scope and limits.
    #[must_use]
    pub fn new(scope: QuotaScope, limits: QuotaLimits) -> Self {
        Self {
            scope,
            limits,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// The limits this ledger enforces.
    #[must_use]
    pub const fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Atomically check every configured window and charge the request.
    ///
    /// On rejection nothing is charged and the error reports the window with
    /// the earliest reset among all rejecting windows, with a precise
    /// `retry_after`.
    ///
    /// # Errors
    /// `GatewayError::QuotaExceeded` when any window is exhausted.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn check_and_charge(
        &self,
        estimated_tokens: u64,
        estimated_cost: Decimal,
    ) -> Result<QuotaCharge, GatewayError> {
        self.check_and_charge_at(Utc::now(), estimated_tokens, estimated_cost)
    }

    /// [`check_and_charge`](Self::check_and_charge) with an explicit clock,
    /// for deterministic tests.
    pub fn check_and_charge_at(
        &self,
        now: DateTime<Utc>,
        estimated_tokens: u64,
        estimated_cost: Decimal,
    ) -> Result<QuotaCharge, GatewayError> {
        let ts = now.timestamp();
        let mut st = self.state.lock().expect("mutex poisoned");

        roll(&mut st.minute, ts, QuotaWindow::Minute);
        roll(&mut st.hour, ts, QuotaWindow::Hour);
        let day_rolled = roll(&mut st.day, ts, QuotaWindow::Day);
        if day_rolled {
            st.day_tokens = 0;
            st.day_cost = Decimal::ZERO;
        }

        // Collect every rejecting window, then report the tightest one.
        let mut rejects: Vec<(QuotaWindow, u64)> = Vec::new();
        for window in [QuotaWindow::Minute, QuotaWindow::Hour, QuotaWindow::Day] {
            if let Some(limit) = self.limits.requests_for(window)
                && slot(&st, window).requests >= limit
            {
                rejects.push((window, limit));
            }
        }
        if let Some(limit) = self.limits.tokens_per_day
            && st.day_tokens.saturating_add(estimated_tokens) > limit
        {
            rejects.push((QuotaWindow::Day, limit));
        }
        if let Some(cap) = self.limits.cost_per_day
            && st.day_cost + estimated_cost > cap
        {
            // Cost caps have no unit count; report the cap's integral part.
            rejects.push((QuotaWindow::Day, cost_limit_units(cap)));
        }

        if let Some((window, limit)) = rejects
            .iter()
            .min_by_key(|(w, _)| align(ts, *w) + w.seconds())
            .copied()
        {
            let reset_at = align(ts, window) + window.seconds();
            return Err(GatewayError::QuotaExceeded {
                scope: self.scope.as_str().to_string(),
                window,
                limit,
                retry_after_secs: u64::try_from(reset_at - ts).unwrap_or(0).max(1),
            });
        }

        st.minute.requests += 1;
        st.hour.requests += 1;
        st.day.requests += 1;
        st.day_tokens = st.day_tokens.saturating_add(estimated_tokens);
        st.day_cost += estimated_cost;

        Ok(QuotaCharge {
            tokens: estimated_tokens,
            cost: estimated_cost,
        })
    }

    /// Check every configured window without charging anything.
    ///
    /// Used to filter upstream keys during selection; the real charge
    /// happens on the winning key only.
    #[must_use]
    pub fn would_allow(&self) -> bool {
        self.would_allow_at(Utc::now())
    }

    /// [`would_allow`](Self::would_allow) with an explicit clock.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn would_allow_at(&self, now: DateTime<Utc>) -> bool {
        let ts = now.timestamp();
        let st = self.state.lock().expect("mutex poisoned");
        for window in [QuotaWindow::Minute, QuotaWindow::Hour, QuotaWindow::Day] {
            if let Some(limit) = self.limits.requests_for(window) {
                let s = slot(&st, window);
                let live = s.start == align(ts, window);
                if live && s.requests >= limit {
                    return false;
                }
            }
        }
        if let Some(limit) = self.limits.tokens_per_day
            && st.day.start == align(ts, QuotaWindow::Day)
            && st.day_tokens >= limit
        {
            return false;
        }
        if let Some(cap) = self.limits.cost_per_day
            && st.day.start == align(ts, QuotaWindow::Day)
            && st.day_cost >= cap
        {
            return false;
        }
        true
    }

    /// Replace the estimated charge with actuals once the response settled.
    ///
    /// Daily accumulators move by the delta; request counters are untouched
    /// (a request is a request). Counters never go below zero.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn reconcile(&self, charged: QuotaCharge, actual_tokens: u64, actual_cost: Decimal) {
        let mut st = self.state.lock().expect("mutex poisoned");
        st.day_tokens = st
            .day_tokens
            .saturating_sub(charged.tokens)
            .saturating_add(actual_tokens);
        let adjusted = st.day_cost - charged.cost + actual_cost;
        st.day_cost = if adjusted.is_sign_negative() {
            Decimal::ZERO
        } else {
            adjusted
        };
    }

    /// Requests charged in the current instance of `window`.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn requests_in(&self, window: QuotaWindow) -> u64 {
        self.requests_in_at(Utc::now(), window)
    }

    /// [`requests_in`](Self::requests_in) with an explicit clock.
    #[must_use]
    pub fn requests_in_at(&self, now: DateTime<Utc>, window: QuotaWindow) -> u64 {
        let ts = now.timestamp();
        let st = self.state.lock().expect("mutex poisoned");
        let s = slot(&st, window);
        if s.start == align(ts, window) {
            s.requests
        } else {
            0
        }
    }
}

fn roll(slot: &mut WindowSlot, ts: i64, window: QuotaWindow) -> bool {
    let aligned = align(ts, window);
    if slot.start != aligned {
        slot.start = aligned;
        slot.requests = 0;
        true
    } else {
        false
    }
}

const fn slot(st: &LedgerState, window: QuotaWindow) -> &WindowSlot {
    match window {
        QuotaWindow::Minute => &st.minute,
        QuotaWindow::Hour => &st.hour,
        QuotaWindow::Day => &st.day,
    }
}

fn cost_limit_units(cap: Decimal) -> u64 {
    u64::try_from(cap.trunc().mantissa().unsigned_abs()).unwrap_or(u64::MAX)
}
