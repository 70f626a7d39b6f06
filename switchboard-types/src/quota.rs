//! Quota limits and usage counter snapshots.

use core::fmt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A fixed accounting window with wall-clock-aligned boundaries.
///
/// Windows reset at aligned instants (top of the minute/hour/UTC day), which
/// admits a burst across a boundary; the trade-off is documented and accepted
/// in exchange for O(1) counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaWindow {
    /// Resets at the top of each minute.
    Minute,
    /// Resets at the top of each hour.
    Hour,
    /// Resets at each UTC midnight.
    Day,
}

impl QuotaWindow {
    /// Window length in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// Stable identifier for errors and telemetry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to a tenant key or an upstream key.
///
/// `None` means unlimited for that dimension. Counters only ever increase
/// within a window; a rejected request rolls back any counter it bumped
/// before the rejecting one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    /// Maximum requests per aligned minute.
    pub requests_per_minute: Option<u64>,
    /// Maximum requests per aligned hour.
    pub requests_per_hour: Option<u64>,
    /// Maximum requests per UTC day.
    pub requests_per_day: Option<u64>,
    /// Maximum total tokens (input + output) per UTC day.
    pub tokens_per_day: Option<u64>,
    /// Maximum accumulated cost per UTC day.
    pub cost_per_day: Option<Decimal>,
}

impl QuotaLimits {
    /// Returns true when no dimension is limited.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.requests_per_minute.is_none()
            && self.requests_per_hour.is_none()
            && self.requests_per_day.is_none()
            && self.tokens_per_day.is_none()
            && self.cost_per_day.is_none()
    }

    /// The request limit for a given window, if configured.
    #[must_use]
    pub const fn requests_for(&self, window: QuotaWindow) -> Option<u64> {
        match window {
            QuotaWindow::Minute => self.requests_per_minute,
            QuotaWindow::Hour => self.requests_per_hour,
            QuotaWindow::Day => self.requests_per_day,
        }
    }
}

/// Cumulative usage totals for one key or tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Completed requests.
    pub requests: u64,
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
    /// Accumulated cost.
    pub cost: Decimal,
}

impl UsageTotals {
    /// Fold one request's usage into the totals.
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64, cost: Decimal) {
        self.requests += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cost += cost;
    }
}
