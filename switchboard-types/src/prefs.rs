//! Tenant preferences and router strategy configuration.
//!
//! Preferences filter and reweight the candidate list *before* strategy
//! scoring; the active strategy then orders what survives. Precedence is
//! deliberate: a forbidden provider never reappears however well it scores.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::provider::ProviderId;

/// Coarse latency/cost trade-off a tenant can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SpeedPreference {
    /// No preference; the active strategy decides alone.
    #[default]
    Neutral,
    /// Bias candidate ordering toward low observed latency.
    Fastest,
    /// Bias candidate ordering toward low estimated cost.
    Cheapest,
}

/// Per-tenant routing overrides carried on the tenant key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantPreferences {
    /// Latency/cost bias applied before strategy scoring.
    pub speed_preference: SpeedPreference,
    /// Hard ceiling on estimated cost per request; candidates above it are
    /// filtered out.
    pub cost_cap: Option<Decimal>,
    /// Providers to order first, in the given order.
    pub preferred_providers: Vec<ProviderId>,
    /// Providers that must never be selected for this tenant.
    pub forbidden_providers: HashSet<ProviderId>,
}

impl TenantPreferences {
    /// True when the preferences neither filter nor reorder anything.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.speed_preference == SpeedPreference::Neutral
            && self.cost_cap.is_none()
            && self.preferred_providers.is_empty()
            && self.forbidden_providers.is_empty()
    }
}

/// Weights for the `balanced` strategy's normalized score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancedWeights {
    /// Weight on normalized estimated cost.
    pub cost: f64,
    /// Weight on normalized p50 latency.
    pub latency: f64,
    /// Weight on normalized error rate.
    pub error: f64,
}

impl Default for BalancedWeights {
    fn default() -> Self {
        Self {
            cost: 0.4,
            latency: 0.4,
            error: 0.2,
        }
    }
}

/// Candidate-ordering strategy used by the router.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RouterStrategy {
    /// Sort by estimated cost ascending; ties broken by success rate.
    CostFirst,
    /// Sort by p50 latency ascending over the recent window.
    LatencyFirst,
    /// Prefer models with the higher curated quality tier.
    QualityFirst,
    /// Weighted score over normalized cost, latency, and error rate.
    #[default]
    Balanced,
}

impl RouterStrategy {
    /// Stable identifier used by the control plane and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CostFirst => "cost_first",
            Self::LatencyFirst => "latency_first",
            Self::QualityFirst => "quality_first",
            Self::Balanced => "balanced",
        }
    }

    /// Parse a control-plane strategy name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cost_first" => Some(Self::CostFirst),
            "latency_first" => Some(Self::LatencyFirst),
            "quality_first" => Some(Self::QualityFirst),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }

    /// All selectable strategies, for the control-plane listing.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::CostFirst,
            Self::LatencyFirst,
            Self::QualityFirst,
            Self::Balanced,
        ]
    }
}

impl core::fmt::Display for RouterStrategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
