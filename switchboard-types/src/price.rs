//! Versioned price tables and rate-change alerts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::provider::{ModelId, ProviderId};

/// Rates for a single (provider, model) pair.
///
/// Token rates are per 1K tokens; image and audio rates are flat per unit.
/// All rates are decimals, never floats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEntry {
    /// Cost per 1K input tokens.
    pub input_per_1k: Decimal,
    /// Cost per 1K output tokens.
    pub output_per_1k: Decimal,
    /// Flat cost per generated image, when applicable.
    #[serde(default)]
    pub per_image: Option<Decimal>,
    /// Cost per second of audio, when applicable.
    #[serde(default)]
    pub per_audio_second: Option<Decimal>,
}

impl PriceEntry {
    /// Compute the cost of a token-metered request.
    #[must_use]
    pub fn token_cost(&self, input_tokens: u64, output_tokens: u64) -> Decimal {
        let thousand = Decimal::from(1_000u64);
        self.input_per_1k * Decimal::from(input_tokens) / thousand
            + self.output_per_1k * Decimal::from(output_tokens) / thousand
    }
}

/// One row of the gateway-wide price table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateChange {
    /// Provider whose rate changed.
    pub provider: ProviderId,
    /// Model whose rate changed.
    pub model: ModelId,
    /// Rate before the swap.
    pub previous: PriceEntry,
    /// Rate after the swap.
    pub current: PriceEntry,
}

/// Versioned snapshot of all known rates.
///
/// A new table takes effect for every request whose dispatch begins after the
/// snapshot swap; requests already dispatched keep the table they captured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    /// Monotonically increasing table version.
    pub version: u64,
    /// When this version was published.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Per-(provider, model) entries.
    pub entries: Vec<(ProviderId, ModelId, PriceEntry)>,
}

impl PriceTable {
    /// Look up the rates for a (provider, model) pair.
    #[must_use]
    pub fn rate(&self, provider: &ProviderId, model: &ModelId) -> Option<&PriceEntry> {
        self.entries
            .iter()
            .find(|(p, m, _)| p == provider && m == model)
            .map(|(_, _, e)| e)
    }

    /// Diff against a previous table version, collecting changed rates.
    #[must_use]
    pub fn changes_since(&self, previous: &Self) -> Vec<RateChange> {
        let mut out = Vec::new();
        for (provider, model, current) in &self.entries {
            if let Some(prev) = previous.rate(provider, model)
                && prev != current
            {
                out.push(RateChange {
                    provider: provider.clone(),
                    model: model.clone(),
                    previous: prev.clone(),
                    current: current.clone(),
                });
            }
        }
        out
    }
}

/// Alert emitted when a model's rate moves beyond the configured threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAlert {
    /// The underlying rate change.
    pub change: RateChange,
    /// Relative magnitude of the input-rate move, e.g. `0.25` for +25%.
    pub input_ratio: Decimal,
    /// Relative magnitude of the output-rate move.
    pub output_ratio: Decimal,
    /// Table version that introduced the change.
    pub table_version: u64,
    /// When the alert was raised.
    pub at: DateTime<Utc>,
}
