//! Tenant-facing and upstream key records.

use chrono::{DateTime, Utc};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::prefs::TenantPreferences;
use crate::provider::{ModelId, ProviderId};
use crate::quota::{QuotaLimits, UsageTotals};
use crate::secret::SealedSecret;

/// Typed key identifier shared by tenant and upstream keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Construct a key id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant identity carried by a tenant key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Construct a tenant id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of an upstream key.
///
/// Invariant: a disabled key is never selected for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Eligible for selection.
    #[default]
    Active,
    /// Excluded from selection; in-flight requests may still complete.
    Disabled,
}

/// Strategy for picking an upstream key among a provider's active keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SelectionStrategy {
    /// Pick the active key with the lowest current-minute request count;
    /// ties broken by earliest last-used timestamp.
    #[default]
    LeastUsed,
    /// Deterministic stride over the active keys.
    RoundRobin,
    /// Uniform over the active keys.
    Random,
}

impl SelectionStrategy {
    /// Stable identifier for the control plane.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LeastUsed => "least_used",
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
        }
    }

    /// Parse a control-plane strategy name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "least_used" => Some(Self::LeastUsed),
            "round_robin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

/// Optional automatic rotation schedule for an upstream key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSchedule {
    /// Rotate after this many days.
    pub every_days: u32,
    /// When the key was last rotated.
    pub last_rotated_at: DateTime<Utc>,
}

/// A credential the gateway presents to an AI provider.
///
/// The secret is sealed at rest; it is opened only at dispatch time and the
/// opened value lives inside [`crate::Secret`], which redacts itself
/// everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamKeyRecord {
    /// Unique key id.
    pub id: KeyId,
    /// Owning provider. A key belongs to exactly one provider.
    pub provider: ProviderId,
    /// Encrypted secret material.
    pub secret: SealedSecret,
    /// Lifecycle status.
    #[serde(default)]
    pub status: KeyStatus,
    /// Operator-facing label.
    #[serde(default)]
    pub label: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last time the key was selected for dispatch.
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Per-key quota (supplier compliance track).
    #[serde(default)]
    pub quotas: QuotaLimits,
    /// Cumulative usage.
    #[serde(default)]
    pub usage: UsageTotals,
    /// Optional automatic rotation.
    #[serde(default)]
    pub rotation: Option<RotationSchedule>,
}

/// Which providers and models a tenant key may use.
///
/// `None` means no restriction on that axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSet {
    /// Allowed providers, or all when `None`.
    pub providers: Option<HashSet<ProviderId>>,
    /// Allowed models, or all when `None`.
    pub models: Option<HashSet<ModelId>>,
}

impl PermissionSet {
    /// True when the tenant may dispatch to `provider`/`model`.
    #[must_use]
    pub fn allows(&self, provider: &ProviderId, model: &ModelId) -> bool {
        self.providers.as_ref().is_none_or(|p| p.contains(provider))
            && self.models.as_ref().is_none_or(|m| m.contains(model))
    }
}

/// The credential clients present to the gateway.
///
/// Only the SHA-256 digest of the presented secret is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantKeyRecord {
    /// Unique key id.
    pub id: KeyId,
    /// SHA-256 hex digest of the presented secret.
    pub hash: String,
    /// Tenant identity.
    pub tenant: TenantId,
    /// Provider/model permissions.
    #[serde(default)]
    pub permissions: PermissionSet,
    /// Ingress-fairness quota limits.
    #[serde(default)]
    pub quotas: QuotaLimits,
    /// Routing preference overrides.
    #[serde(default)]
    pub prefs: TenantPreferences,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
