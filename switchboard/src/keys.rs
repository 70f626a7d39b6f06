//! Tenant authentication and upstream key selection.
//!
//! Key *records* live in the config snapshot; this module owns the hot
//! runtime state next to them: per-key minute counters, round-robin
//! cursors, in-flight reference counts, and the per-key quota ledgers.
//! Selection holds its lock only over the counter-read-and-bump step; the
//! request itself proceeds lock-free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::ConfigSnapshot;
use switchboard_core::GatewayError;
use switchboard_middleware::{QuotaLedger, QuotaScope};
use switchboard_types::{
    KeyId, KeyStatus, ProviderId, Secret, SelectionStrategy, TenantKeyRecord, UpstreamKeyRecord,
    UsageTotals,
};

#[derive(Debug, Default)]
struct KeyRuntime {
    minute_start: i64,
    minute_requests: u64,
    last_used_at: Option<DateTime<Utc>>,
    in_flight: u64,
    totals: UsageTotals,
}

/// A selected upstream key with its secret opened for dispatch.
pub struct SelectedKey {
    /// The selected record (cloned out of the snapshot).
    pub record: UpstreamKeyRecord,
    /// Opened secret, presented upstream by the adapter.
    pub secret: Secret,
}

/// Guard marking a key as referenced by an in-flight request.
///
/// Deletion of a key fails while any guard for it is alive; rotation's
/// grace window is exactly the lifetime of outstanding guards.
pub struct InFlightGuard {
    manager: Arc<KeyManagerInner>,
    key: KeyId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut rt = self.manager.runtime.lock().expect("mutex poisoned");
        if let Some(k) = rt.get_mut(&self.key) {
            k.in_flight = k.in_flight.saturating_sub(1);
        }
    }
}

#[derive(Default)]
struct KeyManagerInner {
    runtime: Mutex<HashMap<KeyId, KeyRuntime>>,
    rr_cursor: AtomicU64,
    ledgers: Mutex<HashMap<KeyId, Arc<QuotaLedger>>>,
    tenant_ledgers: Mutex<HashMap<KeyId, Arc<QuotaLedger>>>,
}

/// Authenticates tenants and selects upstream keys.
#[derive(Default)]
pub struct KeyManager {
    inner: Arc<KeyManagerInner>,
}

impl KeyManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a presented tenant credential against the snapshot.
    ///
    /// # Errors
    /// `auth.invalid` when the digest matches no known key.
    pub fn authenticate(
        &self,
        snapshot: &ConfigSnapshot,
        presented: &Secret,
    ) -> Result<TenantKeyRecord, GatewayError> {
        let digest = presented.digest();
        snapshot
            .tenant_keys
            .iter()
            .find(|t| t.hash == digest)
            .cloned()
            .ok_or(GatewayError::AuthInvalid)
    }

    /// The ingress quota ledger for a tenant key, created on first use.
    #[must_use]
    pub fn tenant_ledger(&self, record: &TenantKeyRecord) -> Arc<QuotaLedger> {
        let mut map = self.inner.tenant_ledgers.lock().expect("mutex poisoned");
        Arc::clone(
            map.entry(record.id.clone()).or_insert_with(|| {
                Arc::new(QuotaLedger::new(QuotaScope::Tenant, record.quotas.clone()))
            }),
        )
    }

    /// Select the best eligible upstream key for `provider`.
    ///
    /// Disabled keys and keys over their own quota are filtered first, then
    /// the strategy picks among what remains.
    ///
    /// # Errors
    /// `route.no_candidate` when no eligible key exists.
    pub fn select_upstream(
        &self,
        snapshot: &ConfigSnapshot,
        provider: &ProviderId,
        strategy: SelectionStrategy,
    ) -> Result<SelectedKey, GatewayError> {
        let candidates: Vec<&UpstreamKeyRecord> = snapshot
            .upstream_keys
            .iter()
            .filter(|k| &k.provider == provider && k.status == KeyStatus::Active)
            .filter(|k| self.key_quota_allows(k))
            .collect();
        if candidates.is_empty() {
            return Err(GatewayError::no_candidate(format!(
                "upstream key for {provider}"
            )));
        }

        let now = Utc::now();
        let chosen: &UpstreamKeyRecord = match strategy {
            SelectionStrategy::LeastUsed => {
                let mut rt = self.inner.runtime.lock().expect("mutex poisoned");
                let minute = now.timestamp() - now.timestamp().rem_euclid(60);
                candidates
                    .iter()
                    .min_by_key(|k| {
                        let state = rt.entry((*k).id.clone()).or_default();
                        if state.minute_start != minute {
                            state.minute_start = minute;
                            state.minute_requests = 0;
                        }
                        (
                            state.minute_requests,
                            state.last_used_at.map_or(0, |t| t.timestamp_millis()),
                        )
                    })
                    .copied()
                    .expect("non-empty candidates")
            }
            SelectionStrategy::RoundRobin => {
                let n = self.inner.rr_cursor.fetch_add(1, Ordering::Relaxed) as usize;
                candidates[n % candidates.len()]
            }
            SelectionStrategy::Random => {
                use rand::Rng;
                let i = rand::rng().random_range(0..candidates.len());
                candidates[i]
            }
            _ => unreachable!("SelectionStrategy is non_exhaustive only across crate boundaries"),
        };

        // Counter-read-and-bump under a short lock; nothing else happens here.
        {
            let mut rt = self.inner.runtime.lock().expect("mutex poisoned");
            let minute = now.timestamp() - now.timestamp().rem_euclid(60);
            let state = rt.entry(chosen.id.clone()).or_default();
            if state.minute_start != minute {
                state.minute_start = minute;
                state.minute_requests = 0;
            }
            state.minute_requests += 1;
            state.last_used_at = Some(now);
        }

        let secret = chosen
            .secret
            .open(snapshot.secrets_key.expose())
            .map_err(|e| GatewayError::internal(format!("key {}: {e}", chosen.id)))?;
        Ok(SelectedKey {
            record: chosen.clone(),
            secret,
        })
    }

    fn key_quota_allows(&self, key: &UpstreamKeyRecord) -> bool {
        if key.quotas.is_unlimited() {
            return true;
        }
        self.upstream_ledger(key).would_allow()
    }

    /// The compliance quota ledger for an upstream key.
    #[must_use]
    pub fn upstream_ledger(&self, key: &UpstreamKeyRecord) -> Arc<QuotaLedger> {
        let mut map = self.inner.ledgers.lock().expect("mutex poisoned");
        Arc::clone(map.entry(key.id.clone()).or_insert_with(|| {
            Arc::new(QuotaLedger::new(QuotaScope::UpstreamKey, key.quotas.clone()))
        }))
    }

    /// Mark a key as referenced by an in-flight request.
    #[must_use]
    pub fn begin_in_flight(&self, key: &KeyId) -> InFlightGuard {
        {
            let mut rt = self.inner.runtime.lock().expect("mutex poisoned");
            rt.entry(key.clone()).or_default().in_flight += 1;
        }
        InFlightGuard {
            manager: Arc::clone(&self.inner),
            key: key.clone(),
        }
    }

    /// How many requests currently reference `key`.
    #[must_use]
    pub fn in_flight(&self, key: &KeyId) -> u64 {
        let rt = self.inner.runtime.lock().expect("mutex poisoned");
        rt.get(key).map_or(0, |k| k.in_flight)
    }

    /// Fold a completed request into the key's runtime totals.
    pub fn record_usage(&self, key: &KeyId, input_tokens: u64, output_tokens: u64, cost: Decimal) {
        let mut rt = self.inner.runtime.lock().expect("mutex poisoned");
        rt.entry(key.clone())
            .or_default()
            .totals
            .record(input_tokens, output_tokens, cost);
    }

    /// Runtime usage totals for a key (zeros when never used).
    #[must_use]
    pub fn usage_totals(&self, key: &KeyId) -> UsageTotals {
        let rt = self.inner.runtime.lock().expect("mutex poisoned");
        rt.get(key).map_or_else(UsageTotals::default, |k| k.totals.clone())
    }

    /// Current-minute request count for a key, for the least-used preview.
    #[must_use]
    pub fn minute_requests(&self, key: &KeyId) -> u64 {
        let rt = self.inner.runtime.lock().expect("mutex poisoned");
        let minute = {
            let now = Utc::now();
            now.timestamp() - now.timestamp().rem_euclid(60)
        };
        rt.get(key)
            .filter(|k| k.minute_start == minute)
            .map_or(0, |k| k.minute_requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayFile, snapshot_from_file};

    fn snapshot_with_keys(n: usize) -> ConfigSnapshot {
        let mut file: GatewayFile = toml::from_str(
            r#"
            [[providers]]
            id = "alpha"
            family = "openai-compatible"
            base_url = "http://localhost/v1"

            [[providers.models]]
            id = "m1"
            context_length = 8192
            max_output_tokens = 1024
            pricing = { input_per_1k = "0.002", output_per_1k = "0.004" }
            "#,
        )
        .unwrap();
        for i in 0..n {
            file.upstream_keys.push(crate::config::FileUpstreamKey {
                provider: "alpha".to_string(),
                key: Secret::new(format!("sk-{i}")),
                label: None,
                quotas: switchboard_types::QuotaLimits::default(),
            });
        }
        snapshot_from_file(file).unwrap()
    }

    #[test]
    fn round_robin_strides_over_active_keys() {
        let snap = snapshot_with_keys(3);
        let mgr = KeyManager::new();
        let picks: Vec<String> = (0..6)
            .map(|_| {
                mgr.select_upstream(&snap, &ProviderId::new("alpha"), SelectionStrategy::RoundRobin)
                    .unwrap()
                    .record
                    .id
                    .to_string()
            })
            .collect();
        assert_eq!(picks[0], picks[3]);
        assert_eq!(picks[1], picks[4]);
        assert_ne!(picks[0], picks[1]);
    }

    #[test]
    fn least_used_prefers_the_cold_key() {
        let snap = snapshot_with_keys(2);
        let mgr = KeyManager::new();
        let first = mgr
            .select_upstream(&snap, &ProviderId::new("alpha"), SelectionStrategy::LeastUsed)
            .unwrap();
        let second = mgr
            .select_upstream(&snap, &ProviderId::new("alpha"), SelectionStrategy::LeastUsed)
            .unwrap();
        assert_ne!(first.record.id, second.record.id);
    }

    #[test]
    fn disabled_keys_are_never_selected() {
        let mut snap = snapshot_with_keys(2);
        snap.upstream_keys[0].status = KeyStatus::Disabled;
        let mgr = KeyManager::new();
        for _ in 0..5 {
            let picked = mgr
                .select_upstream(&snap, &ProviderId::new("alpha"), SelectionStrategy::Random)
                .unwrap();
            assert_eq!(picked.record.id, snap.upstream_keys[1].id);
        }
    }

    #[test]
    fn selection_opens_the_sealed_secret() {
        let snap = snapshot_with_keys(1);
        let mgr = KeyManager::new();
        let picked = mgr
            .select_upstream(&snap, &ProviderId::new("alpha"), SelectionStrategy::LeastUsed)
            .unwrap();
        assert_eq!(picked.secret.expose(), "sk-0");
    }

    #[test]
    fn in_flight_guard_counts() {
        let mgr = KeyManager::new();
        let id = KeyId::new("uk-0001");
        let g1 = mgr.begin_in_flight(&id);
        let g2 = mgr.begin_in_flight(&id);
        assert_eq!(mgr.in_flight(&id), 2);
        drop(g1);
        assert_eq!(mgr.in_flight(&id), 1);
        drop(g2);
        assert_eq!(mgr.in_flight(&id), 0);
    }
}
