//! Configuration loading and snapshot publication.
//!
//! All sources (TOML file, environment, control-plane writes) converge on
//! the same immutable [`ConfigSnapshot`]. Reloads build a new snapshot,
//! validate it, then atomically swap it in; requests in flight keep the
//! `Arc` they captured, so no request ever observes a half-applied config.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use switchboard_core::analyzer::AnalyzerConfig;
use switchboard_core::request::DecodingParams;
use switchboard_core::GatewayError;
use switchboard_middleware::{BreakerConfig, CacheConfig, RetryConfig};
use switchboard_types::{
    KeyId, PriceTable, ProviderConfig, RouterStrategy, SealedSecret, Secret, SelectionStrategy,
    TenantKeyRecord, UpstreamKeyRecord,
};

/// Deadlines and stream timeouts, milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-request deadline established at ingress.
    pub request_deadline_ms: u64,
    /// Inter-event idle timeout for streams.
    pub stream_idle_ms: u64,
    /// Upstream connect/first-byte timeout.
    pub connect_ms: u64,
    /// Upstream overall deadline for non-streaming calls.
    pub upstream_overall_ms: u64,
    /// Control-plane request deadline (shorter than the data plane's).
    pub control_deadline_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_deadline_ms: 120_000,
            stream_idle_ms: 30_000,
            connect_ms: 10_000,
            upstream_overall_ms: 110_000,
            control_deadline_ms: 5_000,
        }
    }
}

/// Bounds that keep worst-case behavior predictable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum fallback candidates per routing decision.
    pub max_candidates: usize,
    /// TTL of cached routing decisions, milliseconds.
    pub decision_cache_ttl_ms: u64,
    /// Per-tenant concurrent stream cap.
    pub max_streams_per_tenant: u32,
    /// Relative price move that raises an alert, e.g. `0.2` for 20%.
    pub price_alert_threshold: Decimal,
    /// Bound on the in-memory usage record ring.
    pub usage_ring_capacity: usize,
    /// Append-only JSONL usage log; `None` keeps accounting in memory only.
    pub usage_log_path: Option<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_candidates: 4,
            decision_cache_ttl_ms: 2_000,
            max_streams_per_tenant: 8,
            price_alert_threshold: Decimal::new(2, 1),
            usage_ring_capacity: 10_000,
            usage_log_path: None,
        }
    }
}

/// Network binds for the two HTTP planes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Data-plane host.
    pub gateway_host: String,
    /// Data-plane port.
    pub gateway_port: u16,
    /// Control-plane host.
    pub admin_host: String,
    /// Control-plane port.
    pub admin_port: u16,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 8080,
            admin_host: "127.0.0.1".to_string(),
            admin_port: 9090,
        }
    }
}

/// An upstream key as written in the config file: plaintext, sealed at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpstreamKey {
    /// Owning provider id.
    pub provider: String,
    /// Plaintext secret; sealed before it reaches the snapshot.
    pub key: Secret,
    /// Optional operator label.
    #[serde(default)]
    pub label: Option<String>,
    /// Per-key compliance quota.
    #[serde(default)]
    pub quotas: switchboard_types::QuotaLimits,
}

/// A tenant key as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTenantKey {
    /// Plaintext credential; only its digest reaches the snapshot.
    pub key: Secret,
    /// Tenant identity.
    pub tenant: String,
    /// Quota limits.
    #[serde(default)]
    pub quotas: switchboard_types::QuotaLimits,
    /// Permissions.
    #[serde(default)]
    pub permissions: switchboard_types::PermissionSet,
    /// Preference overrides.
    #[serde(default)]
    pub prefs: switchboard_types::TenantPreferences,
}

/// The declarative configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayFile {
    /// Network binds.
    pub bind: BindConfig,
    /// Key-at-rest encryption root. Usually supplied via `SECRETS_KEY`.
    pub secrets_key: Option<Secret>,
    /// Initial router strategy.
    pub strategy: RouterStrategy,
    /// Upstream key selection strategy.
    pub selection: SelectionStrategy,
    /// `balanced` strategy weights.
    pub balanced_weights: switchboard_types::BalancedWeights,
    /// Providers and their models.
    pub providers: Vec<ProviderConfig>,
    /// Upstream keys (plaintext in file, sealed in memory).
    pub upstream_keys: Vec<FileUpstreamKey>,
    /// Tenant keys.
    pub tenant_keys: Vec<FileTenantKey>,
    /// Analyzer tuning.
    pub analyzer: AnalyzerConfig,
    /// Cache tuning.
    pub cache: CacheConfig,
    /// Breaker tuning.
    pub breaker: BreakerConfig,
    /// Retry tuning.
    pub retry: RetryConfig,
    /// Deadlines.
    pub timeouts: TimeoutConfig,
    /// Bounds.
    pub limits: LimitsConfig,
    /// Named decoding presets selectable via `parameter_preset`.
    pub presets: HashMap<String, DecodingParams>,
    /// Prompt templates keyed `category.name`, with `{{var}}` placeholders.
    pub templates: HashMap<String, String>,
}

/// The immutable, versioned configuration value the whole gateway reads.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Monotonic generation, surfaced in `/health`.
    pub generation: u64,
    /// Network binds.
    pub bind: BindConfig,
    /// Key-at-rest encryption root.
    pub secrets_key: Secret,
    /// Active router strategy.
    pub strategy: RouterStrategy,
    /// Upstream key selection strategy.
    pub selection: SelectionStrategy,
    /// `balanced` strategy weights.
    pub balanced_weights: switchboard_types::BalancedWeights,
    /// Providers and their models.
    pub providers: Vec<ProviderConfig>,
    /// Upstream keys, secrets sealed.
    pub upstream_keys: Vec<UpstreamKeyRecord>,
    /// Tenant keys, hashed.
    pub tenant_keys: Vec<TenantKeyRecord>,
    /// Versioned price table derived from provider model pricing.
    pub price_table: PriceTable,
    /// Analyzer tuning.
    pub analyzer: AnalyzerConfig,
    /// Cache tuning.
    pub cache: CacheConfig,
    /// Breaker tuning.
    pub breaker: BreakerConfig,
    /// Retry tuning.
    pub retry: RetryConfig,
    /// Deadlines.
    pub timeouts: TimeoutConfig,
    /// Bounds.
    pub limits: LimitsConfig,
    /// Named decoding presets.
    pub presets: HashMap<String, DecodingParams>,
    /// Prompt templates.
    pub templates: HashMap<String, String>,
}

impl ConfigSnapshot {
    /// Find a provider by id.
    #[must_use]
    pub fn provider(&self, id: &switchboard_types::ProviderId) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| &p.id == id)
    }

    /// Find an upstream key record by id.
    #[must_use]
    pub fn upstream_key(&self, id: &KeyId) -> Option<&UpstreamKeyRecord> {
        self.upstream_keys.iter().find(|k| &k.id == id)
    }

    /// Validate internal consistency before publication.
    ///
    /// # Errors
    /// `validation.invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), GatewayError> {
        for p in &self.providers {
            if p.models.is_empty() {
                return Err(GatewayError::validation(
                    format!("providers.{}", p.id),
                    "provider has no models",
                ));
            }
            for m in &p.models {
                if m.pricing.input_per_1k.is_sign_negative()
                    || m.pricing.output_per_1k.is_sign_negative()
                {
                    return Err(GatewayError::validation(
                        format!("providers.{}.models.{}", p.id, m.id),
                        "negative price",
                    ));
                }
            }
        }
        for k in &self.upstream_keys {
            if self.provider(&k.provider).is_none() {
                return Err(GatewayError::validation(
                    format!("upstream_keys.{}", k.id),
                    format!("unknown provider {}", k.provider),
                ));
            }
        }
        for t in &self.tenant_keys {
            if t.quotas.cost_per_day.is_some_and(|c| c.is_sign_negative()) {
                return Err(GatewayError::validation(
                    format!("tenant_keys.{}", t.id),
                    "negative cost cap",
                ));
            }
        }
        Ok(())
    }
}

fn price_table_from(providers: &[ProviderConfig], version: u64) -> PriceTable {
    PriceTable {
        version,
        updated_at: Some(Utc::now()),
        entries: providers
            .iter()
            .flat_map(|p| {
                p.models
                    .iter()
                    .map(|m| (p.id.clone(), m.id.clone(), m.pricing.clone()))
            })
            .collect(),
    }
}

/// Build the first snapshot from a parsed file, sealing secrets.
///
/// # Errors
/// Validation failures and sealing failures surface as `validation.invalid`.
pub fn snapshot_from_file(file: GatewayFile) -> Result<ConfigSnapshot, GatewayError> {
    let secrets_key = file
        .secrets_key
        .unwrap_or_else(|| Secret::new("switchboard-dev-secrets-key"));

    let now = Utc::now();
    let mut upstream_keys = Vec::with_capacity(file.upstream_keys.len());
    for (i, fk) in file.upstream_keys.into_iter().enumerate() {
        let sealed = SealedSecret::seal(&fk.key, secrets_key.expose())
            .map_err(|e| GatewayError::validation(format!("upstream_keys[{i}]"), e.to_string()))?;
        upstream_keys.push(UpstreamKeyRecord {
            id: KeyId::new(format!("uk-{:04}", i + 1)),
            provider: switchboard_types::ProviderId::new(fk.provider),
            secret: sealed,
            status: switchboard_types::KeyStatus::Active,
            label: fk.label,
            created_at: now,
            last_used_at: None,
            quotas: fk.quotas,
            usage: switchboard_types::UsageTotals::default(),
            rotation: None,
        });
    }

    let tenant_keys = file
        .tenant_keys
        .into_iter()
        .enumerate()
        .map(|(i, ft)| TenantKeyRecord {
            id: KeyId::new(format!("tk-{:04}", i + 1)),
            hash: ft.key.digest(),
            tenant: switchboard_types::TenantId::new(ft.tenant),
            permissions: ft.permissions,
            quotas: ft.quotas,
            prefs: ft.prefs,
            created_at: now,
        })
        .collect();

    let price_table = price_table_from(&file.providers, 1);
    let snapshot = ConfigSnapshot {
        generation: 1,
        bind: file.bind,
        secrets_key,
        strategy: file.strategy,
        selection: file.selection,
        balanced_weights: file.balanced_weights,
        providers: file.providers,
        upstream_keys,
        tenant_keys,
        price_table,
        analyzer: file.analyzer,
        cache: file.cache,
        breaker: file.breaker,
        retry: file.retry,
        timeouts: file.timeouts,
        limits: file.limits,
        presets: file.presets,
        templates: file.templates,
    };
    snapshot.validate()?;
    Ok(snapshot)
}

/// Parse a TOML config file body.
///
/// # Errors
/// `validation.invalid` with the parser's message.
pub fn parse_file(body: &str) -> Result<GatewayFile, GatewayError> {
    toml::from_str(body).map_err(|e| GatewayError::validation("config", e.to_string()))
}

/// Apply `§6.4` environment overrides onto a parsed file.
pub fn apply_env<I>(file: &mut GatewayFile, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in vars {
        match name.as_str() {
            "GATEWAY_HOST" => file.bind.gateway_host = value,
            "GATEWAY_PORT" => set_parsed(&mut file.bind.gateway_port, &value),
            "ADMIN_HOST" => file.bind.admin_host = value,
            "ADMIN_PORT" => set_parsed(&mut file.bind.admin_port, &value),
            "SECRETS_KEY" => file.secrets_key = Some(Secret::new(value)),
            "DEFAULT_STRATEGY" => {
                if let Some(s) = RouterStrategy::parse(&value) {
                    file.strategy = s;
                }
            }
            "CACHE_TTL_CHAT" => file.cache.ttl_chat_secs = value.parse().ok(),
            "CACHE_TTL_EMBED" => file.cache.ttl_embed_secs = value.parse().ok(),
            "CACHE_TTL_STT" => file.cache.ttl_stt_secs = value.parse().ok(),
            "CACHE_TTL_TTS" => file.cache.ttl_tts_secs = value.parse().ok(),
            "BREAKER_WINDOW" => set_parsed(&mut file.breaker.window_secs, &value),
            "BREAKER_FAIL_RATIO" => set_parsed(&mut file.breaker.fail_ratio, &value),
            "BREAKER_SAMPLE_MIN" => set_parsed(&mut file.breaker.sample_min, &value),
            "BREAKER_COOLDOWN" => set_parsed(&mut file.breaker.cooldown_secs, &value),
            "RETRY_MAX_ATTEMPTS" => set_parsed(&mut file.retry.max_attempts, &value),
            "RETRY_BUDGET_MS" => set_parsed(&mut file.retry.budget_ms, &value),
            "STREAM_IDLE_TIMEOUT_MS" => set_parsed(&mut file.timeouts.stream_idle_ms, &value),
            "REQUEST_DEADLINE_MS" => set_parsed(&mut file.timeouts.request_deadline_ms, &value),
            _ => {}
        }
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(v) = value.parse() {
        *slot = v;
    }
}

/// Lock-free snapshot store with copy-on-write updates.
pub struct ConfigStore {
    current: ArcSwap<ConfigSnapshot>,
    generation: AtomicU64,
}

impl ConfigStore {
    /// Publish the initial snapshot.
    #[must_use]
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        let generation = AtomicU64::new(snapshot.generation);
        Self {
            current: ArcSwap::from_pointee(snapshot),
            generation,
        }
    }

    /// The current snapshot. Read-lock-free; callers keep the `Arc` for the
    /// whole request so the entire dispatch sees one generation.
    #[must_use]
    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Copy-on-write update: clone, mutate, validate, bump, swap.
    ///
    /// # Errors
    /// Validation failures leave the current snapshot untouched.
    pub fn update<F>(&self, mutate: F) -> Result<Arc<ConfigSnapshot>, GatewayError>
    where
        F: FnOnce(&mut ConfigSnapshot),
    {
        let mut next = (*self.load()).clone();
        mutate(&mut next);
        next.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        // Any provider/model pricing change becomes a new table version.
        next.price_table = price_table_from(&next.providers, next.generation);
        next.validate()?;
        let arc = Arc::new(next);
        self.current.store(Arc::clone(&arc));
        Ok(arc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_file() {
        let file = parse_file("").unwrap();
        let snap = snapshot_from_file(file).unwrap();
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.strategy, RouterStrategy::Balanced);
        assert_eq!(snap.limits.max_candidates, 4);
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let mut file = parse_file("strategy = { name = \"cost_first\" }\n").unwrap();
        apply_env(
            &mut file,
            [
                ("DEFAULT_STRATEGY".to_string(), "latency_first".to_string()),
                ("RETRY_MAX_ATTEMPTS".to_string(), "5".to_string()),
                ("GATEWAY_PORT".to_string(), "1234".to_string()),
                ("BOGUS".to_string(), "ignored".to_string()),
            ],
        );
        assert_eq!(file.strategy, RouterStrategy::LatencyFirst);
        assert_eq!(file.retry.max_attempts, 5);
        assert_eq!(file.bind.gateway_port, 1234);
    }

    #[test]
    fn update_bumps_generation_and_rejects_invalid() {
        let store = ConfigStore::new(snapshot_from_file(GatewayFile::default()).unwrap());
        let next = store
            .update(|s| s.strategy = RouterStrategy::CostFirst)
            .unwrap();
        assert_eq!(next.generation, 2);
        assert_eq!(store.load().strategy, RouterStrategy::CostFirst);

        let err = store.update(|s| {
            s.upstream_keys.push(UpstreamKeyRecord {
                id: KeyId::new("uk-bad"),
                provider: switchboard_types::ProviderId::new("ghost"),
                secret: SealedSecret::seal(&Secret::new("x"), "k").unwrap(),
                status: switchboard_types::KeyStatus::Active,
                label: None,
                created_at: Utc::now(),
                last_used_at: None,
                quotas: switchboard_types::QuotaLimits::default(),
                usage: switchboard_types::UsageTotals::default(),
                rotation: None,
            });
        });
        assert!(err.is_err());
        // Failed update leaves the published snapshot untouched.
        assert!(store.load().upstream_keys.is_empty());
    }
}
