//! Gateway construction and component wiring.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{ConfigSnapshot, ConfigStore, TimeoutConfig};
use crate::jobs::JobStore;
use crate::keys::KeyManager;
use crate::router::Router;
use crate::streamhub::StreamHub;
use crate::usage::UsageEngine;
use std::time::Duration;
use switchboard_anthropic::AnthropicAdapter;
use switchboard_core::GatewayError;
use switchboard_core::adapter::ProviderAdapter;
use switchboard_gemini::GeminiAdapter;
use switchboard_middleware::{BreakerRegistry, ResponseCache};
use switchboard_openai::OpenAiAdapter;
use switchboard_types::{ProviderConfig, ProviderId, WireFamily};

/// The assembled gateway: every pipeline component as an explicit value.
///
/// Nothing in here is global; handlers receive an `Arc<Gateway>` and thread
/// it down. The config snapshot is the only process-wide state, and it is
/// immutable-published.
pub struct Gateway {
    pub(crate) config: ConfigStore,
    pub(crate) adapters: RwLock<HashMap<ProviderId, Arc<dyn ProviderAdapter>>>,
    pub(crate) keys: KeyManager,
    pub(crate) router: Router,
    pub(crate) cache: ResponseCache,
    pub(crate) breakers: BreakerRegistry,
    pub(crate) usage: Arc<UsageEngine>,
    pub(crate) hub: StreamHub,
    pub(crate) jobs: JobStore,
}

/// Builder for constructing a [`Gateway`] with custom adapters.
pub struct GatewayBuilder {
    snapshot: ConfigSnapshot,
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl GatewayBuilder {
    /// Start from a validated snapshot.
    #[must_use]
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot,
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter explicitly, overriding the family factory.
    ///
    /// Tests use this to stand in a scripted mock for a configured provider.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.id().clone(), adapter);
        self
    }

    /// Build the gateway, constructing family adapters for every configured
    /// provider that was not explicitly registered.
    ///
    /// # Errors
    /// Adapter construction failures (bad base URLs) surface as
    /// `validation.invalid`.
    pub fn build(mut self) -> Result<Arc<Gateway>, GatewayError> {
        for provider in &self.snapshot.providers {
            if !self.adapters.contains_key(&provider.id) {
                self.adapters.insert(
                    provider.id.clone(),
                    family_adapter(provider, &self.snapshot.timeouts)?,
                );
            }
        }

        let cache = ResponseCache::new(self.snapshot.cache.clone());
        let breakers = BreakerRegistry::new(self.snapshot.breaker);
        let usage = UsageEngine::start(
            self.snapshot.limits.usage_ring_capacity,
            self.snapshot
                .limits
                .usage_log_path
                .as_ref()
                .map(std::path::PathBuf::from),
        );
        let hub = StreamHub::new(self.snapshot.limits.max_streams_per_tenant);

        Ok(Arc::new(Gateway {
            config: ConfigStore::new(self.snapshot),
            adapters: RwLock::new(self.adapters),
            keys: KeyManager::new(),
            router: Router::new(),
            cache,
            breakers,
            usage,
            hub,
            jobs: JobStore::new(),
        }))
    }
}

/// Construct the wire-family adapter for one provider.
///
/// The registry maps provider id → adapter; this factory is consulted only
/// at construction and reload. A new provider is a config entry; a new
/// family is a new adapter crate plus one arm here.
pub(crate) fn family_adapter(
    provider: &ProviderConfig,
    timeouts: &TimeoutConfig,
) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
    let connect = Duration::from_millis(timeouts.connect_ms);
    let overall = Duration::from_millis(timeouts.upstream_overall_ms);
    let idle = Duration::from_millis(timeouts.stream_idle_ms);
    Ok(match provider.family {
        WireFamily::OpenAiCompatible => Arc::new(
            OpenAiAdapter::builder(provider.clone())
                .connect_timeout(connect)
                .overall_timeout(overall)
                .idle_timeout(idle)
                .build()?,
        ),
        WireFamily::Anthropic => Arc::new(
            AnthropicAdapter::builder(provider.clone())
                .connect_timeout(connect)
                .overall_timeout(overall)
                .idle_timeout(idle)
                .build()?,
        ),
        WireFamily::Gemini => Arc::new(
            GeminiAdapter::builder(provider.clone())
                .connect_timeout(connect)
                .overall_timeout(overall)
                .idle_timeout(idle)
                .build()?,
        ),
        _ => unreachable!("WireFamily is non_exhaustive only across crate boundaries"),
    })
}

impl Gateway {
    /// The current config snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.config.load()
    }

    /// Copy-on-write config update plus adapter/price bookkeeping.
    ///
    /// # Errors
    /// Validation failures leave the running config untouched.
    pub fn update_config<F>(&self, mutate: F) -> Result<Arc<ConfigSnapshot>, GatewayError>
    where
        F: FnOnce(&mut ConfigSnapshot),
    {
        let previous = self.config.load();
        let next = self.config.update(mutate)?;

        // Price telemetry sees every swap.
        self.usage.price_table_swapped(
            &previous.price_table,
            &next.price_table,
            next.limits.price_alert_threshold,
        );

        // Reconcile the adapter registry with the new provider set. Family
        // adapters are rebuilt; explicitly registered ones are kept.
        {
            let mut adapters = self.adapters.write().expect("lock poisoned");
            adapters.retain(|id, _| next.provider(id).is_some());
            for provider in &next.providers {
                if !adapters.contains_key(&provider.id)
                    && let Ok(adapter) = family_adapter(provider, &next.timeouts)
                {
                    adapters.insert(provider.id.clone(), adapter);
                }
            }
        }
        Ok(next)
    }

    /// The usage engine (for the control plane and tests).
    #[must_use]
    pub fn usage(&self) -> &Arc<UsageEngine> {
        &self.usage
    }

    /// The stream hub (for the control plane).
    #[must_use]
    pub const fn hub(&self) -> &StreamHub {
        &self.hub
    }

    /// The breaker registry (for health reporting and tests).
    #[must_use]
    pub const fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The key manager (for the control plane).
    #[must_use]
    pub const fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// The image job store.
    #[must_use]
    pub const fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Stored response-cache entries, for health reporting.
    #[must_use]
    pub fn cache_entries(&self) -> u64 {
        self.cache.entry_count()
    }

    pub(crate) fn adapter(&self, id: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.read().expect("lock poisoned").get(id).cloned()
    }

    pub(crate) fn adapters_view(&self) -> HashMap<ProviderId, Arc<dyn ProviderAdapter>> {
        self.adapters.read().expect("lock poisoned").clone()
    }
}
