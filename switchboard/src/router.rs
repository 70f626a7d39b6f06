//! The central routing decision engine.
//!
//! Inputs: canonical request + analyzer hint, tenant permissions and
//! preferences, breaker state, and the usage engine's published statistics.
//! Output: an immutable, length-bounded, ordered candidate list. Decisions
//! are cached for a small TTL keyed by (fingerprint, strategy, preference
//! hash) so burst traffic does not re-score.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ConfigSnapshot;
use crate::keys::KeyManager;
use crate::usage::StatsSnapshot;
use switchboard_core::adapter::ProviderAdapter;
use switchboard_core::analyzer::RoutingHint;
use switchboard_core::{CanonicalRequest, Fingerprint, GatewayError};
use switchboard_middleware::{BreakerRegistry, BreakerStatus, BreakerTarget};
use switchboard_types::{
    Capability, KeyId, ModelId, ProviderId, RouterStrategy, SpeedPreference, TenantKeyRecord,
};

/// A dispatchable (provider, model, key) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Target provider.
    pub provider: ProviderId,
    /// Target model.
    pub model: ModelId,
    /// Upstream key to present.
    pub key: KeyId,
}

/// An immutable routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    /// Ordered candidates, best first. Length-bounded.
    pub candidates: Vec<Candidate>,
    /// Strategy that produced the ordering.
    pub strategy: RouterStrategy,
    /// Confidence in the head candidate, `0.0..=1.0`.
    pub confidence: f64,
    /// Human-readable trace of how the list was built.
    pub reasoning: Vec<String>,
}

struct Scored {
    provider: ProviderId,
    model: ModelId,
    est_cost: Decimal,
    p50_ms: u64,
    error_rate: f64,
    success_rate: f64,
    quality: u8,
    preferred_rank: usize,
}

type DecisionKey = (String, &'static str, u64);

/// The router plus its decision cache.
#[derive(Default)]
pub struct Router {
    decisions: Mutex<HashMap<DecisionKey, (Instant, Arc<RoutingDecision>)>>,
}

// Rough output allowance used for cost estimation when the client sets no cap.
const DEFAULT_OUTPUT_ESTIMATE: u64 = 256;

impl Router {
    /// Create a router with an empty decision cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce (or reuse) a routing decision.
    ///
    /// # Errors
    /// `route.no_candidate` when no eligible (provider, model, key) exists.
    #[allow(clippy::too_many_arguments)]
    pub fn route(
        &self,
        snapshot: &ConfigSnapshot,
        adapters: &HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
        keys: &KeyManager,
        breakers: &BreakerRegistry,
        stats: &StatsSnapshot,
        req: &CanonicalRequest,
        hint: &RoutingHint,
        tenant: &TenantKeyRecord,
        fp: &Fingerprint,
    ) -> Result<Arc<RoutingDecision>, GatewayError> {
        let cache_key = (fp.to_hex(), snapshot.strategy.as_str(), prefs_hash(tenant));
        let ttl = Duration::from_millis(snapshot.limits.decision_cache_ttl_ms);
        if let Some(hit) = self.cached(&cache_key, ttl) {
            return Ok(hit);
        }

        let decision = Arc::new(self.build(
            snapshot, adapters, keys, breakers, stats, req, hint, tenant,
        )?);

        let mut cache = self.decisions.lock().expect("mutex poisoned");
        cache.retain(|_, (at, _)| at.elapsed() < ttl);
        cache.insert(cache_key, (Instant::now(), Arc::clone(&decision)));
        Ok(decision)
    }

    fn cached(&self, key: &DecisionKey, ttl: Duration) -> Option<Arc<RoutingDecision>> {
        let cache = self.decisions.lock().expect("mutex poisoned");
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < ttl)
            .map(|(_, d)| Arc::clone(d))
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        snapshot: &ConfigSnapshot,
        adapters: &HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
        keys: &KeyManager,
        breakers: &BreakerRegistry,
        stats: &StatsSnapshot,
        req: &CanonicalRequest,
        hint: &RoutingHint,
        tenant: &TenantKeyRecord,
    ) -> Result<RoutingDecision, GatewayError> {
        let capability = req.capability();
        let model_hint = req.model_hint();
        let mut reasoning = Vec::new();
        let mut eligible: Vec<Scored> = Vec::new();

        for provider in &snapshot.providers {
            if tenant.prefs.forbidden_providers.contains(&provider.id) {
                continue;
            }
            let Some(adapter) = adapters.get(&provider.id) else {
                continue;
            };
            if !adapter.supports(capability) {
                continue;
            }
            for model in &provider.models {
                if !model_hint.is_auto() && model.id.as_str() != model_hint.as_str() {
                    continue;
                }
                if !model.capabilities.contains(hint.required) {
                    continue;
                }
                if !tenant.permissions.allows(&provider.id, &model.id) {
                    continue;
                }
                let est_cost = model
                    .pricing
                    .token_cost(hint.estimated_input_tokens, DEFAULT_OUTPUT_ESTIMATE);
                if tenant.prefs.cost_cap.is_some_and(|cap| est_cost > cap) {
                    continue;
                }
                let target_stats = stats.target(&provider.id, &model.id);
                let preferred_rank = tenant
                    .prefs
                    .preferred_providers
                    .iter()
                    .position(|p| p == &provider.id)
                    .unwrap_or(usize::MAX);
                eligible.push(Scored {
                    provider: provider.id.clone(),
                    model: model.id.clone(),
                    est_cost,
                    p50_ms: target_stats.p50_latency_ms,
                    error_rate: target_stats.error_rate,
                    success_rate: target_stats.success_rate,
                    quality: model.quality_tier,
                    preferred_rank,
                });
            }
        }
        reasoning.push(format!(
            "{} eligible targets for {capability}",
            eligible.len()
        ));
        if eligible.is_empty() {
            return Err(GatewayError::no_candidate(capability.to_string()));
        }

        // Open breakers leave the list unless nothing else remains; then the
        // head candidate becomes the half-open probe.
        let (closed, open): (Vec<Scored>, Vec<Scored>) = eligible.into_iter().partition(|s| {
            breakers.status(&BreakerTarget {
                provider: s.provider.clone(),
                model: s.model.clone(),
            }) != BreakerStatus::Open
        });
        let pool = if closed.is_empty() {
            reasoning.push("all breakers open; probing anyway".to_string());
            open
        } else {
            if !open.is_empty() {
                reasoning.push(format!("{} targets filtered by open breakers", open.len()));
            }
            closed
        };

        let scores = score(&pool, snapshot, tenant.prefs.speed_preference);
        let mut order: Vec<usize> = (0..pool.len()).collect();
        order.sort_by(|&a, &b| {
            pool[a]
                .preferred_rank
                .cmp(&pool[b].preferred_rank)
                .then_with(|| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal))
        });

        let confidence = confidence_from(&order, &scores, req);
        let mut candidates = Vec::new();
        for &i in &order {
            if candidates.len() >= snapshot.limits.max_candidates {
                break;
            }
            let s = &pool[i];
            match keys.select_upstream(snapshot, &s.provider, snapshot.selection) {
                Ok(selected) => {
                    reasoning.push(format!(
                        "{}/{} est ${} p50 {}ms err {:.0}% via {}",
                        s.provider,
                        s.model,
                        s.est_cost,
                        s.p50_ms,
                        s.error_rate * 100.0,
                        selected.record.id
                    ));
                    candidates.push(Candidate {
                        provider: s.provider.clone(),
                        model: s.model.clone(),
                        key: selected.record.id,
                    });
                }
                Err(_) => {
                    reasoning.push(format!("{}: no eligible upstream key", s.provider));
                }
            }
        }

        if candidates.is_empty() {
            return Err(GatewayError::no_candidate(capability.to_string()));
        }

        Ok(RoutingDecision {
            candidates,
            strategy: snapshot.strategy,
            confidence,
            reasoning,
        })
    }
}

/// Lower is better. Normalization is against the candidate pool itself.
fn score(pool: &[Scored], snapshot: &ConfigSnapshot, speed: SpeedPreference) -> Vec<f64> {
    let max_cost = pool
        .iter()
        .map(|s| decimal_to_f64(s.est_cost))
        .fold(f64::MIN_POSITIVE, f64::max);
    let max_p50 = pool.iter().map(|s| s.p50_ms).max().unwrap_or(0).max(1) as f64;

    pool.iter()
        .map(|s| {
            let cost_norm = decimal_to_f64(s.est_cost) / max_cost;
            let lat_norm = s.p50_ms as f64 / max_p50;
            let base = match snapshot.strategy {
                RouterStrategy::CostFirst => cost_norm * 10.0 + (1.0 - s.success_rate),
                RouterStrategy::LatencyFirst => lat_norm * 10.0,
                RouterStrategy::QualityFirst => f64::from(u8::MAX - s.quality),
                RouterStrategy::Balanced => {
                    let w = snapshot.balanced_weights;
                    w.cost * cost_norm + w.latency * lat_norm + w.error * s.error_rate
                }
                _ => unreachable!("RouterStrategy is non_exhaustive only across crate boundaries"),
            };
            // Speed preference reweights on top of the strategy score.
            match speed {
                SpeedPreference::Neutral => base,
                SpeedPreference::Fastest => base + lat_norm,
                SpeedPreference::Cheapest => base + cost_norm,
                _ => unreachable!(
                    "SpeedPreference is non_exhaustive only across crate boundaries"
                ),
            }
        })
        .collect()
}

fn confidence_from(order: &[usize], scores: &[f64], req: &CanonicalRequest) -> f64 {
    if !req.model_hint().is_auto() {
        return 1.0;
    }
    match order {
        [] => 0.0,
        [_] => 1.0,
        [first, second, ..] => {
            let (a, b) = (scores[*first], scores[*second]);
            let spread = ((b - a) / b.abs().max(1e-9)).clamp(0.0, 1.0);
            0.5 + spread / 2.0
        }
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    d.try_into().unwrap_or(0.0)
}

fn prefs_hash(tenant: &TenantKeyRecord) -> u64 {
    let mut h = DefaultHasher::new();
    tenant.id.as_str().hash(&mut h);
    serde_json::to_string(&tenant.prefs)
        .unwrap_or_default()
        .hash(&mut h);
    serde_json::to_string(&tenant.permissions)
        .unwrap_or_default()
        .hash(&mut h);
    h.finish()
}
