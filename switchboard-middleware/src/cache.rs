//! Fingerprint-keyed response cache with stampede coalescing.
//!
//! Built on `moka`'s future cache. `try_get_with` gives the two guarantees
//! the pipeline needs for free: at most one in-flight load per key, and
//! waiters sharing the leader's outcome — including its failure, so a dead
//! upstream never receives a retry storm from coalesced callers. If the
//! leader is cancelled mid-load, one of the remaining waiters is promoted
//! and runs its own load future.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use switchboard_core::analyzer::RoutingHint;
use switchboard_core::{CanonicalRequest, CanonicalResponse, Fingerprint, GatewayError, RequestKind};
use switchboard_types::ProviderId;

/// Cache tuning. TTLs are per request kind; `None` disables caching for
/// that kind entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// LRU bound on stored entries.
    pub max_entries: u64,
    /// Requests with `temperature` above this never hit or populate the
    /// cache.
    pub temperature_ceiling: f32,
    /// TTL for chat completions, seconds.
    pub ttl_chat_secs: Option<u64>,
    /// TTL for embeddings, seconds.
    pub ttl_embed_secs: Option<u64>,
    /// TTL for transcriptions, seconds.
    pub ttl_stt_secs: Option<u64>,
    /// TTL for synthesized speech, seconds.
    pub ttl_tts_secs: Option<u64>,
    /// TTL for image jobs. Disabled by default: job envelopes are not
    /// replayable.
    pub ttl_image_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            temperature_ceiling: 0.3,
            ttl_chat_secs: Some(300),
            ttl_embed_secs: Some(3_600),
            ttl_stt_secs: Some(1_800),
            ttl_tts_secs: Some(1_800),
            ttl_image_secs: None,
        }
    }
}

impl CacheConfig {
    /// TTL for a request kind, `None` when the kind is uncacheable.
    #[must_use]
    pub const fn ttl_for(&self, kind: RequestKind) -> Option<Duration> {
        let secs = match kind {
            RequestKind::Chat => self.ttl_chat_secs,
            RequestKind::Embed => self.ttl_embed_secs,
            RequestKind::SpeechToText => self.ttl_stt_secs,
            RequestKind::TextToSpeech => self.ttl_tts_secs,
            RequestKind::Image => self.ttl_image_secs,
        };
        match secs {
            Some(s) => Some(Duration::from_secs(s)),
            None => None,
        }
    }
}

/// A stored response plus the accounting context analytics need to compute
/// the saving on a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// The canonical response served to every hit.
    pub response: CanonicalResponse,
    /// What the originating upstream call cost.
    pub cost: Decimal,
    /// Provider that produced the original response.
    pub provider: ProviderId,
    /// When the entry was stored.
    pub stored_at: DateTime<Utc>,
    /// Entry lifetime, derived from the kind's configured TTL.
    pub ttl: Duration,
}

/// How a `get_or_dispatch` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Entry was already present.
    Hit,
    /// This caller performed the upstream load.
    Miss,
    /// Another concurrent caller performed the load; this caller waited.
    Coalesced,
}

struct PerEntryTtl;

impl Expiry<String, Arc<CachedResponse>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CachedResponse>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// The gateway-wide response cache.
pub struct ResponseCache {
    cfg: CacheConfig,
    inner: Cache<String, Arc<CachedResponse>>,
}

impl ResponseCache {
    /// Create a cache with the given tuning.
    #[must_use]
    pub fn new(cfg: CacheConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(cfg.max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { cfg, inner }
    }

    /// The active tuning.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    /// Whether a request may consult or populate the cache.
    ///
    /// Streams, temperatures above the ceiling, volatile prompts, and kinds
    /// with no configured TTL all bypass.
    #[must_use]
    pub fn is_cacheable(&self, req: &CanonicalRequest, hint: &RoutingHint) -> bool {
        if req.is_stream() || hint.volatile {
            return false;
        }
        if req.temperature().is_some_and(|t| t > self.cfg.temperature_ceiling) {
            return false;
        }
        self.cfg.ttl_for(req.kind()).is_some()
    }

    /// Look up without loading.
    pub async fn peek(&self, fp: &Fingerprint) -> Option<Arc<CachedResponse>> {
        self.inner.get(&fp.to_hex()).await
    }

    /// Serve from cache, or perform `load` with stampede protection.
    ///
    /// Exactly one concurrent caller per fingerprint runs `load`; the rest
    /// suspend and share its outcome. The leader surfaces its own failure;
    /// waiters surface `cache.miss_then_failed`. Failures are never stored.
    pub async fn get_or_dispatch<F>(
        &self,
        fp: &Fingerprint,
        load: F,
    ) -> (Result<Arc<CachedResponse>, GatewayError>, CacheOutcome)
    where
        F: Future<Output = Result<CachedResponse, GatewayError>> + Send,
    {
        let key = fp.to_hex();
        if let Some(hit) = self.inner.get(&key).await {
            return (Ok(hit), CacheOutcome::Hit);
        }

        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_load = Arc::clone(&ran);
        let result = self
            .inner
            .try_get_with(key, async move {
                ran_in_load.store(true, Ordering::SeqCst);
                load.await.map(Arc::new)
            })
            .await;

        let was_leader = ran.load(Ordering::SeqCst);
        match result {
            Ok(value) => {
                let outcome = if was_leader {
                    CacheOutcome::Miss
                } else {
                    CacheOutcome::Coalesced
                };
                (Ok(value), outcome)
            }
            Err(shared) => {
                if was_leader {
                    (Err((*shared).clone()), CacheOutcome::Miss)
                } else {
                    (Err(GatewayError::MissThenFailed), CacheOutcome::Coalesced)
                }
            }
        }
    }

    /// Number of stored entries. Approximate until pending maintenance runs.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Run pending maintenance so `entry_count` is exact. Test helper.
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}
