//! The ordered dispatch pipeline.
//!
//! `auth → quota → analyze → route → (cache | dispatch) → account`, each
//! stage returning a typed result. Failure semantics follow the error
//! taxonomy: validation and quota errors surface without upstream contact;
//! transient upstream errors walk the candidate list under the retry
//! budget; upstream 4xx surface immediately.
//!
//! Locks are never held across an upstream call: quota charges, breaker
//! admissions, and key selection each take their own short critical
//! section, and the adapter call happens with nothing held.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::config::ConfigSnapshot;
use crate::core::Gateway;
use crate::keys::InFlightGuard;
use crate::router::RoutingDecision;
use crate::streamhub::StreamTicket;
use crate::usage::{Outcome, UsageRecord};
use switchboard_core::analyzer::RoutingHint;
use switchboard_core::stream::{StreamEvent, StreamHandle};
use switchboard_core::{
    CancelToken, CanonicalRequest, CanonicalResponse, Fingerprint, GatewayError, RequestContext,
    RequestKind, TokenUsage, analyze, fingerprint,
};
use switchboard_middleware::{Admission, BreakerTarget, CacheOutcome, CachedResponse, QuotaCharge};
use switchboard_types::{KeyId, ModelId, ProviderId, TenantKeyRecord};

/// Cache disposition surfaced in `x-cache-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache.
    Hit,
    /// Dispatched upstream (or waited on a coalesced dispatch).
    Miss,
    /// Request was not cache-eligible.
    Bypass,
}

impl CacheStatus {
    /// Header rendering.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

/// What a completed non-streaming request hands back to the HTTP layer.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Canonical response body.
    pub response: CanonicalResponse,
    /// Provider that served it (`x-ai-provider`).
    pub provider: ProviderId,
    /// Model that served it (`x-ai-model`).
    pub model: ModelId,
    /// Cache disposition (`x-cache-status`).
    pub cache_status: CacheStatus,
}

struct DispatchDetail {
    response: CanonicalResponse,
    provider: ProviderId,
    model: ModelId,
    key: KeyId,
    usage: TokenUsage,
    cost: Decimal,
}

/// A live streaming session handed to the SSE loop.
pub struct StreamSession {
    io: Option<(StreamHandle, mpsc::Receiver<StreamEvent>)>,
    /// Serving provider.
    pub provider: ProviderId,
    /// Serving model.
    pub model: ModelId,
    /// Upstream key in use.
    pub key: KeyId,
    /// Request context (deadline, cancellation).
    pub ctx: RequestContext,
    tenant_record: TenantKeyRecord,
    tenant_charge: QuotaCharge,
    upstream_charge: QuotaCharge,
    _in_flight: InFlightGuard,
    started_at: chrono::DateTime<Utc>,
}

impl StreamSession {
    /// Take the upstream handle and event receiver. Call exactly once.
    pub fn take_io(&mut self) -> (StreamHandle, mpsc::Receiver<StreamEvent>) {
        self.io.take().expect("take_io called once")
    }
}

// Rough output allowance for pre-charge estimation.
const OUTPUT_ESTIMATE: u64 = 256;

impl Gateway {
    /// Execute a non-streaming request end to end.
    ///
    /// # Errors
    /// Canonical taxonomy errors per §pipeline semantics.
    pub async fn handle(
        self: &Arc<Self>,
        request_id: String,
        presented: Option<switchboard_types::Secret>,
        req: CanonicalRequest,
        trace_id: Option<String>,
        cancel: CancelToken,
    ) -> Result<DispatchOutcome, GatewayError> {
        let t0 = Instant::now();
        let started_at = Utc::now();
        let snapshot = self.snapshot();

        // Auth.
        let presented = presented.ok_or(GatewayError::AuthMissing)?;
        let tenant = self.keys.authenticate(&snapshot, &presented)?;

        // Edge validation.
        validate_request(&req)?;

        // Analysis feeds both the quota pre-charge estimate and the router.
        let hint = analyze(&req, &snapshot.analyzer);
        let est_tokens = hint.estimated_input_tokens + OUTPUT_ESTIMATE;
        let est_cost = estimate_cost(&snapshot, &req, &hint);

        // Tenant quota: pre-charge before any upstream work.
        let ledger = self.keys.tenant_ledger(&tenant);
        let tenant_charge = ledger.check_and_charge(est_tokens, est_cost)?;

        let ctx = RequestContext {
            request_id: request_id.clone(),
            trace_id,
            tenant: tenant.tenant.clone(),
            tenant_key: tenant.id.clone(),
            deadline: Some(t0 + Duration::from_millis(snapshot.timeouts.request_deadline_ms)),
            cancel,
            accepted_at: t0,
        };

        let fp = fingerprint(&req);
        let decision = self.router.route(
            &snapshot,
            &self.adapters_view(),
            &self.keys,
            &self.breakers,
            &self.usage.stats_snapshot(),
            &req,
            &hint,
            &tenant,
            &fp,
        )?;

        let kind = req.kind();
        if self.cache.is_cacheable(&req, &hint) {
            self.handle_cached(
                snapshot, req, ctx, tenant, decision, fp, kind, tenant_charge, started_at, t0,
            )
            .await
        } else {
            let result = self
                .dispatch_failover(&snapshot, &req, &ctx, &decision)
                .await;
            self.settle(
                &snapshot,
                &tenant,
                tenant_charge,
                &ctx,
                kind,
                started_at,
                t0,
                result,
            )
            .map(|detail| DispatchOutcome {
                response: detail.response,
                provider: detail.provider,
                model: detail.model,
                cache_status: CacheStatus::Bypass,
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_cached(
        self: &Arc<Self>,
        snapshot: Arc<ConfigSnapshot>,
        req: CanonicalRequest,
        ctx: RequestContext,
        tenant: TenantKeyRecord,
        decision: Arc<RoutingDecision>,
        fp: Fingerprint,
        kind: RequestKind,
        tenant_charge: QuotaCharge,
        started_at: chrono::DateTime<Utc>,
        t0: Instant,
    ) -> Result<DispatchOutcome, GatewayError> {
        let ttl = snapshot
            .cache
            .ttl_for(kind)
            .unwrap_or(Duration::from_secs(60));
        let detail_slot: Arc<Mutex<Option<DispatchDetail>>> = Arc::new(Mutex::new(None));

        let loader = {
            let gw = Arc::clone(self);
            let snapshot = Arc::clone(&snapshot);
            let req = req.clone();
            let ctx = ctx.clone();
            let decision = Arc::clone(&decision);
            let slot = Arc::clone(&detail_slot);
            async move {
                let detail = gw.dispatch_failover(&snapshot, &req, &ctx, &decision).await?;
                let cached = CachedResponse {
                    response: detail.response.clone(),
                    cost: detail.cost,
                    provider: detail.provider.clone(),
                    stored_at: Utc::now(),
                    ttl,
                };
                *slot.lock().expect("mutex poisoned") = Some(detail);
                Ok(cached)
            }
        };

        let (result, outcome) = self.cache.get_or_dispatch(&fp, loader).await;
        let ledger = self.keys.tenant_ledger(&tenant);
        match (result, outcome) {
            (Ok(_entry), CacheOutcome::Miss) => {
                // This caller was the leader; its dispatch detail is filled.
                let detail = detail_slot
                    .lock()
                    .expect("mutex poisoned")
                    .take()
                    .ok_or_else(|| GatewayError::internal("leader detail missing"))?;
                ledger.reconcile(tenant_charge, detail.usage.total(), detail.cost);
                self.keys.record_usage(
                    &detail.key,
                    detail.usage.input_tokens,
                    detail.usage.output_tokens,
                    detail.cost,
                );
                self.usage.record(UsageRecord {
                    request_id: ctx.request_id.clone(),
                    tenant: ctx.tenant.clone(),
                    provider: Some(detail.provider.clone()),
                    model: Some(detail.model.clone()),
                    key: Some(detail.key.clone()),
                    kind: kind.as_str().to_string(),
                    input_tokens: detail.usage.input_tokens,
                    output_tokens: detail.usage.output_tokens,
                    cost: detail.cost,
                    outcome: Outcome::Upstream,
                    latency_ms: t0.elapsed().as_millis() as u64,
                    started_at,
                    finished_at: Utc::now(),
                });
                Ok(DispatchOutcome {
                    response: detail.response,
                    provider: detail.provider,
                    model: detail.model,
                    cache_status: CacheStatus::Miss,
                })
            }
            (Ok(entry), hit_or_coalesced) => {
                // Cache hits cost nothing; the record keeps the original
                // cost so analytics can see the saving.
                ledger.reconcile(tenant_charge, 0, Decimal::ZERO);
                let outcome = if hit_or_coalesced == CacheOutcome::Hit {
                    Outcome::CacheHit
                } else {
                    Outcome::CacheSynth
                };
                let cache_status = if hit_or_coalesced == CacheOutcome::Hit {
                    CacheStatus::Hit
                } else {
                    CacheStatus::Miss
                };
                let model = entry.response.model().clone();
                self.usage.record(UsageRecord {
                    request_id: ctx.request_id.clone(),
                    tenant: ctx.tenant.clone(),
                    provider: Some(entry.provider.clone()),
                    model: Some(model.clone()),
                    key: None,
                    kind: kind.as_str().to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost: entry.cost,
                    outcome,
                    latency_ms: t0.elapsed().as_millis() as u64,
                    started_at,
                    finished_at: Utc::now(),
                });
                Ok(DispatchOutcome {
                    response: entry.response.clone(),
                    provider: entry.provider.clone(),
                    model,
                    cache_status,
                })
            }
            (Err(error), _) => {
                ledger.reconcile(tenant_charge, 0, Decimal::ZERO);
                self.usage.record(UsageRecord {
                    request_id: ctx.request_id.clone(),
                    tenant: ctx.tenant.clone(),
                    provider: None,
                    model: None,
                    key: None,
                    kind: kind.as_str().to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost: Decimal::ZERO,
                    outcome: Outcome::Failed(error.code().to_string()),
                    latency_ms: t0.elapsed().as_millis() as u64,
                    started_at,
                    finished_at: Utc::now(),
                });
                Err(error)
            }
        }
    }

    /// Account a bypass-path dispatch result and reconcile quotas.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        _snapshot: &ConfigSnapshot,
        tenant: &TenantKeyRecord,
        tenant_charge: QuotaCharge,
        ctx: &RequestContext,
        kind: RequestKind,
        started_at: chrono::DateTime<Utc>,
        t0: Instant,
        result: Result<DispatchDetail, GatewayError>,
    ) -> Result<DispatchDetail, GatewayError> {
        let ledger = self.keys.tenant_ledger(tenant);
        match result {
            Ok(detail) => {
                ledger.reconcile(tenant_charge, detail.usage.total(), detail.cost);
                self.keys.record_usage(
                    &detail.key,
                    detail.usage.input_tokens,
                    detail.usage.output_tokens,
                    detail.cost,
                );
                self.usage.record(UsageRecord {
                    request_id: ctx.request_id.clone(),
                    tenant: ctx.tenant.clone(),
                    provider: Some(detail.provider.clone()),
                    model: Some(detail.model.clone()),
                    key: Some(detail.key.clone()),
                    kind: kind.as_str().to_string(),
                    input_tokens: detail.usage.input_tokens,
                    output_tokens: detail.usage.output_tokens,
                    cost: detail.cost,
                    outcome: Outcome::Upstream,
                    latency_ms: t0.elapsed().as_millis() as u64,
                    started_at,
                    finished_at: Utc::now(),
                });
                Ok(detail)
            }
            Err(error) => {
                ledger.reconcile(tenant_charge, 0, Decimal::ZERO);
                let outcome = if matches!(error, GatewayError::Cancelled) {
                    Outcome::Cancelled
                } else {
                    Outcome::Failed(error.code().to_string())
                };
                self.usage.record(UsageRecord {
                    request_id: ctx.request_id.clone(),
                    tenant: ctx.tenant.clone(),
                    provider: None,
                    model: None,
                    key: None,
                    kind: kind.as_str().to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost: Decimal::ZERO,
                    outcome,
                    latency_ms: t0.elapsed().as_millis() as u64,
                    started_at,
                    finished_at: Utc::now(),
                });
                Err(error)
            }
        }
    }

    /// Walk the candidate list with budgeted retries.
    async fn dispatch_failover(
        self: &Arc<Self>,
        snapshot: &ConfigSnapshot,
        req: &CanonicalRequest,
        ctx: &RequestContext,
        decision: &RoutingDecision,
    ) -> Result<DispatchDetail, GatewayError> {
        let retry = snapshot.retry;
        let loop_start = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_err: Option<GatewayError> = None;

        for candidate in &decision.candidates {
            let target = BreakerTarget {
                provider: candidate.provider.clone(),
                model: candidate.model.clone(),
            };
            let mut was_probe = match self.breakers.admit(&target) {
                Admission::Rejected => continue,
                Admission::Probe => true,
                Admission::Allowed => false,
            };

            loop {
                attempt += 1;
                if !retry.allows(attempt, loop_start.elapsed()) {
                    return Err(last_err
                        .unwrap_or_else(|| GatewayError::no_candidate(req.capability().to_string())));
                }
                let delay = retry.delay_before(attempt);
                if !delay.is_zero() {
                    let mut cancel = ctx.cancel.clone();
                    tokio::select! {
                        () = cancel.cancelled() => return Err(GatewayError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }

                match self
                    .attempt_candidate(snapshot, req, ctx, candidate, &target, was_probe)
                    .await
                {
                    Ok(detail) => return Ok(detail),
                    Err(error) => {
                        if matches!(error, GatewayError::Cancelled) {
                            return Err(error);
                        }
                        if !error.is_transient() {
                            return Err(error);
                        }
                        tracing::debug!(
                            provider = %candidate.provider,
                            model = %candidate.model,
                            attempt,
                            error = %error,
                            "transient upstream failure"
                        );
                        last_err = Some(error);
                        // A failed probe reopens the breaker; ambiguous image
                        // outcomes are never retried (billed-on-submit risk).
                        if was_probe
                            || req.kind() == RequestKind::Image
                            || self.breakers.status(&target)
                                != switchboard_middleware::BreakerStatus::Closed
                        {
                            break;
                        }
                        was_probe = false;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::no_candidate(req.capability().to_string())))
    }

    /// One upstream attempt against one candidate.
    async fn attempt_candidate(
        self: &Arc<Self>,
        snapshot: &ConfigSnapshot,
        req: &CanonicalRequest,
        ctx: &RequestContext,
        candidate: &crate::router::Candidate,
        target: &BreakerTarget,
        was_probe: bool,
    ) -> Result<DispatchDetail, GatewayError> {
        let record = snapshot
            .upstream_key(&candidate.key)
            .cloned()
            .ok_or_else(|| GatewayError::internal(format!("key {} vanished", candidate.key)))?;
        let secret = record
            .secret
            .open(snapshot.secrets_key.expose())
            .map_err(|e| GatewayError::internal(format!("key {}: {e}", record.id)))?;

        // Upstream-key compliance track: pre-charge, reconcile after. An
        // exhausted key reads as the provider rate-limiting us, which keeps
        // it off the breaker and inside the retry/fallback path.
        let key_ledger = self.keys.upstream_ledger(&record);
        let key_charge = key_ledger.check_and_charge(0, Decimal::ZERO).map_err(|e| {
            GatewayError::UpstreamRateLimited {
                provider: candidate.provider.to_string(),
                retry_after_secs: e.retry_after_secs(),
            }
        })?;

        let adapter = self
            .adapter(&candidate.provider)
            .ok_or_else(|| GatewayError::no_candidate(candidate.provider.to_string()))?;
        let _guard = self.keys.begin_in_flight(&record.id);

        let overall = Duration::from_millis(snapshot.timeouts.upstream_overall_ms);
        let budget = ctx.remaining().map_or(overall, |r| r.min(overall));
        let mut cancel = ctx.cancel.clone();

        // The routing decision owns model choice; an `auto` hint must not
        // fall through to the adapter's own default.
        let pinned = pin_model(req, &candidate.model);
        let call = call_adapter(adapter.as_ref(), &pinned, &secret);
        let result = tokio::select! {
            () = cancel.cancelled() => Err(GatewayError::Cancelled),
            outcome = tokio::time::timeout(budget, call) => match outcome {
                Err(_) => Err(GatewayError::UpstreamTimeout {
                    provider: candidate.provider.to_string(),
                }),
                Ok(r) => r,
            },
        };

        match result {
            Ok(response) => {
                self.breakers.on_success(target, was_probe);
                let usage = response.usage();
                let cost = response_cost(snapshot, candidate, req, &response, usage);
                key_ledger.reconcile(key_charge, usage.total(), cost);
                let response = self.assign_job_id(response);
                Ok(DispatchDetail {
                    response,
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    key: record.id,
                    usage,
                    cost,
                })
            }
            Err(error) => {
                key_ledger.reconcile(key_charge, 0, Decimal::ZERO);
                if !matches!(error, GatewayError::Cancelled) {
                    self.breakers.on_failure(target, was_probe, &error);
                }
                Err(error)
            }
        }
    }

    /// Image responses get their gateway job id here.
    fn assign_job_id(&self, response: CanonicalResponse) -> CanonicalResponse {
        match response {
            CanonicalResponse::Image(job) => {
                let id = self.jobs.insert(job.clone());
                let mut job = job;
                job.job_id = id;
                CanonicalResponse::Image(job)
            }
            other => other,
        }
    }

    /// Open a streaming session, walking candidates on setup failure.
    ///
    /// # Errors
    /// Canonical taxonomy errors; `quota.exceeded` covers both tenant quota
    /// and the concurrent-stream cap.
    pub async fn open_stream(
        self: &Arc<Self>,
        request_id: String,
        presented: Option<switchboard_types::Secret>,
        req: CanonicalRequest,
        trace_id: Option<String>,
        cancel: CancelToken,
    ) -> Result<(StreamSession, StreamTicket), GatewayError> {
        let t0 = Instant::now();
        let snapshot = self.snapshot();

        let presented = presented.ok_or(GatewayError::AuthMissing)?;
        let tenant = self.keys.authenticate(&snapshot, &presented)?;
        validate_request(&req)?;
        if !req.is_stream() {
            return Err(GatewayError::validation("stream", "must be true"));
        }

        let hint = analyze(&req, &snapshot.analyzer);
        let est_tokens = hint.estimated_input_tokens + OUTPUT_ESTIMATE;
        let est_cost = estimate_cost(&snapshot, &req, &hint);
        let ledger = self.keys.tenant_ledger(&tenant);
        let tenant_charge = ledger.check_and_charge(est_tokens, est_cost)?;

        // Stream cap before any upstream dial.
        let ticket = self.hub.open(request_id.clone(), tenant.tenant.clone())?;

        let ctx = RequestContext {
            request_id,
            trace_id,
            tenant: tenant.tenant.clone(),
            tenant_key: tenant.id.clone(),
            deadline: None, // streams observe idle timeouts instead
            cancel,
            accepted_at: t0,
        };

        let fp = fingerprint(&req);
        let decision = self.router.route(
            &snapshot,
            &self.adapters_view(),
            &self.keys,
            &self.breakers,
            &self.usage.stats_snapshot(),
            &req,
            &hint,
            &tenant,
            &fp,
        )?;

        let CanonicalRequest::Chat(chat) = &req else {
            return Err(GatewayError::validation("kind", "only chat can stream"));
        };

        let mut last_err: Option<GatewayError> = None;
        for candidate in &decision.candidates {
            let target = BreakerTarget {
                provider: candidate.provider.clone(),
                model: candidate.model.clone(),
            };
            let was_probe = match self.breakers.admit(&target) {
                Admission::Rejected => continue,
                Admission::Probe => true,
                Admission::Allowed => false,
            };

            let Some(record) = snapshot.upstream_key(&candidate.key).cloned() else {
                continue;
            };
            let Ok(secret) = record.secret.open(snapshot.secrets_key.expose()) else {
                continue;
            };
            let key_ledger = self.keys.upstream_ledger(&record);
            let Ok(upstream_charge) = key_ledger.check_and_charge(0, Decimal::ZERO) else {
                continue;
            };

            let adapter = match self.adapter(&candidate.provider) {
                Some(a) => a,
                None => continue,
            };
            let Some(streamer) = adapter.as_chat_stream_provider() else {
                continue;
            };

            let mut pinned = chat.clone();
            pinned.model = switchboard_core::ModelHint::new(candidate.model.as_str());
            match streamer.chat_stream(&pinned, &secret).await {
                Ok((handle, events)) => {
                    self.breakers.on_success(&target, was_probe);
                    let guard = self.keys.begin_in_flight(&record.id);
                    return Ok((
                        StreamSession {
                            io: Some((handle, events)),
                            provider: candidate.provider.clone(),
                            model: candidate.model.clone(),
                            key: record.id,
                            ctx,
                            tenant_record: tenant,
                            tenant_charge,
                            upstream_charge,
                            _in_flight: guard,
                            started_at: Utc::now(),
                        },
                        ticket,
                    ));
                }
                Err(error) => {
                    key_ledger.reconcile(upstream_charge, 0, Decimal::ZERO);
                    self.breakers.on_failure(&target, was_probe, &error);
                    if !error.is_transient() {
                        return Err(error);
                    }
                    last_err = Some(error);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::no_candidate("chat-stream".to_string())))
    }

    /// Write the stream's single usage record after its terminal event.
    pub fn finish_stream(
        &self,
        session: StreamSession,
        usage: TokenUsage,
        outcome: Outcome,
        error: Option<&GatewayError>,
    ) {
        let snapshot = self.snapshot();
        let cost = snapshot
            .price_table
            .rate(&session.provider, &session.model)
            .map_or(Decimal::ZERO, |p| {
                p.token_cost(usage.input_tokens, usage.output_tokens)
            });

        let ledger = self.keys.tenant_ledger(&session.tenant_record);
        ledger.reconcile(session.tenant_charge, usage.total(), cost);
        if let Some(record) = snapshot.upstream_key(&session.key) {
            self.keys
                .upstream_ledger(record)
                .reconcile(session.upstream_charge, usage.total(), cost);
        }
        self.keys
            .record_usage(&session.key, usage.input_tokens, usage.output_tokens, cost);

        if let Some(error) = error {
            let target = BreakerTarget {
                provider: session.provider.clone(),
                model: session.model.clone(),
            };
            self.breakers.on_failure(&target, false, error);
        }

        self.usage.record(UsageRecord {
            request_id: session.ctx.request_id.clone(),
            tenant: session.ctx.tenant.clone(),
            provider: Some(session.provider),
            model: Some(session.model),
            key: Some(session.key),
            kind: "chat-stream".to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost,
            outcome,
            latency_ms: session.ctx.accepted_at.elapsed().as_millis() as u64,
            started_at: session.started_at,
            finished_at: Utc::now(),
        });
    }
}

/// Substitute the routed model for the client's hint.
fn pin_model(req: &CanonicalRequest, model: &ModelId) -> CanonicalRequest {
    let mut req = req.clone();
    let hint = switchboard_core::ModelHint::new(model.as_str());
    match &mut req {
        CanonicalRequest::Chat(r) => r.model = hint,
        CanonicalRequest::Embed(r) => r.model = hint,
        CanonicalRequest::Image(r) => r.model = hint,
        CanonicalRequest::SpeechToText(r) => r.model = hint,
        CanonicalRequest::TextToSpeech(r) => r.model = hint,
    }
    req
}

/// Dispatch one canonical request through the matching capability trait.
async fn call_adapter(
    adapter: &dyn switchboard_core::adapter::ProviderAdapter,
    req: &CanonicalRequest,
    secret: &switchboard_types::Secret,
) -> Result<CanonicalResponse, GatewayError> {
    let unsupported =
        || GatewayError::no_candidate(format!("{} on {}", req.capability(), adapter.id()));
    match req {
        CanonicalRequest::Chat(r) => {
            let p = adapter.as_chat_provider().ok_or_else(unsupported)?;
            p.chat(r, secret).await.map(CanonicalResponse::Chat)
        }
        CanonicalRequest::Embed(r) => {
            let p = adapter.as_embed_provider().ok_or_else(unsupported)?;
            p.embed(r, secret).await.map(CanonicalResponse::Embed)
        }
        CanonicalRequest::Image(r) => {
            let p = adapter.as_image_provider().ok_or_else(unsupported)?;
            p.generate(r, secret).await.map(CanonicalResponse::Image)
        }
        CanonicalRequest::SpeechToText(r) => {
            let p = adapter.as_speech_to_text_provider().ok_or_else(unsupported)?;
            p.transcribe(r, secret)
                .await
                .map(CanonicalResponse::SpeechToText)
        }
        CanonicalRequest::TextToSpeech(r) => {
            let p = adapter.as_text_to_speech_provider().ok_or_else(unsupported)?;
            p.synthesize(r, secret)
                .await
                .map(CanonicalResponse::TextToSpeech)
        }
    }
}

/// Edge validation beyond what serde's `deny_unknown_fields` catches.
fn validate_request(req: &CanonicalRequest) -> Result<(), GatewayError> {
    match req {
        CanonicalRequest::Chat(c) => {
            if c.messages.is_empty() {
                return Err(GatewayError::validation("messages", "must not be empty"));
            }
            c.params
                .validate()
                .map_err(|(field, message)| GatewayError::validation(field, message))
        }
        CanonicalRequest::Embed(e) => {
            if e.input.is_empty() {
                return Err(GatewayError::validation("input", "must not be empty"));
            }
            Ok(())
        }
        CanonicalRequest::Image(i) => {
            if i.prompt.is_empty() {
                return Err(GatewayError::validation("prompt", "must not be empty"));
            }
            if i.count == 0 || i.count > 8 {
                return Err(GatewayError::validation("count", "must be 1..=8"));
            }
            Ok(())
        }
        CanonicalRequest::SpeechToText(s) => {
            if s.audio.is_empty() {
                return Err(GatewayError::validation("audio", "must not be empty"));
            }
            Ok(())
        }
        CanonicalRequest::TextToSpeech(t) => {
            if t.text.is_empty() {
                return Err(GatewayError::validation("text", "must not be empty"));
            }
            Ok(())
        }
    }
}

/// Estimated cost for quota pre-charge, from the cheapest eligible rate.
fn estimate_cost(
    snapshot: &ConfigSnapshot,
    req: &CanonicalRequest,
    hint: &RoutingHint,
) -> Decimal {
    let hint_model = req.model_hint();
    let rates = snapshot.providers.iter().flat_map(|p| {
        p.models
            .iter()
            .filter(|m| hint_model.is_auto() || m.id.as_str() == hint_model.as_str())
            .map(|m| &m.pricing)
    });
    rates
        .map(|p| p.token_cost(hint.estimated_input_tokens, OUTPUT_ESTIMATE))
        .min()
        .unwrap_or(Decimal::ZERO)
}

/// Actual cost of a served response.
fn response_cost(
    snapshot: &ConfigSnapshot,
    candidate: &crate::router::Candidate,
    req: &CanonicalRequest,
    response: &CanonicalResponse,
    usage: TokenUsage,
) -> Decimal {
    let Some(rate) = snapshot
        .price_table
        .rate(&candidate.provider, &candidate.model)
    else {
        return Decimal::ZERO;
    };
    match (req, response) {
        (CanonicalRequest::Image(i), _) => rate
            .per_image
            .map_or(Decimal::ZERO, |per| per * Decimal::from(i.count)),
        (_, CanonicalResponse::SpeechToText(t)) => {
            let tokens = rate.token_cost(usage.input_tokens, usage.output_tokens);
            let audio = match (rate.per_audio_second, t.duration_secs) {
                (Some(per), Some(secs)) => {
                    per * Decimal::try_from(secs).unwrap_or(Decimal::ZERO)
                }
                _ => Decimal::ZERO,
            };
            tokens + audio
        }
        _ => rate.token_cost(usage.input_tokens, usage.output_tokens),
    }
}
