//! Operator control plane.
//!
//! JSON surface on a separate bind. Every response uses the
//! `{success, data?, error?}` envelope; writes are idempotent where the
//! operation allows (disable/enable are PUTs that converge). Configuration
//! mutations go through the snapshot-swap path only.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;

use crate::core::Gateway;
use switchboard_core::analyzer::analyze;
use switchboard_core::request::{
    CanonicalRequest, ChatMessage, ChatRequest, DecodingParams, ModelHint, Role,
};
use switchboard_core::stream::StreamEvent;
use switchboard_core::{GatewayError, fingerprint};
use switchboard_types::{
    KeyId, KeyStatus, ProviderId, RouterStrategy, SealedSecret, Secret, SelectionStrategy,
    TenantId, TenantKeyRecord,
};

/// Build the control-plane router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/api-keys", get(list_keys).post(create_key))
        .route("/api-keys/select/:provider", get(preview_selection))
        .route("/api-keys/:provider/:id/rotate", put(rotate_key))
        .route("/api-keys/:provider/:id/disable", put(disable_key))
        .route("/api-keys/:provider/:id/enable", put(enable_key))
        .route("/api-keys/:provider/:id", delete(delete_key))
        .route("/intelligent-routing/strategies", get(list_strategies))
        .route("/intelligent-routing/strategy", post(activate_strategy))
        .route("/intelligent-routing/route", post(route_once))
        .route("/prices/current", get(prices_current))
        .route("/prices/history/:provider/:model", get(prices_history))
        .route("/prices/alerts", get(prices_alerts))
        .route("/prices/optimal-route", get(prices_optimal))
        .route("/streaming/streams", get(list_streams))
        .route("/streaming/connections", get(list_connections))
        .route("/streaming/streams/:id/send", post(send_to_stream))
        .route("/streaming/streams/:id", delete(close_stream))
        .route("/streaming/broadcast", post(broadcast))
        .route("/config/export", get(config_export))
        .route("/analytics/stats", get(analytics_stats))
        .route("/analytics/users", get(analytics_users))
        .route("/analytics/providers", get(analytics_providers))
        .route("/analytics/performance", get(analytics_performance))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

fn ok(data: Value) -> Response {
    (StatusCode::OK, axum::Json(json!({"success": true, "data": data}))).into_response()
}

fn fail(error: &GatewayError) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": {"code": error.code(), "message": error.to_string()},
        })),
    )
        .into_response()
}

fn key_summary(gateway: &Gateway, record: &switchboard_types::UpstreamKeyRecord) -> Value {
    let usage = gateway.keys().usage_totals(&record.id);
    json!({
        "id": record.id,
        "provider": record.provider,
        "status": record.status,
        "label": record.label,
        "created_at": record.created_at,
        "last_used_at": record.last_used_at,
        "usage": usage,
        "in_flight": gateway.keys().in_flight(&record.id),
        "minute_requests": gateway.keys().minute_requests(&record.id),
    })
}

async fn list_keys(State(gateway): State<Arc<Gateway>>) -> Response {
    let snapshot = gateway.snapshot();
    let keys: Vec<Value> = snapshot
        .upstream_keys
        .iter()
        .map(|k| key_summary(&gateway, k))
        .collect();
    ok(json!({"keys": keys}))
}

#[derive(Deserialize)]
struct CreateKeyBody {
    provider: String,
    key: Secret,
    name: Option<String>,
}

async fn create_key(
    State(gateway): State<Arc<Gateway>>,
    axum::Json(body): axum::Json<CreateKeyBody>,
) -> Response {
    let result = gateway.update_config(|snap| {
        let sealed = match SealedSecret::seal(&body.key, snap.secrets_key.expose()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let id = KeyId::new(format!("uk-{}", uuid::Uuid::new_v4()));
        snap.upstream_keys.push(switchboard_types::UpstreamKeyRecord {
            id,
            provider: ProviderId::new(body.provider.clone()),
            secret: sealed,
            status: KeyStatus::Active,
            label: body.name.clone(),
            created_at: Utc::now(),
            last_used_at: None,
            quotas: switchboard_types::QuotaLimits::default(),
            usage: switchboard_types::UsageTotals::default(),
            rotation: None,
        });
    });
    match result {
        Ok(snap) => {
            let created = snap.upstream_keys.last().map(|k| key_summary(&gateway, k));
            ok(json!({"created": created, "generation": snap.generation}))
        }
        Err(e) => fail(&e),
    }
}

fn set_key_status(
    gateway: &Gateway,
    provider: &str,
    id: &str,
    status: KeyStatus,
) -> Result<Value, GatewayError> {
    let provider = ProviderId::new(provider);
    let id = KeyId::new(id);
    let snap = gateway.update_config(|snap| {
        if let Some(k) = snap
            .upstream_keys
            .iter_mut()
            .find(|k| k.id == id && k.provider == provider)
        {
            k.status = status;
        }
    })?;
    match snap.upstream_key(&id) {
        Some(k) => Ok(json!({"id": k.id, "status": k.status, "generation": snap.generation})),
        None => Err(GatewayError::validation("id", format!("unknown key {id}"))),
    }
}

async fn disable_key(
    State(gateway): State<Arc<Gateway>>,
    Path((provider, id)): Path<(String, String)>,
) -> Response {
    match set_key_status(&gateway, &provider, &id, KeyStatus::Disabled) {
        Ok(v) => ok(v),
        Err(e) => fail(&e),
    }
}

async fn enable_key(
    State(gateway): State<Arc<Gateway>>,
    Path((provider, id)): Path<(String, String)>,
) -> Response {
    match set_key_status(&gateway, &provider, &id, KeyStatus::Active) {
        Ok(v) => ok(v),
        Err(e) => fail(&e),
    }
}

#[derive(Deserialize)]
struct RotateBody {
    key: Secret,
}

async fn rotate_key(
    State(gateway): State<Arc<Gateway>>,
    Path((provider, id)): Path<(String, String)>,
    axum::Json(body): axum::Json<RotateBody>,
) -> Response {
    let provider = ProviderId::new(provider);
    let old_id = KeyId::new(id);
    let new_id = KeyId::new(format!("uk-{}", uuid::Uuid::new_v4()));
    let new_id_for_closure = new_id.clone();
    let result = gateway.update_config(move |snap| {
        let Ok(sealed) = SealedSecret::seal(&body.key, snap.secrets_key.expose()) else {
            return;
        };
        let Some(old) = snap
            .upstream_keys
            .iter_mut()
            .find(|k| k.id == old_id && k.provider == provider)
        else {
            return;
        };
        // Old key enters its grace window: disabled for selection, usable by
        // requests already holding its opened secret.
        old.status = KeyStatus::Disabled;
        let label = old.label.clone();
        let quotas = old.quotas.clone();
        let provider = old.provider.clone();
        snap.upstream_keys.push(switchboard_types::UpstreamKeyRecord {
            id: new_id_for_closure,
            provider,
            secret: sealed,
            status: KeyStatus::Active,
            label,
            created_at: Utc::now(),
            last_used_at: None,
            quotas,
            usage: switchboard_types::UsageTotals::default(),
            rotation: None,
        });
    });
    match result {
        Ok(snap) => match snap.upstream_key(&new_id) {
            Some(k) => ok(json!({"rotated_to": k.id, "generation": snap.generation})),
            None => fail(&GatewayError::validation("id", "unknown key")),
        },
        Err(e) => fail(&e),
    }
}

async fn delete_key(
    State(gateway): State<Arc<Gateway>>,
    Path((provider, id)): Path<(String, String)>,
) -> Response {
    let provider = ProviderId::new(provider);
    let id = KeyId::new(id);
    // Deletion fails while any in-flight request still references the key.
    let in_flight = gateway.keys().in_flight(&id);
    if in_flight > 0 {
        return fail(&GatewayError::validation(
            "id",
            format!("key {id} has {in_flight} in-flight requests"),
        ));
    }
    let result = gateway.update_config(|snap| {
        snap.upstream_keys
            .retain(|k| !(k.id == id && k.provider == provider));
    });
    match result {
        Ok(snap) => ok(json!({"deleted": true, "generation": snap.generation})),
        Err(e) => fail(&e),
    }
}

#[derive(Deserialize)]
struct SelectQuery {
    strategy: Option<String>,
}

async fn preview_selection(
    State(gateway): State<Arc<Gateway>>,
    Path(provider): Path<String>,
    Query(q): Query<SelectQuery>,
) -> Response {
    let snapshot = gateway.snapshot();
    let strategy = q
        .strategy
        .as_deref()
        .and_then(SelectionStrategy::parse)
        .unwrap_or(snapshot.selection);
    match gateway
        .keys()
        .select_upstream(&snapshot, &ProviderId::new(provider), strategy)
    {
        Ok(selected) => ok(json!({
            "selected": selected.record.id,
            "strategy": strategy.as_str(),
            "minute_requests": gateway.keys().minute_requests(&selected.record.id),
        })),
        Err(e) => fail(&e),
    }
}

async fn list_strategies(State(gateway): State<Arc<Gateway>>) -> Response {
    let active = gateway.snapshot().strategy;
    ok(json!({
        "strategies": RouterStrategy::all().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "active": active.as_str(),
    }))
}

#[derive(Deserialize)]
struct StrategyBody {
    strategy: String,
}

async fn activate_strategy(
    State(gateway): State<Arc<Gateway>>,
    axum::Json(body): axum::Json<StrategyBody>,
) -> Response {
    let Some(strategy) = RouterStrategy::parse(&body.strategy) else {
        return fail(&GatewayError::validation(
            "strategy",
            format!("unknown strategy {}", body.strategy),
        ));
    };
    match gateway.update_config(|snap| snap.strategy = strategy) {
        Ok(snap) => ok(json!({"active": strategy.as_str(), "generation": snap.generation})),
        Err(e) => fail(&e),
    }
}

#[derive(Deserialize)]
struct RouteBody {
    model: Option<String>,
    message: Option<String>,
}

async fn route_once(
    State(gateway): State<Arc<Gateway>>,
    axum::Json(body): axum::Json<RouteBody>,
) -> Response {
    let snapshot = gateway.snapshot();
    let req = CanonicalRequest::Chat(ChatRequest {
        model: body.model.map_or_else(ModelHint::auto, ModelHint::new),
        messages: vec![ChatMessage::new(
            Role::User,
            body.message.unwrap_or_else(|| "routing probe".to_string()),
        )],
        params: DecodingParams::default(),
        stream: false,
    });
    let hint = analyze(&req, &snapshot.analyzer);
    // One-shot decisions run under a permissive synthetic tenant.
    let tenant = TenantKeyRecord {
        id: KeyId::new("control-plane"),
        hash: String::new(),
        tenant: TenantId::new("control-plane"),
        permissions: switchboard_types::PermissionSet::default(),
        quotas: switchboard_types::QuotaLimits::default(),
        prefs: switchboard_types::TenantPreferences::default(),
        created_at: Utc::now(),
    };
    let fp = fingerprint(&req);
    let result = gateway.router.route(
        &snapshot,
        &gateway.adapters_view(),
        gateway.keys(),
        gateway.breakers(),
        &gateway.usage().stats_snapshot(),
        &req,
        &hint,
        &tenant,
        &fp,
    );
    match result {
        Ok(decision) => ok(json!({
            "decision": &*decision,
            "hint": hint,
        })),
        Err(e) => fail(&e),
    }
}

async fn prices_current(State(gateway): State<Arc<Gateway>>) -> Response {
    let table = gateway.snapshot().price_table.clone();
    ok(json!(table))
}

async fn prices_history(
    State(gateway): State<Arc<Gateway>>,
    Path((provider, model)): Path<(String, String)>,
) -> Response {
    let provider = ProviderId::new(provider);
    let model = switchboard_types::ModelId::new(model);
    let snapshot = gateway.snapshot();
    let current = snapshot.price_table.rate(&provider, &model);
    let changes: Vec<Value> = gateway
        .usage()
        .price_alerts()
        .into_iter()
        .filter(|a| a.change.provider == provider && a.change.model == model)
        .map(|a| json!(a))
        .collect();
    ok(json!({
        "current": current,
        "version": snapshot.price_table.version,
        "changes": changes,
    }))
}

async fn prices_alerts(State(gateway): State<Arc<Gateway>>) -> Response {
    ok(json!({"alerts": gateway.usage().price_alerts()}))
}

async fn prices_optimal(State(gateway): State<Arc<Gateway>>) -> Response {
    let snapshot = gateway.snapshot();
    // Cheapest chat-capable target by blended per-1K rate.
    let best = snapshot
        .providers
        .iter()
        .flat_map(|p| p.models.iter().map(move |m| (p, m)))
        .min_by_key(|(_, m)| m.pricing.input_per_1k + m.pricing.output_per_1k);
    match best {
        Some((p, m)) => ok(json!({
            "provider": p.id,
            "model": m.id,
            "input_per_1k": m.pricing.input_per_1k,
            "output_per_1k": m.pricing.output_per_1k,
        })),
        None => fail(&GatewayError::no_candidate("chat".to_string())),
    }
}

async fn list_streams(State(gateway): State<Arc<Gateway>>) -> Response {
    ok(json!({"streams": gateway.hub().list()}))
}

async fn list_connections(State(gateway): State<Arc<Gateway>>) -> Response {
    let counts = gateway.hub().connection_counts();
    ok(json!({
        "connections": counts
            .iter()
            .map(|(t, n)| json!({"tenant": t, "open_streams": n}))
            .collect::<Vec<_>>(),
    }))
}

#[derive(Deserialize)]
struct SendBody {
    text: String,
}

async fn send_to_stream(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<SendBody>,
) -> Response {
    let delivered = gateway
        .hub()
        .send(&id, StreamEvent::Delta { text: body.text });
    if delivered {
        ok(json!({"delivered": true}))
    } else {
        fail(&GatewayError::validation(
            "id",
            format!("stream {id} not found or backlogged"),
        ))
    }
}

#[derive(Deserialize)]
struct BroadcastBody {
    text: String,
    /// Restrict delivery to one tenant's streams; all streams when absent.
    tenant: Option<String>,
}

async fn broadcast(
    State(gateway): State<Arc<Gateway>>,
    axum::Json(body): axum::Json<BroadcastBody>,
) -> Response {
    let tenant = body.tenant.map(TenantId::new);
    let delivered = gateway.hub().broadcast(
        &StreamEvent::Delta { text: body.text },
        tenant.as_ref(),
    );
    ok(json!({"delivered": delivered}))
}

async fn close_stream(State(gateway): State<Arc<Gateway>>, Path(id): Path<String>) -> Response {
    if gateway.hub().close(&id) {
        ok(json!({"closed": true}))
    } else {
        fail(&GatewayError::validation("id", format!("unknown stream {id}")))
    }
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default)]
    reveal: bool,
}

/// Export the running configuration. Upstream secrets stay masked unless
/// the caller explicitly opts in with `?reveal=true`.
async fn config_export(
    State(gateway): State<Arc<Gateway>>,
    Query(q): Query<ExportQuery>,
) -> Response {
    let snapshot = gateway.snapshot();
    let keys: Vec<Value> = snapshot
        .upstream_keys
        .iter()
        .map(|k| {
            let secret = if q.reveal {
                k.secret
                    .open(snapshot.secrets_key.expose())
                    .map_or_else(|_| "<unopenable>".to_string(), |s| s.expose().to_string())
            } else {
                "********".to_string()
            };
            json!({
                "id": k.id,
                "provider": k.provider,
                "status": k.status,
                "label": k.label,
                "secret": secret,
                "quotas": k.quotas,
            })
        })
        .collect();
    ok(json!({
        "generation": snapshot.generation,
        "strategy": snapshot.strategy.as_str(),
        "selection": snapshot.selection.as_str(),
        "providers": snapshot.providers,
        "upstream_keys": keys,
        "tenant_keys": snapshot.tenant_keys,
        "cache": snapshot.cache,
        "breaker": snapshot.breaker,
        "retry": snapshot.retry,
        "timeouts": snapshot.timeouts,
        "limits": snapshot.limits,
    }))
}

async fn analytics_stats(State(gateway): State<Arc<Gateway>>) -> Response {
    ok(gateway.usage().aggregates())
}

async fn analytics_users(State(gateway): State<Arc<Gateway>>) -> Response {
    let all = gateway.usage().aggregates();
    ok(json!({"tenants": all.get("tenants")}))
}

async fn analytics_providers(State(gateway): State<Arc<Gateway>>) -> Response {
    let all = gateway.usage().aggregates();
    ok(json!({"providers": all.get("providers")}))
}

async fn analytics_performance(State(gateway): State<Arc<Gateway>>) -> Response {
    let snapshot = gateway.snapshot();
    let stats = gateway.usage().stats_snapshot();
    let per_target: Vec<Value> = snapshot
        .providers
        .iter()
        .flat_map(|p| {
            let stats = &stats;
            p.models.iter().map(move |m| {
                let t = stats.target(&p.id, &m.id);
                json!({
                    "provider": p.id,
                    "model": m.id,
                    "requests": t.requests,
                    "error_rate": t.error_rate,
                    "p50_latency_ms": t.p50_latency_ms,
                })
            })
        })
        .collect();
    ok(json!({"targets": per_target}))
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    let snapshot = gateway.snapshot();
    let breakers = gateway.breakers().snapshot();
    ok(json!({
        "status": "ok",
        "generation": snapshot.generation,
        "strategy": snapshot.strategy.as_str(),
        "providers": snapshot.providers.len(),
        "subsystems": {
            "cache_entries": gateway.cache_entries(),
            "open_streams": gateway.hub().list().len(),
            "breakers": breakers,
        },
    }))
}
