mod common;

use std::sync::Arc;

use common::{TENANT_KEY, bed, bed_with};
use serde_json::{Value, json};
use switchboard_core::request::DecodingParams;

async fn spawn_data_plane(bed: &common::TestBed) -> String {
    let app = switchboard::server::data_router(Arc::clone(&bed.gateway));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_control_plane(bed: &common::TestBed) -> String {
    let app = switchboard::server::control_router(Arc::clone(&bed.gateway));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// S1: no x-api-key → 401 with the auth.missing envelope and a request id.
#[tokio::test(flavor = "multi_thread")]
async fn missing_api_key_is_401_auth_missing() {
    let bed = bed();
    let base = spawn_data_plane(&bed).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/ai/chat/completions"))
        .json(&json!({"model": "auto", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 401);
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "auth.missing");
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_completion_carries_gateway_headers() {
    let bed = bed();
    let base = spawn_data_plane(&bed).await;
    let client = reqwest::Client::new();

    let send = || {
        client
            .post(format!("{base}/api/v1/ai/chat/completions"))
            .header("x-api-key", TENANT_KEY)
            .header("x-trace-id", "trace-123")
            .json(&json!({
                "model": "auto",
                "messages": [{"role": "user", "content": "what is 2+2?"}],
            }))
            .send()
    };

    let first = send().await.unwrap();
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(first.headers()["x-cache-status"], "MISS");
    assert_eq!(first.headers()["x-trace-id"], "trace-123");
    assert!(first.headers().contains_key("x-ai-provider"));
    assert!(first.headers().contains_key("x-ai-model"));
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert!(body["usage"]["total_tokens"].as_u64().unwrap() > 0);

    // Identical request within TTL: HIT with the identical payload.
    let second = send().await.unwrap();
    assert_eq!(second.headers()["x-cache-status"], "HIT");
    let body2: Value = second.json().await.unwrap();
    assert_eq!(body2["choices"], body["choices"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_body_fields_are_rejected() {
    let bed = bed();
    let base = spawn_data_plane(&bed).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/ai/chat/completions"))
        .header("x-api-key", TENANT_KEY)
        .json(&json!({
            "model": "auto",
            "messages": [{"role": "user", "content": "hi"}],
            "frequency_penalty": 1.5,
        }))
        .send()
        .await
        .unwrap();
    // Strict edge: unknown fields never silently carry through.
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation.invalid");
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_delivers_deltas_and_sentinel() {
    let bed = bed();
    let base = spawn_data_plane(&bed).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/v1/ai/chat/completions"))
        .header("x-api-key", TENANT_KEY)
        .json(&json!({
            "model": "auto",
            "messages": [{"role": "user", "content": "stream it"}],
            "stream": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let text = resp.text().await.unwrap();
    assert!(text.contains("\"delta\""));
    assert!(text.contains("\"usage\""));
    assert!(text.contains("\"done\""));
    assert!(text.contains("[DONE]"));
}

#[tokio::test(flavor = "multi_thread")]
async fn presets_and_templates_resolve_at_the_edge() {
    let bed = bed_with(|file| {
        file.presets.insert(
            "coding".to_string(),
            DecodingParams {
                temperature: Some(0.1),
                ..DecodingParams::default()
            },
        );
        file.templates.insert(
            "support.greeting".to_string(),
            "Greet {{name}} politely.".to_string(),
        );
    });
    let base = spawn_data_plane(&bed).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/v1/ai/chat/completions"))
        .header("x-api-key", TENANT_KEY)
        .json(&json!({
            "model": "auto",
            "messages": [],
            "parameter_preset": "coding",
            "prompt_template": "support.greeting",
            "template_variables": {"name": "Ada"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    // The rendered template became the user message the mock echoes back.
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("Greet Ada politely."), "got: {content}");

    let unknown = client
        .post(format!("{base}/api/v1/ai/chat/completions"))
        .header("x-api-key", TENANT_KEY)
        .json(&json!({
            "model": "auto",
            "messages": [{"role": "user", "content": "hi"}],
            "parameter_preset": "nonexistent",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 400);
    let body: Value = unknown.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation.invalid");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_generation_and_subsystems() {
    let bed = bed();
    let base = spawn_control_plane(&bed).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["generation"], 1);
    assert!(body["data"]["subsystems"].is_object());
}

#[tokio::test(flavor = "multi_thread")]
async fn strategy_activation_bumps_generation() {
    let bed = bed();
    let base = spawn_control_plane(&bed).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/intelligent-routing/strategy"))
        .json(&json!({"strategy": "cost_first"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["active"], "cost_first");
    assert_eq!(body["data"]["generation"], 2);

    let strategies: Value = client
        .get(format!("{base}/intelligent-routing/strategies"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(strategies["data"]["active"], "cost_first");

    let bad = client
        .post(format!("{base}/intelligent-routing/strategy"))
        .json(&json!({"strategy": "vibes_first"}))
        .send()
        .await
        .unwrap();
    let body: Value = bad.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn key_lifecycle_via_control_plane() {
    let bed = bed();
    let base = spawn_control_plane(&bed).await;
    let client = reqwest::Client::new();

    let listed: Value = client
        .get(format!("{base}/api-keys"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let keys = listed["data"]["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    let alpha_key = keys
        .iter()
        .find(|k| k["provider"] == "alpha")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let disabled: Value = client
        .put(format!("{base}/api-keys/alpha/{alpha_key}/disable"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(disabled["data"]["status"], "disabled");

    // Disabled keys disappear from selection.
    let preview: Value = client
        .get(format!("{base}/api-keys/select/alpha"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(preview["success"], false);

    let enabled: Value = client
        .put(format!("{base}/api-keys/alpha/{alpha_key}/enable"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(enabled["data"]["status"], "active");
}
