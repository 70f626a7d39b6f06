//! Gateway entry point: load config, wire components, serve both planes.

use std::sync::Arc;

use switchboard::{Gateway, GatewayBuilder, apply_env, parse_file, snapshot_from_file};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("switchboard=info,switchboard_middleware=info,tower_http=warn")
        }))
        .init();

    match boot().await {
        Ok(()) => {}
        Err(e) => {
            tracing::error!(error = %e, "gateway exited");
            std::process::exit(1);
        }
    }
}

async fn boot() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "switchboard.toml".to_string());
    let body = match tokio::fs::read_to_string(&path).await {
        Ok(body) => {
            tracing::info!(config = %path, "loaded configuration file");
            body
        }
        Err(e) => {
            tracing::warn!(config = %path, error = %e, "no config file; using defaults");
            String::new()
        }
    };

    let mut file = parse_file(&body)?;
    apply_env(&mut file, std::env::vars());
    let snapshot = snapshot_from_file(file)?;

    let gateway: Arc<Gateway> = GatewayBuilder::new(snapshot).build()?;

    #[cfg(unix)]
    spawn_reload_handler(Arc::clone(&gateway), path.clone());

    tokio::select! {
        r = switchboard::server::serve(gateway) => r.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}

/// SIGHUP re-reads the config file and publishes a fresh snapshot; requests
/// in flight keep the snapshot they captured.
#[cfg(unix)]
fn spawn_reload_handler(gateway: Arc<Gateway>, path: String) {
    tokio::spawn(async move {
        let Ok(mut hangup) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        else {
            return;
        };
        while hangup.recv().await.is_some() {
            let reload = async {
                let body = tokio::fs::read_to_string(&path).await.ok()?;
                let mut file = parse_file(&body).ok()?;
                apply_env(&mut file, std::env::vars());
                snapshot_from_file(file).ok()
            };
            match reload.await {
                Some(fresh) => match gateway.update_config(move |s| *s = fresh) {
                    Ok(snap) => {
                        tracing::info!(generation = snap.generation, "config reloaded");
                    }
                    Err(e) => tracing::warn!(error = %e, "config reload rejected"),
                },
                None => tracing::warn!(config = %path, "config reload failed to parse"),
            }
        }
    });
}
