//! HTTP surface: client data plane and operator control plane.
//!
//! The two planes bind separately and never share locks; the control plane
//! mutates configuration only through the snapshot-swap path.

pub mod control;
pub mod data;

use std::sync::Arc;

use crate::core::Gateway;
use switchboard_core::GatewayError;

/// Build the data-plane router.
#[must_use]
pub fn data_router(gateway: Arc<Gateway>) -> axum::Router {
    data::router(gateway)
}

/// Build the control-plane router.
#[must_use]
pub fn control_router(gateway: Arc<Gateway>) -> axum::Router {
    control::router(gateway)
}

/// Bind and serve both planes until shutdown.
///
/// # Errors
/// Surface bind failures as `internal.unexpected`.
pub async fn serve(gateway: Arc<Gateway>) -> Result<(), GatewayError> {
    let bind = gateway.snapshot().bind.clone();
    let data_addr = format!("{}:{}", bind.gateway_host, bind.gateway_port);
    let admin_addr = format!("{}:{}", bind.admin_host, bind.admin_port);

    let data_listener = tokio::net::TcpListener::bind(&data_addr)
        .await
        .map_err(|e| GatewayError::internal(format!("bind {data_addr}: {e}")))?;
    let admin_listener = tokio::net::TcpListener::bind(&admin_addr)
        .await
        .map_err(|e| GatewayError::internal(format!("bind {admin_addr}: {e}")))?;

    tracing::info!(data = %data_addr, admin = %admin_addr, "switchboard listening");

    let data_app = data_router(Arc::clone(&gateway));
    let admin_app = control_router(gateway);

    tokio::select! {
        r = axum::serve(data_listener, data_app) => {
            r.map_err(|e| GatewayError::internal(format!("data plane: {e}")))
        }
        r = axum::serve(admin_listener, admin_app) => {
            r.map_err(|e| GatewayError::internal(format!("control plane: {e}")))
        }
    }
}
