// src/server/mod.rs

//! HTTP surface: the `/api/socket` event stream and a health probe.

pub mod protocol;
pub mod socket;

use std::future::Future;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::errors::Result;
use crate::supervisor::Supervisor;

#[derive(Debug, Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
}

pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/api/socket", get(socket::websocket_handler))
        .route("/healthz", get(healthz))
        .with_state(AppState { supervisor })
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, supervisor: Supervisor, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, router(supervisor))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}
