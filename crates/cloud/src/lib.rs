// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glasshub: connection and routing core for a smart-glasses cloud.
//!
//! Glasses stream sensor data over one WebSocket per user; third-party
//! apps (TPAs) hold their own WebSockets with subscription-based
//! routing between the two populations. External engines (catalog,
//! speech, display, …) are injected as [`services::Services`].

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod routing;
pub mod services;
pub mod session;
pub mod state;
#[cfg(test)]
pub mod test_support;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CloudConfig;
use crate::services::Services;
use crate::state::CloudState;
use crate::transport::build_router;

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    static CRYPTO_INIT: std::sync::Once = std::sync::Once::new();
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Run the cloud core until shutdown.
pub async fn run(config: CloudConfig, services: Services) -> anyhow::Result<()> {
    ensure_crypto();

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let state = CloudState::new(config, services, shutdown.clone());

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("glasshub listening on {addr}");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
