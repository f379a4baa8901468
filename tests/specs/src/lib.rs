// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests.
//!
//! Boots the cloud core in-process on an ephemeral port with in-memory
//! collaborators, and drives it over real WebSockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use glasshub::config::CloudConfig;
use glasshub::services::{AppDescriptor, Permission, Services, StaticCatalog, StaticTokens};
use glasshub::state::CloudState;
use glasshub::transport::build_router;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const API_KEY: &str = "spec-api-key";
pub const TOKEN: &str = "tok-u1";
pub const USER: &str = "u1";

/// A running in-process cloud core.
pub struct TestCloud {
    pub addr: SocketAddr,
    pub state: Arc<CloudState>,
    shutdown: CancellationToken,
}

impl TestCloud {
    /// Start with the given apps in the catalog and `tok-u1` → `u1`
    /// token mapping.
    pub async fn start(apps: Vec<AppDescriptor>) -> anyhow::Result<Self> {
        Self::start_with(apps, CloudConfig::default()).await
    }

    pub async fn start_with(
        apps: Vec<AppDescriptor>,
        config: CloudConfig,
    ) -> anyhow::Result<Self> {
        glasshub::ensure_crypto();

        let mut catalog = StaticCatalog::default();
        for app in apps {
            catalog = catalog.with_app(app, API_KEY);
        }
        let mut services = Services::noop();
        services.catalog = Arc::new(catalog);
        services.tokens = Arc::new(StaticTokens::default().with_token(TOKEN, USER));

        let shutdown = CancellationToken::new();
        let state = CloudState::new(config, services, shutdown.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(Arc::clone(&state));
        let serve_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(serve_shutdown.cancelled_owned())
            .await;
        });

        Ok(Self { addr, state, shutdown })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn glasses_url(&self, token: &str) -> String {
        format!("ws://{}/glasses-ws?token={token}", self.addr)
    }

    pub fn tpa_url(&self) -> String {
        format!("ws://{}/tpa-ws", self.addr)
    }

    /// Open the glasses socket and consume the `connection_ack`.
    pub async fn connect_glasses(&self) -> anyhow::Result<WsStream> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.glasses_url(TOKEN)).await?;
        let ack = next_json(&mut ws, Duration::from_secs(5)).await?;
        anyhow::ensure!(ack["type"] == "connection_ack", "expected connection_ack, got {ack}");
        Ok(ws)
    }

    /// Open a TPA socket, run the init handshake, and consume the ack.
    pub async fn connect_tpa(&self, package_name: &str) -> anyhow::Result<WsStream> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.tpa_url()).await?;
        send_json(
            &mut ws,
            &serde_json::json!({
                "type": "tpa_connection_init",
                "sessionId": format!("{USER}-{package_name}"),
                "packageName": package_name,
                "apiKey": API_KEY,
            }),
        )
        .await?;
        let ack = next_json(&mut ws, Duration::from_secs(5)).await?;
        anyhow::ensure!(
            ack["type"] == "tpa_connection_ack",
            "expected tpa_connection_ack, got {ack}"
        );
        Ok(ws)
    }
}

impl Drop for TestCloud {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A catalog entry for a spec app.
pub fn spec_app(package_name: &str, permissions: &[Permission], public_url: &str) -> AppDescriptor {
    AppDescriptor {
        package_name: package_name.to_owned(),
        name: package_name.to_owned(),
        public_url: public_url.to_owned(),
        is_system_app: false,
        permissions: permissions.to_vec(),
    }
}

/// Send a JSON frame.
pub async fn send_json(ws: &mut WsStream, value: &Value) -> anyhow::Result<()> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

/// Receive the next text frame as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsStream, timeout: Duration) -> anyhow::Result<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))?;
        match msg? {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Close(frame) => {
                anyhow::bail!("socket closed: {frame:?}")
            }
            _ => {}
        }
    }
}

/// Receive frames until one of the given type arrives.
pub async fn next_json_of(
    ws: &mut WsStream,
    kind: &str,
    timeout: Duration,
) -> anyhow::Result<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        anyhow::ensure!(!remaining.is_zero(), "timed out waiting for {kind}");
        let value = next_json(ws, remaining).await?;
        if value["type"] == kind {
            return Ok(value);
        }
    }
}

/// Receive the next binary frame, skipping everything else.
pub async fn next_binary(ws: &mut WsStream, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for binary frame"))?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))?;
        if let Message::Binary(data) = msg? {
            return Ok(data.to_vec());
        }
    }
}

/// Wait for the close frame and return its code, answering pings along
/// the way.
pub async fn await_close(ws: &mut WsStream, timeout: Duration) -> anyhow::Result<Option<u16>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?;
        match msg {
            Some(Ok(Message::Close(frame))) => {
                return Ok(frame.map(|f| u16::from(f.code)));
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return Ok(None),
        }
    }
}

/// Spawn a fake TPA backend that records webhook payloads.
pub async fn spawn_backend() -> anyhow::Result<(String, mpsc::UnboundedReceiver<Value>)> {
    use axum::routing::post;
    use axum::{Json, Router};

    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new().route(
        "/webhook",
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
                Json(serde_json::json!({ "status": "ok" }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, rx))
}
