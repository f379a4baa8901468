// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket front-end: upgrade endpoints for both populations plus a
//! liveness route.

pub mod auth;
pub mod glasses_ws;
pub mod tpa_ws;

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::session::connection::Outbound;
use crate::state::CloudState;

/// Build the axum `Router` with both upgrade paths.
pub fn build_router(state: Arc<CloudState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/glasses-ws", get(glasses_ws::handler))
        .route("/tpa-ws", get(tpa_ws::handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /health` — liveness plus session count.
async fn health(State(state): State<Arc<CloudState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.len().await,
    }))
}

/// Writer task: drain a connection's outbound channel into the socket.
/// A queued close frame, a terminated handle, or a dead socket ends the
/// task; stale session references may outlive it.
pub(crate) async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: tokio_util::sync::CancellationToken,
) {
    loop {
        let out = tokio::select! {
            _ = cancel.cancelled() => break,
            out = rx.recv() => match out {
                Some(out) => out,
                None => break,
            },
        };
        let result = match out {
            Outbound::Text(json) => sink.send(Message::Text(json.into())).await,
            Outbound::Binary(data) => sink.send(Message::Binary(data)).await,
            Outbound::Ping(payload) => sink.send(Message::Ping(payload)).await,
            Outbound::Close { code, reason } => {
                let frame = CloseFrame { code, reason: reason.into() };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}
