// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /tpa-ws` — the TPA-side upgrade path.
//!
//! Socket states: uninitialized → awaiting init → active →
//! reconnect-grace → terminal. Auth rides on the first frame
//! (`tpa_connection_init`); a bad key or unknown session closes with
//! 1008. Binary frames from TPAs are dropped with a warning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;

use crate::lifecycle;
use crate::protocol::{frame_type, TpaConnectionInit, TpaFrame, CLOSE_AUTH_FAILURE};
use crate::routing;
use crate::session::connection::ConnectionHandle;
use crate::session::heartbeat::ConnKind;
use crate::state::CloudState;
use crate::transport::run_writer;

/// How long a fresh socket may sit uninitialized.
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn handler(
    State(state): State<Arc<CloudState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_tpa(socket, state, addr))
}

async fn handle_tpa(socket: WebSocket, state: Arc<CloudState>, addr: SocketAddr) {
    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::pair();
    let writer = tokio::spawn(run_writer(sink, rx, handle.cancellation()));

    // Await the init frame.
    let init = match tokio::time::timeout(INIT_TIMEOUT, read_init(&mut stream)).await {
        Ok(Some(init)) => init,
        Ok(None) | Err(_) => {
            tracing::warn!(peer = %addr, "TPA socket closed or timed out before init");
            handle.send_frame(&TpaFrame::ConnectionError {
                message: "expected tpa_connection_init".to_owned(),
            });
            handle.close(CLOSE_AUTH_FAILURE, "init required");
            let _ = writer.await;
            return;
        }
    };

    let session =
        match lifecycle::admit_tpa(&state, &init, handle.clone(), Some(addr.ip())).await {
            Ok(session) => session,
            Err(e) => {
                handle.send_frame(&TpaFrame::ConnectionError {
                    message: format!("connection rejected: {e}"),
                });
                handle.close(e.close_code().unwrap_or(CLOSE_AUTH_FAILURE), "authentication failed");
                let _ = writer.await;
                return;
            }
        };

    let package_name = init.package_name.clone();
    let conn_id = handle.id();
    let cancel = handle.cancellation();

    let mut close_code: Option<u16> = None;
    let mut close_reason = String::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    session.heartbeat.on_activity(ConnKind::Tpa, conn_id, text.len());
                    routing::handle_tpa_text(&state, &session, &package_name, &text).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::warn!(
                        user_id = %session.user_id,
                        package_name,
                        bytes = data.len(),
                        "binary frame on TPA socket dropped"
                    );
                }
                Some(Ok(Message::Pong(payload))) => {
                    session.heartbeat.on_pong(ConnKind::Tpa, conn_id, &payload);
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        close_code = Some(frame.code);
                        close_reason = frame.reason.to_string();
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(package_name, err = %e, "TPA socket error");
                    break;
                }
                None => break,
            }
        }
    }

    let record = session.heartbeat.capture_disconnect(
        ConnKind::Tpa,
        conn_id,
        close_code,
        &close_reason,
        handle.is_explicit_stop(),
    );
    if let Some(record) = &record {
        tracing::info!(
            user_id = %session.user_id,
            package_name,
            reason = record.reason.as_str(),
            code = record.code,
            uptime_ms = record.uptime.as_millis() as u64,
            "TPA connection closed"
        );
    }

    lifecycle::handle_tpa_disconnect(&state, &session, &package_name, conn_id, record).await;

    handle.terminate();
    let _ = writer.await;
}

/// Read frames until the init message arrives. Anything else on an
/// uninitialized socket is a protocol error.
async fn read_init(stream: &mut SplitStream<WebSocket>) -> Option<TpaConnectionInit> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).ok()?;
                if frame_type(&value) != Some("tpa_connection_init") {
                    return None;
                }
                return serde_json::from_value(value).ok();
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {} // ignore control frames before init
        }
    }
}
