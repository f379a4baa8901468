// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /glasses-ws` — the glasses-side upgrade path.
//!
//! The Bearer token (header or `?token=`) must resolve to a user
//! identity; failures are reported in-band with `auth_error` and close
//! code 1008 so device firmware sees a structured rejection rather
//! than a refused upgrade.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::protocol::{GlassesFrame, CLOSE_AUTH_FAILURE};
use crate::routing;
use crate::session::connection::ConnectionHandle;
use crate::session::heartbeat::ConnKind;
use crate::session::registry;
use crate::state::CloudState;
use crate::transport::{auth, run_writer};

#[derive(Debug, Clone, Deserialize)]
pub struct GlassesWsQuery {
    pub token: Option<String>,
}

pub async fn handler(
    State(state): State<Arc<CloudState>>,
    Query(query): Query<GlassesWsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = auth::bearer_token(&headers).or(query.token);
    ws.on_upgrade(move |socket| handle_glasses(socket, state, token))
}

async fn handle_glasses(socket: WebSocket, state: Arc<CloudState>, token: Option<String>) {
    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::pair();
    let writer = tokio::spawn(run_writer(sink, rx, handle.cancellation()));

    let user_id = token.as_deref().and_then(|t| state.services.tokens.verify(t));
    let Some(user_id) = user_id else {
        tracing::warn!("glasses upgrade with missing or invalid token");
        handle.send_frame(&GlassesFrame::AuthError {
            message: "invalid or missing token".to_owned(),
        });
        handle.close(CLOSE_AUTH_FAILURE, "authentication failed");
        let _ = writer.await;
        return;
    };

    let session = registry::connect_glasses(&state, &user_id, handle.clone()).await;
    let conn_id = handle.id();
    let cancel = handle.cancellation();

    let mut close_code: Option<u16> = None;
    let mut close_reason = String::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    session.heartbeat.on_activity(ConnKind::Glasses, conn_id, text.len());
                    routing::handle_glasses_text(&state, &session, &text).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    session.heartbeat.on_activity(ConnKind::Glasses, conn_id, data.len());
                    routing::handle_glasses_binary(&state, &session, data).await;
                }
                Some(Ok(Message::Pong(payload))) => {
                    session.heartbeat.on_pong(ConnKind::Glasses, conn_id, &payload);
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        close_code = Some(frame.code);
                        close_reason = frame.reason.to_string();
                    }
                    break;
                }
                Some(Ok(_)) => {} // pings answered by the stack
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user_id, err = %e, "glasses socket error");
                    break;
                }
                None => break,
            }
        }
    }

    let record =
        session.heartbeat.capture_disconnect(ConnKind::Glasses, conn_id, close_code, &close_reason, false);
    if let Some(record) = &record {
        tracing::info!(
            user_id = %user_id,
            reason = record.reason.as_str(),
            code = record.code,
            uptime_ms = record.uptime.as_millis() as u64,
            messages = record.message_count,
            "glasses connection closed"
        );
    }

    // Only the still-bound socket triggers the disconnect path; a
    // superseded socket must not tear down its replacement.
    let still_bound = {
        let session_state = session.state.lock().await;
        session_state.glasses.as_ref().is_some_and(|g| g.handle.id() == conn_id)
    };
    if still_bound {
        registry::mark_disconnected(&state, &session).await;
    }

    handle.terminate();
    let _ = writer.await;
}
