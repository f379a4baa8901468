// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Send-side handle for a WebSocket connection.
//!
//! Each accepted socket gets an unbounded outbound channel drained by a
//! writer task; every other component holds a cheap [`ConnectionHandle`]
//! clone. Ordering per connection follows send order. Termination is a
//! two-step affair: `close` enqueues a close frame, `terminate` cancels
//! the read loop for peers that never complete the close handshake.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A frame queued for the writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Close { code: u16, reason: String },
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Cloneable send handle for one socket.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    explicit_stop: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            cancel: CancellationToken::new(),
            explicit_stop: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    /// Process-unique connection identity, used to detect stale rebinds.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the writer task is still draining this channel.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }

    /// Serialize and enqueue a JSON frame. Returns false if the
    /// connection is gone.
    pub fn send_frame<T: Serialize>(&self, frame: &T) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.tx.send(Outbound::Text(json)).is_ok(),
            Err(e) => {
                tracing::warn!(err = %e, "failed to serialize outbound frame");
                false
            }
        }
    }

    /// Enqueue a pre-serialized JSON frame.
    pub fn send_text(&self, json: String) -> bool {
        self.tx.send(Outbound::Text(json)).is_ok()
    }

    pub fn send_binary(&self, data: Bytes) -> bool {
        self.tx.send(Outbound::Binary(data)).is_ok()
    }

    pub fn send_ping(&self, payload: Bytes) -> bool {
        self.tx.send(Outbound::Ping(payload)).is_ok()
    }

    /// Enqueue a close frame with the given code.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close { code, reason: reason.to_owned() });
    }

    /// Cancel the read loop. The socket drops without waiting for the
    /// peer's close handshake.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Token the read loop selects on.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Flag this connection as closed by an explicit stop, so the close
    /// path skips the reconnect grace timer.
    pub fn mark_explicit_stop(&self) {
        self.explicit_stop.store(true, Ordering::Relaxed);
    }

    pub fn is_explicit_stop(&self) -> bool {
        self.explicit_stop.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
