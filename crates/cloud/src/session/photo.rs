// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Correlates capture requests with their eventual photo uploads.
//!
//! Requests are keyed by an opaque id and session-scoped; each carries
//! a timeout task that reaps the record and, for TPA-origin requests
//! with a live channel, reports the expiry. Responses arriving after
//! the timeout are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::protocol::{epoch_ms, GlassesFrame, TpaFrame};
use crate::session::Session;
use crate::state::CloudState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoOrigin {
    System,
    Tpa,
}

/// One outstanding capture request.
pub struct PhotoRequest {
    pub id: String,
    pub user_id: String,
    pub origin: PhotoOrigin,
    pub app_id: Option<String>,
    pub save_to_gallery: bool,
    pub created_ms: u64,
    timer: Option<JoinHandle<()>>,
}

impl Drop for PhotoRequest {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Pending capture requests for one session.
#[derive(Default)]
pub struct PhotoCorrelator {
    pending: HashMap<String, PhotoRequest>,
}

impl PhotoCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: PhotoRequest) {
        self.pending.insert(request.id.clone(), request);
    }

    /// Remove and return a request; its timeout task is cancelled.
    pub fn take(&mut self, id: &str) -> Option<PhotoRequest> {
        self.pending.remove(id)
    }

    /// Drop every request originated by the given app (channel closed).
    pub fn remove_for_app(&mut self, package_name: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, req| req.app_id.as_deref() != Some(package_name));
        before - self.pending.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ── operations ────────────────────────────────────────────────────────

/// Allocate a system-originated capture request and forward it to the
/// glasses. Saved to the gallery by default.
pub async fn create_system_request(state: &Arc<CloudState>, session: &Arc<Session>) -> String {
    create_request(state, session, PhotoOrigin::System, None, true).await
}

/// Allocate a TPA-originated capture request and forward it to the
/// glasses.
pub async fn create_tpa_request(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    package_name: &str,
    save_to_gallery: bool,
) -> String {
    create_request(state, session, PhotoOrigin::Tpa, Some(package_name.to_owned()), save_to_gallery)
        .await
}

async fn create_request(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    origin: PhotoOrigin,
    app_id: Option<String>,
    save_to_gallery: bool,
) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    let timeout = match origin {
        PhotoOrigin::System => state.config.photo_system_timeout(),
        PhotoOrigin::Tpa => state.config.photo_tpa_timeout(),
    };

    let timer = {
        let state = Arc::clone(state);
        let user_id = session.user_id.clone();
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire_request(&state, &user_id, &id).await;
        })
    };

    let request = PhotoRequest {
        id: id.clone(),
        user_id: session.user_id.clone(),
        origin,
        app_id: app_id.clone(),
        save_to_gallery,
        created_ms: epoch_ms(),
        timer: Some(timer),
    };

    let mut session_state = session.state.lock().await;
    session_state.photos.insert(request);
    if let Some(glasses) = &session_state.glasses {
        glasses.handle.send_frame(&GlassesFrame::PhotoRequest {
            request_id: id.clone(),
            app_id: app_id.unwrap_or_default(),
        });
    }
    drop(session_state);

    tracing::debug!(user_id = %session.user_id, request_id = %id, ?origin, "photo request created");
    id
}

/// Timeout task body: reap the record and report expiry to TPA origins.
async fn expire_request(state: &Arc<CloudState>, user_id: &str, request_id: &str) {
    let Some(session) = state.registry.get(user_id).await else {
        return;
    };
    let mut session_state = session.state.lock().await;
    let Some(request) = session_state.photos.take(request_id) else {
        return;
    };
    tracing::debug!(user_id, request_id, "photo request timed out");

    if request.origin == PhotoOrigin::Tpa {
        if let Some(conn) = request.app_id.as_deref().and_then(|p| session_state.app_connections.get(p)) {
            conn.handle.send_frame(&TpaFrame::PhotoTimeout {
                request_id: request_id.to_owned(),
                message: "photo request timed out".to_owned(),
            });
        }
    }
}

/// Handle a `photo_response` upload from the glasses. Late or repeated
/// responses find no record and are dropped.
pub async fn process_response(session: &Arc<Session>, request_id: &str, photo_url: &str) {
    let mut session_state = session.state.lock().await;
    let Some(request) = session_state.photos.take(request_id) else {
        tracing::debug!(request_id, "photo response without a pending request; dropped");
        return;
    };

    if request.origin == PhotoOrigin::Tpa {
        if let Some(conn) = request.app_id.as_deref().and_then(|p| session_state.app_connections.get(p)) {
            conn.handle.send_frame(&TpaFrame::PhotoResponse {
                request_id: request_id.to_owned(),
                photo_url: photo_url.to_owned(),
            });
        }
    }
}

#[cfg(test)]
#[path = "photo_tests.rs"]
mod tests;
