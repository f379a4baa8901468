// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: the single cross-session structure.
//!
//! Sessions are created on the first authenticated glasses connect,
//! adopted on reconnect, marked disconnected when the glasses channel
//! drops, and torn down when the grace window expires without a new
//! connect.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::protocol::{GlassesFrame, CLOSE_NORMAL, CLOSE_SESSION_ENDED};
use crate::session::connection::ConnectionHandle;
use crate::session::heartbeat::ConnKind;
use crate::session::{GlassesConnection, Session};
use crate::state::CloudState;

/// Map from user id to their session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(user_id).map(Arc::clone)
    }

    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions.write().await.insert(session.user_id.clone(), session);
    }

    pub async fn remove(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(user_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── operations ────────────────────────────────────────────────────────

/// Bind an authenticated glasses channel, creating or adopting the
/// user's session. Idempotent per user id: a live session has its
/// cleanup timer cancelled and its glasses channel rebound.
pub async fn connect_glasses(
    state: &Arc<CloudState>,
    user_id: &str,
    handle: ConnectionHandle,
) -> Arc<Session> {
    // Refresh outside the session lock; the catalog call can suspend.
    let installed = state.services.catalog.installed_apps(user_id).await;

    let (session, adopted) = match state.registry.get(user_id).await {
        Some(session) => (session, true),
        None => {
            let session = Session::new(user_id, &state.config);
            state.registry.insert(Arc::clone(&session)).await;
            spawn_audio_flush(state, &session).await;
            (session, false)
        }
    };

    let mut session_state = session.state.lock().await;
    if let Some(timer) = session_state.cleanup_timer.take() {
        timer.abort();
    }
    if let Some(old) = session_state.glasses.take() {
        session.heartbeat.unregister(ConnKind::Glasses, old.handle.id());
        if old.handle.is_open() {
            old.handle.close(CLOSE_NORMAL, "superseded by new connection");
        }
    }
    session.heartbeat.register(ConnKind::Glasses, user_id, handle.clone());
    session_state.glasses = Some(GlassesConnection { handle });
    session_state.disconnected_at = None;
    session_state.installed_apps = installed;

    let ack = GlassesFrame::ConnectionAck {
        session_id: session.user_id.clone(),
        user_session: session.snapshot(&session_state),
    };
    session_state.send_to_glasses(&ack);
    drop(session_state);

    tracing::info!(user_id, adopted, "glasses connected");
    state.services.analytics.track_event(
        "glasses_connected",
        user_id,
        serde_json::json!({ "adopted": adopted }),
    );
    session
}

/// Handle loss of the glasses channel: stop transcription, stamp the
/// disconnect, and schedule the grace-window cleanup check. The socket
/// reference is kept so in-flight handlers can detect staleness.
pub async fn mark_disconnected(state: &Arc<CloudState>, session: &Arc<Session>) {
    let mut session_state = session.state.lock().await;
    if let Some(timer) = session_state.cleanup_timer.take() {
        timer.abort();
    }
    session_state.disconnected_at = Some(Instant::now());
    session_state.is_transcribing = false;
    session_state.mic.abort_timer();

    let grace = state.config.session_grace();
    let cleanup_state = Arc::clone(state);
    let user_id = session.user_id.clone();
    session_state.cleanup_timer = Some(tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        cleanup_check(&cleanup_state, &user_id).await;
    }));
    drop(session_state);

    state.services.transcription.stop(session).await;
    tracing::info!(user_id = %session.user_id, "glasses disconnected; grace timer armed");
}

/// Grace-timer body: end the session only if the glasses channel is
/// still closed.
async fn cleanup_check(state: &Arc<CloudState>, user_id: &str) {
    let Some(session) = state.registry.get(user_id).await else {
        return;
    };
    let session_state = session.state.lock().await;
    // Re-check: a new glasses connect may have adopted the session
    // while this timer was queued.
    let still_gone = session_state.disconnected_at.is_some()
        && !session_state.glasses.as_ref().is_some_and(|g| g.handle.is_open());
    drop(session_state);

    if still_gone {
        end_session(state, &session).await;
    }
}

/// Final teardown: cancel every timer, close every TPA channel with
/// 1001, clear derived state, and remove the session from the registry.
pub async fn end_session(state: &Arc<CloudState>, session: &Arc<Session>) {
    state.services.transcription.stop(session).await;
    state.services.dashboard.clear(session).await;

    let mut session_state = session.state.lock().await;
    session_state.abort_timers();
    session.heartbeat.shutdown();
    session_state.is_transcribing = false;
    session_state.transcript.clear();
    session_state.subscriptions = crate::session::subscription::SubscriptionManager::new(
        state.config.subscription_history_limit,
    );
    session_state.photos = crate::session::photo::PhotoCorrelator::new();

    for (package_name, conn) in session_state.app_connections.drain() {
        tracing::debug!(user_id = %session.user_id, package_name, "closing TPA channel");
        conn.handle.close(CLOSE_SESSION_ENDED, "session ended");
    }
    if let Some(glasses) = session_state.glasses.take() {
        if glasses.handle.is_open() {
            glasses.handle.close(CLOSE_SESSION_ENDED, "session ended");
        }
    }
    session_state.active_app_sessions.clear();
    session_state.loading_apps.clear();
    drop(session_state);

    state.registry.remove(&session.user_id).await;
    tracing::info!(user_id = %session.user_id, "session ended");
    state.services.analytics.track_event("session_ended", &session.user_id, serde_json::Value::Null);
}

/// Periodic task that releases audio frames stuck behind an abandoned
/// gap and feeds them to the transcription engine.
async fn spawn_audio_flush(state: &Arc<CloudState>, session: &Arc<Session>) {
    let interval = state.config.audio_reorder_window();
    let flush_state = Arc::clone(state);
    let user_id = session.user_id.clone();

    let task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            let Some(session) = flush_state.registry.get(&user_id).await else {
                break;
            };
            let mut session_state = session.state.lock().await;
            let stale = session_state.audio.flush_stale(crate::protocol::epoch_ms());
            let feeding = session_state.is_transcribing && !stale.is_empty();
            drop(session_state);
            if feeding {
                for frame in stale {
                    flush_state.services.transcription.feed(&session, frame).await;
                }
            }
        }
    });

    session.state.lock().await.audio_flush_task = Some(task);
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
