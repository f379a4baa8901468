// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced microphone control.
//!
//! Subscription churn produces bursts of enable/disable requests; the
//! coordinator collapses each burst into at most one edge sent to the
//! glasses, with transcription started or stopped on the same edge.
//! The sequence of states actually sent is a deduplicated subsequence
//! of the states requested.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::protocol::GlassesFrame;
use crate::session::Session;
use crate::state::CloudState;

/// Microphone bookkeeping inside the session lock.
pub struct MicState {
    /// Last state actually sent to the glasses.
    pub enabled: bool,
    debounce: Option<MicDebounce>,
}

struct MicDebounce {
    last_state: bool,
    last_sent: bool,
    timer: Option<JoinHandle<()>>,
}

impl MicState {
    pub fn new() -> Self {
        Self { enabled: false, debounce: None }
    }

    pub fn abort_timer(&mut self) {
        if let Some(debounce) = self.debounce.take() {
            if let Some(timer) = debounce.timer {
                timer.abort();
            }
        }
    }
}

impl Default for MicState {
    fn default() -> Self {
        Self::new()
    }
}

/// Request a microphone state. The first edge of a burst is sent
/// immediately; further requests inside the debounce window coalesce
/// and settle when the timer fires.
pub async fn request(state: &Arc<CloudState>, session: &Arc<Session>, desired: bool) {
    let mut session_state = session.state.lock().await;

    match &mut session_state.mic.debounce {
        Some(debounce) => {
            debounce.last_state = desired;
            if let Some(timer) = debounce.timer.take() {
                timer.abort();
            }
            let fire_state = Arc::clone(state);
            let user_id = session.user_id.clone();
            let delay = state.config.mic_debounce();
            debounce.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                settle(&fire_state, &user_id).await;
            }));
        }
        None => {
            if desired == session_state.mic.enabled {
                return;
            }
            session_state.mic.enabled = desired;
            session_state.is_transcribing = desired;
            let frame = GlassesFrame::MicrophoneStateChange {
                is_microphone_enabled: desired,
                user_session: session.snapshot(&session_state),
            };
            session_state.send_to_glasses(&frame);
            session_state.mic.debounce =
                Some(MicDebounce { last_state: desired, last_sent: desired, timer: None });
            drop(session_state);

            transcription_edge(state, session, desired).await;
        }
    }
}

/// Timer body: emit the coalesced edge if the settled state differs
/// from the last sent one, then discard the debouncer.
async fn settle(state: &Arc<CloudState>, user_id: &str) {
    let Some(session) = state.registry.get(user_id).await else {
        return;
    };
    let mut session_state = session.state.lock().await;
    let Some(debounce) = session_state.mic.debounce.take() else {
        return;
    };
    if debounce.last_state == debounce.last_sent {
        return;
    }

    let desired = debounce.last_state;
    session_state.mic.enabled = desired;
    session_state.is_transcribing = desired;
    let frame = GlassesFrame::MicrophoneStateChange {
        is_microphone_enabled: desired,
        user_session: session.snapshot(&session_state),
    };
    session_state.send_to_glasses(&frame);
    drop(session_state);

    transcription_edge(state, &session, desired).await;
}

async fn transcription_edge(state: &Arc<CloudState>, session: &Arc<Session>, enabled: bool) {
    if enabled {
        state.services.transcription.start(session).await;
    } else {
        state.services.transcription.stop(session).await;
    }
    tracing::info!(user_id = %session.user_id, enabled, "microphone state changed");
}

#[cfg(test)]
#[path = "mic_tests.rs"]
mod tests;
