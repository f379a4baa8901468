// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-user session aggregate.
//!
//! A [`Session`] owns both connection populations (the single glasses
//! channel and the map of TPA channels), the derived state they share,
//! and the sub-managers that operate on it. All mutation goes through
//! one coarse async lock; suspension points (webhooks, catalog
//! lookups) run outside it.

pub mod audio;
pub mod connection;
pub mod heartbeat;
pub mod mic;
pub mod permission;
pub mod photo;
pub mod registry;
pub mod subscription;
pub mod transcript;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CloudConfig;
use crate::protocol::{epoch_ms, GlassesFrame, TpaFrame, UserSessionSnapshot};
use crate::services::AppDescriptor;
use crate::session::audio::AudioBuffer;
use crate::session::connection::ConnectionHandle;
use crate::session::heartbeat::HeartbeatMonitor;
use crate::session::mic::MicState;
use crate::session::photo::PhotoCorrelator;
use crate::session::subscription::SubscriptionManager;
use crate::session::transcript::TranscriptStore;

/// The bound glasses channel.
pub struct GlassesConnection {
    pub handle: ConnectionHandle,
}

/// An admitted TPA channel.
pub struct TpaConnection {
    pub handle: ConnectionHandle,
}

/// Per-user aggregate. One exists per user id; the registry holds the
/// only long-lived reference.
pub struct Session {
    pub user_id: String,
    pub started: Instant,
    pub started_ms: u64,
    pub heartbeat: Arc<HeartbeatMonitor>,
    pub state: Mutex<SessionState>,
}

/// Everything the session serializes under its lock.
pub struct SessionState {
    pub glasses: Option<GlassesConnection>,
    pub glasses_model: Option<String>,
    pub app_connections: HashMap<String, TpaConnection>,
    /// Apps logically running, in start order.
    pub active_app_sessions: Vec<String>,
    /// Apps whose start webhook fired but whose channel is not yet
    /// admitted.
    pub loading_apps: HashSet<String>,
    pub subscriptions: SubscriptionManager,
    pub photos: PhotoCorrelator,
    pub transcript: TranscriptStore,
    pub audio: AudioBuffer,
    pub mic: MicState,
    pub is_transcribing: bool,
    pub disconnected_at: Option<Instant>,
    pub cleanup_timer: Option<JoinHandle<()>>,
    /// Reconnect-grace timers, keyed by package name.
    pub reconnect_timers: HashMap<String, JoinHandle<()>>,
    /// Start-window timers, keyed by package name.
    pub start_timers: HashMap<String, JoinHandle<()>>,
    pub audio_flush_task: Option<JoinHandle<()>>,
    pub os_settings: Value,
    pub core_status: Value,
    pub installed_apps: Vec<AppDescriptor>,
    pub last_location: Option<Value>,
    pub last_calendar_event: Option<Value>,
}

impl Session {
    pub fn new(user_id: &str, config: &CloudConfig) -> Arc<Self> {
        let heartbeat = HeartbeatMonitor::new(config);
        heartbeat.start();

        Arc::new(Self {
            user_id: user_id.to_owned(),
            started: Instant::now(),
            started_ms: epoch_ms(),
            heartbeat,
            state: Mutex::new(SessionState {
                glasses: None,
                glasses_model: None,
                app_connections: HashMap::new(),
                active_app_sessions: Vec::new(),
                loading_apps: HashSet::new(),
                subscriptions: SubscriptionManager::new(config.subscription_history_limit),
                photos: PhotoCorrelator::new(),
                transcript: TranscriptStore::new(),
                audio: AudioBuffer::new(
                    config.audio_pending_limit,
                    config.audio_reorder_ms,
                    config.audio_recent_ms,
                ),
                mic: MicState::new(),
                is_transcribing: false,
                disconnected_at: None,
                cleanup_timer: None,
                reconnect_timers: HashMap::new(),
                start_timers: HashMap::new(),
                audio_flush_task: None,
                os_settings: Value::Object(serde_json::Map::new()),
                core_status: Value::Null,
                installed_apps: Vec::new(),
                last_location: None,
                last_calendar_event: None,
            }),
        })
    }

    /// Build the glasses-facing snapshot from already-locked state.
    pub fn snapshot(&self, state: &SessionState) -> UserSessionSnapshot {
        let mut loading: Vec<String> = state.loading_apps.iter().cloned().collect();
        loading.sort();
        UserSessionSnapshot {
            session_id: self.user_id.clone(),
            user_id: self.user_id.clone(),
            start_time: self.started_ms,
            active_app_sessions: state.active_app_sessions.clone(),
            loading_apps: loading,
            is_transcribing: state.is_transcribing,
        }
    }

    /// Send a frame to the glasses channel, if bound and open.
    pub async fn send_to_glasses(&self, frame: &GlassesFrame) -> bool {
        let state = self.state.lock().await;
        state.send_to_glasses(frame)
    }

    /// Send a frame to one TPA channel, if admitted and open.
    pub async fn send_to_app(&self, package_name: &str, frame: &TpaFrame) -> bool {
        let state = self.state.lock().await;
        state.send_to_app(package_name, frame)
    }

    /// Push a fresh `app_state_change` snapshot to the glasses.
    pub fn push_app_state(&self, state: &SessionState) {
        state.send_to_glasses(&GlassesFrame::AppStateChange { user_session: self.snapshot(state) });
    }
}

impl SessionState {
    pub fn send_to_glasses(&self, frame: &GlassesFrame) -> bool {
        match &self.glasses {
            Some(conn) if conn.handle.is_open() => conn.handle.send_frame(frame),
            _ => false,
        }
    }

    pub fn send_to_app(&self, package_name: &str, frame: &TpaFrame) -> bool {
        match self.app_connections.get(package_name) {
            Some(conn) if conn.handle.is_open() => conn.handle.send_frame(frame),
            _ => false,
        }
    }

    /// Abort every timer owned by this session. Teardown must not
    /// assume a timer has not already fired.
    pub fn abort_timers(&mut self) {
        if let Some(timer) = self.cleanup_timer.take() {
            timer.abort();
        }
        for (_, timer) in self.reconnect_timers.drain() {
            timer.abort();
        }
        for (_, timer) in self.start_timers.drain() {
            timer.abort();
        }
        if let Some(task) = self.audio_flush_task.take() {
            task.abort();
        }
        self.mic.abort_timer();
    }
}
