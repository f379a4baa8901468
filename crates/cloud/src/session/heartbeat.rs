// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session connection liveness monitoring.
//!
//! Glasses and TPA sockets are tracked under the same policy but by two
//! independent schedulers. Each tick increments the missed-ping count
//! and sends a timestamped ping; once the count reaches the threshold,
//! silence since the last pong decides between one more ping and a
//! code-4000 termination.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CloudConfig;
use crate::protocol::{epoch_ms, CLOSE_HEALTH_MONITOR};
use crate::session::connection::ConnectionHandle;

const LATENCY_WINDOW: usize = 10;
/// Grace between the close frame and forced termination.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Which scheduler owns a tracked socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Glasses,
    Tpa,
}

/// How a connection ended, derived from the observed close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Normal,
    HealthMonitor,
    ExplicitStop,
    NetworkError,
    Unknown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::HealthMonitor => "health_monitor",
            Self::ExplicitStop => "explicit_stop",
            Self::NetworkError => "network_error",
            Self::Unknown => "unknown",
        }
    }
}

/// Classify a close observed on a socket.
///
/// `explicit_stop` is the structured signal set by the stop path; the
/// reason-text fallback covers peers that close with "App stopped"
/// themselves.
pub fn classify_close(code: Option<u16>, reason: &str, explicit_stop: bool) -> DisconnectReason {
    if explicit_stop {
        return DisconnectReason::ExplicitStop;
    }
    match code {
        Some(1000 | 1001) => DisconnectReason::Normal,
        Some(4000) => DisconnectReason::HealthMonitor,
        _ if reason.contains("App stopped") => DisconnectReason::ExplicitStop,
        Some(c) if (1002..=1015).contains(&c) => DisconnectReason::NetworkError,
        _ => DisconnectReason::Unknown,
    }
}

/// Rolling per-socket accounting.
#[derive(Debug)]
pub struct ConnectionStats {
    pub started: Instant,
    pub last_activity: Instant,
    pub last_pong: Instant,
    pub missed_pings: u32,
    pub latencies: VecDeque<Duration>,
    pub total_bytes: u64,
    pub message_count: u64,
    pub disconnect: Option<DisconnectRecord>,
}

impl ConnectionStats {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_activity: now,
            last_pong: now,
            missed_pings: 0,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            total_bytes: 0,
            message_count: 0,
            disconnect: None,
        }
    }

    fn record_latency(&mut self, sample: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(sample);
    }

    pub fn avg_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }
}

/// Structured record captured when a tracked socket goes away.
#[derive(Debug, Clone)]
pub struct DisconnectRecord {
    pub reason: DisconnectReason,
    pub code: u16,
    pub message: String,
    pub uptime: Duration,
    pub total_bytes: u64,
    pub message_count: u64,
    pub avg_latency: Option<Duration>,
    pub explicit_stop: bool,
}

struct Tracked {
    label: String,
    handle: ConnectionHandle,
    stats: ConnectionStats,
}

/// Liveness monitor for one session's sockets.
pub struct HeartbeatMonitor {
    ping_interval: Duration,
    max_missed_pings: u32,
    critical_silence: Duration,
    glasses: Mutex<HashMap<u64, Tracked>>,
    tpas: Mutex<HashMap<u64, Tracked>>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    pub fn new(config: &CloudConfig) -> Arc<Self> {
        Arc::new(Self {
            ping_interval: config.ping_interval(),
            max_missed_pings: config.max_missed_pings,
            critical_silence: config.critical_silence(),
            glasses: Mutex::new(HashMap::new()),
            tpas: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the two schedulers. Called once per session.
    pub fn start(self: &Arc<Self>) {
        for kind in [ConnKind::Glasses, ConnKind::Tpa] {
            let monitor = Arc::clone(self);
            tokio::spawn(async move {
                let mut timer = tokio::time::interval(monitor.ping_interval);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The first tick completes immediately; skip it so fresh
                // connections are not pinged at registration time.
                timer.tick().await;
                loop {
                    tokio::select! {
                        _ = monitor.cancel.cancelled() => break,
                        _ = timer.tick() => {}
                    }
                    monitor.tick(kind);
                }
            });
        }
    }

    fn registry(&self, kind: ConnKind) -> &Mutex<HashMap<u64, Tracked>> {
        match kind {
            ConnKind::Glasses => &self.glasses,
            ConnKind::Tpa => &self.tpas,
        }
    }

    /// Track a socket. Keyed by the handle's connection id.
    pub fn register(&self, kind: ConnKind, label: &str, handle: ConnectionHandle) {
        let id = handle.id();
        self.registry(kind).lock().insert(
            id,
            Tracked { label: label.to_owned(), handle, stats: ConnectionStats::new() },
        );
    }

    pub fn unregister(&self, kind: ConnKind, conn_id: u64) {
        self.registry(kind).lock().remove(&conn_id);
    }

    /// Bump activity counters for any inbound frame.
    pub fn on_activity(&self, kind: ConnKind, conn_id: u64, bytes: usize) {
        if let Some(tracked) = self.registry(kind).lock().get_mut(&conn_id) {
            tracked.stats.last_activity = Instant::now();
            tracked.stats.total_bytes += bytes as u64;
            tracked.stats.message_count += 1;
        }
    }

    /// Record a pong; the payload echoes our epoch-millis ping stamp.
    pub fn on_pong(&self, kind: ConnKind, conn_id: u64, payload: &[u8]) {
        if let Some(tracked) = self.registry(kind).lock().get_mut(&conn_id) {
            tracked.stats.missed_pings = 0;
            tracked.stats.last_pong = Instant::now();
            if let Ok(stamp) = <[u8; 8]>::try_from(payload) {
                let sent_ms = u64::from_be_bytes(stamp);
                let latency = epoch_ms().saturating_sub(sent_ms);
                tracked.stats.record_latency(Duration::from_millis(latency));
            }
        }
    }

    /// Capture the disconnect record for a socket and stop tracking it.
    ///
    /// A record pre-set by the scheduler (heartbeat termination) takes
    /// precedence over classification of the observed close.
    pub fn capture_disconnect(
        &self,
        kind: ConnKind,
        conn_id: u64,
        code: Option<u16>,
        reason: &str,
        explicit_stop: bool,
    ) -> Option<DisconnectRecord> {
        let tracked = self.registry(kind).lock().remove(&conn_id)?;
        if let Some(record) = tracked.stats.disconnect {
            return Some(record);
        }
        Some(DisconnectRecord {
            reason: classify_close(code, reason, explicit_stop),
            code: code.unwrap_or(1006),
            message: reason.to_owned(),
            uptime: tracked.stats.started.elapsed(),
            total_bytes: tracked.stats.total_bytes,
            message_count: tracked.stats.message_count,
            avg_latency: tracked.stats.avg_latency(),
            explicit_stop,
        })
    }

    /// One scheduler pass over a registry.
    fn tick(&self, kind: ConnKind) {
        let mut registry = self.registry(kind).lock();
        registry.retain(|_, tracked| tracked.handle.is_open());

        for tracked in registry.values_mut() {
            tracked.stats.missed_pings += 1;

            if tracked.stats.missed_pings < self.max_missed_pings {
                send_ping(tracked);
                continue;
            }

            let silence = tracked.stats.last_pong.elapsed();
            if silence > self.critical_silence {
                tracing::warn!(
                    label = %tracked.label,
                    silence_ms = silence.as_millis() as u64,
                    "terminating unresponsive connection"
                );
                tracked.stats.disconnect = Some(DisconnectRecord {
                    reason: DisconnectReason::HealthMonitor,
                    code: CLOSE_HEALTH_MONITOR,
                    message: "no pong responses".to_owned(),
                    uptime: tracked.stats.started.elapsed(),
                    total_bytes: tracked.stats.total_bytes,
                    message_count: tracked.stats.message_count,
                    avg_latency: tracked.stats.avg_latency(),
                    explicit_stop: false,
                });
                tracked.handle.close(CLOSE_HEALTH_MONITOR, "no pong responses");
                let handle = tracked.handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(TERMINATE_GRACE).await;
                    handle.terminate();
                });
            } else {
                send_ping(tracked);
            }
        }
    }

    /// Stop both schedulers and drop every tracked socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.glasses.lock().clear();
        self.tpas.lock().clear();
    }
}

fn send_ping(tracked: &Tracked) {
    let stamp = Bytes::copy_from_slice(&epoch_ms().to_be_bytes());
    if !tracked.handle.send_ping(stamp) {
        tracing::debug!(label = %tracked.label, "ping send failed; next tick re-evaluates");
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
