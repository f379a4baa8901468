// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the glasshub cloud core.
#[derive(Debug, Clone, clap::Args)]
pub struct CloudConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "GLASSHUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8002, env = "GLASSHUB_PORT")]
    pub port: u16,

    /// Public WebSocket base URL handed to third-party app backends
    /// (e.g. `wss://cloud.example.com`). Defaults to the bind address.
    #[arg(long, env = "GLASSHUB_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Internal WebSocket base URL handed to system app backends
    /// (cluster-local DNS). Defaults to the public URL.
    #[arg(long, env = "GLASSHUB_INTERNAL_URL")]
    pub internal_url: Option<String>,

    /// Accept glasses tokens as bare user ids (development only).
    #[arg(long, default_value_t = false, env = "GLASSHUB_INSECURE_DEV_AUTH")]
    pub insecure_dev_auth: bool,

    /// Heartbeat ping interval in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "GLASSHUB_PING_INTERVAL_MS")]
    pub ping_interval_ms: u64,

    /// Missed pings before a connection is considered for termination.
    #[arg(long, default_value_t = 3, env = "GLASSHUB_MAX_MISSED_PINGS")]
    pub max_missed_pings: u32,

    /// Silence since last pong, in milliseconds, after which a connection
    /// is heartbeat-terminated.
    #[arg(long, default_value_t = 45_000, env = "GLASSHUB_CRITICAL_SILENCE_MS")]
    pub critical_silence_ms: u64,

    /// Grace window after a glasses disconnect before the session is torn
    /// down, in milliseconds (30–60 s band).
    #[arg(long, default_value_t = 60_000, env = "GLASSHUB_SESSION_GRACE_MS")]
    pub session_grace_ms: u64,

    /// Window for a started TPA to open its connection, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "GLASSHUB_TPA_START_WINDOW_MS")]
    pub tpa_start_window_ms: u64,

    /// Grace window after a TPA socket loss before the app is removed, in
    /// milliseconds.
    #[arg(long, default_value_t = 5_000, env = "GLASSHUB_TPA_GRACE_MS")]
    pub tpa_grace_ms: u64,

    /// Automatically restart a TPA whose reconnect grace expired.
    #[arg(
        long,
        action = clap::ArgAction::Set,
        default_value_t = true,
        env = "GLASSHUB_TPA_AUTO_RESTART"
    )]
    pub tpa_auto_restart: bool,

    /// Delay before an auto-restart attempt, in milliseconds.
    #[arg(long, default_value_t = 500, env = "GLASSHUB_TPA_RESTART_DELAY_MS")]
    pub tpa_restart_delay_ms: u64,

    /// Microphone state-change debounce, in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "GLASSHUB_MIC_DEBOUNCE_MS")]
    pub mic_debounce_ms: u64,

    /// Timeout for TPA-initiated photo requests, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "GLASSHUB_PHOTO_TPA_TIMEOUT_MS")]
    pub photo_tpa_timeout_ms: u64,

    /// Timeout for system-initiated photo requests, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "GLASSHUB_PHOTO_SYSTEM_TIMEOUT_MS")]
    pub photo_system_timeout_ms: u64,

    /// Per-attempt webhook timeout, in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "GLASSHUB_WEBHOOK_TIMEOUT_MS")]
    pub webhook_timeout_ms: u64,

    /// Pending audio frames held for reordering before forced flush.
    #[arg(long, default_value_t = 100, env = "GLASSHUB_AUDIO_PENDING_LIMIT")]
    pub audio_pending_limit: usize,

    /// Audio reordering window, in milliseconds.
    #[arg(long, default_value_t = 500, env = "GLASSHUB_AUDIO_REORDER_MS")]
    pub audio_reorder_ms: u64,

    /// Rolling window of recent raw audio kept for diagnostics, in
    /// milliseconds.
    #[arg(long, default_value_t = 10_000, env = "GLASSHUB_AUDIO_RECENT_MS")]
    pub audio_recent_ms: u64,

    /// Subscription history entries retained per package.
    #[arg(long, default_value_t = 50, env = "GLASSHUB_SUBSCRIPTION_HISTORY_LIMIT")]
    pub subscription_history_limit: usize,
}

impl CloudConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn critical_silence(&self) -> Duration {
        Duration::from_millis(self.critical_silence_ms)
    }

    pub fn session_grace(&self) -> Duration {
        Duration::from_millis(self.session_grace_ms)
    }

    pub fn tpa_start_window(&self) -> Duration {
        Duration::from_millis(self.tpa_start_window_ms)
    }

    pub fn tpa_grace(&self) -> Duration {
        Duration::from_millis(self.tpa_grace_ms)
    }

    pub fn tpa_restart_delay(&self) -> Duration {
        Duration::from_millis(self.tpa_restart_delay_ms)
    }

    pub fn mic_debounce(&self) -> Duration {
        Duration::from_millis(self.mic_debounce_ms)
    }

    pub fn photo_tpa_timeout(&self) -> Duration {
        Duration::from_millis(self.photo_tpa_timeout_ms)
    }

    pub fn photo_system_timeout(&self) -> Duration {
        Duration::from_millis(self.photo_system_timeout_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn audio_reorder_window(&self) -> Duration {
        Duration::from_millis(self.audio_reorder_ms)
    }

    /// WebSocket URL a third-party TPA backend should connect back to.
    pub fn public_ws_url(&self) -> String {
        match &self.public_url {
            Some(base) => format!("{}/tpa-ws", base.trim_end_matches('/')),
            None => format!("ws://{}:{}/tpa-ws", self.host, self.port),
        }
    }

    /// WebSocket URL a system TPA backend should connect back to.
    pub fn internal_ws_url(&self) -> String {
        match &self.internal_url {
            Some(base) => format!("{}/tpa-ws", base.trim_end_matches('/')),
            None => self.public_ws_url(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        use clap::Parser;

        #[derive(clap::Parser)]
        struct Defaults {
            #[command(flatten)]
            config: CloudConfig,
        }

        Defaults::parse_from(["glasshub"]).config
    }
}
