// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format frame types for both WebSocket populations.
//!
//! All JSON frames are tagged with a snake_case `type` field; payload
//! fields use camelCase. Inbound frames are dispatched from a
//! `serde_json::Value` on the `type` tag (pass-through event types are
//! forwarded without a typed schema); the shape-critical ones deserialize
//! into the structs below.

pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── close codes ───────────────────────────────────────────────────────

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Session ended by the server.
pub const CLOSE_SESSION_ENDED: u16 = 1001;
/// Authentication or session failure.
pub const CLOSE_AUTH_FAILURE: u16 = 1008;
/// Heartbeat-terminated after sustained silence.
pub const CLOSE_HEALTH_MONITOR: u16 = 4000;

/// Build the virtual TPA session identifier: `<userSessionId>-<packageName>`.
pub fn virtual_session_id(user_session_id: &str, package_name: &str) -> String {
    format!("{user_session_id}-{package_name}")
}

/// Recover the user session id from a virtual id by stripping the
/// `-<packageName>` suffix; ids without the suffix pass through unchanged.
pub fn user_session_id<'a>(virtual_id: &'a str, package_name: &str) -> &'a str {
    virtual_id
        .strip_suffix(package_name)
        .and_then(|s| s.strip_suffix('-'))
        .unwrap_or(virtual_id)
}

// ── session snapshot ──────────────────────────────────────────────────

/// Glasses-facing snapshot of what is running in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSessionSnapshot {
    pub session_id: String,
    pub user_id: String,
    pub start_time: u64,
    pub active_app_sessions: Vec<String>,
    pub loading_apps: Vec<String>,
    pub is_transcribing: bool,
}

// ── outbound: glasses ─────────────────────────────────────────────────

/// Frames the cloud sends to the glasses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlassesFrame {
    #[serde(rename_all = "camelCase")]
    ConnectionAck { session_id: String, user_session: UserSessionSnapshot },
    ConnectionError { message: String },
    AuthError { message: String },
    #[serde(rename_all = "camelCase")]
    AppStateChange { user_session: UserSessionSnapshot },
    #[serde(rename_all = "camelCase")]
    MicrophoneStateChange {
        is_microphone_enabled: bool,
        user_session: UserSessionSnapshot,
    },
    SettingsUpdate { settings: Value },
    #[serde(rename_all = "camelCase")]
    PhotoRequest { request_id: String, app_id: String },
    #[serde(rename_all = "camelCase")]
    VideoStreamRequest { app_id: String },
    DisplayEvent {
        #[serde(flatten)]
        payload: Value,
    },
}

// ── outbound: TPA ─────────────────────────────────────────────────────

/// Frames the cloud sends to a TPA.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TpaFrame {
    #[serde(rename_all = "camelCase")]
    TpaConnectionAck { session_id: String, settings: Value },
    ConnectionError { message: String },
    #[serde(rename_all = "camelCase")]
    DataStream {
        session_id: String,
        stream_type: String,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    PhotoResponse { request_id: String, photo_url: String },
    #[serde(rename_all = "camelCase")]
    PhotoTimeout { request_id: String, message: String },
    #[serde(rename_all = "camelCase")]
    VideoStreamResponse { stream_url: String, app_id: String },
    PermissionError {
        message: String,
        details: Vec<PermissionErrorDetail>,
    },
}

/// One rejected subscription descriptor and the permission it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionErrorDetail {
    pub stream: String,
    pub required_permission: String,
}

// ── inbound (shape-critical frames) ───────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRef {
    pub package_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponseIn {
    pub request_id: String,
    pub photo_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamResponseIn {
    pub app_id: String,
    pub stream_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpaConnectionInit {
    pub session_id: String,
    pub package_name: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdate {
    pub package_name: String,
    pub subscriptions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpaPhotoRequest {
    pub package_name: String,
    #[serde(default)]
    pub save_to_gallery: bool,
}

/// Extract the `type` tag from an inbound JSON frame.
pub fn frame_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
