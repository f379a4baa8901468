// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator boundaries consumed by the connection core.
//!
//! The app catalog, speech engine, display/dashboard engines, codec,
//! analytics, user store, and token issuance all live outside this
//! repository. Each is injected into [`CloudState`](crate::state::CloudState)
//! at construction as a trait object; the implementations here are the
//! in-memory/no-op stand-ins used by tests and by boundaries the binary
//! does not wire up.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::GlassesFrame;
use crate::session::Session;

/// Permissions a TPA can declare in the app catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Microphone,
    Location,
    Calendar,
    Notifications,
    /// Grants every stream regardless of the static mapping.
    All,
}

/// Catalog entry for an installable app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDescriptor {
    pub package_name: String,
    pub name: String,
    /// Public base URL of the app's backend (webhook target).
    pub public_url: String,
    #[serde(default)]
    pub is_system_app: bool,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[async_trait]
pub trait AppCatalog: Send + Sync {
    async fn get_app(&self, package_name: &str) -> Option<AppDescriptor>;
    async fn validate_api_key(
        &self,
        package_name: &str,
        api_key: &str,
        client_ip: Option<IpAddr>,
    ) -> bool;
    /// Apps installed for a user; refreshed into the session on
    /// (re)connect.
    async fn installed_apps(&self, user_id: &str) -> Vec<AppDescriptor>;
}

#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn start(&self, session: &Arc<Session>);
    async fn stop(&self, session: &Arc<Session>);
    async fn feed(&self, session: &Arc<Session>, pcm: Bytes);
    /// Revise the set of language streams the engine should produce.
    async fn update_streams(&self, session: &Arc<Session>, languages: Vec<String>);
}

#[async_trait]
pub trait DisplayManager: Send + Sync {
    async fn handle_app_start(&self, session: &Arc<Session>, package_name: &str);
    async fn handle_app_stop(&self, session: &Arc<Session>, package_name: &str);
    async fn handle_display_event(
        &self,
        session: &Arc<Session>,
        package_name: &str,
        event: Value,
    );
}

#[async_trait]
pub trait DashboardManager: Send + Sync {
    async fn content_update(&self, session: &Arc<Session>, package_name: &str, event: Value);
    async fn mode_change(&self, session: &Arc<Session>, event: Value);
    async fn system_update(&self, session: &Arc<Session>, event: Value);
    /// Drop any per-session dashboard state on teardown.
    async fn clear(&self, session: &Arc<Session>);
}

/// Optional pluggable decode stage for binary audio frames.
pub trait AudioCodec: Send + Sync {
    /// Decode a frame to PCM; `None` means undecodable (frame dropped).
    fn decode(&self, frame: &[u8]) -> Option<Bytes>;
}

pub trait Analytics: Send + Sync {
    fn track_event(&self, name: &str, user_id: &str, props: Value);
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn add_running_app(&self, user_id: &str, package_name: &str);
    async fn remove_running_app(&self, user_id: &str, package_name: &str);
    async fn set_location(&self, user_id: &str, lat: f64, lng: f64);
    async fn get_app_settings(&self, user_id: &str, package_name: &str) -> Value;
}

/// Maps a presented Bearer token to a user identity.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<String>;
}

/// The full set of injected collaborators.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn AppCatalog>,
    pub transcription: Arc<dyn TranscriptionEngine>,
    pub display: Arc<dyn DisplayManager>,
    pub dashboard: Arc<dyn DashboardManager>,
    pub codec: Arc<dyn AudioCodec>,
    pub analytics: Arc<dyn Analytics>,
    pub user_store: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenVerifier>,
}

impl Services {
    /// All boundaries stubbed out; token verification denies everything.
    pub fn noop() -> Self {
        Self {
            catalog: Arc::new(StaticCatalog::default()),
            transcription: Arc::new(NoopTranscription),
            display: Arc::new(PassthroughDisplay),
            dashboard: Arc::new(NoopDashboard),
            codec: Arc::new(PassthroughCodec),
            analytics: Arc::new(NoopAnalytics),
            user_store: Arc::new(InMemoryUserStore::default()),
            tokens: Arc::new(DenyAllTokens),
        }
    }
}

// ── in-memory / no-op implementations ─────────────────────────────────

/// Fixed catalog of apps keyed by package name.
#[derive(Default)]
pub struct StaticCatalog {
    apps: HashMap<String, (AppDescriptor, String)>,
}

impl StaticCatalog {
    pub fn with_app(mut self, app: AppDescriptor, api_key: &str) -> Self {
        self.apps.insert(app.package_name.clone(), (app, api_key.to_owned()));
        self
    }
}

#[async_trait]
impl AppCatalog for StaticCatalog {
    async fn get_app(&self, package_name: &str) -> Option<AppDescriptor> {
        self.apps.get(package_name).map(|(app, _)| app.clone())
    }

    async fn validate_api_key(
        &self,
        package_name: &str,
        api_key: &str,
        _client_ip: Option<IpAddr>,
    ) -> bool {
        self.apps.get(package_name).is_some_and(|(_, key)| key == api_key)
    }

    async fn installed_apps(&self, _user_id: &str) -> Vec<AppDescriptor> {
        self.apps.values().map(|(app, _)| app.clone()).collect()
    }
}

pub struct NoopTranscription;

#[async_trait]
impl TranscriptionEngine for NoopTranscription {
    async fn start(&self, _session: &Arc<Session>) {}
    async fn stop(&self, _session: &Arc<Session>) {}
    async fn feed(&self, _session: &Arc<Session>, _pcm: Bytes) {}
    async fn update_streams(&self, _session: &Arc<Session>, _languages: Vec<String>) {}
}

/// Forwards TPA display events to the glasses unmodified. Stands in for
/// the real layout engine, which owns throttling and view arbitration.
pub struct PassthroughDisplay;

#[async_trait]
impl DisplayManager for PassthroughDisplay {
    async fn handle_app_start(&self, _session: &Arc<Session>, _package_name: &str) {}
    async fn handle_app_stop(&self, _session: &Arc<Session>, _package_name: &str) {}

    async fn handle_display_event(
        &self,
        session: &Arc<Session>,
        _package_name: &str,
        event: Value,
    ) {
        session.send_to_glasses(&GlassesFrame::DisplayEvent { payload: event }).await;
    }
}

pub struct NoopDashboard;

#[async_trait]
impl DashboardManager for NoopDashboard {
    async fn content_update(&self, _session: &Arc<Session>, _package_name: &str, _event: Value) {}
    async fn mode_change(&self, _session: &Arc<Session>, _event: Value) {}
    async fn system_update(&self, _session: &Arc<Session>, _event: Value) {}
    async fn clear(&self, _session: &Arc<Session>) {}
}

/// Treats every binary frame as already-decoded PCM.
pub struct PassthroughCodec;

impl AudioCodec for PassthroughCodec {
    fn decode(&self, frame: &[u8]) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(frame))
    }
}

pub struct NoopAnalytics;

impl Analytics for NoopAnalytics {
    fn track_event(&self, name: &str, user_id: &str, _props: Value) {
        tracing::debug!(name, user_id, "analytics event");
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    running: parking_lot::Mutex<HashMap<String, Vec<String>>>,
    locations: parking_lot::Mutex<HashMap<String, (f64, f64)>>,
}

impl InMemoryUserStore {
    pub fn running_apps(&self, user_id: &str) -> Vec<String> {
        self.running.lock().get(user_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn add_running_app(&self, user_id: &str, package_name: &str) {
        let mut running = self.running.lock();
        let apps = running.entry(user_id.to_owned()).or_default();
        if !apps.iter().any(|p| p == package_name) {
            apps.push(package_name.to_owned());
        }
    }

    async fn remove_running_app(&self, user_id: &str, package_name: &str) {
        if let Some(apps) = self.running.lock().get_mut(user_id) {
            apps.retain(|p| p != package_name);
        }
    }

    async fn set_location(&self, user_id: &str, lat: f64, lng: f64) {
        self.locations.lock().insert(user_id.to_owned(), (lat, lng));
    }

    async fn get_app_settings(&self, _user_id: &str, _package_name: &str) -> Value {
        Value::Array(vec![])
    }
}

/// Rejects every token. The production deployment injects a verifier
/// backed by the token issuance service.
pub struct DenyAllTokens;

impl TokenVerifier for DenyAllTokens {
    fn verify(&self, _token: &str) -> Option<String> {
        None
    }
}

/// Development-only verifier: the token string is the user id.
pub struct DevTokens;

impl TokenVerifier for DevTokens {
    fn verify(&self, token: &str) -> Option<String> {
        if token.is_empty() {
            None
        } else {
            Some(token.to_owned())
        }
    }
}

/// Fixed token → user map.
#[derive(Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn with_token(mut self, token: &str, user_id: &str) -> Self {
        self.tokens.insert(token.to_owned(), user_id.to_owned());
        self
    }
}

impl TokenVerifier for StaticTokens {
    fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}
