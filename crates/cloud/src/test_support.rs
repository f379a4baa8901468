// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for in-crate tests: a network-free [`CloudState`]
//! with in-memory collaborators, plus channel-backed connections.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::CloudConfig;
use crate::lifecycle;
use crate::protocol::{virtual_session_id, TpaConnectionInit};
use crate::services::{AppDescriptor, Permission, Services, StaticCatalog, StaticTokens};
use crate::session::connection::{ConnectionHandle, Outbound};
use crate::session::{registry, Session};
use crate::state::CloudState;

pub const API_KEY: &str = "test-api-key";

pub fn app(package_name: &str, permissions: &[Permission]) -> AppDescriptor {
    AppDescriptor {
        package_name: package_name.to_owned(),
        name: package_name.rsplit('.').next().unwrap_or(package_name).to_owned(),
        public_url: "http://127.0.0.1:9".to_owned(),
        is_system_app: false,
        permissions: permissions.to_vec(),
    }
}

/// State with the given apps in the catalog and `tok-<user>` tokens.
pub fn state_with_apps(apps: Vec<AppDescriptor>) -> Arc<CloudState> {
    let mut catalog = StaticCatalog::default();
    for descriptor in apps {
        catalog = catalog.with_app(descriptor, API_KEY);
    }
    let mut services = Services::noop();
    services.catalog = Arc::new(catalog);
    services.tokens = Arc::new(StaticTokens::default().with_token("tok-u1", "u1"));

    let mut config = CloudConfig::default();
    // Keep unit tests off the network.
    config.tpa_auto_restart = false;
    CloudState::new(config, services, CancellationToken::new())
}

pub fn test_state() -> Arc<CloudState> {
    state_with_apps(vec![app("com.example.app", &[Permission::All])])
}

/// Bind a channel-backed glasses connection for `user_id`.
pub async fn connect_glasses(
    state: &Arc<CloudState>,
    user_id: &str,
) -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
    let (handle, rx) = ConnectionHandle::pair();
    let session = registry::connect_glasses(state, user_id, handle).await;
    (session, rx)
}

/// Admit a channel-backed TPA connection for `(user_id, package)`.
pub async fn admit_tpa(
    state: &Arc<CloudState>,
    user_id: &str,
    package_name: &str,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
    let (handle, rx) = ConnectionHandle::pair();
    let init = TpaConnectionInit {
        session_id: virtual_session_id(user_id, package_name),
        package_name: package_name.to_owned(),
        api_key: API_KEY.to_owned(),
    };
    let admitted = lifecycle::admit_tpa(state, &init, handle.clone(), None).await;
    assert!(admitted.is_ok(), "admit failed: {:?}", admitted.err());
    (handle, rx)
}

/// Drain every queued outbound JSON frame into parsed values.
pub fn drain_frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(out) = rx.try_recv() {
        if let Outbound::Text(json) = out {
            if let Ok(value) = serde_json::from_str(&json) {
                frames.push(value);
            }
        }
    }
    frames
}

/// Drain everything, returning raw outbound messages.
pub fn drain_all(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Frames of one `type` from a drained batch.
pub fn frames_of<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|f| f.get("type").and_then(Value::as_str) == Some(kind)).collect()
}
