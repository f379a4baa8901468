// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TPA lifecycle: start, stop, admit, reconnect grace, auto-restart.
//!
//! Start holds the package in `loading_apps` while the session webhook
//! is in flight, then moves it to `active_app_sessions`; the two sets
//! are always disjoint. An armed start-window timer marks an active
//! app still awaiting admission. A lost channel of an active app gets
//! a bounded reconnect grace before the app is removed (and optionally
//! restarted). Explicit stops bypass the grace entirely.

pub mod webhook;

use std::net::IpAddr;
use std::sync::Arc;

use crate::error::CloudError;
use crate::protocol::stream::{StreamDescriptor, StreamType};
use crate::protocol::{
    user_session_id, virtual_session_id, TpaConnectionInit, TpaFrame, CLOSE_NORMAL,
};
use crate::session::heartbeat::{ConnKind, DisconnectReason, DisconnectRecord};
use crate::session::connection::ConnectionHandle;
use crate::session::{mic, Session, TpaConnection};
use crate::state::CloudState;
use crate::lifecycle::webhook::{SessionRequestPayload, StopRequestPayload};

/// Start an app for a session. Idempotent while the app is loading or
/// active.
pub async fn start_app(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    package_name: &str,
) -> Result<(), CloudError> {
    {
        let mut session_state = session.state.lock().await;
        if session_state.loading_apps.contains(package_name)
            || session_state.active_app_sessions.iter().any(|p| p == package_name)
        {
            tracing::debug!(user_id = %session.user_id, package_name, "start ignored; already running");
            return Ok(());
        }
        session_state.loading_apps.insert(package_name.to_owned());
    }

    let Some(app) = state.services.catalog.get_app(package_name).await else {
        tracing::warn!(user_id = %session.user_id, package_name, "start failed; app not in catalog");
        let mut session_state = session.state.lock().await;
        session_state.loading_apps.remove(package_name);
        session.push_app_state(&session_state);
        return Err(CloudError::Internal);
    };

    // Connect-back address: system apps dial the cluster-local name.
    let websocket_url = if app.is_system_app {
        state.config.internal_ws_url()
    } else {
        state.config.public_ws_url()
    };
    let payload = SessionRequestPayload::new(
        virtual_session_id(&session.user_id, package_name),
        session.user_id.clone(),
        websocket_url,
    );

    if let Err(e) = state.webhooks.send_session_request(&app.public_url, &payload).await {
        tracing::warn!(user_id = %session.user_id, package_name, err = %e, "session webhook failed");
        let mut session_state = session.state.lock().await;
        session_state.loading_apps.remove(package_name);
        session.push_app_state(&session_state);
        drop(session_state);
        state.services.display.handle_app_stop(session, package_name).await;
        return Err(CloudError::WebhookFailure);
    }

    {
        // The package moves from loading to active in one step; a
        // package is never a member of both sets. The armed
        // start-window timer is what marks it as awaiting admission.
        let mut session_state = session.state.lock().await;
        session_state.loading_apps.remove(package_name);
        if !session_state.active_app_sessions.iter().any(|p| p == package_name) {
            session_state.active_app_sessions.push(package_name.to_owned());
        }
        if !session_state.app_connections.contains_key(package_name) {
            arm_start_window(state, session, &mut session_state, package_name);
        }
        session.push_app_state(&session_state);
    }

    // Best-effort persistence of the running-app fact.
    state.services.user_store.add_running_app(&session.user_id, package_name).await;
    state.services.display.handle_app_start(session, package_name).await;
    state.services.analytics.track_event(
        "app_started",
        &session.user_id,
        serde_json::json!({ "packageName": package_name }),
    );

    sync_media_state(state, session).await;
    tracing::info!(user_id = %session.user_id, package_name, "app start issued");
    Ok(())
}

fn arm_start_window(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    session_state: &mut crate::session::SessionState,
    package_name: &str,
) {
    if let Some(timer) = session_state.start_timers.remove(package_name) {
        timer.abort();
    }
    let window = state.config.tpa_start_window();
    let timer_state = Arc::clone(state);
    let user_id = session.user_id.clone();
    let package = package_name.to_owned();
    session_state.start_timers.insert(
        package_name.to_owned(),
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            start_window_expired(&timer_state, &user_id, &package).await;
        }),
    );
}

/// Start-window timer body: abandon the load if no channel was
/// admitted in time.
async fn start_window_expired(state: &Arc<CloudState>, user_id: &str, package_name: &str) {
    let Some(session) = state.registry.get(user_id).await else {
        return;
    };
    let mut session_state = session.state.lock().await;
    session_state.start_timers.remove(package_name);
    if session_state.app_connections.contains_key(package_name) {
        return; // admitted in time
    }
    session_state.loading_apps.remove(package_name);
    session_state.active_app_sessions.retain(|p| p != package_name);
    session.push_app_state(&session_state);
    drop(session_state);

    tracing::warn!(user_id, package_name, "TPA never connected; load abandoned");
    state.services.display.handle_app_stop(&session, package_name).await;
    state.services.user_store.remove_running_app(user_id, package_name).await;
}

/// Stop an app. Idempotent once the app is neither loading nor active.
pub async fn stop_app(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    package_name: &str,
    reason: &str,
) -> Result<(), CloudError> {
    let conn = {
        let mut session_state = session.state.lock().await;
        let was_active = session_state.active_app_sessions.iter().any(|p| p == package_name);
        let was_loading = session_state.loading_apps.remove(package_name);
        if !was_active && !was_loading {
            return Ok(());
        }
        session_state.subscriptions.remove(package_name);
        session_state.active_app_sessions.retain(|p| p != package_name);
        if let Some(timer) = session_state.reconnect_timers.remove(package_name) {
            timer.abort();
        }
        if let Some(timer) = session_state.start_timers.remove(package_name) {
            timer.abort();
        }
        session_state.photos.remove_for_app(package_name);
        session_state.app_connections.remove(package_name)
    };

    // Close the channel with the structured explicit-stop marker so its
    // disconnect path skips the reconnect grace.
    if let Some(conn) = conn {
        session.heartbeat.unregister(ConnKind::Tpa, conn.handle.id());
        conn.handle.mark_explicit_stop();
        conn.handle.close(CLOSE_NORMAL, "App stopped");
    }

    if let Some(app) = state.services.catalog.get_app(package_name).await {
        let payload = StopRequestPayload::new(
            virtual_session_id(&session.user_id, package_name),
            session.user_id.clone(),
            reason,
        );
        if let Err(e) = state.webhooks.send_stop_request(&app.public_url, &payload).await {
            tracing::warn!(user_id = %session.user_id, package_name, err = %e, "stop webhook failed");
        }
    }

    state.services.user_store.remove_running_app(&session.user_id, package_name).await;
    state.services.display.handle_app_stop(session, package_name).await;
    state.services.analytics.track_event(
        "app_stopped",
        &session.user_id,
        serde_json::json!({ "packageName": package_name, "reason": reason }),
    );

    sync_media_state(state, session).await;

    let session_state = session.state.lock().await;
    session.push_app_state(&session_state);
    drop(session_state);

    tracing::info!(user_id = %session.user_id, package_name, reason, "app stopped");
    Ok(())
}

/// Admit a TPA channel after its `tpa_connection_init`.
///
/// Validates the API key (and source address for system apps), binds
/// the channel, cancels any grace timer, and acknowledges with the
/// app's persisted settings.
pub async fn admit_tpa(
    state: &Arc<CloudState>,
    init: &TpaConnectionInit,
    handle: ConnectionHandle,
    client_ip: Option<IpAddr>,
) -> Result<Arc<Session>, CloudError> {
    let package_name = &init.package_name;
    let user_id = user_session_id(&init.session_id, package_name).to_owned();

    let Some(session) = state.registry.get(&user_id).await else {
        tracing::warn!(%user_id, package_name, "TPA init for unknown session");
        return Err(CloudError::AuthFailure);
    };

    if !state.services.catalog.validate_api_key(package_name, &init.api_key, client_ip).await {
        tracing::warn!(%user_id, package_name, "TPA init with invalid API key");
        return Err(CloudError::AuthFailure);
    }

    if let Some(app) = state.services.catalog.get_app(package_name).await {
        if app.is_system_app && !client_ip.is_none_or(is_internal_address) {
            tracing::warn!(%user_id, package_name, ?client_ip, "system app init from external address");
            return Err(CloudError::AuthFailure);
        }
    }

    let settings = state.services.user_store.get_app_settings(&user_id, package_name).await;

    let mut session_state = session.state.lock().await;
    if let Some(timer) = session_state.reconnect_timers.remove(package_name) {
        timer.abort();
    }
    if let Some(timer) = session_state.start_timers.remove(package_name) {
        timer.abort();
    }
    if let Some(old) = session_state.app_connections.remove(package_name) {
        session.heartbeat.unregister(ConnKind::Tpa, old.handle.id());
        if old.handle.is_open() {
            old.handle.close(CLOSE_NORMAL, "superseded by new connection");
        }
    }

    let label = format!("{user_id}:{package_name}");
    session.heartbeat.register(ConnKind::Tpa, &label, handle.clone());
    session_state
        .app_connections
        .insert(package_name.to_owned(), TpaConnection { handle: handle.clone() });
    session_state.loading_apps.remove(package_name);
    if !session_state.active_app_sessions.iter().any(|p| p == package_name) {
        session_state.active_app_sessions.push(package_name.to_owned());
    }

    handle.send_frame(&TpaFrame::TpaConnectionAck {
        session_id: virtual_session_id(&user_id, package_name),
        settings,
    });

    // Late joiners should not miss one-shot location context.
    let wants_location = session_state
        .subscriptions
        .subscribers_of(&StreamDescriptor::Plain(StreamType::LocationUpdate))
        .iter()
        .any(|p| p == package_name);
    if wants_location {
        if let Some(location) = session_state.last_location.clone() {
            handle.send_frame(&TpaFrame::DataStream {
                session_id: virtual_session_id(&user_id, package_name),
                stream_type: StreamType::LocationUpdate.as_str().to_owned(),
                data: location,
            });
        }
    }

    session.push_app_state(&session_state);
    drop(session_state);

    tracing::info!(%user_id, package_name, "TPA admitted");
    Ok(session)
}

/// Handle loss of a TPA socket. Active apps get a reconnect-grace
/// timer; explicit stops and superseded sockets do not.
pub async fn handle_tpa_disconnect(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    package_name: &str,
    conn_id: u64,
    record: Option<DisconnectRecord>,
) {
    let mut session_state = session.state.lock().await;
    match session_state.app_connections.get(package_name) {
        Some(conn) if conn.handle.id() == conn_id => {
            session_state.app_connections.remove(package_name);
        }
        // A newer socket already replaced this one; nothing to do.
        _ => return,
    }
    // Pending captures die with the channel.
    session_state.photos.remove_for_app(package_name);

    let reason = record.as_ref().map(|r| r.reason).unwrap_or(DisconnectReason::Unknown);
    let is_active = session_state.active_app_sessions.iter().any(|p| p == package_name);

    if !is_active || reason == DisconnectReason::ExplicitStop {
        tracing::debug!(
            user_id = %session.user_id,
            package_name,
            reason = reason.as_str(),
            "TPA socket closed without grace"
        );
        return;
    }

    if let Some(timer) = session_state.reconnect_timers.remove(package_name) {
        timer.abort();
    }
    let grace = state.config.tpa_grace();
    let timer_state = Arc::clone(state);
    let user_id = session.user_id.clone();
    let package = package_name.to_owned();
    session_state.reconnect_timers.insert(
        package_name.to_owned(),
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            grace_expired(&timer_state, &user_id, &package).await;
        }),
    );
    drop(session_state);

    tracing::info!(
        user_id = %session.user_id,
        package_name,
        reason = reason.as_str(),
        "TPA disconnected; reconnect grace armed"
    );
}

/// Grace-timer body: the app never reconnected, so remove it and
/// optionally restart.
async fn grace_expired(state: &Arc<CloudState>, user_id: &str, package_name: &str) {
    let Some(session) = state.registry.get(user_id).await else {
        return;
    };
    let mut session_state = session.state.lock().await;
    session_state.reconnect_timers.remove(package_name);
    if session_state.app_connections.contains_key(package_name) {
        return; // reconnected inside the window
    }
    if !session_state.active_app_sessions.iter().any(|p| p == package_name) {
        return;
    }
    session_state.active_app_sessions.retain(|p| p != package_name);
    session.push_app_state(&session_state);
    drop(session_state);

    tracing::info!(user_id, package_name, "reconnect grace expired; app removed");
    state.services.user_store.remove_running_app(user_id, package_name).await;

    if state.config.tpa_auto_restart {
        tokio::time::sleep(state.config.tpa_restart_delay()).await;
        if let Err(e) = start_app(state, &session, package_name).await {
            tracing::warn!(user_id, package_name, err = %e, "auto-restart failed");
        }
    }
}

/// Re-derive microphone and transcription-stream state from the
/// current subscription sets.
pub async fn sync_media_state(state: &Arc<CloudState>, session: &Arc<Session>) {
    let (has_media, languages) = {
        let session_state = session.state.lock().await;
        let languages: Vec<String> = session_state
            .subscriptions
            .minimal_language_subs()
            .iter()
            .map(ToString::to_string)
            .collect();
        (session_state.subscriptions.has_media_subs(), languages)
    };

    state.services.transcription.update_streams(session, languages).await;
    mic::request(state, session, has_media).await;
}

/// RFC1918 / loopback / link-local check for system-app connect-backs.
fn is_internal_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                // Unique-local fc00::/7.
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
