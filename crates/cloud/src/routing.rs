// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing engine: dispatches inbound frames and fans broadcastable
//! events out to subscribed TPAs.
//!
//! JSON frames from the glasses are dispatched on their `type` tag;
//! binary frames take the audio fast path (optional codec decode, raw
//! fan-out, transcription feed). Per (glasses → TPA) pair, delivery
//! order follows inbound order.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::lifecycle;
use crate::protocol::stream::{StreamDescriptor, StreamType};
use crate::protocol::{
    frame_type, virtual_session_id, AppRef, GlassesFrame, LocationUpdate, PhotoResponseIn,
    SubscriptionUpdate, TpaFrame, TpaPhotoRequest, VideoStreamResponseIn,
};
use crate::session::{photo, Session};
use crate::state::CloudState;

// ── glasses inbound ───────────────────────────────────────────────────

/// Dispatch one JSON frame from the glasses channel.
pub async fn handle_glasses_text(state: &Arc<CloudState>, session: &Arc<Session>, text: &str) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        session
            .send_to_glasses(&GlassesFrame::ConnectionError {
                message: "unparseable frame".to_owned(),
            })
            .await;
        return;
    };
    let Some(kind) = frame_type(&value).map(str::to_owned) else {
        session
            .send_to_glasses(&GlassesFrame::ConnectionError {
                message: "frame missing type".to_owned(),
            })
            .await;
        return;
    };

    match kind.as_str() {
        "connection_init" => {
            let session_state = session.state.lock().await;
            let ack = GlassesFrame::ConnectionAck {
                session_id: session.user_id.clone(),
                user_session: session.snapshot(&session_state),
            };
            session_state.send_to_glasses(&ack);
        }
        "start_app" => match serde_json::from_value::<AppRef>(value) {
            Ok(msg) => {
                let _ = lifecycle::start_app(state, session, &msg.package_name).await;
            }
            Err(_) => invalid_shape(session, &kind).await,
        },
        "stop_app" => match serde_json::from_value::<AppRef>(value) {
            Ok(msg) => {
                let _ = lifecycle::stop_app(state, session, &msg.package_name, "user_command").await;
            }
            Err(_) => invalid_shape(session, &kind).await,
        },
        "glasses_connection_state" => {
            let model = value.get("modelName").and_then(Value::as_str).map(str::to_owned);
            let status = value.get("status").and_then(Value::as_str).unwrap_or("unknown").to_owned();
            {
                let mut session_state = session.state.lock().await;
                if model.is_some() {
                    session_state.glasses_model = model.clone();
                }
            }
            state.services.analytics.track_event(
                "glasses_connection_state",
                &session.user_id,
                serde_json::json!({ "status": status, "modelName": model }),
            );
        }
        "vad" => {
            broadcast(session, &StreamDescriptor::Plain(StreamType::Vad), value).await;
        }
        "location_update" => match serde_json::from_value::<LocationUpdate>(value.clone()) {
            Ok(msg) => {
                {
                    let mut session_state = session.state.lock().await;
                    session_state.last_location = Some(value.clone());
                }
                state.services.user_store.set_location(&session.user_id, msg.lat, msg.lng).await;
                broadcast(session, &StreamDescriptor::Plain(StreamType::LocationUpdate), value)
                    .await;
            }
            Err(_) => invalid_shape(session, &kind).await,
        },
        "calendar_event" => {
            {
                let mut session_state = session.state.lock().await;
                session_state.last_calendar_event = Some(value.clone());
            }
            broadcast(session, &StreamDescriptor::Plain(StreamType::CalendarEvent), value)
                .await;
        }
        "photo_response" => match serde_json::from_value::<PhotoResponseIn>(value) {
            Ok(msg) => photo::process_response(session, &msg.request_id, &msg.photo_url).await,
            Err(_) => invalid_shape(session, &kind).await,
        },
        "video_stream_response" => match serde_json::from_value::<VideoStreamResponseIn>(value) {
            Ok(msg) => {
                session
                    .send_to_app(
                        &msg.app_id,
                        &TpaFrame::VideoStreamResponse {
                            stream_url: msg.stream_url,
                            app_id: msg.app_id.clone(),
                        },
                    )
                    .await;
            }
            Err(_) => invalid_shape(session, &kind).await,
        },
        "settings_update_request" => {
            let session_state = session.state.lock().await;
            let frame = GlassesFrame::SettingsUpdate { settings: session_state.os_settings.clone() };
            session_state.send_to_glasses(&frame);
        }
        "core_status_update" => {
            let mut session_state = session.state.lock().await;
            if let Some(settings) = value.get("status").and_then(|s| s.get("settings")) {
                session_state.os_settings = settings.clone();
            }
            session_state.core_status = value;
        }
        // Generic pass-through events broadcast under their own type.
        other => match StreamType::parse(other) {
            Some(stream_type) => {
                broadcast(session, &StreamDescriptor::Plain(stream_type), value).await;
            }
            None => {
                tracing::debug!(user_id = %session.user_id, kind = other, "unhandled glasses frame");
            }
        },
    }
}

/// Audio fast path for a binary frame from the glasses.
pub async fn handle_glasses_binary(state: &Arc<CloudState>, session: &Arc<Session>, data: Bytes) {
    let Some(pcm) = state.services.codec.decode(&data) else {
        tracing::debug!(user_id = %session.user_id, bytes = data.len(), "undecodable audio frame dropped");
        return;
    };

    let sequence = state.next_audio_sequence();
    let (ready, transcribing) = {
        let mut session_state = session.state.lock().await;
        // Raw-byte fan-out, no JSON envelope.
        for package_name in session_state
            .subscriptions
            .subscribers_of(&StreamDescriptor::Plain(StreamType::AudioChunk))
        {
            if let Some(conn) = session_state.app_connections.get(&package_name) {
                conn.handle.send_binary(pcm.clone());
            }
        }
        let ready = session_state.audio.push(sequence, pcm, crate::protocol::epoch_ms());
        (ready, session_state.is_transcribing)
    };

    if transcribing {
        for frame in ready {
            state.services.transcription.feed(session, frame).await;
        }
    }
}

// ── transcription engine callbacks ────────────────────────────────────

/// Dispatch a transcription result produced by the speech engine.
pub async fn handle_transcription_event(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    payload: Value,
) {
    let language = payload
        .get("transcribeLanguage")
        .and_then(Value::as_str)
        .unwrap_or("en-US")
        .to_owned();

    {
        let mut session_state = session.state.lock().await;
        let segment = crate::session::transcript::TranscriptSegment {
            text: payload.get("text").and_then(Value::as_str).unwrap_or_default().to_owned(),
            timestamp_ms: crate::protocol::epoch_ms(),
            is_final: payload.get("isFinal").and_then(Value::as_bool).unwrap_or(false),
        };
        session_state.transcript.insert(&language, segment);
    }

    let descriptor = StreamDescriptor::Language(StreamType::Transcription, language);
    broadcast(session, &descriptor, payload).await;
}

/// Dispatch a translation result produced by the speech engine.
pub async fn handle_translation_event(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    payload: Value,
) {
    let source = payload
        .get("transcribeLanguage")
        .and_then(Value::as_str)
        .unwrap_or("en-US")
        .to_owned();
    let target = payload
        .get("translateLanguage")
        .and_then(Value::as_str)
        .unwrap_or("en-US")
        .to_owned();
    let descriptor = StreamDescriptor::Translation { source, target };
    broadcast(session, &descriptor, payload).await;
}

// ── fan-out ───────────────────────────────────────────────────────────

/// Send a `data_stream` envelope to every TPA whose stored set matches
/// the broadcast descriptor.
pub async fn broadcast(
    session: &Arc<Session>,
    descriptor: &StreamDescriptor,
    data: Value,
) {
    let stream_type = descriptor
        .base()
        .map(|t| t.as_str().to_owned())
        .unwrap_or_else(|| descriptor.to_string());

    let session_state = session.state.lock().await;
    let recipients = session_state.subscriptions.subscribers_of(descriptor);
    for package_name in recipients {
        let frame = TpaFrame::DataStream {
            session_id: virtual_session_id(&session.user_id, &package_name),
            stream_type: stream_type.clone(),
            data: data.clone(),
        };
        session_state.send_to_app(&package_name, &frame);
    }
}

// ── TPA inbound ───────────────────────────────────────────────────────

/// Dispatch one JSON frame from an admitted TPA channel.
pub async fn handle_tpa_text(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    package_name: &str,
    text: &str,
) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        session
            .send_to_app(
                package_name,
                &TpaFrame::ConnectionError { message: "unparseable frame".to_owned() },
            )
            .await;
        return;
    };
    let Some(kind) = frame_type(&value).map(str::to_owned) else {
        session
            .send_to_app(
                package_name,
                &TpaFrame::ConnectionError { message: "frame missing type".to_owned() },
            )
            .await;
        return;
    };

    match kind.as_str() {
        "subscription_update" => match serde_json::from_value::<SubscriptionUpdate>(value) {
            Ok(update) => {
                handle_subscription_update(state, session, package_name, update).await;
            }
            Err(_) => {
                session
                    .send_to_app(
                        package_name,
                        &TpaFrame::ConnectionError {
                            message: "malformed subscription_update".to_owned(),
                        },
                    )
                    .await;
            }
        },
        "display_event" => {
            state.services.display.handle_display_event(session, package_name, value).await;
        }
        "dashboard_content_update" => {
            state.services.dashboard.content_update(session, package_name, value).await;
        }
        "dashboard_mode_change" => {
            state.services.dashboard.mode_change(session, value).await;
        }
        "dashboard_system_update" => {
            state.services.dashboard.system_update(session, value).await;
        }
        "photo_request" => {
            let save_to_gallery = serde_json::from_value::<TpaPhotoRequest>(value)
                .map(|r| r.save_to_gallery)
                .unwrap_or(false);
            photo::create_tpa_request(state, session, package_name, save_to_gallery).await;
        }
        "video_stream_request" => {
            session
                .send_to_glasses(&GlassesFrame::VideoStreamRequest {
                    app_id: package_name.to_owned(),
                })
                .await;
        }
        other => {
            tracing::debug!(user_id = %session.user_id, package_name, kind = other, "unhandled TPA frame");
        }
    }
}

/// Apply a `subscription_update`: parse, permission-filter, store, and
/// replay cached one-shot context for newly added interests.
async fn handle_subscription_update(
    state: &Arc<CloudState>,
    session: &Arc<Session>,
    package_name: &str,
    update: SubscriptionUpdate,
) {
    let mut parsed: Vec<StreamDescriptor> = Vec::new();
    for raw in &update.subscriptions {
        match StreamDescriptor::parse_subscription(raw) {
            Some(descriptor) => parsed.push(descriptor),
            None => {
                tracing::warn!(
                    user_id = %session.user_id,
                    package_name,
                    descriptor = %raw,
                    "invalid subscription descriptor dropped"
                );
            }
        }
    }

    let declared = state
        .services
        .catalog
        .get_app(package_name)
        .await
        .map(|app| app.permissions)
        .unwrap_or_default();
    let (allowed, rejected) = crate::session::permission::filter(&declared, parsed);

    if !rejected.is_empty() {
        session
            .send_to_app(
                package_name,
                &TpaFrame::PermissionError {
                    message: "some subscriptions require permissions the app has not declared"
                        .to_owned(),
                    details: rejected,
                },
            )
            .await;
    }

    {
        let mut session_state = session.state.lock().await;

        let location = StreamDescriptor::Plain(StreamType::LocationUpdate);
        let calendar = StreamDescriptor::Plain(StreamType::CalendarEvent);
        let had_location = matches_any(&session_state.subscriptions, package_name, &location);
        let had_calendar = matches_any(&session_state.subscriptions, package_name, &calendar);

        session_state
            .subscriptions
            .update(package_name, allowed.into_iter().collect::<HashSet<_>>());

        let wants_location = matches_any(&session_state.subscriptions, package_name, &location);
        let wants_calendar = matches_any(&session_state.subscriptions, package_name, &calendar);

        // Replay the most recent cached value to newly interested apps.
        if wants_location && !had_location {
            if let Some(data) = session_state.last_location.clone() {
                replay(session, &session_state, package_name, StreamType::LocationUpdate, data);
            }
        }
        if wants_calendar && !had_calendar {
            if let Some(data) = session_state.last_calendar_event.clone() {
                replay(session, &session_state, package_name, StreamType::CalendarEvent, data);
            }
        }

        session.push_app_state(&session_state);
    }

    lifecycle::sync_media_state(state, session).await;
}

fn matches_any(
    subscriptions: &crate::session::subscription::SubscriptionManager,
    package_name: &str,
    descriptor: &StreamDescriptor,
) -> bool {
    subscriptions.subscribers_of(descriptor).iter().any(|p| p == package_name)
}

fn replay(
    session: &Arc<Session>,
    session_state: &crate::session::SessionState,
    package_name: &str,
    stream_type: StreamType,
    data: Value,
) {
    let frame = TpaFrame::DataStream {
        session_id: virtual_session_id(&session.user_id, package_name),
        stream_type: stream_type.as_str().to_owned(),
        data,
    };
    session_state.send_to_app(package_name, &frame);
}

async fn invalid_shape(session: &Arc<Session>, kind: &str) {
    session
        .send_to_glasses(&GlassesFrame::ConnectionError {
            message: format!("malformed {kind} frame"),
        })
        .await;
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod tests;
