// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios over real WebSockets: connect/auth, TPA init,
//! subscription-driven broadcast, permission rejection, photo round
//! trip, audio fast path, and reconnect grace.

use std::time::Duration;

use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use glasshub::services::Permission;
use glasshub_specs::{
    await_close, next_binary, next_json, next_json_of, send_json, spawn_backend, spec_app,
    TestCloud, USER,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const APP: &str = "com.example.captions";

fn catalog_app(public_url: &str) -> glasshub::services::AppDescriptor {
    spec_app(APP, &[Permission::All], public_url)
}

// ── connection & auth ─────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_session_count() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![]).await?;
    let _glasses = cloud.connect_glasses().await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/health", cloud.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["sessions"], 1);
    Ok(())
}

#[tokio::test]
async fn glasses_connect_acks_with_user_session() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![]).await?;
    let (mut ws, _) =
        tokio_tungstenite::connect_async(cloud.glasses_url(glasshub_specs::TOKEN)).await?;

    let ack = next_json(&mut ws, TIMEOUT).await?;
    assert_eq!(ack["type"], "connection_ack");
    assert_eq!(ack["sessionId"], USER);
    assert_eq!(ack["userSession"]["userId"], USER);
    Ok(())
}

#[tokio::test]
async fn invalid_token_gets_auth_error_and_1008() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![]).await?;
    let (mut ws, _) = tokio_tungstenite::connect_async(cloud.glasses_url("bogus")).await?;

    let err = next_json(&mut ws, TIMEOUT).await?;
    assert_eq!(err["type"], "auth_error");
    let code = await_close(&mut ws, TIMEOUT).await?;
    assert_eq!(code, Some(1008));
    Ok(())
}

#[tokio::test]
async fn tpa_init_with_bad_key_gets_1008() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![catalog_app("http://127.0.0.1:9")]).await?;
    let _glasses = cloud.connect_glasses().await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(cloud.tpa_url()).await?;
    send_json(
        &mut ws,
        &serde_json::json!({
            "type": "tpa_connection_init",
            "sessionId": format!("{USER}-{APP}"),
            "packageName": APP,
            "apiKey": "not-the-key",
        }),
    )
    .await?;

    let err = next_json(&mut ws, TIMEOUT).await?;
    assert_eq!(err["type"], "connection_error");
    let code = await_close(&mut ws, TIMEOUT).await?;
    assert_eq!(code, Some(1008));
    Ok(())
}

// ── start webhook ─────────────────────────────────────────────────────

#[tokio::test]
async fn start_app_posts_session_webhook() -> anyhow::Result<()> {
    let (backend, mut webhooks) = spawn_backend().await?;
    let cloud = TestCloud::start(vec![catalog_app(&backend)]).await?;
    let mut glasses = cloud.connect_glasses().await?;

    send_json(&mut glasses, &serde_json::json!({ "type": "start_app", "packageName": APP }))
        .await?;

    let payload = tokio::time::timeout(TIMEOUT, webhooks.recv())
        .await
        .map_err(|_| anyhow::anyhow!("webhook never arrived"))?
        .ok_or_else(|| anyhow::anyhow!("backend dropped"))?;
    assert_eq!(payload["type"], "session_request");
    assert_eq!(payload["sessionId"], format!("{USER}-{APP}"));
    assert_eq!(payload["userId"], USER);

    let change = next_json_of(&mut glasses, "app_state_change", TIMEOUT).await?;
    let active = change["userSession"]["activeAppSessions"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    assert!(active.iter().any(|a| a == APP));
    Ok(())
}

// ── subscription → broadcast (S1) ─────────────────────────────────────

#[tokio::test]
async fn subscription_update_routes_streams_and_raises_mic() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![catalog_app("http://127.0.0.1:9")]).await?;
    let mut glasses = cloud.connect_glasses().await?;
    let mut tpa = cloud.connect_tpa(APP).await?;

    send_json(
        &mut tpa,
        &serde_json::json!({
            "type": "subscription_update",
            "packageName": APP,
            "subscriptions": ["transcription", "vad"],
        }),
    )
    .await?;

    // The glasses see the snapshot and the first microphone edge.
    let change = next_json_of(&mut glasses, "app_state_change", TIMEOUT).await?;
    assert!(change["userSession"]["activeAppSessions"]
        .as_array()
        .is_some_and(|apps| apps.iter().any(|a| a == APP)));
    let mic = next_json_of(&mut glasses, "microphone_state_change", TIMEOUT).await?;
    assert_eq!(mic["isMicrophoneEnabled"], true);

    // A VAD event from the glasses reaches the subscriber.
    send_json(&mut glasses, &serde_json::json!({ "type": "vad", "status": true })).await?;
    let stream = next_json_of(&mut tpa, "data_stream", TIMEOUT).await?;
    assert_eq!(stream["sessionId"], format!("{USER}-{APP}"));
    assert_eq!(stream["streamType"], "vad");
    assert_eq!(stream["data"]["status"], true);
    Ok(())
}

// ── permission rejection (S2) ─────────────────────────────────────────

#[tokio::test]
async fn permission_rejection_is_structured() -> anyhow::Result<()> {
    let app = spec_app("com.example.geo", &[Permission::Location], "http://127.0.0.1:9");
    let cloud = TestCloud::start(vec![app]).await?;
    let _glasses = cloud.connect_glasses().await?;
    let mut tpa = cloud.connect_tpa("com.example.geo").await?;

    send_json(
        &mut tpa,
        &serde_json::json!({
            "type": "subscription_update",
            "packageName": "com.example.geo",
            "subscriptions": ["audio_chunk", "location_update", "button_press"],
        }),
    )
    .await?;

    let err = next_json_of(&mut tpa, "permission_error", TIMEOUT).await?;
    let details = err["details"].as_array().cloned().unwrap_or_default();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0]["stream"], "audio_chunk");
    assert_eq!(details[0]["requiredPermission"], "microphone");
    Ok(())
}

// ── photo round trip (S5) ─────────────────────────────────────────────

#[tokio::test]
async fn photo_request_and_response_correlate() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![catalog_app("http://127.0.0.1:9")]).await?;
    let mut glasses = cloud.connect_glasses().await?;
    let mut tpa = cloud.connect_tpa(APP).await?;

    send_json(
        &mut tpa,
        &serde_json::json!({
            "type": "photo_request",
            "packageName": APP,
            "saveToGallery": false,
        }),
    )
    .await?;

    let request = next_json_of(&mut glasses, "photo_request", TIMEOUT).await?;
    let request_id = request["requestId"].as_str().unwrap_or_default().to_owned();
    assert!(!request_id.is_empty());
    assert_eq!(request["appId"], APP);

    send_json(
        &mut glasses,
        &serde_json::json!({
            "type": "photo_response",
            "requestId": request_id,
            "photoUrl": "https://cdn.example.com/p.jpg",
        }),
    )
    .await?;

    let response = next_json_of(&mut tpa, "photo_response", TIMEOUT).await?;
    assert_eq!(response["requestId"], request_id.as_str());
    assert_eq!(response["photoUrl"], "https://cdn.example.com/p.jpg");
    Ok(())
}

// ── audio fast path ───────────────────────────────────────────────────

#[tokio::test]
async fn binary_audio_reaches_audio_subscriber_raw() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![catalog_app("http://127.0.0.1:9")]).await?;
    let mut glasses = cloud.connect_glasses().await?;
    let mut tpa = cloud.connect_tpa(APP).await?;

    send_json(
        &mut tpa,
        &serde_json::json!({
            "type": "subscription_update",
            "packageName": APP,
            "subscriptions": ["audio_chunk"],
        }),
    )
    .await?;
    // Wait until the subscription applied (snapshot push observed).
    let _ = next_json_of(&mut glasses, "app_state_change", TIMEOUT).await?;

    glasses.send(Message::Binary(vec![9u8, 8, 7, 6].into())).await?;

    let frame = next_binary(&mut tpa, TIMEOUT).await?;
    assert_eq!(frame, vec![9u8, 8, 7, 6]);
    Ok(())
}

#[tokio::test]
async fn binary_from_tpa_is_ignored() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![catalog_app("http://127.0.0.1:9")]).await?;
    let mut glasses = cloud.connect_glasses().await?;
    let mut tpa = cloud.connect_tpa(APP).await?;

    tpa.send(Message::Binary(vec![1u8, 2, 3].into())).await?;

    // The channel stays usable afterwards.
    send_json(
        &mut tpa,
        &serde_json::json!({
            "type": "subscription_update",
            "packageName": APP,
            "subscriptions": ["button_press"],
        }),
    )
    .await?;
    let _ = next_json_of(&mut glasses, "app_state_change", TIMEOUT).await?;

    send_json(&mut glasses, &serde_json::json!({ "type": "button_press", "button": "main" }))
        .await?;
    let stream = next_json_of(&mut tpa, "data_stream", TIMEOUT).await?;
    assert_eq!(stream["streamType"], "button_press");
    Ok(())
}

// ── reconnect grace (S3) ──────────────────────────────────────────────

#[tokio::test]
async fn tpa_reconnect_within_grace_preserves_membership() -> anyhow::Result<()> {
    let cloud = TestCloud::start(vec![catalog_app("http://127.0.0.1:9")]).await?;
    let mut glasses = cloud.connect_glasses().await?;
    let tpa = cloud.connect_tpa(APP).await?;
    let _ = next_json_of(&mut glasses, "app_state_change", TIMEOUT).await?;

    // Drop the TPA socket without an explicit stop.
    drop(tpa);
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    // Still active inside the grace window.
    send_json(&mut glasses, &serde_json::json!({ "type": "connection_init" })).await?;
    let ack = next_json_of(&mut glasses, "connection_ack", TIMEOUT).await?;
    assert!(ack["userSession"]["activeAppSessions"]
        .as_array()
        .is_some_and(|apps| apps.iter().any(|a| a == APP)));

    // Reconnect before expiry; membership never flaps.
    let _tpa2 = cloud.connect_tpa(APP).await?;
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    send_json(&mut glasses, &serde_json::json!({ "type": "connection_init" })).await?;
    let ack = next_json_of(&mut glasses, "connection_ack", TIMEOUT).await?;
    assert!(ack["userSession"]["activeAppSessions"]
        .as_array()
        .is_some_and(|apps| apps.iter().any(|a| a == APP)));
    Ok(())
}
