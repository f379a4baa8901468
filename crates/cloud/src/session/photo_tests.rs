// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::test_support::{admit_tpa, connect_glasses, drain_frames, frames_of, test_state};

const APP: &str = "com.example.app";

#[tokio::test]
async fn tpa_photo_round_trip() {
    let state = test_state();
    let (session, mut glasses_rx) = connect_glasses(&state, "u1").await;
    let (_handle, mut tpa_rx) = admit_tpa(&state, "u1", APP).await;

    let id = create_tpa_request(&state, &session, APP, false).await;

    // The glasses receive the capture request.
    let frames = drain_frames(&mut glasses_rx);
    let requests = frames_of(&frames, "photo_request");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["requestId"], id.as_str());
    assert_eq!(requests[0]["appId"], APP);

    // The upload is forwarded to the TPA and the record deleted.
    process_response(&session, &id, "https://cdn.example.com/p.jpg").await;
    let frames = drain_frames(&mut tpa_rx);
    let responses = frames_of(&frames, "photo_response");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["photoUrl"], "https://cdn.example.com/p.jpg");

    // A second identical response is ignored.
    process_response(&session, &id, "https://cdn.example.com/p.jpg").await;
    assert!(drain_frames(&mut tpa_rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn tpa_request_times_out_with_structured_error() {
    let state = test_state();
    let (session, _glasses_rx) = connect_glasses(&state, "u1").await;
    let (_handle, mut tpa_rx) = admit_tpa(&state, "u1", APP).await;

    let id = create_tpa_request(&state, &session, APP, false).await;
    drain_frames(&mut tpa_rx);

    // Still pending short of the 30 s TPA timeout.
    tokio::time::advance(Duration::from_secs(29)).await;
    tokio::task::yield_now().await;
    assert!(session.state.lock().await.photos.contains(&id));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!session.state.lock().await.photos.contains(&id));

    let frames = drain_frames(&mut tpa_rx);
    let timeouts = frames_of(&frames, "photo_timeout");
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0]["requestId"], id.as_str());

    // A response after the timeout finds nothing to correlate.
    process_response(&session, &id, "https://late.example.com/p.jpg").await;
    assert!(drain_frames(&mut tpa_rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn system_request_defaults_to_gallery_and_longer_timeout() {
    let state = test_state();
    let (session, mut glasses_rx) = connect_glasses(&state, "u1").await;

    let id = create_system_request(&state, &session).await;
    {
        let session_state = session.state.lock().await;
        assert!(session_state.photos.contains(&id));
    }
    let frames = drain_frames(&mut glasses_rx);
    assert_eq!(frames_of(&frames, "photo_request").len(), 1);

    // Survives the TPA timeout, expires at the system timeout.
    tokio::time::advance(Duration::from_secs(45)).await;
    tokio::task::yield_now().await;
    assert!(session.state.lock().await.photos.contains(&id));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!session.state.lock().await.photos.contains(&id));
}

#[tokio::test]
async fn channel_closure_sweeps_pending_requests() {
    let state = test_state();
    let (session, _glasses_rx) = connect_glasses(&state, "u1").await;
    let (_handle, _tpa_rx) = admit_tpa(&state, "u1", APP).await;

    let id_a = create_tpa_request(&state, &session, APP, false).await;
    let id_b = create_tpa_request(&state, &session, APP, true).await;

    let mut session_state = session.state.lock().await;
    assert_eq!(session_state.photos.len(), 2);
    assert_eq!(session_state.photos.remove_for_app(APP), 2);
    assert!(!session_state.photos.contains(&id_a));
    assert!(!session_state.photos.contains(&id_b));
}

#[test]
fn correlator_take_is_single_shot() {
    let mut correlator = PhotoCorrelator::new();
    correlator.insert(PhotoRequest {
        id: "r1".to_owned(),
        user_id: "u1".to_owned(),
        origin: PhotoOrigin::System,
        app_id: None,
        save_to_gallery: true,
        created_ms: 0,
        timer: None,
    });

    assert!(correlator.take("r1").is_some());
    assert!(correlator.take("r1").is_none());
    assert!(correlator.is_empty());
}
