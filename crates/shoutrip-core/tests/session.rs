mod common;

use std::time::Duration;

use common::*;
use shoutrip_core::{Config, RecorderError, RecordingSession, RecordingState, SessionEvent};

fn config_for(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.recorder.output_dir = dir.to_path_buf();
    config.recorder.write_id3_tag = false;
    config
}

#[tokio::test]
async fn session_records_until_stopped() {
    let server = spawn_server(|mut stream| async move {
        read_request(&mut stream).await;
        write_all(&mut stream, icy_ok_head(64, "Session FM").as_bytes()).await;
        write_all(&mut stream, &icy_chunk(64, 0x00, Some("Midway"))).await;
        write_all(&mut stream, &icy_chunk(64, 0x01, Some("Band - Tune"))).await;
        write_all(&mut stream, &icy_chunk(64, 0x02, None)).await;
        hold_open(&mut stream).await;
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut events) = RecordingSession::new(server.url("/"), &config_for(dir.path()));

    session.start().await.unwrap();
    assert!(session.is_recording());

    wait_for_event(&mut events, |ev| {
        matches!(ev, SessionEvent::TrackChanged(info) if info.title == "Band - Tune")
    })
    .await;
    wait_for_event(&mut events, |ev| {
        matches!(ev, SessionEvent::Progress { song_bytes: 64, .. })
    })
    .await;

    let status = session.status();
    assert_eq!(status.station.as_deref(), Some("Session FM"));
    assert_eq!(status.track.as_deref(), Some("Band - Tune"));
    assert_eq!(status.state, RecordingState::Recording);

    session.stop().await.unwrap();
    assert!(!session.is_recording());

    let finished = wait_for_event(&mut events, |ev| matches!(ev, SessionEvent::Finished { .. })).await;
    assert_eq!(finished, SessionEvent::Finished { error: None });

    let saved = dir.path().join("Session FM").join("Band - Tune.mp3");
    assert_eq!(std::fs::read(saved).unwrap(), vec![0x02; 64]);
    assert_eq!(session.status().tracks_saved, 1);
    assert_eq!(session.status().state, RecordingState::Closed);

    // A second stop is a no-op.
    session.stop().await.unwrap();
}

#[tokio::test]
async fn rejected_start_creates_nothing() {
    let server = spawn_server(|mut stream| async move {
        read_request(&mut stream).await;
        write_all(&mut stream, b"ICY 401 Service Unavailable\r\n\r\n").await;
        hold_open(&mut stream).await;
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut events) = RecordingSession::new(server.url("/"), &config_for(dir.path()));

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, RecorderError::ProtocolRejected(_)));
    assert!(!session.is_recording());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let finished = wait_for_event(&mut events, |ev| matches!(ev, SessionEvent::Finished { .. })).await;
    assert!(matches!(finished, SessionEvent::Finished { error: Some(_) }));
}

#[tokio::test]
async fn server_hangup_ends_the_session_with_an_error() {
    let server = spawn_server(|mut stream| async move {
        read_request(&mut stream).await;
        write_all(&mut stream, icy_ok_head(32, "Flaky FM").as_bytes()).await;
        write_all(&mut stream, &icy_chunk(32, 0x00, Some("Only"))).await;
        // Read the second request, then hang up.
        read_request(&mut stream).await;
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (mut session, _events) = RecordingSession::new(server.url("/"), &config_for(dir.path()));
    session.start().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), session.wait())
        .await
        .expect("worker did not finish");
    assert!(matches!(result, Err(RecorderError::MetadataHeader(_))));
    assert!(!session.is_recording());
}

#[tokio::test]
async fn stop_returns_even_when_events_are_never_read() {
    let server = spawn_server(|mut stream| async move {
        read_request(&mut stream).await;
        write_all(&mut stream, icy_ok_head(16, "Busy FM").as_bytes()).await;
        let mut body = icy_chunk(16, 0x00, Some("A"));
        for _ in 0..150 {
            body.extend(icy_chunk(16, 0x01, None));
        }
        body.extend(icy_chunk(16, 0x02, Some("B")));
        write_all(&mut stream, &body).await;
        hold_open(&mut stream).await;
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    // The receiver stays alive but is never read, so the channel fills up.
    let (mut session, events) = RecordingSession::new(server.url("/"), &config_for(dir.path()));
    session.start().await.unwrap();

    // "B" is published just before its track event, which cannot fit.
    let mut status = session.subscribe_status();
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.track.as_deref() == Some("B")),
    )
    .await
    .expect("second title never arrived")
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), session.stop())
        .await
        .expect("stop() hung on a full event channel")
        .unwrap();
    assert!(!session.is_recording());
    assert!(dir.path().join("Busy FM").join("B.mp3").exists());
    drop(events);
}

#[tokio::test]
async fn abandoned_start_can_still_be_stopped() {
    let (closed_tx, mut closed_rx) = tokio::sync::mpsc::unbounded_channel();
    let server = spawn_server(move |mut stream| {
        let closed_tx = closed_tx.clone();
        async move {
            // Accept the request but never answer it.
            read_request(&mut stream).await;
            hold_open(&mut stream).await;
            let _ = closed_tx.send(());
        }
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (mut session, _events) = RecordingSession::new(server.url("/"), &config_for(dir.path()));

    let started = tokio::time::timeout(Duration::from_millis(300), session.start()).await;
    assert!(started.is_err(), "handshake should still be pending");
    assert!(session.is_recording());

    tokio::time::timeout(Duration::from_secs(5), session.stop())
        .await
        .expect("stop() hung during the handshake")
        .unwrap();
    assert!(!session.is_recording());

    // The worker released its socket.
    tokio::time::timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .expect("connection was never closed")
        .unwrap();
    assert_eq!(server.connection_count(), 1);
}
