mod common;

use std::time::Duration;

use common::*;
use shoutrip_core::config::StreamConfig;
use shoutrip_core::playlist::parse_playlist;
use shoutrip_core::{EventSink, PlaylistResolver, RecorderError, StreamConnector};

fn resolver() -> PlaylistResolver {
    PlaylistResolver::new(Duration::from_secs(2))
}

#[tokio::test]
async fn resolver_skips_dead_entries() {
    let dead = closed_port().await;
    let live = spawn_server(|mut stream| async move { hold_open(&mut stream).await }).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("station.pls");
    let pls = format!(
        "[playlist]\nNumberOfEntries=2\n\
         File1=http://{dead}/\nTitle1=(#1 - 1/2) Dead relay\nLength1=-1\n\
         File2=http://{live}/stream\nTitle2=(#2 - 1/2) Live relay\nLength2=-1\nVersion=2\n",
        dead = dead,
        live = live.addr
    );
    std::fs::write(&path, &pls).unwrap();

    let declared: Vec<String> = parse_playlist(&pls).into_iter().map(|e| e.address).collect();
    let resolved = resolver().resolve(path.to_str().unwrap()).await.unwrap();

    assert!(declared.contains(&resolved));
    assert_eq!(resolved, live.url("/stream"));
}

#[tokio::test]
async fn resolver_reports_when_nothing_answers() {
    let dead = closed_port().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dead.m3u");
    std::fs::write(&path, format!("#EXTM3U\n#EXTINF:-1,Gone\nhttp://{}/\n", dead)).unwrap();

    let err = resolver().resolve(path.to_str().unwrap()).await.unwrap_err();
    assert!(matches!(err, RecorderError::NoReachableStream(_)));
}

#[tokio::test]
async fn missing_playlist_file_is_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.pls");
    let err = resolver().resolve(path.to_str().unwrap()).await.unwrap_err();
    assert!(matches!(err, RecorderError::NoReachableStream(_)));
}

#[tokio::test]
async fn connector_resolves_playlist_targets_first() {
    let live = spawn_server(|mut stream| async move {
        read_request(&mut stream).await;
        write_all(&mut stream, icy_ok_head(32, "Playlist FM").as_bytes()).await;
        hold_open(&mut stream).await;
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("listen.pls");
    std::fs::write(
        &path,
        format!("[playlist]\nFile1={}\nNumberOfEntries=1\n", live.url("/;")),
    )
    .unwrap();

    let mut c = StreamConnector::new(
        path.to_str().unwrap(),
        StreamConfig::default(),
        EventSink::detached(),
    );
    c.connect().await.unwrap();

    assert!(c.is_connected());
    assert_eq!(c.target(), live.url("/;"));
    assert_eq!(c.metadata().station_name(), Some("Playlist FM"));
    // Probing and the handshake each open one connection.
    assert_eq!(live.connection_count(), 2);
}
