#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use shoutrip_core::metadata::encode_metadata_block;
use shoutrip_core::SessionEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A local TCP server that hands every accepted connection to `handler`.
pub struct FakeServer {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU32>,
}

impl FakeServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }
}

pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub fn serve<F, Fut>(listener: TcpListener, handler: F) -> FakeServer
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicU32::new(0));
    let counter = connections.clone();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            tokio::spawn(async move { handler(stream).await });
        }
    });

    FakeServer { addr, connections }
}

pub async fn spawn_server<F, Fut>(handler: F) -> FakeServer
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (listener, _) = bind().await;
    serve(listener, handler)
}

/// A port nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}

/// Consume the first request head (up to the blank line).
pub async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => buf.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Keep the connection open until the client goes away.
pub async fn hold_open(stream: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

pub fn icy_ok_head(metaint: usize, name: &str) -> String {
    format!(
        "ICY 200 OK\r\nicy-notice1:test server\r\nicy-name:{}\r\nicy-genre:Test\r\n\
         content-type:audio/mpeg\r\nicy-metaint:{}\r\n\r\n",
        name, metaint
    )
}

/// One audio block of `metaint` bytes of `fill`, followed by a metadata
/// block carrying `title` (or an empty block when `None`).
pub fn icy_chunk(metaint: usize, fill: u8, title: Option<&str>) -> Vec<u8> {
    let mut out = vec![fill; metaint];
    match title {
        Some(t) => out.extend(encode_metadata_block(&[("StreamTitle", t), ("StreamUrl", "x")])),
        None => out.push(0),
    }
    out
}

pub async fn write_all(stream: &mut TcpStream, bytes: &[u8]) {
    let _ = stream.write_all(bytes).await;
    let _ = stream.flush().await;
}

/// Drain events until one satisfies `pred`; panics if the channel closes.
pub async fn wait_for_event<P>(rx: &mut mpsc::Receiver<SessionEvent>, pred: P) -> SessionEvent
where
    P: Fn(&SessionEvent) -> bool,
{
    let fut = async {
        while let Some(ev) = rx.recv().await {
            if pred(&ev) {
                return ev;
            }
        }
        panic!("event channel closed before the expected event");
    };
    tokio::time::timeout(std::time::Duration::from_secs(10), fut)
        .await
        .expect("timed out waiting for event")
}

pub fn track_titles(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|ev| match ev {
            SessionEvent::TrackChanged(info) => Some(info.title.clone()),
            _ => None,
        })
        .collect()
}
