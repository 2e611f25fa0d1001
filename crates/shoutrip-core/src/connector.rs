//! ICY stream connector.
//!
//! Owns the TCP socket to a SHOUTcast/Icecast server, performs the ICY
//! handshake, follows `Location` redirects, and exposes the byte-level reads
//! the recorder needs.
//!
//! Handshake
//! ─────────
//! • Two `GET` requests go out back to back, one with the bare path and one
//!   with the full URL.  Old SHOUTcast servers only answer one of the forms.
//! • `Icy-MetaData:1` is mandatory: without it the server never interleaves
//!   metadata and track boundaries cannot be detected.
//! • The status line is classified as OK (`ICY 200 OK`, `HTTP/1.x 200 OK`),
//!   rejected (`ICY 4xx`), or anything else.  "Anything else" is a redirect
//!   candidate if the response carried a `Location` header.
//! • Every attempt counts towards `max_attempts`, the first one included.

use regex::Regex;
use reqwest::Url;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::{RecorderError, Result};
use crate::events::EventSink;
use crate::metadata::{MetadataDictionary, KEY_LOCATION, KEY_TARGET_URL};
use crate::playlist::{is_playlist_url, resolve_relative_url, PlaylistResolver};

pub const DEFAULT_PORT: u16 = 80;

/// Host, port and request path extracted from a stream URL.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamAddress {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl StreamAddress {
    pub fn parse(target: &str) -> Result<Self> {
        let url = Url::parse(target.trim())
            .map_err(|e| RecorderError::MalformedAddress(format!("{}: {}", target, e)))?;
        if url.scheme() != "http" {
            return Err(RecorderError::MalformedAddress(format!(
                "{}: only http streams are supported",
                target
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RecorderError::MalformedAddress(format!("{}: no host", target)))?
            .to_string();

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(q) = url.query() {
            path.push('?');
            path.push_str(q);
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            path,
        })
    }
}

/// How the first response line reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLine {
    Ok,
    Rejected,
    Other,
}

pub fn classify_status_line(line: &str) -> StatusLine {
    let matches = |pattern: &str| {
        Regex::new(pattern)
            .map(|re| re.is_match(line))
            .unwrap_or(false)
    };

    if matches(r"(?i)^ICY\s*4\d\d") {
        StatusLine::Rejected
    } else if matches(r"(?i)^ICY\s*\w*\s*OK") || matches(r"(?i)^HTTP.*OK") {
        StatusLine::Ok
    } else {
        StatusLine::Other
    }
}

fn request(target: &str, user_agent: &str) -> String {
    format!(
        "GET {} HTTP/1.0\r\nIcy-MetaData:1\r\nuser-agent:{}\r\n\r\n",
        target, user_agent
    )
}

enum Attempt {
    Connected,
    NotOk(String),
}

/// One ICY stream session: socket, handshake state, and the metadata
/// dictionary the server populates.
pub struct StreamConnector {
    target: String,
    address: Option<StreamAddress>,
    attempts: u32,
    connected: bool,
    reader: Option<BufReader<TcpStream>>,
    metadata: MetadataDictionary,
    settings: StreamConfig,
    events: EventSink,
}

impl StreamConnector {
    pub fn new(target: impl Into<String>, settings: StreamConfig, events: EventSink) -> Self {
        let target = target.into();
        Self {
            metadata: MetadataDictionary::new(&target),
            target,
            address: None,
            attempts: 0,
            connected: false,
            reader: None,
            settings,
            events,
        }
    }

    /// The URL currently being connected to (changes on redirects).
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn address(&self) -> Option<&StreamAddress> {
        self.address.as_ref()
    }

    /// Handshake attempts made so far, redirects included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.reader.is_some()
    }

    pub fn metadata(&self) -> &MetadataDictionary {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataDictionary {
        &mut self.metadata
    }

    /// Reader and dictionary together, for the recorder loop.  `None` until
    /// the handshake has succeeded.
    pub fn stream_parts(&mut self) -> Option<(&mut BufReader<TcpStream>, &mut MetadataDictionary)> {
        if !self.connected {
            return None;
        }
        let reader = self.reader.as_mut()?;
        Some((reader, &mut self.metadata))
    }

    /// Connect and complete the ICY handshake, following redirects.
    pub async fn connect(&mut self) -> Result<()> {
        loop {
            if is_playlist_url(&self.target) {
                let resolver = PlaylistResolver::new(self.settings.probe_timeout());
                self.events.status(format!("Resolving playlist {}", self.target));
                self.target = resolver.resolve(&self.target).await?;
                self.metadata.insert(KEY_TARGET_URL, self.target.clone());
            }

            self.attempts += 1;
            self.events.status("[Connecting...]");
            self.metadata.remove(KEY_LOCATION);

            let status_line = match self.attempt().await {
                Ok(Attempt::Connected) => return Ok(()),
                Ok(Attempt::NotOk(line)) => line,
                Err(e) => {
                    self.close().await;
                    return Err(e);
                }
            };

            let location = self.metadata.location().map(str::to_string);
            self.close_socket().await;

            match location {
                Some(loc) if self.attempts < self.settings.max_attempts => {
                    let next = resolve_relative_url(&self.target, &loc).unwrap_or(loc);
                    self.events.status(format!("Got redirect: {}", next));
                    self.target = next;
                }
                _ if self.attempts >= self.settings.max_attempts => {
                    self.events.status("Too many redirects, terminating...");
                    self.close().await;
                    return Err(RecorderError::TooManyRedirects {
                        attempts: self.attempts,
                    });
                }
                _ => {
                    warn!("Handshake failed for {}: {}", self.target, status_line);
                    return Err(RecorderError::HandshakeFailed(status_line));
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<Attempt> {
        let address = StreamAddress::parse(&self.target)?;
        self.events.status(format!("Trying {}", address.host));

        let mut stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|e| {
                RecorderError::HandshakeFailed(format!(
                    "connect to {}:{} failed: {}",
                    address.host, address.port, e
                ))
            })?;
        debug!("socket open to {}:{}", address.host, address.port);

        let by_path = request(&address.path, &self.settings.user_agent);
        let by_url = request(&self.target, &self.settings.user_agent);
        for req in [by_path, by_url] {
            stream.write_all(req.as_bytes()).await.map_err(|e| {
                RecorderError::HandshakeFailed(format!("error writing to stream: {}", e))
            })?;
        }

        self.reader = Some(BufReader::new(stream));
        self.address = Some(address);

        let status_line = self
            .read_line()
            .await
            .map_err(|e| RecorderError::HandshakeFailed(format!("no response: {}", e)))?;
        self.events.status(status_line.clone());

        match classify_status_line(&status_line) {
            StatusLine::Rejected => Err(RecorderError::ProtocolRejected(status_line)),
            StatusLine::Other => {
                // Only the Location of a non-OK reply is kept.
                let mut lines = Vec::new();
                if let Err(e) = self.read_headers(&mut lines).await {
                    debug!("headers of non-OK reply: {}", e);
                }
                let mut reply = MetadataDictionary::new(&self.target);
                for line in &lines {
                    reply.insert_header_line(line);
                }
                if let Some(location) = reply.location() {
                    self.metadata.insert(KEY_LOCATION, location.to_string());
                }
                Ok(Attempt::NotOk(status_line))
            }
            StatusLine::Ok => {
                self.events.status("[Waiting for metadata...]");
                let mut lines = Vec::new();
                self.read_headers(&mut lines).await.map_err(|e| {
                    RecorderError::HandshakeFailed(format!("truncated headers: {}", e))
                })?;
                for line in &lines {
                    self.metadata.insert_header_line(line);
                }

                if self.metadata.metaint().is_none() {
                    return Err(RecorderError::HandshakeFailed(
                        "server did not send a usable icy-metaint".to_string(),
                    ));
                }

                self.metadata.insert(KEY_TARGET_URL, self.target.clone());
                self.connected = true;
                info!(
                    "Connected to {} ({}), metaint={}",
                    self.target,
                    self.metadata.station_name().unwrap_or("unnamed"),
                    self.metadata.metaint().unwrap_or_default()
                );
                self.events.status("[Done connecting to stream...]");
                Ok(Attempt::Connected)
            }
        }
    }

    /// Header lines up to the first blank line.  Lines read before an
    /// error stay in `lines`.
    async fn read_headers(&mut self, lines: &mut Vec<String>) -> Result<()> {
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                return Ok(());
            }
            debug!("header: {}", line);
            lines.push(line);
        }
    }

    /// Read one line, without its `\r\n`.
    pub async fn read_line(&mut self) -> Result<String> {
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        let mut buf = Vec::new();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(RecorderError::IoRead)?;
        if n == 0 {
            return Err(RecorderError::IoRead(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        buf.retain(|b| *b != b'\r' && *b != b'\n');
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Fill `buf` completely.
    pub async fn read_block(&mut self, buf: &mut [u8]) -> Result<()> {
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        reader.read_exact(buf).await.map_err(RecorderError::IoRead)?;
        Ok(())
    }

    pub async fn read_byte(&mut self) -> Result<u8> {
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        reader.read_u8().await.map_err(RecorderError::IoRead)
    }

    /// Release the socket.  Safe to call any number of times.
    pub async fn close(&mut self) {
        if self.reader.is_some() {
            self.events.status("[Closing stream...]");
        }
        self.close_socket().await;
    }

    async fn close_socket(&mut self) {
        self.connected = false;
        if let Some(mut reader) = self.reader.take() {
            if let Err(e) = reader.get_mut().shutdown().await {
                debug!("socket shutdown: {}", e);
            }
        }
    }
}

fn not_connected() -> RecorderError {
    RecorderError::IoRead(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "stream is not connected",
    ))
}
