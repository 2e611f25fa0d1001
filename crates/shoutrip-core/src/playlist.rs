//! Playlist documents (`.pls`, `.m3u`) and picking a usable stream out of them.
//!
//! Station directories hand out playlists rather than stream addresses.  The
//! resolver parses the document, then probes each entry with a plain TCP
//! connect and returns the first one that answers.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{RecorderError, Result};

/// One stream listed in a playlist.  Both formats map onto the same
/// `(title, address, website)` shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistEntry {
    pub title: String,
    pub address: String,
    pub website: String,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse either format, deciding by content.
pub fn parse_playlist(content: &str) -> Vec<PlaylistEntry> {
    if looks_like_pls(content) {
        parse_pls(content)
    } else {
        parse_m3u(content)
    }
}

fn looks_like_pls(content: &str) -> bool {
    content.lines().map(str::trim).any(|l| {
        l.eq_ignore_ascii_case("[playlist]")
            || l.to_ascii_lowercase().starts_with("numberofentries=")
            || l.to_ascii_lowercase().starts_with("file1=")
    })
}

/// Parse a `.pls` document.
///
/// Entries come out in the order their `FileN=` lines appear.  `TitleN` and
/// `WebsiteN` attach to the entry with the same `N`.  When
/// `NumberOfEntries` is present, nothing past that count is returned.
pub fn parse_pls(content: &str) -> Vec<PlaylistEntry> {
    let mut declared: Option<usize> = None;
    let mut entries: Vec<(String, PlaylistEntry)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "numberofentries" {
            declared = value.parse().ok();
            continue;
        }

        let (field, index) = match split_indexed_key(&key) {
            Some(parts) => parts,
            None => continue,
        };

        let pos = match entries.iter().position(|(i, _)| i == index) {
            Some(pos) => pos,
            None => {
                entries.push((index.to_string(), PlaylistEntry::default()));
                entries.len() - 1
            }
        };

        let entry = &mut entries[pos].1;
        match field {
            "file" => entry.address = value.to_string(),
            "title" => entry.title = value.to_string(),
            "website" => entry.website = value.to_string(),
            _ => {}
        }
    }

    let mut out: Vec<PlaylistEntry> = entries
        .into_iter()
        .map(|(_, e)| e)
        .filter(|e| !e.address.is_empty())
        .collect();
    if let Some(n) = declared {
        out.truncate(n);
    }
    out
}

/// Split `file12` into `("file", "12")`.
fn split_indexed_key(key: &str) -> Option<(&str, &str)> {
    let digits_at = key.find(|c: char| c.is_ascii_digit())?;
    let (field, index) = key.split_at(digits_at);
    if !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match field {
        "file" | "title" | "website" => Some((field, index)),
        _ => None,
    }
}

/// Parse a plain or extended m3u document.
pub fn parse_m3u(content: &str) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    let mut pending_title: Option<String> = None;
    let mut pending_website: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_title = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTSTRIPPER:") {
            if let Some((_, site)) = rest.split_once('=') {
                pending_website = Some(site.trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        entries.push(PlaylistEntry {
            title: pending_title.take().unwrap_or_default(),
            address: line.to_string(),
            website: pending_website.take().unwrap_or_default(),
        });
    }

    entries
}

// ── Detection ─────────────────────────────────────────────────────────────────

const DIRECTORY_PATTERNS: [&str; 3] = [
    r"^http://classic\.shoutcast\.com/sbin/shoutcast-playlist\.pls\?rn=[0-9]+&file=filename\.pls$",
    r"^http://yp\.shoutcast\.com/sbin/tunein-station\.pls\?id=[0-9]+&file=filename\.pls$",
    r"^file://yp\.shoutcast\.com/sbin/tunein-station\.pls\?id=[0-9]+&file=filename\.pls$",
];

/// True when `target` names a playlist document rather than a stream.
pub fn is_playlist_url(target: &str) -> bool {
    let target = target.trim();
    let from_directory = DIRECTORY_PATTERNS.iter().any(|p| {
        Regex::new(p)
            .map(|re| re.is_match(target))
            .unwrap_or(false)
    });
    if from_directory {
        return true;
    }

    let path = match Url::parse(target) {
        Ok(url) => url.path().to_ascii_lowercase(),
        Err(_) => target.to_ascii_lowercase(),
    };
    path.ends_with(".pls") || path.ends_with(".m3u")
}

// ── Loading and resolving ─────────────────────────────────────────────────────

/// Fetch a playlist document.  `http(s)` goes through reqwest; `file://`
/// URLs and bare paths are read from disk.
pub async fn load_document(location: &str) -> Result<String> {
    let lower = location.to_ascii_lowercase();
    let bytes = if lower.starts_with("http://") || lower.starts_with("https://") {
        let resp = reqwest::get(location)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                RecorderError::NoReachableStream(format!("playlist fetch failed: {}", e))
            })?;
        resp.bytes()
            .await
            .map_err(|e| RecorderError::NoReachableStream(format!("playlist read failed: {}", e)))?
            .to_vec()
    } else {
        let path = if lower.starts_with("file:") {
            Url::parse(location)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| RecorderError::MalformedAddress(location.to_string()))?
        } else {
            Path::new(location).to_path_buf()
        };
        tokio::fs::read(&path).await.map_err(|e| {
            RecorderError::NoReachableStream(format!("cannot read playlist {:?}: {}", path, e))
        })?
    };

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Resolve an entry against the playlist's own URL when it is relative.
pub fn resolve_relative_url(base: &str, candidate: &str) -> Option<String> {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return Some(candidate.to_string());
    }
    let base_url = Url::parse(base).ok()?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Some(candidate.to_string());
    }
    base_url.join(candidate).ok().map(|u| u.to_string())
}

#[derive(Debug, Clone)]
pub struct PlaylistResolver {
    probe_timeout: Duration,
}

impl PlaylistResolver {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Load, parse and probe `location`; returns the first reachable stream.
    pub async fn resolve(&self, location: &str) -> Result<String> {
        info!("Resolving playlist {}", location);
        let content = load_document(location).await?;
        let mut entries = parse_playlist(&content);
        for entry in entries.iter_mut() {
            if let Some(abs) = resolve_relative_url(location, &entry.address) {
                entry.address = abs;
            }
        }
        debug!("playlist {} declares {} entries", location, entries.len());

        self.first_reachable(&entries).await.ok_or_else(|| {
            RecorderError::NoReachableStream(format!(
                "none of the {} entries in {} answered",
                entries.len(),
                location
            ))
        })
    }

    /// Address of the first entry that accepts a TCP connection.
    pub async fn first_reachable(&self, entries: &[PlaylistEntry]) -> Option<String> {
        for entry in entries {
            if self.is_reachable(&entry.address).await {
                info!("Playlist entry reachable: {}", entry.address);
                return Some(entry.address.clone());
            }
        }
        None
    }

    /// Probe one address.  Only plain `http` streams qualify.
    pub async fn is_reachable(&self, address: &str) -> bool {
        let url = match Url::parse(address) {
            Ok(u) => u,
            Err(e) => {
                warn!("Malformed playlist entry {}: {}", address, e);
                return false;
            }
        };
        if url.scheme() != "http" {
            warn!("Only http streams are supported: {}", address);
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let port = url.port_or_known_default().unwrap_or(80);

        match tokio::time::timeout(self.probe_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("probe {}:{} failed: {}", host, port, e);
                false
            }
            Err(_) => {
                debug!("probe {}:{} timed out", host, port);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLS: &str = "[playlist]\n\
NumberOfEntries=2\n\
File1=http://first.example:8000/\n\
Title1=(#1 - 12/500) Example FM\n\
Website1=http://example.com\n\
File2=http://second.example:8010/\n\
Title2=Example FM backup\n\
File3=http://undeclared.example/\n\
Version=2\n";

    #[test]
    fn test_parse_pls_in_order() {
        let entries = parse_pls(PLS);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, "http://first.example:8000/");
        assert_eq!(entries[0].title, "(#1 - 12/500) Example FM");
        assert_eq!(entries[0].website, "http://example.com");
        assert_eq!(entries[1].address, "http://second.example:8010/");
        assert_eq!(entries[1].website, "");
    }

    #[test]
    fn test_parse_pls_without_count() {
        let entries = parse_pls("[playlist]\nfile1=http://a/\nFILE2=http://b/\n");
        let addrs: Vec<_> = entries.iter().map(|e| e.address.as_str()).collect();
        assert_eq!(addrs, vec!["http://a/", "http://b/"]);
    }

    #[test]
    fn test_parse_m3u_extended() {
        let content = "#EXTM3U\n#EXTINF:-1,Jazz Radio\nhttp://jazz.example/stream\n\nhttp://plain.example/\n";
        let entries = parse_m3u(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Jazz Radio");
        assert_eq!(entries[0].address, "http://jazz.example/stream");
        assert_eq!(entries[1].title, "");
    }

    #[test]
    fn test_parse_playlist_sniffs_format() {
        assert_eq!(parse_playlist(PLS).len(), 2);
        assert_eq!(parse_playlist("http://only.example/\n").len(), 1);
    }

    #[test]
    fn test_is_playlist_url() {
        assert!(is_playlist_url(
            "http://yp.shoutcast.com/sbin/tunein-station.pls?id=12345&file=filename.pls"
        ));
        assert!(is_playlist_url(
            "http://classic.shoutcast.com/sbin/shoutcast-playlist.pls?rn=77&file=filename.pls"
        ));
        assert!(is_playlist_url("http://radio.example/listen.PLS"));
        assert!(is_playlist_url("/home/me/stations/jazz.m3u"));
        assert!(!is_playlist_url("http://radio.example:8000/stream"));
        assert!(!is_playlist_url("http://radio.example/;stream.mp3"));
    }

    #[test]
    fn test_resolve_relative_url() {
        assert_eq!(
            resolve_relative_url("http://host/lists/a.pls", "stream/live").as_deref(),
            Some("http://host/lists/stream/live")
        );
        assert_eq!(
            resolve_relative_url("http://host/a.pls", "http://other/").as_deref(),
            Some("http://other/")
        );
    }

    #[tokio::test]
    async fn test_non_http_entries_are_unreachable() {
        let resolver = PlaylistResolver::new(Duration::from_millis(200));
        assert!(!resolver.is_reachable("https://secure.example/").await);
        assert!(!resolver.is_reachable("not a url").await);
    }
}
