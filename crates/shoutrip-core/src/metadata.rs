//! Stream metadata dictionary and ICY in-band metadata parsing.
//!
//! One dictionary lives for the whole session.  The connector fills it with
//! the handshake headers (`icy-name`, `icy-metaint`, ...); the recorder merges
//! every in-band metadata block into it and keeps the byte counters current.

use std::collections::BTreeMap;

use serde::Serialize;

pub const KEY_METAINT: &str = "icy-metaint";
pub const KEY_NAME: &str = "icy-name";
pub const KEY_GENRE: &str = "icy-genre";
pub const KEY_CONTENT_TYPE: &str = "content-type";
pub const KEY_LOCATION: &str = "location";
pub const KEY_TARGET_URL: &str = "targetURL";
pub const KEY_SONG_BYTES: &str = "song-bytes";
pub const KEY_TOTAL_BYTES: &str = "total-bytes";
pub const KEY_STREAM_TITLE: &str = "StreamTitle";

/// Ordered `key → value` map of everything the server told us.
///
/// Header keys are stored lower-cased; in-band keys (`StreamTitle`,
/// `StreamUrl`) keep the server's spelling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataDictionary {
    entries: BTreeMap<String, String>,
}

impl MetadataDictionary {
    pub fn new(target_url: &str) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(KEY_TARGET_URL.to_string(), target_url.to_string());
        entries.insert(KEY_SONG_BYTES.to_string(), "0".to_string());
        entries.insert(KEY_TOTAL_BYTES.to_string(), "0".to_string());
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge parsed pairs in order; a later duplicate key wins.
    pub fn merge<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in pairs {
            self.entries.insert(k, v);
        }
    }

    /// Store one `key: value` response header.  Returns false for lines
    /// without a colon, which are ignored.
    pub fn insert_header_line(&mut self, line: &str) -> bool {
        match line.split_once(':') {
            Some((key, value)) => {
                let key = key.trim().to_ascii_lowercase();
                if key.is_empty() {
                    return false;
                }
                self.entries.insert(key, value.trim().to_string());
                true
            }
            None => false,
        }
    }

    /// Block size between metadata chunks, if the server sent a usable one.
    pub fn metaint(&self) -> Option<usize> {
        self.get(KEY_METAINT)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
    }

    pub fn station_name(&self) -> Option<&str> {
        self.get(KEY_NAME).filter(|s| !s.trim().is_empty())
    }

    pub fn genre(&self) -> Option<&str> {
        self.get(KEY_GENRE).filter(|s| !s.trim().is_empty())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(KEY_CONTENT_TYPE)
    }

    pub fn stream_title(&self) -> Option<&str> {
        self.get(KEY_STREAM_TITLE)
    }

    pub fn location(&self) -> Option<&str> {
        self.get(KEY_LOCATION).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Nullsoft video streams get `.nsv`, everything else is treated as mp3.
    pub fn file_extension(&self) -> &'static str {
        match self.content_type() {
            Some(ct) if ct.trim().eq_ignore_ascii_case("video/nsv") => "nsv",
            _ => "mp3",
        }
    }

    pub fn song_bytes(&self) -> u64 {
        self.counter(KEY_SONG_BYTES)
    }

    pub fn total_bytes(&self) -> u64 {
        self.counter(KEY_TOTAL_BYTES)
    }

    /// Account for one audio block.  Returns the new `song-bytes` value.
    pub fn add_block_bytes(&mut self, n: usize) -> u64 {
        let song = self.song_bytes() + n as u64;
        let total = self.total_bytes() + n as u64;
        self.insert(KEY_SONG_BYTES, song.to_string());
        self.insert(KEY_TOTAL_BYTES, total.to_string());
        song
    }

    pub fn reset_song_bytes(&mut self) {
        self.insert(KEY_SONG_BYTES, "0");
    }

    fn counter(&self, key: &str) -> u64 {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    }
}

// ── In-band metadata ─────────────────────────────────────────────────────────

/// Parse one metadata block (`StreamTitle='...';StreamUrl='...';` padded with
/// NULs) into `(key, value)` pairs, in the order they appear.
pub fn parse_metadata_block(block: &[u8]) -> Vec<(String, String)> {
    let end = block.iter().position(|b| *b == 0).unwrap_or(block.len());
    let text = String::from_utf8_lossy(&block[..end]);

    text.split(';')
        .filter_map(|fragment| {
            let (key, value) = fragment.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), dequote(value).to_string()))
        })
        .collect()
}

/// Strip surrounding quotes, stray semicolons and whitespace from a value.
pub fn dequote(value: &str) -> &str {
    value.trim_matches(|c: char| c == '\'' || c == '"' || c == ';' || c.is_whitespace())
}

/// Encode pairs as a length-prefixed ICY metadata block, zero-padded to a
/// multiple of 16 bytes.  An empty slice encodes as the single `0` byte.
pub fn encode_metadata_block(pairs: &[(&str, &str)]) -> Vec<u8> {
    if pairs.is_empty() {
        return vec![0];
    }
    let text: String = pairs
        .iter()
        .map(|(k, v)| format!("{}='{}';", k, v))
        .collect();
    let bytes = text.as_bytes();
    let blocks = bytes.len().div_ceil(16).min(255);
    let padded = blocks * 16;

    let mut out = Vec::with_capacity(padded + 1);
    out.push(blocks as u8);
    out.extend_from_slice(&bytes[..bytes.len().min(padded)]);
    out.resize(padded + 1, 0);
    out
}
