//! File naming for recorded tracks.

use std::path::{Path, PathBuf};

/// Name used when a title sanitizes down to nothing.
pub const UNKNOWN_TITLE: &str = "Unknown";
/// Directory name used when the server sends no `icy-name`.
pub const UNKNOWN_STATION: &str = "Unknown Station";

/// Longest file stem or directory name we produce, in bytes.  Leaves room
/// for a `_N` suffix and the extension under the usual 255-byte limit.
pub const MAX_NAME_BYTES: usize = 200;

/// Make a stream title or station name safe for the filesystem.
///
/// `\ + * : ? /` become `-`, `;` is dropped, and surrounding quotes and
/// whitespace are removed.  Names made only of dots (`.`, `..`) become
/// `Unknown`.  Applying it twice gives the same result.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| *c != ';')
        .map(|c| match c {
            '\\' | '+' | '*' | ':' | '?' | '/' => '-',
            other => other,
        })
        .collect();

    let cleaned = replaced
        .trim_matches(|c: char| c == '\'' || c == '"' || c.is_whitespace() || c.is_control());

    if cleaned.chars().all(|c| c == '.') {
        UNKNOWN_TITLE.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Cut `name` to at most `MAX_NAME_BYTES`, on a char boundary.
fn truncate_name(name: String) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name;
    }
    let mut end = MAX_NAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].trim_end().to_string()
}

/// Directory name for a station.
pub fn station_dir_name(station: Option<&str>) -> String {
    match station.map(sanitize) {
        Some(s) if s != UNKNOWN_TITLE => truncate_name(s),
        _ => UNKNOWN_STATION.to_string(),
    }
}

/// File name for a track: sanitized title plus extension.
pub fn track_file_name(title: &str, extension: &str) -> String {
    format!("{}.{}", truncate_name(sanitize(title)), extension)
}

/// First free `<stem>_N.<ext>` next to `path`, counting from 1.
pub fn next_free_sequence(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n: u32 = 1;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Split `"Artist - Title.mp3"` into artist and (optional) title.
///
/// Most stations announce tracks in this shape, so the file name is the
/// only source for tags.
pub fn split_artist_title(file_name: &str) -> (String, Option<String>) {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());

    match stem.split_once(" - ") {
        Some((artist, title)) => {
            let title = title.trim();
            let title = if title.is_empty() {
                None
            } else {
                Some(title.to_string())
            };
            (artist.trim().to_string(), title)
        }
        None => (stem.trim().to_string(), None),
    }
}
