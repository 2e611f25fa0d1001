//! Track tagging using lofty

use std::path::Path;

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::prelude::*;
use lofty::tag::{ItemKey, Tag, TagType};

use crate::naming::split_artist_title;

/// Comment written into every tagged track.
pub const ATTRIBUTION: &str = "Ripped by shoutrip";

/// Minimal tag derived from a finalized track's file name.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTag {
    pub artist: String,
    pub title: Option<String>,
    pub comment: String,
}

impl TrackTag {
    /// Build the tag from an `"Artist - Title.ext"` file name.
    pub fn from_file_name(file_name: &str) -> Self {
        let (artist, title) = split_artist_title(file_name);
        Self {
            artist,
            title,
            comment: ATTRIBUTION.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaggingError {
    #[error(transparent)]
    Lofty(#[from] LoftyError),
    #[error("tagging task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Write `tag` into the file at `path`.
///
/// Runs on the blocking pool because lofty does synchronous file I/O.
pub async fn write_tag(path: &Path, tag: TrackTag) -> Result<(), TaggingError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_tag_blocking(&path, &tag)).await??;
    Ok(())
}

fn write_tag_blocking(path: &Path, track: &TrackTag) -> Result<(), LoftyError> {
    let mut tag = Tag::new(tag_type_for(path));

    tag.insert_text(ItemKey::TrackArtist, track.artist.clone());
    if let Some(title) = &track.title {
        tag.insert_text(ItemKey::TrackTitle, title.clone());
    }
    tag.insert_text(ItemKey::Comment, track.comment.clone());

    tag.save_to_path(path, WriteOptions::default())
}

fn tag_type_for(path: &Path) -> TagType {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "ogg" | "opus" | "flac" => TagType::VorbisComments,
        "m4a" | "mp4" | "aac" => TagType::Mp4Ilst,
        _ => TagType::Id3v2,
    }
}
