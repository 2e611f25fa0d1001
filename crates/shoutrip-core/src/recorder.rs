//! Track recorder: the read loop that turns an ICY body into one file per
//! track.
//!
//! Layout on disk, per station:
//!
//! ```text
//! <dest>/<station>/incomplete/<title>.mp3   first track, joined mid-song
//! <dest>/<station>/work/<title>.mp3         track being written
//! <dest>/<station>/<title>.mp3              finished tracks
//! ```
//!
//! The first track of a session never started at the beginning, so it is
//! kept apart and thrown away at the next boundary or on stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RecorderError, Result};
use crate::events::{EventSink, TrackInfo};
use crate::metadata::{parse_metadata_block, MetadataDictionary};
use crate::naming::{next_free_sequence, station_dir_name, track_file_name, UNKNOWN_STATION};
use crate::session::{RecorderFlags, SessionStatus};
use crate::tagging::{write_tag, TrackTag};

const INCOMPLETE_DIR: &str = "incomplete";
const WORK_DIR: &str = "work";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    #[default]
    Idle,
    Waiting,
    Recording,
    Closing,
    Closed,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingState::Idle => "idle",
            RecordingState::Waiting => "waiting",
            RecordingState::Recording => "recording",
            RecordingState::Closing => "closing",
            RecordingState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Directories used for one station.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    station_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(dest: &Path, station: Option<&str>) -> Self {
        Self {
            station_dir: dest.join(station_dir_name(station)),
        }
    }

    pub fn station_dir(&self) -> &Path {
        &self.station_dir
    }

    pub fn incomplete_dir(&self) -> PathBuf {
        self.station_dir.join(INCOMPLETE_DIR)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.station_dir.join(WORK_DIR)
    }

    /// Final home of a work file: same name, directly under the station.
    pub fn destination_for(&self, work_file: &Path) -> PathBuf {
        match work_file.file_name() {
            Some(name) => self.station_dir.join(name),
            None => self.station_dir.clone(),
        }
    }
}

struct OpenTrack {
    path: PathBuf,
    writer: BufWriter<File>,
    incomplete: bool,
}

pub struct TrackRecorder {
    dest: PathBuf,
    layout: OutputLayout,
    flags: Arc<RecorderFlags>,
    events: EventSink,
    status: watch::Sender<SessionStatus>,
    state: RecordingState,
    current: Option<OpenTrack>,
    first_track_seen: bool,
    tracks_saved: u32,
}

impl TrackRecorder {
    pub fn new(
        dest: impl Into<PathBuf>,
        flags: Arc<RecorderFlags>,
        events: EventSink,
        status: watch::Sender<SessionStatus>,
    ) -> Self {
        let dest = dest.into();
        Self {
            layout: OutputLayout::new(&dest, None),
            dest,
            flags,
            events,
            status,
            state: RecordingState::Idle,
            current: None,
            first_track_seen: false,
            tracks_saved: 0,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn tracks_saved(&self) -> u32 {
        self.tracks_saved
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Path of the file currently being written, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|t| t.path.as_path())
    }

    /// Run until `cancel` fires (orderly stop) or a fatal error occurs.
    ///
    /// `source` must be positioned at the start of the ICY body.  The
    /// dictionary is the one the handshake populated.
    pub async fn record<S>(
        &mut self,
        source: &mut S,
        metadata: &mut MetadataDictionary,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        let metaint = metadata.metaint().ok_or_else(|| {
            RecorderError::HandshakeFailed("no usable icy-metaint for this stream".to_string())
        })?;

        self.layout = OutputLayout::new(&self.dest, metadata.station_name());
        self.set_state(RecordingState::Waiting, metadata);
        self.events.status(format!(
            "Download directory is: {}",
            self.layout.station_dir().display()
        ));

        let result = self.read_loop(source, metadata, cancel, metaint).await;

        match result {
            Ok(()) => {
                self.set_state(RecordingState::Closing, metadata);
                self.events.status("[Closing recorder...]");
                let finished = self.close_current(true).await;
                self.set_state(RecordingState::Closed, metadata);
                finished
            }
            Err(e) => {
                error!("Recording stopped: {}", e);
                self.abandon_current().await;
                self.set_state(RecordingState::Closed, metadata);
                Err(e)
            }
        }
    }

    async fn read_loop<S>(
        &mut self,
        source: &mut S,
        metadata: &mut MetadataDictionary,
        cancel: &CancellationToken,
        metaint: usize,
    ) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        let mut block = vec![0u8; metaint];

        loop {
            // 1. audio
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                r = source.read_exact(&mut block) => r,
            };
            match read {
                Ok(_) => self.on_audio_block(&block, metadata).await?,
                Err(e) => {
                    warn!("Error reading audio block: {}", e);
                    self.events.status(format!("Error reading from stream: {}", e));
                }
            }

            // 2. metadata length prefix
            let length = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                r = source.read_u8() => r.map_err(RecorderError::MetadataHeader)?,
            };
            let length = length as usize * 16;
            if length == 0 {
                continue;
            }

            // 3. metadata block
            let mut meta = vec![0u8; length];
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                r = source.read_exact(&mut meta) => r,
            };
            match read {
                Ok(_) => self.on_metadata_block(&meta, metadata).await?,
                Err(e) => {
                    warn!("Error reading metadata from stream: {}", e);
                    self.events
                        .status(format!("Error reading metadata from stream: {}", e));
                }
            }
        }
    }

    async fn on_audio_block(
        &mut self,
        block: &[u8],
        metadata: &mut MetadataDictionary,
    ) -> Result<()> {
        let song_bytes = metadata.add_block_bytes(block.len());

        if self.state == RecordingState::Recording {
            if let Some(track) = self.current.as_mut() {
                track
                    .writer
                    .write_all(block)
                    .await
                    .map_err(|source| RecorderError::IoWrite {
                        path: track.path.clone(),
                        source,
                    })?;
            }
            self.events.progress(song_bytes, metadata.total_bytes());
        }

        self.publish(metadata);
        Ok(())
    }

    async fn on_metadata_block(
        &mut self,
        block: &[u8],
        metadata: &mut MetadataDictionary,
    ) -> Result<()> {
        let previous = metadata.stream_title().map(str::to_string);
        let pairs = parse_metadata_block(block);
        debug!("metadata: {:?}", pairs);
        metadata.merge(pairs);

        let title = match metadata.stream_title() {
            Some(t) if !t.is_empty() && previous.as_deref() != Some(t) => t.to_string(),
            _ => return Ok(()),
        };
        self.on_track_boundary(&title, metadata).await
    }

    async fn on_track_boundary(
        &mut self,
        title: &str,
        metadata: &mut MetadataDictionary,
    ) -> Result<()> {
        info!("Track boundary: {}", title);
        if self.current.is_some() {
            self.close_current(true).await?;
            self.events.status("[Changing Songs...]");
        }

        let file_name = track_file_name(title, metadata.file_extension());
        let incomplete = !self.first_track_seen;
        self.first_track_seen = true;
        let dir = if incomplete {
            self.layout.incomplete_dir()
        } else {
            self.layout.work_dir()
        };

        self.events.status(format!("Filename: {}", file_name));
        self.events.status(format!("Location: {}", dir.display()));

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| RecorderError::FileCreate {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join(&file_name);
        let file = File::create(&path)
            .await
            .map_err(|source| RecorderError::FileCreate {
                path: path.clone(),
                source,
            })?;

        self.current = Some(OpenTrack {
            path,
            writer: BufWriter::new(file),
            incomplete,
        });
        metadata.reset_song_bytes();
        self.set_state(RecordingState::Recording, metadata);
        self.events.status("[Recording Song...]");

        self.events
            .track_changed(TrackInfo {
                station: metadata
                    .station_name()
                    .unwrap_or(UNKNOWN_STATION)
                    .to_string(),
                title: title.to_string(),
                genre: metadata.genre().map(str::to_string),
            })
            .await;
        Ok(())
    }

    /// Flush and close the open file.  With `finalize`, a work file is
    /// promoted to the station directory and an incomplete file is deleted.
    async fn close_current(&mut self, finalize: bool) -> Result<()> {
        let Some(mut track) = self.current.take() else {
            return Ok(());
        };
        track
            .writer
            .flush()
            .await
            .map_err(|source| RecorderError::IoWrite {
                path: track.path.clone(),
                source,
            })?;
        drop(track.writer);

        if !finalize {
            return Ok(());
        }
        if track.incomplete {
            debug!("Discarding incomplete track {:?}", track.path);
            if let Err(e) = tokio::fs::remove_file(&track.path).await {
                warn!("Failed to remove {:?}: {}", track.path, e);
            }
            return Ok(());
        }
        self.finalize(&track.path).await
    }

    /// Fatal path: keep whatever was written, but close the handle.
    async fn abandon_current(&mut self) {
        if let Err(e) = self.close_current(false).await {
            warn!("Failed to flush track on error: {}", e);
        }
    }

    async fn finalize(&mut self, work_file: &Path) -> Result<()> {
        let mut dest = self.layout.destination_for(work_file);

        if dest.exists() {
            if self.flags.append_sequence_suffix() {
                dest = next_free_sequence(&dest);
            } else if !self.flags.overwrite_existing() {
                self.events
                    .status("File already exists. Overwrite option is OFF.");
                return remove_work_file(work_file).await;
            }
        }

        tokio::fs::copy(work_file, &dest)
            .await
            .map_err(|source| RecorderError::IoWrite {
                path: dest.clone(),
                source,
            })?;
        self.tracks_saved += 1;
        self.events
            .status(format!("Save file as: {}", dest.display()));

        if self.flags.write_id3_tag() && is_mp3(&dest) {
            self.events.status("[Adding ID3 tags...]");
            // The unsuffixed name, so `_1` never leaks into the tag.
            let tag_name = work_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Err(e) = write_tag(&dest, TrackTag::from_file_name(&tag_name)).await {
                warn!("Failed to tag {:?}: {}", dest, e);
            }
        }

        remove_work_file(work_file).await
    }

    fn set_state(&mut self, state: RecordingState, metadata: &MetadataDictionary) {
        if self.state != state {
            debug!("recorder state {} -> {}", self.state, state);
        }
        self.state = state;
        self.publish(metadata);
    }

    fn publish(&self, metadata: &MetadataDictionary) {
        let state = self.state;
        let tracks_saved = self.tracks_saved;
        self.status.send_modify(|s| {
            s.station = metadata.station_name().map(str::to_string);
            s.track = metadata.stream_title().map(str::to_string);
            s.genre = metadata.genre().map(str::to_string);
            s.song_bytes = metadata.song_bytes();
            s.total_bytes = metadata.total_bytes();
            s.tracks_saved = tracks_saved;
            s.state = state;
        });
    }
}

async fn remove_work_file(path: &Path) -> Result<()> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|source| RecorderError::IoWrite {
            path: path.to_path_buf(),
            source,
        })
}

fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"))
}
