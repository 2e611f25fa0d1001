//! Recording session: one connector plus one recorder on a worker task.
//!
//! The controller side (`RecordingSession`) never touches the socket or the
//! output files.  It starts and stops the worker, flips the shared flags,
//! and reads status snapshots from a `watch` channel.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, RecorderConfig, StreamConfig};
use crate::connector::StreamConnector;
use crate::error::{RecorderError, Result};
use crate::events::{EventSink, SessionEvent};
use crate::format::format_bytes;
use crate::recorder::{RecordingState, TrackRecorder};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Options the operator may change while recording.  Read at every track
/// boundary.
#[derive(Debug, Default)]
pub struct RecorderFlags {
    overwrite_existing: AtomicBool,
    append_sequence_suffix: AtomicBool,
    write_id3_tag: AtomicBool,
}

impl RecorderFlags {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            overwrite_existing: AtomicBool::new(config.overwrite_existing),
            append_sequence_suffix: AtomicBool::new(config.append_sequence_suffix),
            write_id3_tag: AtomicBool::new(config.write_id3_tag),
        }
    }

    pub fn overwrite_existing(&self) -> bool {
        self.overwrite_existing.load(Ordering::Relaxed)
    }

    pub fn append_sequence_suffix(&self) -> bool {
        self.append_sequence_suffix.load(Ordering::Relaxed)
    }

    pub fn write_id3_tag(&self) -> bool {
        self.write_id3_tag.load(Ordering::Relaxed)
    }

    pub fn set_overwrite_existing(&self, on: bool) {
        self.overwrite_existing.store(on, Ordering::Relaxed);
    }

    pub fn set_append_sequence_suffix(&self, on: bool) {
        self.append_sequence_suffix.store(on, Ordering::Relaxed);
    }

    pub fn set_write_id3_tag(&self, on: bool) {
        self.write_id3_tag.store(on, Ordering::Relaxed);
    }
}

/// Snapshot of what the worker is doing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStatus {
    pub station: Option<String>,
    pub track: Option<String>,
    pub genre: Option<String>,
    pub song_bytes: u64,
    pub total_bytes: u64,
    pub tracks_saved: u32,
    pub state: RecordingState,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let songs = if self.tracks_saved == 1 { "song" } else { "songs" };
        write!(
            f,
            "[{}] {} | {} | {} | {} | {} {} downloaded",
            self.state,
            self.station.as_deref().unwrap_or("-"),
            self.track.as_deref().unwrap_or("-"),
            self.genre.as_deref().unwrap_or("-"),
            format_bytes(self.song_bytes),
            self.tracks_saved,
            songs,
        )
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

pub struct RecordingSession {
    url: String,
    output_dir: PathBuf,
    stream: StreamConfig,
    flags: Arc<RecorderFlags>,
    events: EventSink,
    status_tx: watch::Sender<SessionStatus>,
    status_rx: watch::Receiver<SessionStatus>,
    worker: Option<Worker>,
}

impl RecordingSession {
    /// Create an idle session.  The returned receiver carries every event
    /// the worker emits.
    pub fn new(url: impl Into<String>, config: &Config) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let session = Self {
            url: url.into(),
            output_dir: config.recorder.output_dir.clone(),
            stream: config.stream.clone(),
            flags: Arc::new(RecorderFlags::from_config(&config.recorder)),
            events: EventSink::new(tx),
            status_tx,
            status_rx,
            worker: None,
        };
        (session, rx)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn flags(&self) -> &Arc<RecorderFlags> {
        &self.flags
    }

    pub fn set_overwrite_existing(&self, on: bool) {
        self.flags.set_overwrite_existing(on);
    }

    pub fn set_append_sequence_suffix(&self, on: bool) {
        self.flags.set_append_sequence_suffix(on);
    }

    pub fn set_write_id3_tag(&self, on: bool) {
        self.flags.set_write_id3_tag(on);
    }

    /// Connect and begin recording.  Returns once the handshake has
    /// finished; a handshake failure is returned here and no worker is left
    /// running.  If this future is dropped early, call `stop()` to cancel
    /// the handshake.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            warn!("Session for {} already running", self.url);
            return Ok(());
        }
        // Reap a worker that ended on its own.
        if let Some(old) = self.worker.take() {
            let _ = old.handle.await;
        }

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        // Structural events stop waiting for room once this token fires.
        let events = self.events.bound_to(cancel.clone());

        let mut connector =
            StreamConnector::new(self.url.clone(), self.stream.clone(), events.clone());
        let mut recorder = TrackRecorder::new(
            self.output_dir.clone(),
            self.flags.clone(),
            events.clone(),
            self.status_tx.clone(),
        );
        let token = cancel.clone();

        info!("Starting recording session for {}", self.url);
        let handle = tokio::spawn(async move {
            let connected = tokio::select! {
                biased;
                _ = token.cancelled() => Err(RecorderError::HandshakeFailed(
                    "stopped before the stream connected".to_string(),
                )),
                r = connector.connect() => r,
            };
            if let Err(e) = connected {
                connector.close().await;
                let message = e.to_string();
                let _ = ready_tx.send(Err(e));
                events.finished(Some(message)).await;
                return Ok(());
            }
            let _ = ready_tx.send(Ok(()));

            let result = match connector.stream_parts() {
                Some((reader, metadata)) => recorder.record(reader, metadata, &token).await,
                None => Err(RecorderError::HandshakeFailed(
                    "connection lost after handshake".to_string(),
                )),
            };
            connector.close().await;

            match &result {
                Ok(()) => info!("Recording finished, {} tracks saved", recorder.tracks_saved()),
                Err(e) => warn!("Recording ended with error: {}", e),
            }
            events
                .finished(result.as_ref().err().map(|e| e.to_string()))
                .await;
            result
        });

        // Registered before the handshake ends, so dropping this future
        // still leaves a worker that `stop()` can cancel.
        self.worker = Some(Worker { cancel, handle });

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.wait().await?;
                Err(e)
            }
            Err(_) => {
                // The worker dropped the sender without answering: it panicked.
                self.wait().await?;
                Err(RecorderError::HandshakeFailed(
                    "worker exited during handshake".to_string(),
                ))
            }
        }
    }

    /// Ask the worker to stop and wait for it.  No-op when idle.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        info!("Stopping recording session for {}", self.url);
        worker.cancel.cancel();
        worker.handle.await?
    }

    /// Wait for the worker to end by itself (stream fault or cancellation
    /// from elsewhere).  Returns immediately when idle.
    pub async fn wait(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker.handle.await?,
            None => Ok(()),
        }
    }

    /// Token that stops the running worker when cancelled.
    pub fn cancellation(&self) -> Option<CancellationToken> {
        self.worker.as_ref().map(|w| w.cancel.clone())
    }

    pub fn is_recording(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }
}
