//! Notifications pushed from the recording worker to whoever drives it.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Station/track pair announced at every track boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub station: String,
    pub title: String,
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Cumulative bytes for the track being written.  Sent once per block.
    Progress { song_bytes: u64, total_bytes: u64 },
    /// A new `StreamTitle` started a new file.
    TrackChanged(TrackInfo),
    /// Human-readable status line for operator display.
    Status { message: String },
    /// The worker has stopped; `error` is set when it stopped on a fault.
    Finished { error: Option<String> },
}

/// Sending half handed to the connector and recorder.
///
/// Per-block progress and status lines are dropped when the consumer lags;
/// structural events wait for room, unless the sink is bound to a token
/// that has been cancelled.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SessionEvent>>,
    cancel: Option<CancellationToken>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            tx: Some(tx),
            cancel: None,
        }
    }

    /// A sink that only logs.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Same channel, but a full channel no longer blocks once `cancel`
    /// fires: the event is dropped instead.
    pub fn bound_to(&self, cancel: CancellationToken) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: Some(cancel),
        }
    }

    pub fn progress(&self, song_bytes: u64, total_bytes: u64) {
        self.try_send(SessionEvent::Progress {
            song_bytes,
            total_bytes,
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        let stamped = format!("{} {}", chrono::Local::now().format("%H:%M:%S"), message);
        self.try_send(SessionEvent::Status { message: stamped });
    }

    pub async fn track_changed(&self, info: TrackInfo) {
        self.send(SessionEvent::TrackChanged(info)).await;
    }

    pub async fn finished(&self, error: Option<String>) {
        self.send(SessionEvent::Finished { error }).await;
    }

    fn try_send(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            if let Err(mpsc::error::TrySendError::Full(ev)) = tx.try_send(event) {
                debug!("event channel full, dropping {:?}", ev);
            }
        }
    }

    async fn send(&self, event: SessionEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let Some(cancel) = &self.cancel else {
            // A closed receiver means nobody is listening any more.
            let _ = tx.send(event).await;
            return;
        };
        let permit = tokio::select! {
            biased;
            permit = tx.reserve() => permit,
            _ = cancel.cancelled() => {
                self.try_send(event);
                return;
            }
        };
        if let Ok(permit) = permit {
            permit.send(event);
        }
    }
}
