pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod format;
pub mod metadata;
pub mod naming;
pub mod platform;
pub mod playlist;
pub mod recorder;
pub mod session;
pub mod tagging;

pub use config::Config;
pub use connector::StreamConnector;
pub use error::{RecorderError, Result};
pub use events::{EventSink, SessionEvent, TrackInfo};
pub use metadata::MetadataDictionary;
pub use playlist::{PlaylistEntry, PlaylistResolver};
pub use recorder::{OutputLayout, RecordingState, TrackRecorder};
pub use session::{RecorderFlags, RecordingSession, SessionStatus};
