use std::path::PathBuf;

/// Everything that can go wrong while negotiating or recording a stream.
///
/// Handshake-level variants are fatal to session start.  Read errors in the
/// middle of a stream are normally absorbed by the recorder loop and only
/// surface here when they cannot be recovered.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("malformed address: {0}")]
    MalformedAddress(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("server rejected stream: {0}")]
    ProtocolRejected(String),

    #[error("too many redirects ({attempts} handshake attempts)")]
    TooManyRedirects { attempts: u32 },

    #[error("error reading from stream: {0}")]
    IoRead(#[source] std::io::Error),

    #[error("error writing {path:?}: {source}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error receiving metadata header byte: {0}")]
    MetadataHeader(#[source] std::io::Error),

    #[error("error creating output file {path:?}: {source}")]
    FileCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no reachable stream: {0}")]
    NoReachableStream(String),

    #[error("recording worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

impl RecorderError {
    /// True for failures that happen before any audio is read.
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            RecorderError::MalformedAddress(_)
                | RecorderError::HandshakeFailed(_)
                | RecorderError::ProtocolRejected(_)
                | RecorderError::TooManyRedirects { .. }
                | RecorderError::NoReachableStream(_)
        )
    }
}
