use std::{io, path::PathBuf};

use parley_core::CoreError;
use thiserror::Error;

/// Everything the controller can surface to the view.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("rejected incoming frame: {0}")]
    MalformedFrame(CoreError),
    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("media rejected: {0}")]
    MediaRejected(CoreError),
    #[error("failed to save {}: {source}", path.display())]
    MediaSave {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] CoreError),
}
