//! Error types for announcement playback

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while producing or delivering announcement audio
#[derive(Debug, Error)]
pub enum AudioError {
    /// An audio clip could not be opened
    #[error("could not open audio clip {path:?}: {source}")]
    ClipOpen {
        /// Path of the clip
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Reading or seeking inside an open clip failed
    #[error("audio clip {path:?} failed: {source}")]
    ClipRead {
        /// Path of the clip
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The audio sink refused a write
    #[error("audio sink write failed: {0}")]
    SinkWrite(String),
}
