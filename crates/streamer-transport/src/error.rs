//! Error types for the transport module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The named pipe could not be created.
    #[error("Failed to create pipe {path}: {message}")]
    PipeCreate { path: PathBuf, message: String },

    /// The named pipe does not exist.
    #[error("Pipe missing: {0}")]
    PipeMissing(PathBuf),

    /// Nobody has the read end open yet.
    #[error("No reader attached")]
    NoReader,

    /// The reader closed its end while we were writing.
    #[error("Reader detached")]
    ReaderGone,

    /// The operation was abandoned because the session is stopping.
    #[error("Cancelled")]
    Cancelled,

    /// A child process could not be spawned.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A signal could not be delivered.
    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    /// Invalid publish URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns true if the reader end went away and the pipe should be reopened.
    pub fn is_reader_gone(&self) -> bool {
        matches!(self, Self::ReaderGone)
    }
}
