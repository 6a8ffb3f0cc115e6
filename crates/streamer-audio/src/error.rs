//! Error types for the audio module.

use std::path::PathBuf;

use thiserror::Error;

use streamer_transport::TransportError;

/// Errors that can occur during audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The track library directory is unusable.
    #[error("Track library {path} unavailable: {message}")]
    Library { path: PathBuf, message: String },

    /// The track library holds no playable tracks.
    #[error("No playable tracks in {0}")]
    NoTracks(PathBuf),

    /// The decoder exited unsuccessfully.
    #[error("Decoder failed for {track} (exit code {code:?})")]
    Decode { track: String, code: Option<i32> },

    /// The decoder did not expose its stdout.
    #[error("Decoder output unavailable")]
    DecoderOutput,

    /// Pipe or process error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// IO error while reading decoder output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    /// Returns true if the session is stopping.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Cancelled))
    }

    /// Returns true if the audio pipe's reader went away.
    pub fn is_reader_gone(&self) -> bool {
        matches!(self, Self::Transport(TransportError::ReaderGone))
    }
}
