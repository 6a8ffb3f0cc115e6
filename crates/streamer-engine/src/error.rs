//! Error types for the engine module.

use thiserror::Error;

use streamer_audio::AudioError;
use streamer_capture::CaptureError;
use streamer_encoder::EncoderError;
use streamer_ipc::StartupPhase;
use streamer_transport::TransportError;

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration that no session can run with.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A session resource could not be brought up.
    #[error("{} failed: {message}", .phase.name())]
    Resource { phase: StartupPhase, message: String },

    /// Audio error.
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Capture error.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Transcoder error.
    #[error(transparent)]
    Encoder(#[from] EncoderError),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EngineError {
    /// Wrap any error as a failure of `phase`.
    pub fn resource(phase: StartupPhase, err: impl std::fmt::Display) -> Self {
        Self::Resource {
            phase,
            message: err.to_string(),
        }
    }
}
