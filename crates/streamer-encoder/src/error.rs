//! Error types for the encoder module.

use thiserror::Error;

use streamer_transport::TransportError;

/// Errors that can occur while starting the transcoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// No publish endpoint configured.
    #[error("Publish URL is empty")]
    MissingUrl,

    /// The publish endpoint is not a valid URL.
    #[error("Invalid publish URL: {0}")]
    InvalidUrl(String),

    /// The transcoder's diagnostic stream was not piped.
    #[error("Transcoder diagnostics unavailable")]
    NoDiagnostics,

    /// Process error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
