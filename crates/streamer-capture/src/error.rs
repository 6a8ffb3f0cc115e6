//! Error types for the capture module.

use thiserror::Error;

use streamer_transport::TransportError;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capture already started.
    #[error("Capture already started")]
    AlreadyStarted,

    /// The capture device could not be acquired.
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The capture helper did not expose its output.
    #[error("Capture helper output unavailable")]
    NoOutput,

    /// Process or thread error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
