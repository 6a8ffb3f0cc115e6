//! The transcoder process.
//!
//! This crate turns a session's pipes, video preset and overlay
//! composition into a transcoder command line, and spawns it with its
//! diagnostic stream piped for telemetry.

mod composition;
mod error;
mod transcoder;

pub use composition::Composition;
pub use error::EncoderError;
pub use transcoder::{redact_url, Transcoder, TranscoderConfig};

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// AAC bitrate of the published stream in kbps.
pub const AUDIO_BITRATE_KBPS: u32 = 128;

/// Distance of overlays from the frame edges in pixels.
pub const OVERLAY_PADDING: u32 = 40;
