//! Camera capture into the video pipe.
//!
//! This crate provides the camera capability interface, a camera backed by
//! an external capture helper, the access unit splitter that frames its
//! H.264 output, the frame sink that writes into the video pipe and drops
//! whole frames rather than block, and the hardware-dependent
//! preset selection done once at startup.

mod camera;
mod error;
mod frame;
mod nal;
mod preset;
mod producer;
mod sink;

pub use camera::HelperCamera;
pub use error::CaptureError;
pub use frame::EncodedFrame;
pub use nal::{AccessUnitSplitter, NalUnitType, MAX_ACCESS_UNIT};
pub use preset::{select_preset, HardwareProfile, LoadProbe, SystemLoadProbe};
pub use producer::VideoProducer;
pub use sink::{EmitOutcome, FrameSink, FrameStats};

use streamer_ipc::VideoPreset;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// CPU load above which the startup preset loses frame rate.
pub const LOAD_THRESHOLD_PERCENT: f32 = 85.0;

/// Frames per second removed when the system is loaded.
pub const FPS_STEP: u32 = 5;

/// Lowest frame rate a load downgrade may reach.
pub const MIN_FPS: u32 = 15;

/// Trait for capture devices.
///
/// A camera owns its device between `start` and `stop` and pushes every
/// encoded frame into the sink it was started with.
pub trait Camera: Send {
    /// Start capturing with `preset`, emitting frames into `sink`.
    fn start(&mut self, preset: &VideoPreset, sink: FrameSink) -> CaptureResult<()>;

    /// Stop capturing and release the device.
    fn stop(&mut self) -> CaptureResult<()>;

    /// Check if capture is active.
    fn is_active(&self) -> bool;
}
