//! The video producer: one camera feeding the video pipe for a session.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};

use streamer_ipc::{CancelToken, VideoPreset};

use crate::sink::{FrameSink, FrameStats};
use crate::{Camera, CaptureResult};

/// Owns the capture device for one session.
pub struct VideoProducer {
    camera: Box<dyn Camera>,
    preset: VideoPreset,
    stats: Arc<FrameStats>,
}

impl VideoProducer {
    /// Start `camera` writing into the pipe at `pipe`.
    #[instrument(name = "video_producer_start", skip_all, fields(pipe = %pipe.display()))]
    pub fn start(
        mut camera: Box<dyn Camera>,
        preset: VideoPreset,
        pipe: PathBuf,
        cancel: CancelToken,
    ) -> CaptureResult<Self> {
        let sink = FrameSink::new(pipe, cancel);
        let stats = sink.stats();

        camera.start(&preset, sink)?;
        info!(fps = preset.fps, "Video producer started");

        Ok(Self {
            camera,
            preset,
            stats,
        })
    }

    /// Preset the camera runs with.
    pub fn preset(&self) -> &VideoPreset {
        &self.preset
    }

    /// Shared frame counters.
    pub fn stats(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }

    /// Stop capture. Must run before the video pipe is torn down.
    #[instrument(name = "video_producer_stop", skip(self))]
    pub fn stop(&mut self) -> CaptureResult<()> {
        self.camera.stop()?;
        info!(
            delivered = self.stats.delivered(),
            dropped = self.stats.dropped(),
            "Video producer stopped"
        );
        Ok(())
    }
}
