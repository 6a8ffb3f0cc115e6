//! Frame delivery into the video pipe.
//!
//! The sink never blocks the capture pipeline. A frame that cannot be
//! written right away (no reader yet, pipe full, reader gone) is dropped
//! and counted. Frames are whole access units and are never split: a unit
//! the pipe accepts only in part is finished before anything else is
//! written, and after a drop the sink waits for the next keyframe so the
//! transcoder never sees a picture whose references are missing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use streamer_ipc::CancelToken;
use streamer_transport::{PipeWriter, TransportError, WriteOutcome};

use crate::frame::EncodedFrame;

/// Minimum time between cumulative drop reports.
const DROP_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum time between attempts to open the pipe.
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// What happened to an emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Written into the pipe.
    Delivered,
    /// Discarded without blocking.
    Dropped,
}

/// Frame counters shared with the supervisor.
#[derive(Debug, Default)]
pub struct FrameStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl FrameStats {
    /// Frames written into the pipe.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames discarded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Write side of the video pipe as seen by a camera.
pub struct FrameSink {
    path: PathBuf,
    cancel: CancelToken,
    writer: Option<PipeWriter>,
    /// Tail of the last frame that the pipe took only in part.
    pending: Bytes,
    /// Set until a keyframe goes out after a connect or a drop.
    awaiting_keyframe: bool,
    last_open_attempt: Option<Instant>,
    last_drop_log: Instant,
    stats: Arc<FrameStats>,
}

impl FrameSink {
    /// Create a sink for the pipe at `path`. The pipe is opened lazily.
    pub fn new(path: impl Into<PathBuf>, cancel: CancelToken) -> Self {
        Self {
            path: path.into(),
            cancel,
            writer: None,
            pending: Bytes::new(),
            awaiting_keyframe: true,
            last_open_attempt: None,
            last_drop_log: Instant::now(),
            stats: Arc::new(FrameStats::default()),
        }
    }

    /// Pipe path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }

    /// Check if the pipe is currently open.
    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Deliver `frame` if the pipe can take it now, otherwise drop it.
    pub fn emit(&mut self, frame: &EncodedFrame) -> EmitOutcome {
        if self.cancel.is_cancelled() {
            return self.drop_frame();
        }
        if self.writer.is_none() && !self.try_connect() {
            return self.drop_frame();
        }
        if !self.flush_pending() {
            return self.drop_frame();
        }
        if self.awaiting_keyframe && !frame.keyframe {
            return self.drop_frame();
        }
        let Some(writer) = self.writer.as_mut() else {
            return self.drop_frame();
        };

        match writer.offer(&frame.data) {
            Ok(WriteOutcome::Written) => self.deliver(),
            Ok(WriteOutcome::Partial(n)) => {
                self.pending = frame.data.slice(n..);
                self.deliver()
            }
            Ok(WriteOutcome::Full) => self.drop_frame(),
            Err(e) => {
                self.disconnect(e);
                self.drop_frame()
            }
        }
    }

    /// Push out the unfinished tail of the previous frame.
    ///
    /// Returns true once nothing is pending.
    fn flush_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };

        match writer.offer(&self.pending) {
            Ok(WriteOutcome::Written) => {
                self.pending = Bytes::new();
                true
            }
            Ok(WriteOutcome::Partial(n)) => {
                self.pending = self.pending.slice(n..);
                false
            }
            Ok(WriteOutcome::Full) => false,
            Err(e) => {
                self.disconnect(e);
                false
            }
        }
    }

    fn deliver(&mut self) -> EmitOutcome {
        self.awaiting_keyframe = false;
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        EmitOutcome::Delivered
    }

    fn disconnect(&mut self, error: TransportError) {
        match error {
            TransportError::ReaderGone => warn!("Video pipe reader went away"),
            e => warn!("Video pipe write failed: {}", e),
        }
        self.writer = None;
        self.pending = Bytes::new();
        self.awaiting_keyframe = true;
    }

    fn try_connect(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_open_attempt {
            if now.duration_since(last) < OPEN_RETRY_INTERVAL {
                return false;
            }
        }
        self.last_open_attempt = Some(now);

        match PipeWriter::try_open(&self.path) {
            Ok(writer) => {
                info!(path = %self.path.display(), "Video pipe connected");
                self.writer = Some(writer);
                true
            }
            Err(TransportError::NoReader) | Err(TransportError::PipeMissing(_)) => false,
            Err(e) => {
                debug!("Video pipe open failed: {}", e);
                false
            }
        }
    }

    fn drop_frame(&mut self) -> EmitOutcome {
        self.awaiting_keyframe = true;
        let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;

        if self.last_drop_log.elapsed() >= DROP_LOG_INTERVAL {
            info!(
                dropped,
                delivered = self.stats.delivered(),
                "Video frames dropped under backpressure"
            );
            self.last_drop_log = Instant::now();
        }

        EmitOutcome::Dropped
    }
}
