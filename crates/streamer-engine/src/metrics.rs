//! Per-session metrics collection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use streamer_audio::AudioStats;
use streamer_capture::FrameStats;
use streamer_ipc::SessionMetrics;

/// Collects the counters of one session's producers.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    video: RwLock<Option<Arc<FrameStats>>>,
    audio: RwLock<Option<Arc<AudioStats>>>,
    last_report_time: RwLock<Instant>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            video: RwLock::new(None),
            audio: RwLock::new(None),
            last_report_time: RwLock::new(Instant::now()),
        }
    }

    /// Start the uptime clock.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
    }

    /// Read frame counters from the video producer.
    pub fn attach_video(&self, stats: Arc<FrameStats>) {
        *self.video.write() = Some(stats);
    }

    /// Read track counters from the audio producer.
    pub fn attach_audio(&self, stats: Arc<AudioStats>) {
        *self.audio.write() = Some(stats);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> SessionMetrics {
        let mut metrics = SessionMetrics {
            uptime_seconds: self
                .start_time
                .read()
                .map(|start| start.elapsed().as_secs())
                .unwrap_or(0),
            ..SessionMetrics::default()
        };

        if let Some(video) = self.video.read().as_ref() {
            metrics.frames_delivered = video.delivered();
            metrics.frames_dropped = video.dropped();
        }

        if let Some(audio) = self.audio.read().as_ref() {
            metrics.tracks_started = audio.tracks_started();
            metrics.decode_failures = audio.decode_failures();
            metrics.transport_reopens = audio.transport_reopens();
        }

        metrics
    }

    /// Returns true once per `interval`.
    pub fn report_due(&self, interval: Duration) -> bool {
        let mut last = self.last_report_time.write();
        if last.elapsed() >= interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
