//! Transcoder diagnostic stream: classification and the draining reader.
//!
//! The reader must consume the stream for the whole life of the
//! transcoder. A full diagnostic pipe blocks the transcoder outright.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use streamer_transport::WorkerThread;

use crate::EngineResult;

const HEARTBEAT_PREFIXES: &[&str] = &["out_time_ms=", "out_time=", "frame=", "progress="];
const FATAL_PATTERNS: &[&str] = &["broken pipe", "av_interleaved_write_frame"];
const ERROR_PATTERNS: &[&str] = &["error", "failed", "connection"];

/// Longest diagnostic line kept. The rest of a longer line is skipped.
const MAX_LINE_BYTES: u64 = 8192;

/// How a diagnostic line affects session health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Forward progress.
    Heartbeat,
    /// The publish connection is broken.
    Fatal,
    /// Worth recording, not fatal.
    Error,
    /// Anything else.
    Other,
}

/// Classify one diagnostic line.
pub fn classify(line: &str) -> LineKind {
    if HEARTBEAT_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return LineKind::Heartbeat;
    }

    let lower = line.to_ascii_lowercase();
    if FATAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        LineKind::Fatal
    } else if ERROR_PATTERNS.iter().any(|p| lower.contains(p)) {
        LineKind::Error
    } else {
        LineKind::Other
    }
}

/// Health of the transcoder as seen through its diagnostics.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    /// Last heartbeat, or the start of telemetry if none yet.
    pub last_progress: Instant,

    /// Last non-empty line of any kind.
    pub last_line: Instant,

    /// Last error or fatal line.
    pub last_error: Option<String>,

    /// A fatal pattern was seen.
    pub fatal: bool,

    /// The diagnostic stream reached EOF; the transcoder is gone.
    pub stream_closed: bool,

    /// Non-empty lines seen.
    pub lines: u64,
}

impl TelemetrySnapshot {
    /// Time since the last heartbeat.
    pub fn since_progress(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }
}

/// Shared telemetry state. Written by the reader, read by the watchdog.
#[derive(Debug)]
pub struct Telemetry {
    snapshot: Mutex<TelemetrySnapshot>,
}

impl Telemetry {
    /// Create telemetry whose stall clock starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            snapshot: Mutex::new(TelemetrySnapshot {
                last_progress: now,
                last_line: now,
                last_error: None,
                fatal: false,
                stream_closed: false,
                lines: 0,
            }),
        }
    }

    /// Apply one line seen at `now`. Empty lines are ignored.
    pub fn record_line(&self, line: &str, now: Instant) -> Option<LineKind> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let kind = classify(line);
        {
            let mut snapshot = self.snapshot.lock();
            snapshot.last_line = now;
            snapshot.lines += 1;

            match kind {
                LineKind::Heartbeat => snapshot.last_progress = now,
                LineKind::Fatal => {
                    snapshot.fatal = true;
                    snapshot.last_error = Some(line.to_string());
                }
                LineKind::Error => snapshot.last_error = Some(line.to_string()),
                LineKind::Other => {}
            }
        }

        match kind {
            LineKind::Heartbeat => trace!(line, "Transcoder progress"),
            LineKind::Fatal => error!(line, "Transcoder reported a fatal error"),
            LineKind::Error => warn!(line, "Transcoder"),
            LineKind::Other => debug!(line, "Transcoder"),
        }

        Some(kind)
    }

    /// Record that the diagnostic stream ended.
    pub fn mark_closed(&self) {
        self.snapshot.lock().stream_closed = true;
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.lock().clone()
    }
}

/// Thread draining the transcoder's diagnostic stream into [`Telemetry`].
pub struct TelemetryReader {
    worker: WorkerThread,
}

impl TelemetryReader {
    /// Start draining `source` until EOF.
    pub fn start<R>(source: R, telemetry: Arc<Telemetry>) -> EngineResult<Self>
    where
        R: Read + Send + 'static,
    {
        let worker = WorkerThread::spawn("telemetry", move || drain(source, &telemetry))?;
        Ok(Self { worker })
    }

    /// Check if the stream has been fully drained.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait up to `timeout` for the reader to finish.
    pub fn join(self, timeout: Duration) -> bool {
        self.worker.join_timeout(timeout)
    }
}

fn drain<R: Read>(source: R, telemetry: &Telemetry) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::with_capacity(256);
    let mut in_long_line = false;

    loop {
        buf.clear();
        match reader.by_ref().take(MAX_LINE_BYTES).read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if !in_long_line {
                    let line = String::from_utf8_lossy(&buf);
                    telemetry.record_line(&line, Instant::now());
                }
                in_long_line = buf.last() != Some(&b'\n');
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Transcoder diagnostics read failed: {}", e);
                break;
            }
        }
    }

    telemetry.mark_closed();
    info!("Transcoder diagnostic stream closed");
}
