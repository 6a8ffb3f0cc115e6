//! Camera backed by an external capture helper.
//!
//! The helper writes an H.264 elementary stream to stdout. A reader thread
//! splits that stream into access units and pushes each one into the sink.

use std::io::{self, Read};
use std::process::{ChildStdout, Command, Stdio};
use std::time::Duration;

use tracing::{info, instrument, warn};

use streamer_ipc::{CancelToken, VideoPreset};
use streamer_transport::{wait_readable, ProcessHandle, WorkerThread};

use crate::error::CaptureError;
use crate::nal::AccessUnitSplitter;
use crate::sink::{EmitOutcome, FrameSink};
use crate::{Camera, CaptureResult};

const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes read from the helper per call.
const READ_CHUNK: usize = 64 * 1024;

/// A camera driven by a helper program such as `rpicam-vid`.
pub struct HelperCamera {
    program: String,
    args: Option<Vec<String>>,
    grace: Duration,
    process: Option<ProcessHandle>,
    reader: Option<WorkerThread>,
    stop: CancelToken,
}

impl HelperCamera {
    /// Camera using `program` with the standard `rpicam-vid` arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: None,
            grace: Duration::from_secs(2),
            process: None,
            reader: None,
            stop: CancelToken::new(),
        }
    }

    /// Camera using `program` with fixed arguments.
    pub fn with_args(program: impl Into<String>, args: Vec<String>) -> Self {
        let mut camera = Self::new(program);
        camera.args = Some(args);
        camera
    }

    /// Time the helper gets to exit before it is killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Helper arguments for `preset`.
    pub fn args_for(&self, preset: &VideoPreset) -> Vec<String> {
        if let Some(args) = &self.args {
            return args.clone();
        }

        vec![
            "-t".to_string(),
            "0".to_string(),
            "--nopreview".to_string(),
            "--codec".to_string(),
            "h264".to_string(),
            "--inline".to_string(),
            "--profile".to_string(),
            "baseline".to_string(),
            "--width".to_string(),
            preset.width.to_string(),
            "--height".to_string(),
            preset.height.to_string(),
            "--framerate".to_string(),
            preset.fps.to_string(),
            "--bitrate".to_string(),
            (preset.bitrate_kbps * 1000).to_string(),
            "--intra".to_string(),
            preset.gop().to_string(),
            "-o".to_string(),
            "-".to_string(),
        ]
    }
}

impl Camera for HelperCamera {
    #[instrument(name = "camera_start", skip(self, sink), fields(program = %self.program))]
    fn start(&mut self, preset: &VideoPreset, sink: FrameSink) -> CaptureResult<()> {
        if self.is_active() {
            return Err(CaptureError::AlreadyStarted);
        }

        let mut command = Command::new(&self.program);
        command
            .args(self.args_for(preset))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut process = ProcessHandle::spawn("camera", &mut command)
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        let stdout = process.take_stdout().ok_or(CaptureError::NoOutput)?;

        let stop = CancelToken::new();
        let reader_stop = stop.clone();
        let reader = WorkerThread::spawn("camera-reader", move || {
            read_frames(stdout, sink, reader_stop);
        })?;

        info!(fps = preset.fps, "Camera started");
        self.process = Some(process);
        self.reader = Some(reader);
        self.stop = stop;
        Ok(())
    }

    #[instrument(name = "camera_stop", skip(self))]
    fn stop(&mut self) -> CaptureResult<()> {
        if !self.is_active() {
            return Ok(());
        }

        self.stop.cancel();

        if let Some(mut process) = self.process.take() {
            process.shutdown(self.grace);
        }
        if let Some(reader) = self.reader.take() {
            reader.join_timeout(READER_JOIN_TIMEOUT);
        }

        info!("Camera stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.process.is_some()
    }
}

impl Drop for HelperCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn read_frames(mut stdout: ChildStdout, mut sink: FrameSink, stop: CancelToken) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut splitter = AccessUnitSplitter::new();

    loop {
        if stop.is_cancelled() {
            break;
        }

        match wait_readable(&stdout) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Camera output poll failed: {}", e);
                break;
            }
        }

        let n = match stdout.read(&mut buf) {
            Ok(0) => {
                if !stop.is_cancelled() {
                    warn!("Camera output ended");
                }
                if let Some(frame) = splitter.flush() {
                    sink.emit(&frame);
                }
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Camera read failed: {}", e);
                break;
            }
        };

        for frame in splitter.push(&buf[..n]) {
            if sink.emit(&frame) == EmitOutcome::Dropped && frame.sequence == 1 {
                info!("Video pipe not ready, dropping frames until it is");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use streamer_transport::NamedPipe;

    fn preset() -> VideoPreset {
        VideoPreset {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate_kbps: 2500,
            maxrate_kbps: 3000,
            bufsize_kbps: 4000,
        }
    }

    #[test]
    fn test_rpicam_arguments() {
        let args = HelperCamera::new("rpicam-vid").args_for(&preset());

        assert!(args.windows(2).any(|w| w == ["--framerate", "30"]));
        assert!(args.windows(2).any(|w| w == ["--bitrate", "2500000"]));
        assert!(args.windows(2).any(|w| w == ["--intra", "120"]));
        assert!(args.windows(2).any(|w| w == ["-o", "-"]));
    }

    #[test]
    fn test_missing_helper_is_device_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FrameSink::new(dir.path().join("video.ts"), CancelToken::new());
        let mut camera = HelperCamera::new("/nonexistent/camera-helper");

        let err = camera.start(&preset(), sink).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert!(!camera.is_active());
    }

    #[test]
    fn test_frames_flow_into_sink_and_stop_is_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = NamedPipe::recreate(dir.path().join("video.ts")).unwrap();
        let sink = FrameSink::new(pipe.path(), CancelToken::new());
        let stats = sink.stats();

        // An endless run of tiny IDR pictures, each behind a delimiter.
        let script = concat!(
            r"while :; do printf '\000\000\000\001\011\360",
            r"\000\000\000\001\145\210\204'; done"
        );
        let mut camera = HelperCamera::with_args("sh", vec!["-c".to_string(), script.to_string()])
            .with_grace(Duration::from_millis(500));
        camera.start(&preset(), sink).unwrap();
        assert!(camera.is_active());

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.dropped() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(stats.dropped() > 0);

        let start = Instant::now();
        camera.stop().unwrap();
        assert!(!camera.is_active());
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_double_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut camera =
            HelperCamera::with_args("sh", vec!["-c".to_string(), "sleep 30".to_string()])
                .with_grace(Duration::from_millis(200));

        camera
            .start(&preset(), FrameSink::new(dir.path().join("a"), CancelToken::new()))
            .unwrap();
        let err = camera
            .start(&preset(), FrameSink::new(dir.path().join("b"), CancelToken::new()))
            .unwrap_err();
        assert!(matches!(err, CaptureError::AlreadyStarted));
        camera.stop().unwrap();
    }
}
