//! The audio producer: decode tracks in sequence into the audio pipe.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use streamer_ipc::{AudioFormat, CancelToken};
use streamer_transport::{
    wait_readable, PipeWriter, ProcessHandle, TransportError, WorkerThread, CANCEL_CHECK_INTERVAL,
};

use crate::error::AudioError;
use crate::now_playing::{NowPlaying, NowPlayingView};
use crate::playlist::Playlist;
use crate::track::Track;
use crate::{AudioResult, CHUNK_BYTES};

/// Placeholder replaced by the track path in decoder arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Pause after a failed decode so a library of broken files cannot spin.
const DECODE_FAILURE_PAUSE: Duration = Duration::from_millis(500);

/// Pause before retrying a pipe that could not be opened.
const REOPEN_BACKOFF: Duration = Duration::from_secs(1);

/// External program that turns a track into raw PCM on stdout.
#[derive(Debug, Clone)]
pub struct DecoderCommand {
    program: String,
    args: Vec<String>,
}

impl DecoderCommand {
    /// Real-time ffmpeg decode to interleaved s16le in `format`.
    pub fn ffmpeg(program: impl Into<String>, format: AudioFormat) -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-re",
            "-vn",
            "-i",
            INPUT_PLACEHOLDER,
            "-f",
            "s16le",
            "-ar",
            format.sample_rate.to_string().as_str(),
            "-ac",
            format.channels.to_string().as_str(),
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            program: program.into(),
            args,
        }
    }

    /// Any program; `{input}` in `args` is replaced by the track path.
    pub fn custom(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with the placeholder resolved for `input`.
    pub fn args_for(&self, input: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &input))
            .collect()
    }

    fn command_for(&self, input: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.args_for(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        command
    }
}

/// Counters kept by the audio producer.
#[derive(Debug, Default)]
pub struct AudioStats {
    tracks_started: AtomicU64,
    decode_failures: AtomicU64,
    transport_reopens: AtomicU64,
    bytes_written: AtomicU64,
}

impl AudioStats {
    /// Tracks handed to the decoder.
    pub fn tracks_started(&self) -> u64 {
        self.tracks_started.load(Ordering::Relaxed)
    }

    /// Tracks whose decoder exited unsuccessfully.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Times the pipe was reopened after its reader went away.
    pub fn transport_reopens(&self) -> u64 {
        self.transport_reopens.load(Ordering::Relaxed)
    }

    /// PCM bytes delivered into the pipe.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

/// Owns the write end of the audio pipe for one session.
pub struct AudioProducer {
    worker: WorkerThread,
    stats: Arc<AudioStats>,
    now_playing: NowPlayingView,
}

impl AudioProducer {
    /// Start feeding `pipe` from `playlist` on a dedicated thread.
    ///
    /// The thread runs until `cancel` is set. On cancellation the current
    /// decoder gets `grace` to exit before it is killed.
    #[instrument(name = "audio_producer_start", skip_all, fields(pipe = %pipe.display()))]
    pub fn start(
        pipe: PathBuf,
        playlist: Playlist,
        decoder: DecoderCommand,
        now_playing: NowPlaying,
        cancel: CancelToken,
        grace: Duration,
    ) -> AudioResult<Self> {
        let stats = Arc::new(AudioStats::default());
        let view = now_playing.view();

        info!(decoder = decoder.program(), "Starting audio producer");

        let feeder = Feeder {
            pipe,
            playlist,
            decoder,
            now_playing,
            cancel,
            grace,
            stats: Arc::clone(&stats),
        };
        let worker = WorkerThread::spawn("audio-producer", move || feeder.run())?;

        Ok(Self {
            worker,
            stats,
            now_playing: view,
        })
    }

    /// Live counters.
    pub fn stats(&self) -> Arc<AudioStats> {
        Arc::clone(&self.stats)
    }

    /// Read-only view of the current track.
    pub fn now_playing(&self) -> NowPlayingView {
        self.now_playing.clone()
    }

    /// Check if the producer thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait up to `timeout` for the thread to exit after cancellation.
    pub fn join(self, timeout: Duration) -> bool {
        self.worker.join_timeout(timeout)
    }
}

struct Feeder {
    pipe: PathBuf,
    playlist: Playlist,
    decoder: DecoderCommand,
    now_playing: NowPlaying,
    cancel: CancelToken,
    grace: Duration,
    stats: Arc<AudioStats>,
}

impl Feeder {
    fn run(mut self) {
        info!("Audio producer running");
        let mut writer: Option<PipeWriter> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if writer.is_none() {
                match PipeWriter::open(&self.pipe, &self.cancel) {
                    Ok(opened) => writer = Some(opened),
                    Err(TransportError::Cancelled) => break,
                    Err(e) => {
                        warn!("Failed to open audio pipe: {}", e);
                        if self.cancel.wait_timeout(REOPEN_BACKOFF) {
                            break;
                        }
                        continue;
                    }
                }
            }
            let Some(pipe) = writer.as_mut() else {
                continue;
            };

            let Some(track) = self.playlist.next(&self.cancel) else {
                break;
            };

            info!(track = track.label(), "Now playing");
            self.now_playing.set(&track);
            self.stats.tracks_started.fetch_add(1, Ordering::Relaxed);

            match play(&self.decoder, &track, pipe, &self.cancel, self.grace, &self.stats) {
                Ok(()) => debug!(track = track.label(), "Track finished"),
                Err(e) if e.is_cancelled() => break,
                Err(e) if e.is_reader_gone() => {
                    warn!("Audio pipe reader went away, reopening");
                    writer = None;
                    self.stats.transport_reopens.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(track = track.label(), "Skipping track: {}", e);
                    self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                    if self.cancel.wait_timeout(DECODE_FAILURE_PAUSE) {
                        break;
                    }
                }
            }
        }

        info!(
            tracks = self.stats.tracks_started(),
            reopens = self.stats.transport_reopens(),
            "Audio producer stopped"
        );
    }
}

/// Decode one track into the pipe.
fn play(
    decoder: &DecoderCommand,
    track: &Track,
    pipe: &mut PipeWriter,
    cancel: &CancelToken,
    grace: Duration,
    stats: &AudioStats,
) -> AudioResult<()> {
    let mut process = ProcessHandle::spawn("decoder", &mut decoder.command_for(track.path()))?;

    let result = pump(&mut process, pipe, cancel, stats).and_then(|()| {
        // Output is drained; wait for the exit status without ignoring cancel.
        loop {
            if let Some(status) = process.wait_timeout(CANCEL_CHECK_INTERVAL) {
                if status.success() {
                    return Ok(());
                }
                return Err(AudioError::Decode {
                    track: track.label().to_string(),
                    code: status.code(),
                });
            }
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }
        }
    });

    if result.is_err() {
        process.shutdown(grace);
    }
    result
}

/// Copy decoder stdout into the pipe until EOF.
fn pump(
    process: &mut ProcessHandle,
    pipe: &mut PipeWriter,
    cancel: &CancelToken,
    stats: &AudioStats,
) -> AudioResult<()> {
    let mut stdout = process.take_stdout().ok_or(AudioError::DecoderOutput)?;
    let mut buf = [0u8; CHUNK_BYTES];

    loop {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled.into());
        }
        if !wait_readable(&stdout)? {
            continue;
        }

        let n = match stdout.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        pipe.write_all(&buf[..n], cancel)?;
        stats.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File, OpenOptions};
    use std::os::unix::fs::OpenOptionsExt;
    use std::thread;
    use std::time::Instant;

    use nix::fcntl::OFlag;
    use parking_lot::Mutex;
    use streamer_ipc::StatusPublisher;
    use streamer_transport::NamedPipe;

    use crate::playlist::TrackFilter;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl StatusPublisher for Recorder {
        fn publish_track(&self, label: &str) {
            self.0.lock().push(label.to_string());
        }

        fn publish_state(&self, _state: &str, _session: u64, _restarts: u32) {}
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        pipe: NamedPipe,
        library: PathBuf,
    }

    fn fixture(tracks: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("Sounds");
        fs::create_dir(&library).unwrap();
        for name in tracks {
            fs::write(library.join(name), vec![0u8; 64]).unwrap();
        }
        let pipe = NamedPipe::recreate(dir.path().join("audio.pcm")).unwrap();
        Fixture {
            _dir: dir,
            pipe,
            library,
        }
    }

    fn start(fixture: &Fixture, decoder: DecoderCommand, cancel: &CancelToken) -> AudioProducer {
        let playlist = Playlist::new(
            &fixture.library,
            TrackFilter::new(1),
            Duration::from_millis(50),
        );
        AudioProducer::start(
            fixture.pipe.path().to_path_buf(),
            playlist,
            decoder,
            NowPlaying::new(Arc::new(Recorder::default())),
            cancel.clone(),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    fn sh(script: &str) -> DecoderCommand {
        DecoderCommand::custom(
            "sh",
            vec!["-c".to_string(), script.to_string(), INPUT_PLACEHOLDER.to_string()],
        )
    }

    fn open_reader(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .unwrap()
    }

    fn read_some(reader: &mut File, want: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while out.len() < want && Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(n) if n > 0 => out.extend_from_slice(&buf[..n]),
                _ => thread::sleep(Duration::from_millis(10)),
            }
        }
        out
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_ffmpeg_arguments() {
        let decoder = DecoderCommand::ffmpeg("ffmpeg", AudioFormat::default());
        let args = decoder.args_for(Path::new("/music/a.mp3"));

        assert_eq!(decoder.program(), "ffmpeg");
        assert!(args.windows(2).any(|w| w == ["-i", "/music/a.mp3"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "44100"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "2"]));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_streams_decoder_output() {
        let fixture = fixture(&["a.mp3"]);
        let cancel = CancelToken::new();
        let mut reader = open_reader(fixture.pipe.path());

        let producer = start(&fixture, sh("yes \"$0\""), &cancel);
        let data = read_some(&mut reader, 256);

        let text = String::from_utf8_lossy(&data);
        assert!(text.contains("a.mp3"));
        assert_eq!(producer.now_playing().label().as_deref(), Some("a"));
        assert!(producer.stats().bytes_written() > 0);

        cancel.cancel();
        assert!(producer.join(Duration::from_secs(5)));
    }

    #[test]
    fn test_reader_loss_reopens_and_resumes() {
        let fixture = fixture(&["a.mp3", "b.mp3"]);
        let cancel = CancelToken::new();
        let mut reader = open_reader(fixture.pipe.path());

        let producer = start(&fixture, sh("yes \"$0\""), &cancel);
        let stats = producer.stats();
        assert!(!read_some(&mut reader, 256).is_empty());

        drop(reader);
        assert!(wait_for(|| stats.transport_reopens() == 1));
        assert!(!producer.is_finished());

        let mut reader = open_reader(fixture.pipe.path());
        assert!(!read_some(&mut reader, 256).is_empty());
        assert!(stats.tracks_started() >= 2);

        cancel.cancel();
        assert!(producer.join(Duration::from_secs(5)));
    }

    #[test]
    fn test_decode_failure_skips_track() {
        let fixture = fixture(&["a.mp3"]);
        let cancel = CancelToken::new();
        let _reader = open_reader(fixture.pipe.path());

        let producer = start(&fixture, sh("exit 3"), &cancel);
        let stats = producer.stats();

        assert!(wait_for(|| stats.decode_failures() >= 2));
        assert!(!producer.is_finished());
        assert_eq!(stats.transport_reopens(), 0);

        cancel.cancel();
        assert!(producer.join(Duration::from_secs(5)));
    }

    #[test]
    fn test_cancel_while_waiting_for_reader() {
        let fixture = fixture(&["a.mp3"]);
        let cancel = CancelToken::new();

        let producer = start(&fixture, sh("yes \"$0\""), &cancel);
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        cancel.cancel();
        assert!(producer.join(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
