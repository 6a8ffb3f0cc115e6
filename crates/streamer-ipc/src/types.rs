//! Common types shared across the streamer crates.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything a streamer run needs, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Remote publish endpoint (e.g., "rtmp://a.rtmp.youtube.com/live2/KEY").
    pub publish_url: String,

    /// Directory holding the audio library.
    pub playlist_dir: PathBuf,

    /// Branding image overlaid top-right, if present on disk.
    pub logo_path: Option<PathBuf>,

    /// Named pipe carrying the camera's H.264 elementary stream.
    pub video_pipe: PathBuf,

    /// Named pipe carrying raw s16le PCM.
    pub audio_pipe: PathBuf,

    /// "Now Playing: ..." text, also the transcoder's status overlay source.
    pub now_playing_file: PathBuf,

    /// Bare current track label for the dashboard.
    pub current_track_file: PathBuf,

    /// JSON status snapshot for the dashboard.
    pub status_file: PathBuf,

    /// Output frame width.
    pub output_width: u32,

    /// Output frame height.
    pub output_height: u32,

    /// Frame rate used when the hardware is not recognized.
    pub fallback_fps: u32,

    /// PCM format on the audio pipe.
    pub audio: AudioFormat,

    /// Minimum file size for a track to be playable.
    pub min_track_bytes: u64,

    /// Wait before rescanning an empty library.
    pub empty_library_backoff: Duration,

    /// Interval between watchdog evaluations.
    pub watchdog_interval: Duration,

    /// Maximum silence on the progress heartbeat before a restart.
    pub stall_timeout: Duration,

    /// Scheduled rotation age; zero disables rotation.
    pub max_session_age: Duration,

    /// Interval of the supervisor's running loop.
    pub supervisor_poll: Duration,

    /// Grace period between terminate and kill for child processes.
    pub terminate_grace: Duration,

    /// Bound on joining each worker thread at shutdown.
    pub join_timeout: Duration,

    /// Restart sessions that ask for it.
    pub auto_restart: bool,

    /// Consecutive restarts allowed inside one cooldown window.
    pub max_restart_attempts: u32,

    /// Wait between a failed session and the next one.
    pub restart_cooldown: Duration,

    /// Block before restarting until the publish host answers.
    pub wait_for_network: bool,

    /// Host used for reachability probes.
    pub check_host: String,

    /// Port used for reachability probes.
    pub check_port: u16,

    /// Interval of the watchdog's reachability probe; zero disables it.
    pub probe_interval: Duration,

    /// Decoder program used for tracks.
    pub decoder_program: String,

    /// Transcoder program.
    pub transcoder_program: String,

    /// Camera helper program.
    pub camera_program: String,
}

impl StreamerConfig {
    /// Returns the scheduled rotation age, or None when disabled.
    pub fn session_age_limit(&self) -> Option<Duration> {
        (!self.max_session_age.is_zero()).then_some(self.max_session_age)
    }

    /// Returns the reachability probe interval, or None when disabled.
    pub fn probe_every(&self) -> Option<Duration> {
        (!self.probe_interval.is_zero()).then_some(self.probe_interval)
    }
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            publish_url: String::new(),
            playlist_dir: PathBuf::from("Sounds"),
            logo_path: Some(PathBuf::from("Logo/picam.png")),
            video_pipe: PathBuf::from("/tmp/camfifo.ts"),
            audio_pipe: PathBuf::from("/tmp/lofi_audio.pcm"),
            now_playing_file: PathBuf::from("/tmp/nowplaying.txt"),
            current_track_file: PathBuf::from("/tmp/current_track.txt"),
            status_file: PathBuf::from("/tmp/lofi_status.json"),
            output_width: 1280,
            output_height: 720,
            fallback_fps: 20,
            audio: AudioFormat::default(),
            min_track_bytes: 100_000,
            empty_library_backoff: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(120),
            max_session_age: Duration::from_secs(6 * 3600),
            supervisor_poll: Duration::from_secs(1),
            terminate_grace: Duration::from_secs(5),
            join_timeout: Duration::from_secs(3),
            auto_restart: true,
            max_restart_attempts: 6,
            restart_cooldown: Duration::from_secs(60),
            wait_for_network: true,
            check_host: "a.rtmp.youtube.com".to_string(),
            check_port: 1935,
            probe_interval: Duration::from_secs(300),
            decoder_program: "ffmpeg".to_string(),
            transcoder_program: "ffmpeg".to_string(),
            camera_program: "rpicam-vid".to_string(),
        }
    }
}

/// Raw PCM layout on the audio pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioFormat {
    /// Bytes per second of s16le audio in this format.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

/// Frame rate and rate control chosen for the camera and transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPreset {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Frames per second.
    pub fps: u32,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Peak bitrate in kbps.
    pub maxrate_kbps: u32,

    /// Rate control buffer in kbits.
    pub bufsize_kbps: u32,
}

impl VideoPreset {
    /// Keyframe interval in frames (four seconds).
    pub fn gop(&self) -> u32 {
        self.fps * 4
    }
}

/// Counters collected during one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Camera chunks written into the video pipe.
    pub frames_delivered: u64,

    /// Camera chunks dropped because the video pipe was full or detached.
    pub frames_dropped: u64,

    /// Tracks handed to a decoder.
    pub tracks_started: u64,

    /// Tracks whose decoder failed.
    pub decode_failures: u64,

    /// Times the audio pipe was reopened after its reader went away.
    pub transport_reopens: u64,

    /// Session uptime in seconds.
    pub uptime_seconds: u64,
}
