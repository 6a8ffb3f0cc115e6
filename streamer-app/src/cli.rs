//! Command line and environment configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};

use streamer_ipc::{AudioFormat, StreamerConfig};

/// Unattended camera plus playlist live streamer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Publish URL, stream key included
    #[arg(long, env = "LOFI_YOUTUBE_URL", hide_env_values = true)]
    pub url: Option<String>,

    /// File whose first non-empty line is the publish URL
    #[arg(long, env = "LOFI_STREAM_URL_FILE", default_value = "stream_url.txt")]
    pub url_file: PathBuf,

    /// Track library
    #[arg(long, env = "LOFI_SOUNDS_DIR", default_value = "Sounds")]
    pub sounds_dir: PathBuf,

    /// Logo overlay image
    #[arg(long, env = "LOFI_LOGO", default_value = "Logo/picam.png")]
    pub logo: PathBuf,

    /// Stream without the logo overlay
    #[arg(long, env = "LOFI_NO_LOGO")]
    pub no_logo: bool,

    /// Camera named pipe
    #[arg(long, env = "LOFI_VIDEO_PIPE", default_value = "/tmp/camfifo.ts")]
    pub video_pipe: PathBuf,

    /// PCM named pipe
    #[arg(long, env = "LOFI_AUDIO_PIPE", default_value = "/tmp/lofi_audio.pcm")]
    pub audio_pipe: PathBuf,

    /// Now-playing overlay file
    #[arg(long, env = "LOFI_NOW_PLAYING_FILE", default_value = "/tmp/nowplaying.txt")]
    pub now_playing_file: PathBuf,

    /// Current track file read by the dashboard
    #[arg(long, env = "LOFI_CURRENT_TRACK_FILE", default_value = "/tmp/current_track.txt")]
    pub current_track_file: PathBuf,

    /// JSON status file read by the dashboard
    #[arg(long, env = "LOFI_STATUS_FILE", default_value = "/tmp/lofi_status.json")]
    pub status_file: PathBuf,

    /// Output width
    #[arg(long, env = "LOFI_WIDTH", default_value_t = 1280)]
    pub width: u32,

    /// Output height
    #[arg(long, env = "LOFI_HEIGHT", default_value_t = 720)]
    pub height: u32,

    /// Frame rate when the board is not recognised
    #[arg(long, env = "LOFI_FPS", default_value_t = 20)]
    pub fps: u32,

    /// Smallest playable track, in bytes
    #[arg(long, env = "LOFI_MIN_TRACK_BYTES", default_value_t = 100_000)]
    pub min_track_bytes: u64,

    /// Seconds between watchdog checks
    #[arg(long, env = "LOFI_WATCHDOG_INTERVAL", default_value_t = 10)]
    pub watchdog_interval: u64,

    /// Seconds without transcoder progress before a restart
    #[arg(long, env = "LOFI_STALL_TIMEOUT", default_value_t = 120)]
    pub stall_timeout: u64,

    /// Hours before a scheduled session restart, 0 disables
    #[arg(long, env = "LOFI_MAX_SESSION_HOURS", default_value_t = 6)]
    pub max_session_hours: u64,

    /// Restart sessions that fail
    #[arg(long, env = "LOFI_AUTO_RESTART", default_value_t = true, action = ArgAction::Set)]
    pub auto_restart: bool,

    /// Consecutive restarts before giving up
    #[arg(long, env = "LOFI_MAX_RESTARTS", default_value_t = 6)]
    pub max_restarts: u32,

    /// Seconds to wait before each restart
    #[arg(long, env = "LOFI_RESTART_COOLDOWN", default_value_t = 60)]
    pub restart_cooldown: u64,

    /// Hold restarts until the publish host answers
    #[arg(long, env = "LOFI_WAIT_FOR_NETWORK", default_value_t = true, action = ArgAction::Set)]
    pub wait_for_network: bool,

    /// Skip the reachability check at startup
    #[arg(long, env = "LOFI_SKIP_NETWORK_CHECK")]
    pub skip_network_check: bool,

    /// Host used for reachability checks
    #[arg(long, env = "LOFI_CHECK_HOST", default_value = "a.rtmp.youtube.com")]
    pub check_host: String,

    /// Port used for reachability checks
    #[arg(long, env = "LOFI_CHECK_PORT", default_value_t = 1935)]
    pub check_port: u16,

    /// Seconds between reachability probes while live, 0 disables
    #[arg(long, env = "LOFI_PROBE_INTERVAL", default_value_t = 300)]
    pub probe_interval: u64,

    /// Decoder program
    #[arg(long, env = "LOFI_DECODER", default_value = "ffmpeg")]
    pub decoder: String,

    /// Transcoder program
    #[arg(long, env = "LOFI_TRANSCODER", default_value = "ffmpeg")]
    pub transcoder: String,

    /// Camera helper program
    #[arg(long, env = "LOFI_CAMERA", default_value = "rpicam-vid")]
    pub camera: String,
}

impl Args {
    /// Build the streamer configuration, resolving the publish URL.
    pub fn into_config(self) -> anyhow::Result<StreamerConfig> {
        let publish_url = resolve_publish_url(self.url.as_deref(), &self.url_file)?;

        Ok(StreamerConfig {
            publish_url,
            playlist_dir: self.sounds_dir,
            logo_path: (!self.no_logo).then_some(self.logo),
            video_pipe: self.video_pipe,
            audio_pipe: self.audio_pipe,
            now_playing_file: self.now_playing_file,
            current_track_file: self.current_track_file,
            status_file: self.status_file,
            output_width: self.width,
            output_height: self.height,
            fallback_fps: self.fps,
            audio: AudioFormat::default(),
            min_track_bytes: self.min_track_bytes,
            watchdog_interval: Duration::from_secs(self.watchdog_interval),
            stall_timeout: Duration::from_secs(self.stall_timeout),
            max_session_age: Duration::from_secs(self.max_session_hours * 3600),
            auto_restart: self.auto_restart,
            max_restart_attempts: self.max_restarts,
            restart_cooldown: Duration::from_secs(self.restart_cooldown),
            wait_for_network: self.wait_for_network,
            check_host: self.check_host,
            check_port: self.check_port,
            probe_interval: Duration::from_secs(self.probe_interval),
            decoder_program: self.decoder,
            transcoder_program: self.transcoder,
            camera_program: self.camera,
            ..StreamerConfig::default()
        })
    }
}

/// The explicit URL wins; otherwise the first non-empty line of `file`.
pub fn resolve_publish_url(url: Option<&str>, file: &Path) -> anyhow::Result<String> {
    if let Some(url) = url.map(str::trim).filter(|url| !url.is_empty()) {
        return Ok(url.to_string());
    }

    let contents = fs::read_to_string(file)
        .with_context(|| format!("no publish URL set and {} is unreadable", file.display()))?;

    match contents.lines().map(str::trim).find(|line| !line.is_empty()) {
        Some(line) => Ok(line.to_string()),
        None => bail!("{} contains no publish URL", file.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_url_wins() {
        let url = resolve_publish_url(
            Some(" rtmp://a.rtmp.youtube.com/live2/key "),
            Path::new("/nonexistent/stream_url.txt"),
        )
        .unwrap();
        assert_eq!(url, "rtmp://a.rtmp.youtube.com/live2/key");
    }

    #[test]
    fn test_url_from_first_non_empty_line() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stream_url.txt");
        fs::write(&file, "\n   \nrtmp://host/app/key\nrtmp://other/app/key\n").unwrap();

        assert_eq!(resolve_publish_url(Some(""), &file).unwrap(), "rtmp://host/app/key");
    }

    #[test]
    fn test_missing_url_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stream_url.txt");
        assert!(resolve_publish_url(None, &file).is_err());

        fs::write(&file, "\n\n").unwrap();
        assert!(resolve_publish_url(None, &file).is_err());
    }

    #[test]
    fn test_defaults_match_streamer_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stream_url.txt");
        fs::write(&file, "rtmp://host/app/key\n").unwrap();

        let args = Args::try_parse_from([
            "lofi-streamer",
            "--url-file",
            file.to_str().unwrap(),
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        let defaults = StreamerConfig::default();

        assert_eq!(config.publish_url, "rtmp://host/app/key");
        assert_eq!(config.stall_timeout, defaults.stall_timeout);
        assert_eq!(config.max_session_age, defaults.max_session_age);
        assert_eq!(config.restart_cooldown, defaults.restart_cooldown);
        assert_eq!(config.max_restart_attempts, defaults.max_restart_attempts);
        assert_eq!(config.logo_path, defaults.logo_path);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "lofi-streamer",
            "--url",
            "rtmp://host/app/key",
            "--no-logo",
            "--auto-restart",
            "false",
            "--max-session-hours",
            "0",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.logo_path, None);
        assert!(!config.auto_restart);
        assert_eq!(config.session_age_limit(), None);
    }
}
