//! Transcoder command line and process spawning.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{info, instrument};
use url::Url;

use streamer_ipc::{AudioFormat, VideoPreset};
use streamer_transport::ProcessHandle;

use crate::composition::Composition;
use crate::error::EncoderError;
use crate::{EncoderResult, AUDIO_BITRATE_KBPS};

/// Everything needed to launch one session's transcoder.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Transcoder program.
    pub program: String,

    /// Remote publish endpoint.
    pub publish_url: String,

    /// Pipe carrying the H.264 elementary stream.
    pub video_pipe: PathBuf,

    /// Pipe carrying raw s16le PCM.
    pub audio_pipe: PathBuf,

    /// PCM layout on the audio pipe.
    pub audio: AudioFormat,

    /// Rate control for the published video.
    pub preset: VideoPreset,

    /// Overlays on the published picture.
    pub composition: Composition,

    /// Replaces the generated arguments entirely.
    pub custom_args: Option<Vec<String>>,
}

impl TranscoderConfig {
    /// Validate the publish URL.
    pub fn validate(&self) -> EncoderResult<()> {
        if self.publish_url.trim().is_empty() {
            return Err(EncoderError::MissingUrl);
        }
        Url::parse(&self.publish_url).map_err(|e| {
            EncoderError::InvalidUrl(format!("{}: {}", redact_url(&self.publish_url), e))
        })?;
        Ok(())
    }

    /// Full argument list.
    pub fn args(&self) -> Vec<String> {
        if let Some(args) = &self.custom_args {
            return args.clone();
        }

        let audio_rate = self.audio.sample_rate.to_string();
        let audio_channels = self.audio.channels.to_string();
        let gop = self.preset.gop().to_string();

        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "warning",
            "-fflags",
            "+genpts+discardcorrupt",
            "-flags",
            "low_delay",
            "-thread_queue_size",
            "4096",
            "-probesize",
            "64k",
            "-analyzeduration",
            "0",
            "-use_wallclock_as_timestamps",
            "1",
            "-f",
            "h264",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.video_pipe.to_string_lossy().into_owned());

        args.extend(
            [
                "-thread_queue_size",
                "4096",
                "-f",
                "s16le",
                "-ar",
                audio_rate.as_str(),
                "-ac",
                audio_channels.as_str(),
                "-i",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.audio_pipe.to_string_lossy().into_owned());

        if let Some(logo) = self.composition.logo() {
            args.extend(["-loop".to_string(), "1".to_string(), "-i".to_string()]);
            args.push(logo.to_string_lossy().into_owned());
        }

        args.push("-filter_complex".to_string());
        args.push(self.composition.filter_graph());

        args.extend(
            [
                "-map",
                "[vout]",
                "-map",
                "1:a",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-level",
                "3.1",
                "-b:v",
                format!("{}k", self.preset.bitrate_kbps).as_str(),
                "-maxrate",
                format!("{}k", self.preset.maxrate_kbps).as_str(),
                "-bufsize",
                format!("{}k", self.preset.bufsize_kbps).as_str(),
                "-r",
                self.preset.fps.to_string().as_str(),
                "-g",
                gop.as_str(),
                "-keyint_min",
                gop.as_str(),
                "-sc_threshold",
                "0",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                format!("{}k", AUDIO_BITRATE_KBPS).as_str(),
                "-ar",
                audio_rate.as_str(),
                "-progress",
                "pipe:2",
                "-f",
                "flv",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.publish_url.clone());

        args
    }
}

/// Launches the transcoder.
pub struct Transcoder;

impl Transcoder {
    /// Spawn the transcoder with stdout discarded and stderr piped.
    ///
    /// The caller must drain stderr for the whole life of the process or
    /// the transcoder eventually blocks on its own diagnostics.
    #[instrument(name = "transcoder_spawn", skip_all, fields(program = %config.program))]
    pub fn spawn(config: &TranscoderConfig) -> EncoderResult<ProcessHandle> {
        if config.custom_args.is_none() {
            config.validate()?;
        }

        let mut command = Command::new(&config.program);
        command
            .args(config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let process = ProcessHandle::spawn("transcoder", &mut command)?;

        info!(
            pid = process.id(),
            url = %redact_url(&config.publish_url),
            fps = config.preset.fps,
            bitrate_kbps = config.preset.bitrate_kbps,
            logo = config.composition.logo().is_some(),
            "Transcoder started"
        );
        Ok(process)
    }
}

/// Hide the stream key: keep scheme, host and the first path segment.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let first = parsed
                .path_segments()
                .and_then(|mut segments| segments.next())
                .unwrap_or_default();
            if first.is_empty() {
                format!("{}://{}/***", parsed.scheme(), host)
            } else {
                format!("{}://{}/{}/***", parsed.scheme(), host, first)
            }
        }
        Err(_) => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TranscoderConfig {
        TranscoderConfig {
            program: "ffmpeg".to_string(),
            publish_url: "rtmp://a.rtmp.youtube.com/live2/secret-key".to_string(),
            video_pipe: PathBuf::from("/tmp/camfifo.ts"),
            audio_pipe: PathBuf::from("/tmp/lofi_audio.pcm"),
            audio: AudioFormat::default(),
            preset: VideoPreset {
                width: 1280,
                height: 720,
                fps: 20,
                bitrate_kbps: 1500,
                maxrate_kbps: 1800,
                bufsize_kbps: 2400,
            },
            composition: Composition::new(1280, 720).with_status_text("/tmp/nowplaying.txt"),
            custom_args: None,
        }
    }

    fn has_pair(args: &[String], key: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == key && w[1] == value)
    }

    #[test]
    fn test_inputs_and_output() {
        let args = config().args();

        assert!(has_pair(&args, "-i", "/tmp/camfifo.ts"));
        assert!(has_pair(&args, "-i", "/tmp/lofi_audio.pcm"));
        assert!(has_pair(&args, "-f", "flv"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("rtmp://a.rtmp.youtube.com/live2/secret-key")
        );
    }

    #[test]
    fn test_rate_control_follows_preset() {
        let args = config().args();

        assert!(has_pair(&args, "-b:v", "1500k"));
        assert!(has_pair(&args, "-maxrate", "1800k"));
        assert!(has_pair(&args, "-bufsize", "2400k"));
        assert!(has_pair(&args, "-g", "80"));
        assert!(has_pair(&args, "-profile:v", "baseline"));
        assert!(has_pair(&args, "-b:a", "128k"));
        assert!(has_pair(&args, "-progress", "pipe:2"));
    }

    #[test]
    fn test_no_logo_input_without_logo() {
        let args = config().args();
        assert!(!args.iter().any(|a| a == "-loop"));
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut empty = config();
        empty.publish_url = "  ".to_string();
        assert!(matches!(empty.validate(), Err(EncoderError::MissingUrl)));

        let mut invalid = config();
        invalid.publish_url = "not a url".to_string();
        assert!(matches!(invalid.validate(), Err(EncoderError::InvalidUrl(_))));
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("rtmp://a.rtmp.youtube.com/live2/secret-key"),
            "rtmp://a.rtmp.youtube.com/live2/***"
        );
        assert_eq!(redact_url("garbage"), "***");
    }

    #[test]
    fn test_spawn_custom_args() {
        let mut config = config();
        config.program = "sh".to_string();
        config.custom_args = Some(vec!["-c".to_string(), "echo progress=continue >&2".to_string()]);

        let mut process = Transcoder::spawn(&config).unwrap();
        assert!(process.take_stderr().is_some());
        let status = process.wait_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(status.success());
    }
}
