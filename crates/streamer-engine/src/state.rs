//! The session supervisor: ordered startup, monitoring and ordered shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, instrument, warn};

use streamer_audio::{
    AudioProducer, DecoderCommand, NowPlaying, NowPlayingView, Playlist, TrackFilter,
};
use streamer_capture::{Camera, HelperCamera, VideoProducer};
use streamer_encoder::{Composition, EncoderError, Transcoder, TranscoderConfig};
use streamer_ipc::{
    CancelToken, RestartReason, SessionState, ShutdownPhase, StartupPhase, StatusPublisher,
    StreamerConfig, SupervisorEvent, VideoPreset,
};
use streamer_transport::{NamedPipe, ProcessHandle, ReachabilityProbe};

use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::orchestrator::{SessionReport, SessionRunner};
use crate::session::Session;
use crate::telemetry::{Telemetry, TelemetryReader};
use crate::watchdog::{Watchdog, WatchdogConfig};
use crate::EngineResult;

/// Interval of the running loop's stats line.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(300);

/// Status shown before the first track of a session starts.
const STARTING_LABEL: &str = "Starting";

/// Builds the camera for each session.
pub type CameraFactory = Box<dyn FnMut(&StreamerConfig) -> Box<dyn Camera> + Send>;

/// Resolves the publish URL at the start of each session.
///
/// Returning None keeps the URL already in the configuration.
pub type PublishUrlSource = Box<dyn FnMut() -> Option<String> + Send>;

/// Resources that have been brought up for the current session.
#[derive(Default)]
struct SessionResources {
    video_pipe: Option<NamedPipe>,
    audio_pipe: Option<NamedPipe>,
    transcoder: Option<ProcessHandle>,
    telemetry: Option<Arc<Telemetry>>,
    telemetry_reader: Option<TelemetryReader>,
    video: Option<VideoProducer>,
    audio: Option<AudioProducer>,
    watchdog: Option<Watchdog>,
}

/// Runs sessions of the real pipeline: pipes, transcoder, camera, audio.
pub struct PipelineRunner {
    config: StreamerConfig,
    preset: VideoPreset,
    publisher: Arc<dyn StatusPublisher>,
    event_tx: Option<Sender<SupervisorEvent>>,
    camera_factory: CameraFactory,
    url_source: Option<PublishUrlSource>,
    decoder: DecoderCommand,
    transcoder_args: Option<Vec<String>>,
    now_playing: Option<NowPlayingView>,
    state: SessionState,
}

impl PipelineRunner {
    /// Create a runner for `config`, using `preset` for every session.
    pub fn new(
        config: StreamerConfig,
        preset: VideoPreset,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        let decoder = DecoderCommand::ffmpeg(config.decoder_program.clone(), config.audio);

        Self {
            config,
            preset,
            publisher,
            event_tx: None,
            camera_factory: Box::new(|config: &StreamerConfig| -> Box<dyn Camera> {
                Box::new(
                    HelperCamera::new(config.camera_program.clone())
                        .with_grace(config.terminate_grace),
                )
            }),
            url_source: None,
            decoder,
            transcoder_args: None,
            now_playing: None,
            state: SessionState::Idle,
        }
    }

    /// Emit state changes on `event_tx`.
    pub fn with_events(mut self, event_tx: Sender<SupervisorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Build each session's camera with `factory`.
    pub fn with_camera(mut self, factory: CameraFactory) -> Self {
        self.camera_factory = factory;
        self
    }

    /// Re-resolve the publish URL with `source` before every session.
    pub fn with_url_source(mut self, source: PublishUrlSource) -> Self {
        self.url_source = Some(source);
        self
    }

    /// Decode tracks with `decoder`.
    pub fn with_decoder(mut self, decoder: DecoderCommand) -> Self {
        self.decoder = decoder;
        self
    }

    /// Launch the transcoder with fixed arguments.
    pub fn with_transcoder_args(mut self, args: Vec<String>) -> Self {
        self.transcoder_args = Some(args);
        self
    }

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Track of the current or most recent session.
    pub fn now_playing(&self) -> Option<NowPlayingView> {
        self.now_playing.clone()
    }

    fn refresh_publish_url(&mut self) {
        let Some(url) = self.url_source.as_mut().and_then(|source| source()) else {
            return;
        };
        if url != self.config.publish_url {
            info!("Publish URL changed");
            self.config.publish_url = url;
        }
    }

    fn composition(&self) -> Composition {
        let composition = Composition::new(self.config.output_width, self.config.output_height)
            .with_status_text(&self.config.now_playing_file)
            .with_clock(true)
            .with_spectrum(true);

        match &self.config.logo_path {
            Some(logo) => composition.with_logo(logo),
            None => composition,
        }
    }

    fn transcoder_config(&self) -> TranscoderConfig {
        TranscoderConfig {
            program: self.config.transcoder_program.clone(),
            publish_url: self.config.publish_url.clone(),
            video_pipe: self.config.video_pipe.clone(),
            audio_pipe: self.config.audio_pipe.clone(),
            audio: self.config.audio,
            preset: self.preset,
            composition: self.composition(),
            custom_args: self.transcoder_args.clone(),
        }
    }

    /// Bring up every startup phase in order.
    fn start(
        &mut self,
        session: &Arc<Session>,
        resources: &mut SessionResources,
        metrics: &MetricsCollector,
    ) -> EngineResult<()> {
        let mut phase = StartupPhase::FIRST;

        loop {
            self.transition_to(SessionState::Starting { phase });
            self.start_phase(phase, session, resources, metrics)?;

            match phase.next() {
                Some(next) => phase = next,
                None => return Ok(()),
            }
        }
    }

    fn start_phase(
        &mut self,
        phase: StartupPhase,
        session: &Arc<Session>,
        resources: &mut SessionResources,
        metrics: &MetricsCollector,
    ) -> EngineResult<()> {
        debug!("Startup phase: {}", phase.name());

        match phase {
            StartupPhase::CreateTransports => {
                let video = NamedPipe::recreate(&self.config.video_pipe)
                    .map_err(|e| EngineError::resource(phase, e))?;
                resources.video_pipe = Some(video);

                let audio = NamedPipe::recreate(&self.config.audio_pipe)
                    .map_err(|e| EngineError::resource(phase, e))?;
                resources.audio_pipe = Some(audio);
            }
            StartupPhase::StartTranscoder => {
                self.refresh_publish_url();

                // The status overlay reads this file from the first frame on.
                if !self.config.now_playing_file.is_file() {
                    self.publisher.publish_track(STARTING_LABEL);
                }

                let process = Transcoder::spawn(&self.transcoder_config())
                    .map_err(|e| EngineError::resource(phase, e))?;
                resources.transcoder = Some(process);
            }
            StartupPhase::StartTelemetry => {
                let stderr = resources
                    .transcoder
                    .as_mut()
                    .and_then(|process| process.take_stderr())
                    .ok_or_else(|| EngineError::resource(phase, EncoderError::NoDiagnostics))?;

                let telemetry = Arc::new(Telemetry::new(Instant::now()));
                resources.telemetry_reader =
                    Some(TelemetryReader::start(stderr, Arc::clone(&telemetry))?);
                resources.telemetry = Some(telemetry);
            }
            StartupPhase::StartVideo => {
                let camera = (self.camera_factory)(&self.config);
                let producer = VideoProducer::start(
                    camera,
                    self.preset,
                    self.config.video_pipe.clone(),
                    session.cancel_token().clone(),
                )
                .map_err(|e| EngineError::resource(phase, e))?;

                metrics.attach_video(producer.stats());
                resources.video = Some(producer);
            }
            StartupPhase::StartAudio => {
                let playlist = Playlist::new(
                    &self.config.playlist_dir,
                    TrackFilter::new(self.config.min_track_bytes),
                    self.config.empty_library_backoff,
                );
                let producer = AudioProducer::start(
                    self.config.audio_pipe.clone(),
                    playlist,
                    self.decoder.clone(),
                    NowPlaying::new(Arc::clone(&self.publisher)),
                    session.cancel_token().clone(),
                    self.config.terminate_grace,
                )
                .map_err(|e| EngineError::resource(phase, e))?;

                metrics.attach_audio(producer.stats());
                self.now_playing = Some(producer.now_playing());
                resources.audio = Some(producer);
            }
            StartupPhase::StartWatchdog => {
                let telemetry = resources
                    .telemetry
                    .clone()
                    .ok_or_else(|| EngineError::resource(phase, "telemetry not running"))?;
                let probe = self.config.probe_every().map(|_| {
                    ReachabilityProbe::new(self.config.check_host.clone(), self.config.check_port)
                });

                resources.watchdog = Some(Watchdog::start(
                    WatchdogConfig::from(&self.config),
                    Arc::clone(session),
                    telemetry,
                    probe,
                )?);
            }
        }

        Ok(())
    }

    /// Poll until the session is cancelled, the transcoder exits or a
    /// global shutdown is requested.
    fn monitor(
        &self,
        session: &Session,
        shutdown: &CancelToken,
        resources: &mut SessionResources,
        metrics: &MetricsCollector,
    ) {
        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, stopping session");
                session.stop();
                return;
            }

            if let Some(status) = resources.transcoder.as_mut().and_then(|p| p.poll()) {
                warn!(code = ?status.code(), "Transcoder exited");
                session.request_restart(RestartReason::TranscoderExited {
                    code: status.code(),
                });
                return;
            }

            if session.cancel_token().wait_timeout(self.config.supervisor_poll) {
                return;
            }

            if metrics.report_due(METRICS_LOG_INTERVAL) {
                let snapshot = metrics.snapshot();
                let track = self.now_playing.as_ref().and_then(|view| view.label());
                info!(
                    track = track.as_deref().unwrap_or("-"),
                    uptime_secs = snapshot.uptime_seconds,
                    tracks = snapshot.tracks_started,
                    frames_delivered = snapshot.frames_delivered,
                    frames_dropped = snapshot.frames_dropped,
                    "Session stats"
                );
            }
        }
    }

    /// Tear down every resource in shutdown order. Missing resources are skipped.
    fn stop(&mut self, resources: &mut SessionResources) {
        let mut phase = ShutdownPhase::FIRST;

        loop {
            self.transition_to(SessionState::Stopping { phase });
            self.stop_phase(phase, resources);

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }
    }

    fn stop_phase(&self, phase: ShutdownPhase, resources: &mut SessionResources) {
        debug!("Shutdown phase: {}", phase.name());
        let join_timeout = self.config.join_timeout;

        match phase {
            ShutdownPhase::StopVideo => {
                if let Some(mut video) = resources.video.take() {
                    if let Err(e) = video.stop() {
                        warn!("Camera stop failed: {}", e);
                    }
                }
            }
            ShutdownPhase::StopTranscoder => {
                if let Some(process) = resources.transcoder.as_mut() {
                    let status = process.shutdown(self.config.terminate_grace);
                    debug!(?status, "Transcoder stopped");
                }
            }
            ShutdownPhase::JoinAudio => {
                if let Some(audio) = resources.audio.take() {
                    audio.join(join_timeout);
                }
            }
            ShutdownPhase::JoinMonitors => {
                if let Some(reader) = resources.telemetry_reader.take() {
                    reader.join(join_timeout);
                }
                if let Some(watchdog) = resources.watchdog.take() {
                    watchdog.join(join_timeout);
                }
                resources.telemetry = None;
            }
            ShutdownPhase::CloseTransports => {
                resources.transcoder = None;
                resources.video_pipe = None;
                resources.audio_pipe = None;
            }
        }
    }

    fn transition_to(&mut self, new_state: SessionState) {
        let previous = std::mem::replace(&mut self.state, new_state.clone());

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        if let Some(tx) = &self.event_tx {
            let event = SupervisorEvent::StateChanged {
                previous: Box::new(previous),
                current: Box::new(new_state),
            };
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}

impl SessionRunner for PipelineRunner {
    #[instrument(name = "session", skip_all, fields(session = session.id()))]
    fn run_session(&mut self, session: &Arc<Session>, shutdown: &CancelToken) -> SessionReport {
        let metrics = MetricsCollector::new();
        let mut resources = SessionResources::default();
        metrics.start();

        match self.start(session, &mut resources, &metrics) {
            Ok(()) => {
                self.transition_to(SessionState::Running);
                info!(fps = self.preset.fps, "Session running");
                self.monitor(session, shutdown, &mut resources, &metrics);
            }
            Err(e) => {
                error!("Session startup failed, rolling back: {}", e);
                session.request_restart(RestartReason::StartupFailed {
                    message: e.to_string(),
                });
            }
        }

        // Workers only stop once the session token is set.
        session.stop();
        self.stop(&mut resources);

        let restart = session.restart_reason();
        self.transition_to(SessionState::Ended {
            restart: restart.is_some(),
        });

        SessionReport {
            restart,
            metrics: metrics.snapshot(),
        }
    }
}
