//! The restart loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{error, info, instrument, warn};

use streamer_ipc::{
    CancelToken, EngineOutcome, RestartReason, SessionMetrics, StreamerConfig, SupervisorEvent,
};
use streamer_transport::ReachabilityProbe;

use crate::policy::{RestartDecision, RestartPolicy};
use crate::session::Session;

/// Wait between reachability checks while holding a restart for the network.
const NETWORK_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How a session ended.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// The restart request, if any detector made one.
    pub restart: Option<RestartReason>,

    /// Counters collected during the session.
    pub metrics: SessionMetrics,
}

/// Runs one session to completion.
pub trait SessionRunner {
    /// Run `session` until it is cancelled or asks for a restart.
    ///
    /// `shutdown` is the process-wide token; the runner must stop the
    /// session within one poll interval of it being set.
    fn run_session(&mut self, session: &Arc<Session>, shutdown: &CancelToken) -> SessionReport;
}

/// The restart loop: runs sessions until shutdown, a clean stop or the
/// attempt limit.
pub struct Engine<R: SessionRunner> {
    runner: R,
    policy: RestartPolicy,
    auto_restart: bool,
    shutdown: CancelToken,
    event_tx: Option<Sender<SupervisorEvent>>,
    network_probe: Option<ReachabilityProbe>,
    sessions: u64,
}

impl<R: SessionRunner> Engine<R> {
    /// Create an engine running sessions with `runner`.
    pub fn new(runner: R, config: &StreamerConfig, shutdown: CancelToken) -> Self {
        Self {
            runner,
            policy: RestartPolicy::from_config(config),
            auto_restart: config.auto_restart,
            shutdown,
            event_tx: None,
            network_probe: None,
            sessions: 0,
        }
    }

    /// Emit supervisor events on `event_tx`.
    pub fn with_events(mut self, event_tx: Sender<SupervisorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Hold each restart until `probe` succeeds.
    pub fn with_network_probe(mut self, probe: ReachabilityProbe) -> Self {
        self.network_probe = Some(probe);
        self
    }

    /// Sessions started so far.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// The session runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run sessions until the loop finishes (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) -> EngineOutcome {
        info!(
            max_attempts = self.policy.max_attempts(),
            cooldown_secs = self.policy.cooldown().as_secs(),
            auto_restart = self.auto_restart,
            "Engine starting"
        );

        let outcome = loop {
            if self.shutdown.is_cancelled() {
                break EngineOutcome::Shutdown;
            }

            self.sessions += 1;
            let session = Arc::new(Session::new(self.sessions));
            info!(session = session.id(), "Session starting");
            self.send_event(SupervisorEvent::SessionStarted {
                session: session.id(),
            });

            let report = self.runner.run_session(&session, &self.shutdown);

            info!(
                session = session.id(),
                uptime_secs = report.metrics.uptime_seconds,
                tracks = report.metrics.tracks_started,
                frames_delivered = report.metrics.frames_delivered,
                frames_dropped = report.metrics.frames_dropped,
                reason = %report.restart.as_ref().map(|r| r.message()).unwrap_or_default(),
                "Session ended"
            );
            self.send_event(SupervisorEvent::SessionEnded {
                session: session.id(),
                restart: report.restart.is_some(),
                reason: report.restart.clone(),
                metrics: report.metrics.clone(),
            });

            if self.shutdown.is_cancelled() {
                break EngineOutcome::Shutdown;
            }

            let Some(reason) = report.restart else {
                info!("Session ended without a restart request");
                break EngineOutcome::Stopped;
            };

            if !self.auto_restart {
                warn!("Auto-restart disabled, not restarting");
                break EngineOutcome::Stopped;
            }

            match self.policy.record_failure(Instant::now()) {
                RestartDecision::GiveUp { attempts } => {
                    error!(attempts, "Too many restarts, giving up");
                    break EngineOutcome::GaveUp { attempts };
                }
                RestartDecision::Retry { attempt } => {
                    let cooldown = self.policy.cooldown();
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        cooldown_secs = cooldown.as_secs_f32(),
                        "Restarting session after cooldown"
                    );
                    self.send_event(SupervisorEvent::RestartScheduled {
                        attempt,
                        max_attempts: self.policy.max_attempts(),
                        reason,
                        cooldown,
                    });

                    if self.shutdown.wait_timeout(cooldown) {
                        break EngineOutcome::Shutdown;
                    }
                    if !self.wait_for_network() {
                        break EngineOutcome::Shutdown;
                    }
                    self.policy.mark_restarted(Instant::now());
                }
            }
        };

        info!(?outcome, sessions = self.sessions, "Engine stopped");
        self.send_event(SupervisorEvent::Finished(outcome.clone()));
        outcome
    }

    /// Block until the publish host answers. Returns false on shutdown.
    fn wait_for_network(&self) -> bool {
        let Some(probe) = &self.network_probe else {
            return true;
        };

        let mut warned = false;
        loop {
            if self.shutdown.is_cancelled() {
                return false;
            }
            if probe.check() {
                if warned {
                    info!("Publish host reachable again");
                }
                return true;
            }
            if !warned {
                warn!(
                    host = probe.host(),
                    port = probe.port(),
                    "Publish host unreachable, holding restart"
                );
                warned = true;
            }
            if self.shutdown.wait_timeout(NETWORK_RETRY_INTERVAL) {
                return false;
            }
        }
    }

    fn send_event(&self, event: SupervisorEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}
