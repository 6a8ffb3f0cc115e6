//! Periodic health evaluation of a running session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use streamer_ipc::{RestartReason, StreamerConfig};
use streamer_transport::{ReachabilityProbe, WorkerThread};

use crate::session::Session;
use crate::telemetry::{Telemetry, TelemetrySnapshot};
use crate::EngineResult;

/// Watchdog thresholds.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Time between evaluations.
    pub interval: Duration,

    /// Maximum heartbeat silence.
    pub stall_timeout: Duration,

    /// Scheduled rotation age.
    pub max_session_age: Option<Duration>,

    /// Reachability probe cadence.
    pub probe_every: Option<Duration>,
}

impl From<&StreamerConfig> for WatchdogConfig {
    fn from(config: &StreamerConfig) -> Self {
        Self {
            interval: config.watchdog_interval,
            stall_timeout: config.stall_timeout,
            max_session_age: config.session_age_limit(),
            probe_every: config.probe_every(),
        }
    }
}

/// Decide whether the session must restart.
///
/// Conditions are checked in order and the first match wins: transcoder
/// gone, session too old, heartbeat stalled, fatal diagnostic.
pub fn evaluate(
    config: &WatchdogConfig,
    snapshot: &TelemetrySnapshot,
    started_at: Instant,
    now: Instant,
) -> Option<RestartReason> {
    if snapshot.stream_closed {
        return Some(RestartReason::TranscoderExited { code: None });
    }

    if let Some(max_age) = config.max_session_age {
        if now.saturating_duration_since(started_at) > max_age {
            return Some(RestartReason::SessionAgeExceeded {
                max_age_secs: max_age.as_secs(),
            });
        }
    }

    let silent = snapshot.since_progress(now);
    if silent > config.stall_timeout {
        return Some(RestartReason::Stalled {
            silent_secs: silent.as_secs(),
        });
    }

    if snapshot.fatal {
        return Some(RestartReason::FatalDiagnostic {
            line: snapshot.last_error.clone().unwrap_or_default(),
        });
    }

    None
}

/// The watchdog thread of one session.
///
/// It only ever requests a restart; tearing the session down is the
/// supervisor's job.
pub struct Watchdog {
    worker: WorkerThread,
}

impl Watchdog {
    /// Start watching `session`.
    pub fn start(
        config: WatchdogConfig,
        session: Arc<Session>,
        telemetry: Arc<Telemetry>,
        probe: Option<ReachabilityProbe>,
    ) -> EngineResult<Self> {
        info!(
            interval_secs = config.interval.as_secs_f32(),
            stall_secs = config.stall_timeout.as_secs(),
            "Starting watchdog"
        );
        let worker = WorkerThread::spawn("watchdog", move || {
            watch(&config, &session, &telemetry, probe.as_ref());
        })?;
        Ok(Self { worker })
    }

    /// Check if the watchdog has returned.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait up to `timeout` for the watchdog to return.
    pub fn join(self, timeout: Duration) -> bool {
        self.worker.join_timeout(timeout)
    }
}

fn watch(
    config: &WatchdogConfig,
    session: &Session,
    telemetry: &Telemetry,
    probe: Option<&ReachabilityProbe>,
) {
    let mut last_probe = Instant::now();

    loop {
        if session.cancel_token().wait_timeout(config.interval) {
            debug!("Watchdog stopping");
            return;
        }

        let now = Instant::now();
        let snapshot = telemetry.snapshot();

        if let Some(reason) = evaluate(config, &snapshot, session.started_at(), now) {
            warn!(reason = %reason.message(), "Watchdog requesting restart");
            session.request_restart(reason);
            return;
        }

        if let (Some(every), Some(probe)) = (config.probe_every, probe) {
            if now.saturating_duration_since(last_probe) >= every {
                last_probe = now;
                if !probe.check() {
                    warn!(
                        host = probe.host(),
                        port = probe.port(),
                        "Publish host unreachable"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            interval: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(120),
            max_session_age: Some(Duration::from_secs(6 * 3600)),
            probe_every: None,
        }
    }

    #[test]
    fn test_healthy_session() {
        let start = Instant::now();
        let telemetry = Telemetry::new(start);
        telemetry.record_line("progress=continue", start + Duration::from_secs(100));

        let snapshot = telemetry.snapshot();
        assert_eq!(
            evaluate(&config(), &snapshot, start, start + Duration::from_secs(200)),
            None
        );
    }

    #[test]
    fn test_stall() {
        let start = Instant::now();
        let snapshot = Telemetry::new(start).snapshot();

        assert_eq!(
            evaluate(&config(), &snapshot, start, start + Duration::from_secs(121)),
            Some(RestartReason::Stalled { silent_secs: 121 })
        );
    }

    #[test]
    fn test_exit_wins_over_everything() {
        let start = Instant::now();
        let telemetry = Telemetry::new(start);
        telemetry.record_line("av_interleaved_write_frame(): Broken pipe", start);
        telemetry.mark_closed();

        let now = start + Duration::from_secs(7 * 3600);
        assert_eq!(
            evaluate(&config(), &telemetry.snapshot(), start, now),
            Some(RestartReason::TranscoderExited { code: None })
        );
    }

    #[test]
    fn test_age_before_stall() {
        let start = Instant::now();
        let snapshot = Telemetry::new(start).snapshot();

        assert_eq!(
            evaluate(&config(), &snapshot, start, start + Duration::from_secs(6 * 3600 + 1)),
            Some(RestartReason::SessionAgeExceeded { max_age_secs: 6 * 3600 })
        );
    }

    #[test]
    fn test_rotation_disabled() {
        let start = Instant::now();
        let telemetry = Telemetry::new(start);
        let now = start + Duration::from_secs(7 * 3600);
        telemetry.record_line("out_time_ms=1", now);

        let config = WatchdogConfig {
            max_session_age: None,
            ..config()
        };
        assert_eq!(evaluate(&config, &telemetry.snapshot(), start, now), None);
    }

    #[test]
    fn test_fatal_after_stall_check() {
        let start = Instant::now();
        let telemetry = Telemetry::new(start);
        telemetry.record_line("av_interleaved_write_frame(): Broken pipe", start);

        assert_eq!(
            evaluate(&config(), &telemetry.snapshot(), start, start + Duration::from_secs(1)),
            Some(RestartReason::FatalDiagnostic {
                line: "av_interleaved_write_frame(): Broken pipe".to_string()
            })
        );
    }

    #[test]
    fn test_stalled_watchdog_requests_exactly_one_restart() {
        let session = Arc::new(Session::new(1));
        let telemetry = Arc::new(Telemetry::new(Instant::now()));
        let config = WatchdogConfig {
            interval: Duration::from_millis(20),
            stall_timeout: Duration::from_millis(100),
            max_session_age: None,
            probe_every: None,
        };

        let watchdog =
            Watchdog::start(config, Arc::clone(&session), Arc::clone(&telemetry), None).unwrap();
        assert!(watchdog.join(Duration::from_secs(5)));

        assert!(session.is_cancelled());
        assert!(matches!(
            session.restart_reason(),
            Some(RestartReason::Stalled { .. })
        ));
    }

    #[test]
    fn test_watchdog_exits_on_cancel() {
        let session = Arc::new(Session::new(1));
        let telemetry = Arc::new(Telemetry::new(Instant::now()));

        let watchdog =
            Watchdog::start(config(), Arc::clone(&session), telemetry, None).unwrap();
        session.stop();

        assert!(watchdog.join(Duration::from_secs(2)));
        assert!(!session.is_restart_requested());
    }
}
