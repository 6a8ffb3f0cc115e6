//! Session state machine types.

use serde::{Deserialize, Serialize};

/// The lifecycle state of one broadcast session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session has been started yet.
    #[default]
    Idle,

    /// Session is bringing up its resources.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Producers and transcoder are live; the supervisor is monitoring.
    Running,

    /// Session is tearing down its resources.
    Stopping {
        /// Current shutdown phase.
        phase: ShutdownPhase,
    },

    /// Session is over.
    Ended {
        /// Whether a restart was requested by a detector.
        restart: bool,
    },
}

impl SessionState {
    /// Returns true if the session is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting { .. })
    }

    /// Returns true if the session is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the session is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true if the session has ended.
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Running => "Running",
            Self::Stopping { .. } => "Stopping",
            Self::Ended { .. } => "Ended",
        }
    }
}

/// Startup phases for a session, in mandatory order.
///
/// The transcoder must exist as a pipe reader before either producer opens
/// its write end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Removing and recreating both named pipes.
    CreateTransports,

    /// Spawning the transcoder process.
    StartTranscoder,

    /// Attaching the telemetry reader to the transcoder's diagnostics.
    StartTelemetry,

    /// Starting the camera.
    StartVideo,

    /// Starting the audio producer thread.
    StartAudio,

    /// Starting the watchdog thread.
    StartWatchdog,
}

impl StartupPhase {
    /// The first phase of every session.
    pub const FIRST: Self = Self::CreateTransports;

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::CreateTransports => Some(Self::StartTranscoder),
            Self::StartTranscoder => Some(Self::StartTelemetry),
            Self::StartTelemetry => Some(Self::StartVideo),
            Self::StartVideo => Some(Self::StartAudio),
            Self::StartAudio => Some(Self::StartWatchdog),
            Self::StartWatchdog => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateTransports => "Creating transports",
            Self::StartTranscoder => "Starting transcoder",
            Self::StartTelemetry => "Starting telemetry",
            Self::StartVideo => "Starting camera",
            Self::StartAudio => "Starting audio",
            Self::StartWatchdog => "Starting watchdog",
        }
    }
}

/// Shutdown phases for a session, in mandatory order.
///
/// The camera stops before anything else so no frame is written into a
/// transport that is about to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Stopping the camera.
    StopVideo,

    /// Terminating the transcoder process.
    StopTranscoder,

    /// Joining the audio producer thread.
    JoinAudio,

    /// Joining the telemetry reader and watchdog threads.
    JoinMonitors,

    /// Removing both named pipes.
    CloseTransports,
}

impl ShutdownPhase {
    /// The first phase of every teardown.
    pub const FIRST: Self = Self::StopVideo;

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopVideo => Some(Self::StopTranscoder),
            Self::StopTranscoder => Some(Self::JoinAudio),
            Self::JoinAudio => Some(Self::JoinMonitors),
            Self::JoinMonitors => Some(Self::CloseTransports),
            Self::CloseTransports => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopVideo => "Stopping camera",
            Self::StopTranscoder => "Stopping transcoder",
            Self::JoinAudio => "Stopping audio",
            Self::JoinMonitors => "Stopping monitors",
            Self::CloseTransports => "Closing transports",
        }
    }
}

/// Why a session asked to be restarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartReason {
    /// The transcoder process exited.
    TranscoderExited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },

    /// Scheduled rotation after the maximum session age.
    SessionAgeExceeded { max_age_secs: u64 },

    /// The transcoder is alive but has not reported progress.
    Stalled { silent_secs: u64 },

    /// The transcoder printed a known-fatal diagnostic.
    FatalDiagnostic { line: String },

    /// A session resource could not be brought up.
    StartupFailed { message: String },
}

impl RestartReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::TranscoderExited { code: Some(code) } => {
                format!("Transcoder exited with code {code}")
            }
            Self::TranscoderExited { code: None } => "Transcoder exited".to_string(),
            Self::SessionAgeExceeded { max_age_secs } => {
                format!("Scheduled restart after {max_age_secs}s")
            }
            Self::Stalled { silent_secs } => {
                format!("Transcoder stalled (no progress for {silent_secs}s)")
            }
            Self::FatalDiagnostic { line } => format!("Transcoder reported: {line}"),
            Self::StartupFailed { message } => format!("Session startup failed: {message}"),
        }
    }
}

/// How the restart loop finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineOutcome {
    /// A global shutdown was requested.
    Shutdown,

    /// A session ended without asking for a restart, or auto-restart is off.
    Stopped,

    /// Too many consecutive restarts inside the cooldown window.
    GaveUp { attempts: u32 },
}

impl EngineOutcome {
    /// Returns true for the terminal-failure outcome.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::GaveUp { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phases_walk_in_order() {
        let mut phases = vec![StartupPhase::FIRST];
        while let Some(next) = phases.last().and_then(|p| p.next()) {
            phases.push(next);
        }

        assert_eq!(
            phases,
            vec![
                StartupPhase::CreateTransports,
                StartupPhase::StartTranscoder,
                StartupPhase::StartTelemetry,
                StartupPhase::StartVideo,
                StartupPhase::StartAudio,
                StartupPhase::StartWatchdog,
            ]
        );
    }

    #[test]
    fn test_shutdown_stops_video_before_transcoder() {
        assert_eq!(ShutdownPhase::FIRST, ShutdownPhase::StopVideo);
        assert_eq!(ShutdownPhase::StopVideo.next(), Some(ShutdownPhase::StopTranscoder));
        assert_eq!(ShutdownPhase::CloseTransports.next(), None);
    }

    #[test]
    fn test_restart_reason_messages() {
        let reason = RestartReason::Stalled { silent_secs: 121 };
        assert_eq!(reason.message(), "Transcoder stalled (no progress for 121s)");

        let reason = RestartReason::TranscoderExited { code: Some(1) };
        assert_eq!(reason.message(), "Transcoder exited with code 1");
    }
}
