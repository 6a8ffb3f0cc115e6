//! Events emitted by the supervisor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{EngineOutcome, RestartReason, SessionState};
use crate::types::SessionMetrics;

/// Events that the restart loop and session supervisor emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorEvent {
    /// A new session was created.
    SessionStarted {
        /// One-based session number.
        session: u64,
    },

    /// The current session changed state.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// A session ended.
    SessionEnded {
        /// One-based session number.
        session: u64,

        /// Whether a restart was requested.
        restart: bool,

        /// The detector that requested the restart, if any.
        reason: Option<RestartReason>,

        /// Counters collected during the session.
        metrics: SessionMetrics,
    },

    /// The restart loop will start another session after the cooldown.
    RestartScheduled {
        /// Consecutive attempt number inside the cooldown window.
        attempt: u32,

        /// Attempt limit.
        max_attempts: u32,

        /// Why the previous session ended.
        reason: RestartReason,

        /// Cooldown before the next session.
        cooldown: Duration,
    },

    /// The restart loop is done.
    Finished(EngineOutcome),
}
