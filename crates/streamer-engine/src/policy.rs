//! Bounded restart policy.

use std::time::{Duration, Instant};

use streamer_ipc::StreamerConfig;

/// What the restart loop should do after a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Wait the cooldown and start another session.
    Retry {
        /// Consecutive attempt number.
        attempt: u32,
    },
    /// The attempt limit is exhausted.
    GiveUp {
        /// Restarts performed before giving up.
        attempts: u32,
    },
}

/// Consecutive-restart counter with a cooldown window.
///
/// The counter resets to 1 when more than `cooldown` has passed since the
/// last restarted session was launched, and increments otherwise.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    max_attempts: u32,
    cooldown: Duration,
    attempts: u32,
    last_restart: Option<Instant>,
}

impl RestartPolicy {
    /// Create a policy allowing `max_attempts` restarts per cooldown window.
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            cooldown,
            attempts: 0,
            last_restart: None,
        }
    }

    /// Policy from the streamer configuration.
    pub fn from_config(config: &StreamerConfig) -> Self {
        Self::new(config.max_restart_attempts, config.restart_cooldown)
    }

    /// Attempt limit.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait between sessions.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Current consecutive attempt count.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count a session that asked for a restart at `now`.
    pub fn record_failure(&mut self, now: Instant) -> RestartDecision {
        let window_expired = self
            .last_restart
            .map(|last| now.saturating_duration_since(last) > self.cooldown)
            .unwrap_or(false);

        if window_expired {
            self.attempts = 1;
        } else {
            self.attempts = self.attempts.saturating_add(1);
        }

        if self.attempts > self.max_attempts {
            RestartDecision::GiveUp {
                attempts: self.max_attempts,
            }
        } else {
            RestartDecision::Retry {
                attempt: self.attempts,
            }
        }
    }

    /// Record that a restarted session was launched at `now`.
    pub fn mark_restarted(&mut self, now: Instant) {
        self.last_restart = Some(now);
    }
}
