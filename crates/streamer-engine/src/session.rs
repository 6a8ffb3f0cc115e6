//! One attempt at running the pipeline.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use streamer_ipc::{CancelToken, RestartReason};

/// A broadcast session.
///
/// Each session gets a fresh cancellation token so a stale wakeup from an
/// earlier session can never reach it. The restart request is set at most
/// once, by whichever detector fires first.
#[derive(Debug)]
pub struct Session {
    id: u64,
    started_at: Instant,
    cancel: CancelToken,
    restart: Mutex<Option<RestartReason>>,
}

impl Session {
    /// Create session number `id`, starting now.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            cancel: CancelToken::new(),
            restart: Mutex::new(None),
        }
    }

    /// One-based session number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session was created.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The session's cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Check if the session is being torn down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ask for a restart and cancel the session.
    ///
    /// Returns false if a restart was already requested; the first reason wins.
    pub fn request_restart(&self, reason: RestartReason) -> bool {
        let first = {
            let mut restart = self.restart.lock();
            if restart.is_some() {
                false
            } else {
                *restart = Some(reason);
                true
            }
        };

        if first {
            debug!(session = self.id, "Restart requested");
        }
        self.cancel.cancel();
        first
    }

    /// Cancel the session without asking for a restart.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The restart request, if any.
    pub fn restart_reason(&self) -> Option<RestartReason> {
        self.restart.lock().clone()
    }

    /// Check if a restart was requested.
    pub fn is_restart_requested(&self) -> bool {
        self.restart.lock().is_some()
    }
}
