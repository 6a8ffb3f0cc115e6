//! Named worker threads that can be joined with a deadline.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::warn;

use crate::error::TransportError;
use crate::TransportResult;

/// A spawned thread whose completion can be awaited with a timeout.
#[derive(Debug)]
pub struct WorkerThread {
    name: String,
    handle: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl WorkerThread {
    /// Spawn `f` on a new thread called `name`.
    pub fn spawn<F>(name: &str, f: F) -> TransportResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Dropped on return or unwind, which disconnects the receiver.
                let _done = done_tx;
                f();
            })
            .map_err(|source| TransportError::Spawn {
                program: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            done_rx,
        })
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait up to `timeout` for the thread to finish, then join it.
    ///
    /// Returns false and leaves the thread detached if it is still running.
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(thread = %self.name, "Worker did not stop in time, detaching");
                false
            }
            _ => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!(thread = %self.name, "Worker panicked");
                    }
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_join_finished_worker() {
        let worker = WorkerThread::spawn("quick", || {}).unwrap();
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn test_join_times_out_on_busy_worker() {
        let worker = WorkerThread::spawn("slow", || thread::sleep(Duration::from_secs(2))).unwrap();

        let start = Instant::now();
        assert!(!worker.join_timeout(Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_join_panicked_worker() {
        let worker = WorkerThread::spawn("boom", || panic!("worker failure")).unwrap();
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }
}
