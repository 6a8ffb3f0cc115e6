//! Ownership of spawned child processes.

use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::error::TransportError;
use crate::TransportResult;

const WAIT_POLL: Duration = Duration::from_millis(50);

/// A spawned child process, owned by whoever started it.
///
/// Dropping a handle whose process is still running kills and reaps it, so
/// no child outlives its owner.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    child: Child,
    exit: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Spawn `command`, labelling the process `name` in logs.
    #[instrument(name = "process_spawn", skip(command), fields(program = ?command.get_program()))]
    pub fn spawn(name: &str, command: &mut Command) -> TransportResult<Self> {
        let child = command.spawn().map_err(|source| TransportError::Spawn {
            program: command.get_program().to_string_lossy().into_owned(),
            source,
        })?;

        debug!(pid = child.id(), "Process started");

        Ok(Self {
            name: name.to_string(),
            child,
            exit: None,
        })
    }

    /// Label given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Take the piped stdout, if any.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the piped stderr, if any.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Returns the exit status if the process has exited, without blocking.
    pub fn poll(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => warn!(name = %self.name, "Failed to poll process: {}", e),
            }
        }
        self.exit
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        self.poll().is_none()
    }

    /// Ask the process to exit (SIGTERM on Unix).
    pub fn terminate(&mut self) -> TransportResult<()> {
        if !self.is_running() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = self.child.id();
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
                Err(e) => Err(TransportError::Signal {
                    pid,
                    message: e.desc().to_string(),
                }),
            }
        }

        // No graceful signal elsewhere
        #[cfg(not(unix))]
        {
            self.kill()
        }
    }

    /// Kill the process immediately.
    pub fn kill(&mut self) -> TransportResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    /// Wait up to `timeout` for the process to exit.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.poll() {
                return Some(status);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(WAIT_POLL.min(deadline - now));
        }
    }

    /// Terminate, wait up to `grace`, then kill and reap.
    #[instrument(name = "process_shutdown", skip(self), fields(name = %self.name))]
    pub fn shutdown(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.poll() {
            return Some(status);
        }

        if let Err(e) = self.terminate() {
            warn!("Terminate failed: {}", e);
        }

        if let Some(status) = self.wait_timeout(grace) {
            debug!(?status, "Process exited after terminate");
            return Some(status);
        }

        info!(grace_ms = grace.as_millis() as u64, "Process ignored terminate, killing");
        if let Err(e) = self.kill() {
            warn!("Kill failed: {}", e);
        }

        match self.child.wait() {
            Ok(status) => {
                self.exit = Some(status);
                Some(status)
            }
            Err(e) => {
                warn!("Failed to reap process: {}", e);
                None
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
