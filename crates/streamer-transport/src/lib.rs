//! Named pipes, child processes and reachability probes.
//!
//! This crate is the OS-level plumbing under a broadcast session: the two
//! named pipes that connect producers to the transcoder, the handle used
//! for every spawned child process, and the TCP probe used to check that
//! the publish host is reachable.

mod error;
#[cfg(unix)]
mod fifo;
mod probe;
mod process;
mod worker;

pub use error::TransportError;
#[cfg(unix)]
pub use fifo::{wait_readable, NamedPipe, PipeWriter, WriteOutcome};
pub use probe::ReachabilityProbe;
pub use process::ProcessHandle;
pub use worker::WorkerThread;

use std::time::Duration;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Largest write the kernel performs atomically on a pipe (PIPE_BUF on Linux).
pub const ATOMIC_PIPE_WRITE: usize = 4096;

/// Longest a blocking pipe operation waits before re-checking cancellation.
pub const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(250);
