//! Typed state, events and status files shared by the streamer crates.
//!
//! This crate defines the session state machine, the events the supervisor
//! emits, the configuration every component reads, the cancellation token
//! used for cooperative shutdown, and the best-effort status files consumed
//! by the external dashboard.

mod cancel;
mod events;
mod state;
mod status;
mod types;

pub use cancel::CancelToken;
pub use events::SupervisorEvent;
pub use state::{EngineOutcome, RestartReason, SessionState, ShutdownPhase, StartupPhase};
pub use status::{FileStatusPublisher, StatusPublisher, StatusReport};
pub use types::{AudioFormat, SessionMetrics, StreamerConfig, VideoPreset};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for supervisor events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SupervisorEvent>, Receiver<SupervisorEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
