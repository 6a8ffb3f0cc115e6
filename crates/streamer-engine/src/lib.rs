//! Session supervisor and restart loop for the streamer.
//!
//! This crate starts and stops the transport, producers and transcoder of
//! one broadcast session in a fixed order, watches the transcoder through
//! its diagnostic stream, and restarts sessions under a bounded policy.

mod error;
mod metrics;
mod orchestrator;
mod policy;
mod preflight;
mod session;
mod state;
mod telemetry;
mod watchdog;

pub use error::EngineError;
pub use metrics::MetricsCollector;
pub use orchestrator::{Engine, SessionReport, SessionRunner};
pub use policy::{RestartDecision, RestartPolicy};
pub use preflight::{preflight, startup_preset};
pub use session::Session;
pub use state::{CameraFactory, PipelineRunner, PublishUrlSource};
pub use telemetry::{classify, LineKind, Telemetry, TelemetryReader, TelemetrySnapshot};
pub use watchdog::{evaluate, Watchdog, WatchdogConfig};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
