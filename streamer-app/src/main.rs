//! Unattended camera plus playlist live streamer.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing::{error, info, warn};

use streamer_engine::{preflight, startup_preset, Engine, PipelineRunner};
use streamer_ipc::{
    event_channel, CancelToken, EngineOutcome, FileStatusPublisher, StatusPublisher,
    SupervisorEvent,
};
use streamer_transport::ReachabilityProbe;

use crate::cli::Args;

const EXIT_CONFIG: u8 = 1;
const EXIT_GAVE_UP: u8 = 2;

/// Crates that log at info unless `RUST_LOG` says otherwise.
const LOG_TARGETS: &[&str] = &[
    "lofi_streamer",
    "streamer_engine",
    "streamer_capture",
    "streamer_audio",
    "streamer_encoder",
    "streamer_transport",
    "streamer_ipc",
];

fn default_log_filter() -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}=info", target))
        .collect::<Vec<_>>()
        .join(",")
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter().into()),
        )
        .init();
}

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(EngineOutcome::GaveUp { attempts }) => {
            error!(attempts, "Restart attempts exhausted, exiting");
            ExitCode::from(EXIT_GAVE_UP)
        }
        Ok(outcome) => {
            info!(?outcome, "Streamer stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn run() -> anyhow::Result<EngineOutcome> {
    let args = Args::parse();
    let skip_network_check = args.skip_network_check;
    let (url_arg, url_file) = (args.url.clone(), args.url_file.clone());
    let config = args.into_config()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting lofi streamer");

    let tracks = preflight(&config).context("preflight failed")?;
    info!(tracks, dir = %config.playlist_dir.display(), "Track library ready");

    let probe = ReachabilityProbe::new(config.check_host.clone(), config.check_port);
    if !skip_network_check && !probe.check() {
        warn!(
            host = probe.host(),
            port = probe.port(),
            "Publish host unreachable at startup, starting anyway"
        );
    }

    let shutdown = CancelToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            if shutdown.cancel() {
                info!("Shutdown signal received");
            }
        })
        .context("failed to install signal handler")?;
    }

    let preset = startup_preset(&config);
    info!(
        width = preset.width,
        height = preset.height,
        fps = preset.fps,
        bitrate_kbps = preset.bitrate_kbps,
        "Video preset selected"
    );

    let status = Arc::new(FileStatusPublisher::new(
        config.now_playing_file.clone(),
        config.current_track_file.clone(),
        config.status_file.clone(),
    ));

    let (event_tx, event_rx) = event_channel();
    let consumer = {
        let status = Arc::clone(&status);
        thread::Builder::new()
            .name("status-writer".to_string())
            .spawn(move || consume_events(event_rx, status.as_ref()))
            .context("failed to spawn status writer")?
    };

    let publisher: Arc<dyn StatusPublisher> = status;
    let runner = PipelineRunner::new(config.clone(), preset, publisher)
        .with_events(event_tx.clone())
        .with_url_source(Box::new(move || {
            match cli::resolve_publish_url(url_arg.as_deref(), &url_file) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Keeping previous publish URL: {:#}", e);
                    None
                }
            }
        }));
    let mut engine = Engine::new(runner, &config, shutdown).with_events(event_tx);
    if config.wait_for_network {
        engine = engine.with_network_probe(probe);
    }

    let outcome = engine.run();

    // Dropping the engine closes the event channel.
    drop(engine);
    if consumer.join().is_err() {
        warn!("Status writer panicked");
    }

    Ok(outcome)
}

/// Mirror supervisor events into the status file.
fn consume_events(events: Receiver<SupervisorEvent>, status: &dyn StatusPublisher) {
    let mut session = 0;
    let mut restarts = 0;

    for event in events {
        match event {
            SupervisorEvent::SessionStarted { session: id } => {
                session = id;
                status.publish_state("Starting", session, restarts);
            }
            SupervisorEvent::StateChanged { current, .. } => {
                status.publish_state(current.name(), session, restarts);
            }
            SupervisorEvent::SessionEnded { reason, .. } => {
                if let Some(reason) = reason {
                    info!(session, reason = %reason.message(), "Session asked for a restart");
                }
            }
            SupervisorEvent::RestartScheduled { attempt, .. } => {
                restarts = attempt;
                status.publish_state("Restarting", session, restarts);
            }
            SupervisorEvent::Finished(outcome) => {
                let state = match outcome {
                    EngineOutcome::GaveUp { .. } => "Failed",
                    EngineOutcome::Shutdown | EngineOutcome::Stopped => "Stopped",
                };
                status.publish_state(state, session, restarts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_covers_every_crate() {
        let filter = default_log_filter();

        assert!(filter.starts_with("lofi_streamer=info,"));
        assert!(filter.contains("streamer_capture=info"));
        assert_eq!(filter.split(',').count(), LOG_TARGETS.len());
        assert!(filter.parse::<tracing_subscriber::EnvFilter>().is_ok());
    }
}
