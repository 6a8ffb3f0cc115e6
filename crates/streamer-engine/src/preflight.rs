//! Checks and choices made once, before the first session.

use tracing::{info, warn};

use streamer_audio::{ensure_library, TrackFilter};
use streamer_capture::{select_preset, HardwareProfile, SystemLoadProbe};
use streamer_ipc::{StreamerConfig, VideoPreset};

use crate::error::EngineError;
use crate::EngineResult;

/// Validate configuration that no restart could fix.
///
/// Creates the track library if it is missing. Returns the number of
/// playable tracks.
pub fn preflight(config: &StreamerConfig) -> EngineResult<usize> {
    if config.publish_url.trim().is_empty() {
        return Err(EngineError::Config("publish URL is not configured".to_string()));
    }

    let tracks = ensure_library(&config.playlist_dir, TrackFilter::new(config.min_track_bytes))
        .map_err(|e| EngineError::Config(e.to_string()))?;

    match &config.logo_path {
        Some(logo) if !logo.is_file() => {
            warn!(path = %logo.display(), "Logo not found, streaming without it");
        }
        _ => {}
    }

    info!(tracks, "Preflight passed");
    Ok(tracks)
}

/// Detect the board and pick the video preset used by every session.
pub fn startup_preset(config: &StreamerConfig) -> VideoPreset {
    select_preset(
        HardwareProfile::detect(),
        config.fallback_fps,
        config.output_width,
        config.output_height,
        &mut SystemLoadProbe::default(),
    )
}
