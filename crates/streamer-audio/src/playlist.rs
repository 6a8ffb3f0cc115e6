//! Shuffled, self-rescanning playlist over a track directory.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use streamer_ipc::CancelToken;

use crate::error::AudioError;
use crate::track::Track;
use crate::{AudioResult, AUDIO_EXTENSIONS};

/// Decides which directory entries are playable.
#[derive(Debug, Clone, Copy)]
pub struct TrackFilter {
    min_bytes: u64,
}

impl TrackFilter {
    /// Accept audio files of at least `min_bytes`.
    pub fn new(min_bytes: u64) -> Self {
        Self { min_bytes }
    }

    /// Check whether `path` is a playable track.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        // Covers dotfiles and the "._" resource forks left by macOS copies.
        if name.starts_with('.') {
            return false;
        }

        let known_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !known_extension {
            return false;
        }

        match fs::metadata(path) {
            Ok(meta) => meta.is_file() && meta.len() >= self.min_bytes,
            Err(_) => false,
        }
    }
}

/// Infinite track sequence, reshuffled and rescanned every pass.
pub struct Playlist {
    dir: PathBuf,
    filter: TrackFilter,
    backoff: Duration,
    rng: StdRng,
    pending: VecDeque<Track>,
    passes: u64,
}

impl Playlist {
    /// Create a playlist over `dir`, waiting `backoff` between scans of an empty library.
    pub fn new(dir: impl Into<PathBuf>, filter: TrackFilter, backoff: Duration) -> Self {
        Self {
            dir: dir.into(),
            filter,
            backoff,
            rng: StdRng::from_entropy(),
            pending: VecDeque::new(),
            passes: 0,
        }
    }

    /// Use a deterministic shuffle.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Directory being played.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// List the playable tracks currently on disk, sorted by path.
    pub fn scan(&self) -> AudioResult<Vec<Track>> {
        scan_dir(&self.dir, &self.filter)
    }

    /// Next track, or None once `cancel` is set.
    ///
    /// Blocks while the library is empty, rescanning every backoff interval.
    pub fn next(&mut self, cancel: &CancelToken) -> Option<Track> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            if let Some(track) = self.pending.pop_front() {
                return Some(track);
            }

            match self.scan() {
                Ok(mut tracks) if !tracks.is_empty() => {
                    tracks.shuffle(&mut self.rng);
                    self.passes += 1;
                    debug!(
                        pass = self.passes,
                        tracks = tracks.len(),
                        "Starting playlist pass"
                    );
                    self.pending = tracks.into();
                }
                Ok(_) => {
                    warn!(
                        dir = %self.dir.display(),
                        "No playable tracks, rescanning in {:?}",
                        self.backoff
                    );
                    if cancel.wait_timeout(self.backoff) {
                        return None;
                    }
                }
                Err(e) => {
                    warn!("Playlist scan failed: {}", e);
                    if cancel.wait_timeout(self.backoff) {
                        return None;
                    }
                }
            }
        }
    }
}

/// Make sure the library directory exists and holds at least one track.
///
/// Returns the number of playable tracks.
pub fn ensure_library(dir: &Path, filter: TrackFilter) -> AudioResult<usize> {
    if !dir.is_dir() {
        info!(dir = %dir.display(), "Creating track library");
        fs::create_dir_all(dir).map_err(|e| AudioError::Library {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
    }

    let count = scan_dir(dir, &filter)?.len();
    if count == 0 {
        return Err(AudioError::NoTracks(dir.to_path_buf()));
    }

    info!(dir = %dir.display(), tracks = count, "Track library ready");
    Ok(count)
}

fn scan_dir(dir: &Path, filter: &TrackFilter) -> AudioResult<Vec<Track>> {
    let entries = fs::read_dir(dir).map_err(|e| AudioError::Library {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| filter.accepts(path))
        .collect();
    paths.sort();

    Ok(paths.into_iter().map(Track::from_path).collect())
}
