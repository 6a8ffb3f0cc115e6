//! Best-effort status files for the external dashboard.
//!
//! Nothing here may fail the broadcast: every write error is logged at debug
//! level and dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Receives status updates from the streamer.
pub trait StatusPublisher: Send + Sync {
    /// A new track started playing.
    fn publish_track(&self, label: &str);

    /// The supervisor state changed.
    fn publish_state(&self, state: &str, session: u64, restarts: u32);
}

/// Snapshot written to the JSON status file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Supervisor state name.
    pub state: String,

    /// Current track label.
    pub track: Option<String>,

    /// One-based session number.
    pub session: u64,

    /// Consecutive restart attempts.
    pub restarts: u32,

    /// RFC 3339 timestamp of the last update.
    pub updated_at: String,
}

/// Writes status to small files on disk.
pub struct FileStatusPublisher {
    now_playing: PathBuf,
    current_track: PathBuf,
    status: PathBuf,
    report: Mutex<StatusReport>,
}

impl FileStatusPublisher {
    /// Create a publisher writing to the given files.
    pub fn new(now_playing: PathBuf, current_track: PathBuf, status: PathBuf) -> Self {
        Self {
            now_playing,
            current_track,
            status,
            report: Mutex::new(StatusReport::default()),
        }
    }

    /// Returns the last report written.
    pub fn report(&self) -> StatusReport {
        self.report.lock().clone()
    }

    fn write_report(&self, report: &StatusReport) {
        match serde_json::to_vec_pretty(report) {
            Ok(json) => best_effort(&self.status, &json),
            Err(e) => debug!("Failed to encode status: {}", e),
        }
    }
}

impl StatusPublisher for FileStatusPublisher {
    fn publish_track(&self, label: &str) {
        best_effort(&self.now_playing, format!("Now Playing: {label}").as_bytes());
        best_effort(&self.current_track, label.as_bytes());

        let report = {
            let mut report = self.report.lock();
            report.track = Some(label.to_string());
            report.updated_at = chrono::Local::now().to_rfc3339();
            report.clone()
        };
        self.write_report(&report);
    }

    fn publish_state(&self, state: &str, session: u64, restarts: u32) {
        let report = {
            let mut report = self.report.lock();
            report.state = state.to_string();
            report.session = session;
            report.restarts = restarts;
            report.updated_at = chrono::Local::now().to_rfc3339();
            report.clone()
        };
        self.write_report(&report);
    }
}

fn best_effort(path: &Path, contents: &[u8]) {
    if let Err(e) = write_atomic(path, contents) {
        debug!(path = %path.display(), "Status write failed: {}", e);
    }
}

/// Write via a sibling temp file so readers never see a half-written file.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(dir: &Path) -> FileStatusPublisher {
        FileStatusPublisher::new(
            dir.join("nowplaying.txt"),
            dir.join("current_track.txt"),
            dir.join("status.json"),
        )
    }

    #[test]
    fn test_track_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let status = publisher(dir.path());

        status.publish_track("Nujabes - Aruarian Dance");

        let now_playing = fs::read_to_string(dir.path().join("nowplaying.txt")).unwrap();
        let current = fs::read_to_string(dir.path().join("current_track.txt")).unwrap();
        assert_eq!(now_playing, "Now Playing: Nujabes - Aruarian Dance");
        assert_eq!(current, "Nujabes - Aruarian Dance");
    }

    #[test]
    fn test_status_json_merges_state_and_track() {
        let dir = tempfile::tempdir().unwrap();
        let status = publisher(dir.path());

        status.publish_state("Running", 3, 2);
        status.publish_track("rain");

        let json = fs::read_to_string(dir.path().join("status.json")).unwrap();
        let report: StatusReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report.state, "Running");
        assert_eq!(report.session, 3);
        assert_eq!(report.restarts, 2);
        assert_eq!(report.track.as_deref(), Some("rain"));
        assert!(!report.updated_at.is_empty());
    }

    #[test]
    fn test_unwritable_location_is_swallowed() {
        let status = FileStatusPublisher::new(
            PathBuf::from("/nonexistent/dir/np.txt"),
            PathBuf::from("/nonexistent/dir/ct.txt"),
            PathBuf::from("/nonexistent/dir/status.json"),
        );

        status.publish_track("anything");
        status.publish_state("Running", 1, 0);

        assert_eq!(status.report().track.as_deref(), Some("anything"));
    }
}
