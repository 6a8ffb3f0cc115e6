//! The session's current track.

use std::sync::Arc;

use parking_lot::RwLock;

use streamer_ipc::StatusPublisher;

use crate::track::Track;

/// Write side of the current-track slot, owned by the audio producer.
///
/// Every update is also forwarded to the status publisher.
pub struct NowPlaying {
    slot: Arc<RwLock<Option<Track>>>,
    publisher: Arc<dyn StatusPublisher>,
}

/// Read-only view of the current-track slot.
#[derive(Clone)]
pub struct NowPlayingView {
    slot: Arc<RwLock<Option<Track>>>,
}

impl NowPlaying {
    /// Create an empty slot that forwards updates to `publisher`.
    pub fn new(publisher: Arc<dyn StatusPublisher>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            publisher,
        }
    }

    /// A read-only view of this slot.
    pub fn view(&self) -> NowPlayingView {
        NowPlayingView {
            slot: Arc::clone(&self.slot),
        }
    }

    pub(crate) fn set(&self, track: &Track) {
        *self.slot.write() = Some(track.clone());
        self.publisher.publish_track(track.label());
    }
}

impl NowPlayingView {
    /// The track currently playing, if any.
    pub fn track(&self) -> Option<Track> {
        self.slot.read().clone()
    }

    /// Label of the track currently playing, if any.
    pub fn label(&self) -> Option<String> {
        self.slot.read().as_ref().map(|t| t.label().to_string())
    }
}
