//! Playlist iteration and PCM feeding for the audio pipe.
//!
//! This crate provides the shuffled, self-rescanning playlist over a track
//! directory and the producer thread that decodes each track to raw PCM
//! and streams it into the session's audio pipe.

mod error;
mod now_playing;
mod playlist;
mod producer;
mod track;

pub use error::AudioError;
pub use now_playing::{NowPlaying, NowPlayingView};
pub use playlist::{ensure_library, Playlist, TrackFilter};
pub use producer::{AudioProducer, AudioStats, DecoderCommand};
pub use track::Track;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Bytes copied from the decoder to the pipe per write.
pub const CHUNK_BYTES: usize = 4096;

/// Extensions accepted into the playlist.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a"];
