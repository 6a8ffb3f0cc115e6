//! Encoded frame types.

use std::time::Instant;

use bytes::Bytes;

/// One access unit of the camera's encoded elementary stream.
///
/// The bytes include the Annex B start codes, so frames can be written back
/// to back and still form a valid stream.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded H.264 bytes.
    pub data: Bytes,

    /// Monotonically increasing sequence number.
    pub sequence: u64,

    /// Whether the unit carries an IDR picture.
    pub keyframe: bool,

    /// When the bytes were read from the camera.
    pub captured_at: Instant,
}

impl EncodedFrame {
    /// Create a new delta frame stamped now.
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            keyframe: false,
            captured_at: Instant::now(),
        }
    }

    /// Mark whether the frame is a keyframe.
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
