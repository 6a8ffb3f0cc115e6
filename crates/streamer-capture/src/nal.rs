//! Access unit framing for the camera's Annex B stream.
//!
//! The helper writes H.264 as one flat Annex B byte stream. The splitter
//! finds the start codes (0x000001 or 0x00000001) and groups NAL units into
//! access units: one coded picture together with the parameter sets, SEI
//! and delimiter in front of it. The sink then writes or drops whole
//! pictures and never splices two of them together.

use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

use crate::frame::EncodedFrame;

/// Largest access unit buffered before the splitter gives up on it.
pub const MAX_ACCESS_UNIT: usize = 4 * 1024 * 1024;

/// NAL unit types the splitter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    /// Non-IDR slice (P frame).
    NonIdrSlice = 1,
    /// IDR slice (keyframe).
    IdrSlice = 5,
    /// Supplemental Enhancement Information.
    Sei = 6,
    /// Sequence Parameter Set.
    Sps = 7,
    /// Picture Parameter Set.
    Pps = 8,
    /// Access Unit Delimiter.
    Aud = 9,
    /// Other/unknown NAL type.
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            _ => NalUnitType::Other,
        }
    }
}

impl NalUnitType {
    /// Coded slice of a picture.
    pub fn is_slice(self) -> bool {
        matches!(self, NalUnitType::NonIdrSlice | NalUnitType::IdrSlice)
    }

    /// Types that can only precede the first slice of a picture.
    fn opens_access_unit(self) -> bool {
        matches!(
            self,
            NalUnitType::Aud | NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Sei
        )
    }
}

/// Incremental Annex B parser that yields whole access units.
///
/// Bytes go in as they arrive from the helper, in chunks of any size. A unit
/// is emitted once the first NAL of the next picture shows up, so the most
/// recent picture stays buffered until more data (or [`flush`]) arrives.
///
/// [`flush`]: AccessUnitSplitter::flush
#[derive(Debug)]
pub struct AccessUnitSplitter {
    buf: BytesMut,
    /// Where the next start code search begins.
    scan: usize,
    /// Whether `buf` begins at a start code.
    synced: bool,
    has_slice: bool,
    keyframe: bool,
    sequence: u64,
    max_unit: usize,
}

impl Default for AccessUnitSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessUnitSplitter {
    pub fn new() -> Self {
        Self::with_limit(MAX_ACCESS_UNIT)
    }

    /// Splitter that discards any unit growing past `max_unit` bytes.
    pub fn with_limit(max_unit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scan: 0,
            synced: false,
            has_slice: false,
            keyframe: false,
            sequence: 0,
            max_unit,
        }
    }

    /// Feed bytes and collect every access unit they complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<EncodedFrame> {
        self.buf.extend_from_slice(data);
        let mut units = Vec::new();

        loop {
            let Some(at) = find_start_code(&self.buf, self.scan) else {
                if self.synced {
                    self.scan = self.scan.max(self.buf.len().saturating_sub(2));
                } else {
                    // Keep enough for a start code split across reads.
                    let keep = self.buf.len().min(3);
                    self.buf.advance(self.buf.len() - keep);
                    self.scan = 0;
                }
                break;
            };

            // The boundary decision needs the NAL header and the byte after it.
            let mut header = at + 3;
            if header + 1 >= self.buf.len() {
                self.scan = at;
                break;
            }

            let mut start = if at > 0 && self.buf[at - 1] == 0 { at - 1 } else { at };
            let nal_type = NalUnitType::from(self.buf[header]);

            if !self.synced {
                self.buf.advance(start);
                header -= start;
                start = 0;
                self.synced = true;
            }

            // first_mb_in_slice is ue(v); a leading 1 bit means macroblock 0.
            let starts_picture = if nal_type.is_slice() {
                self.buf[header + 1] & 0x80 != 0
            } else {
                nal_type.opens_access_unit()
            };

            if self.has_slice && starts_picture {
                let unit = self.buf.split_to(start).freeze();
                units.push(self.finish(unit));
                header -= start;
            }

            match nal_type {
                NalUnitType::IdrSlice => {
                    self.has_slice = true;
                    self.keyframe = true;
                }
                NalUnitType::NonIdrSlice => self.has_slice = true,
                _ => {}
            }

            self.scan = header + 1;
        }

        if self.buf.len() > self.max_unit {
            warn!(
                buffered = self.buf.len(),
                limit = self.max_unit,
                "Camera access unit too large, resyncing"
            );
            self.reset();
        }

        units
    }

    /// Hand out whatever picture is still buffered, e.g. at end of stream.
    pub fn flush(&mut self) -> Option<EncodedFrame> {
        let frame = if self.synced && self.has_slice {
            let unit = self.buf.split().freeze();
            Some(self.finish(unit))
        } else {
            None
        };
        self.reset();
        frame
    }

    fn finish(&mut self, data: Bytes) -> EncodedFrame {
        self.sequence += 1;
        let frame = EncodedFrame::new(data, self.sequence).with_keyframe(self.keyframe);
        self.has_slice = false;
        self.keyframe = false;
        frame
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.scan = 0;
        self.synced = false;
        self.has_slice = false;
        self.keyframe = false;
    }
}

fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(3)
        .position(|w| w == [0x00, 0x00, 0x01])
        .map(|i| from + i)
}


#[cfg(test)]
mod tests {
    use super::testing::access_unit;
    use super::*;

    fn split_in_chunks(stream: &[u8], chunk: usize) -> Vec<EncodedFrame> {
        let mut splitter = AccessUnitSplitter::new();
        let mut units = Vec::new();
        for piece in stream.chunks(chunk) {
            units.extend(splitter.push(piece));
        }
        units.extend(splitter.flush());
        units
    }

    #[test]
    fn test_nal_type_from_header() {
        assert_eq!(NalUnitType::from(0x65), NalUnitType::IdrSlice);
        assert_eq!(NalUnitType::from(0x41), NalUnitType::NonIdrSlice);
        assert_eq!(NalUnitType::from(0x09), NalUnitType::Aud);
        assert_eq!(NalUnitType::from(0x0C), NalUnitType::Other);
    }

    #[test]
    fn test_units_survive_arbitrary_chunking() {
        let pictures = vec![
            access_unit(true, 1, 900),
            access_unit(false, 2, 300),
            access_unit(false, 3, 5000),
            access_unit(true, 4, 700),
            access_unit(false, 5, 40),
        ];
        let stream = pictures.concat();

        for chunk in [1, 7, 4096, stream.len()] {
            let units = split_in_chunks(&stream, chunk);
            let data: Vec<&[u8]> = units.iter().map(|u| u.data.as_ref()).collect();
            let expected: Vec<&[u8]> = pictures.iter().map(Vec::as_slice).collect();
            assert_eq!(data, expected, "chunk size {}", chunk);

            let keyframes: Vec<bool> = units.iter().map(|u| u.keyframe).collect();
            assert_eq!(keyframes, [true, false, false, true, false]);

            let sequences: Vec<u64> = units.iter().map(|u| u.sequence).collect();
            assert_eq!(sequences, [1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_delimiter_opens_unit() {
        let aud = [0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];
        let first = [&aud[..], &access_unit(true, 1, 64)[..]].concat();
        let second = [&aud[..], &access_unit(false, 2, 64)[..]].concat();

        let units = split_in_chunks(&[first.clone(), second.clone()].concat(), 5);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].data.as_ref(), first.as_slice());
        assert_eq!(units[1].data.as_ref(), second.as_slice());
    }

    #[test]
    fn test_later_slices_stay_with_their_picture() {
        // Second slice of the same picture: first_mb_in_slice != 0.
        let second_slice = [0x00, 0x00, 0x01, 0x41, 0x1A, 0x55, 0x55];
        let picture = [&access_unit(false, 1, 80)[..], &second_slice[..]].concat();
        let next = access_unit(false, 2, 80);

        let units = split_in_chunks(&[picture.clone(), next.clone()].concat(), 3);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].data.as_ref(), picture.as_slice());
        assert_eq!(units[1].data.as_ref(), next.as_slice());
    }

    #[test]
    fn test_bytes_before_first_start_code_are_skipped() {
        let picture = access_unit(true, 1, 120);
        let stream = [&[0xAA, 0xBB, 0x00][..], &picture[..]].concat();

        let units = split_in_chunks(&stream, 2);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data.as_ref(), picture.as_slice());
    }

    #[test]
    fn test_oversized_unit_is_discarded() {
        let mut splitter = AccessUnitSplitter::with_limit(1024);
        let huge = access_unit(true, 1, 3000);
        let key = access_unit(true, 2, 200);
        let delta = access_unit(false, 3, 200);

        let mut units = Vec::new();
        for piece in huge.chunks(512) {
            units.extend(splitter.push(piece));
        }
        units.extend(splitter.push(&key));
        units.extend(splitter.push(&delta));
        units.extend(splitter.flush());

        let data: Vec<&[u8]> = units.iter().map(|u| u.data.as_ref()).collect();
        assert_eq!(data, [key.as_slice(), delta.as_slice()]);
        assert!(units[0].keyframe);
    }

    #[test]
    fn test_flush_without_slice_yields_nothing() {
        let mut splitter = AccessUnitSplitter::new();
        assert!(splitter.push(&[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00]).is_empty());
        assert!(splitter.flush().is_none());
    }
}
