//! In-band marker detection over an unframed byte stream.
//!
//! Inbound datagrams carry a continuous compressed-image byte stream
//! with no per-datagram framing; frame boundaries exist only as
//! in-band start (`FF D8`) and end (`FF D9`) markers. The scanner is
//! a pure per-byte state machine tracking two saturating counters —
//! start-marker progress and end-marker progress — and hands back a
//! candidate frame each time both markers have been confirmed.
//!
//! Counter meaning for `start`: 0 = idle, 1 = saw `FF`, 2 = start
//! marker confirmed, 3 = saw another `FF` while accumulating,
//! 4 = a *second* start marker. A second start marker means the
//! previous accumulation was truncated: the buffer is discarded and
//! accumulation restarts from the new marker — two frames are never
//! silently concatenated.

use bytes::{BufMut, BytesMut};

/// Initial capacity of the accumulation buffer.
const INITIAL_BUF_CAPACITY: usize = 64 * 1024;

/// Per-byte start/end marker scanner with an accumulation buffer.
pub struct MarkerScanner {
    start: u8,
    end: u8,
    buf: BytesMut,
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self {
            start: 0,
            end: 0,
            buf: BytesMut::with_capacity(INITIAL_BUF_CAPACITY),
        }
    }

    /// Feed one byte; returns a candidate frame when an end marker
    /// completes an accumulation that started with a confirmed start
    /// marker.
    pub fn push(&mut self, b: u8) -> Option<Vec<u8>> {
        match b {
            0xFF => {
                if self.start % 2 == 0 {
                    self.start += 1; // look for the marker's second byte
                }
                if self.end == 0 {
                    self.end = 1;
                }
            }
            0xD8 => {
                if self.start % 2 == 1 {
                    self.start += 1;
                }
                if self.start == 4 {
                    // Second start marker: the previous accumulation
                    // was an incomplete frame. Restart from here.
                    self.buf.clear();
                    self.buf.put_u8(0xFF);
                    self.start = 2;
                }
            }
            0xD9 => {
                if self.end == 1 {
                    self.end = 2;
                }
            }
            _ => {
                if self.start == 1 {
                    self.start = 0;
                }
                if self.end == 1 {
                    self.end = 0;
                }
                if self.start == 3 {
                    self.start -= 1;
                }
            }
        }

        self.buf.put_u8(b);

        if self.end == 2 {
            // End marker without a confirmed start marker: garbage
            // received before the first frame — drop it quietly.
            if self.start < 2 {
                self.reset();
                return None;
            }
            let frame = self.buf.split().to_vec();
            self.start = 0;
            self.end = 0;
            return Some(frame);
        }
        None
    }

    /// Bytes currently accumulated towards the next candidate.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Discard any accumulation and rearm both marker counters.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.start = 0;
        self.end = 0;
    }
}

impl Default for MarkerScanner {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut scanner = MarkerScanner::new();
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(frame) = scanner.push(b) {
                out.push(frame);
            }
        }
        out
    }

    #[test]
    fn single_well_formed_frame() {
        let stream = [0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9];
        let frames = scan(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], stream.to_vec());
    }

    #[test]
    fn two_consecutive_frames() {
        let mut stream = vec![0xFF, 0xD8, 0x10, 0xFF, 0xD9];
        stream.extend_from_slice(&[0xFF, 0xD8, 0x20, 0xFF, 0xD9]);
        let frames = scan(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][2], 0x10);
        assert_eq!(frames[1][2], 0x20);
    }

    #[test]
    fn second_start_marker_discards_first_accumulation() {
        // Truncated frame, then a complete one.
        let stream = [
            0xFF, 0xD8, 0x01, 0x02, // incomplete
            0xFF, 0xD8, 0x30, 0xFF, 0xD9, // complete
        ];
        let frames = scan(&stream);
        assert_eq!(frames.len(), 1);
        // Accumulation restarted at the second marker.
        assert_eq!(frames[0], vec![0xFF, 0xD8, 0x30, 0xFF, 0xD9]);
    }

    #[test]
    fn start_without_end_stays_pending() {
        let mut scanner = MarkerScanner::new();
        for &b in &[0xFF, 0xD8, 0x01, 0x02, 0x03] {
            assert!(scanner.push(b).is_none());
        }
        assert_eq!(scanner.pending_len(), 5);
    }

    #[test]
    fn end_marker_before_any_start_is_dropped() {
        let frames = scan(&[0x00, 0xFF, 0xD9, 0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
    }

    #[test]
    fn stray_ff_inside_payload_is_tolerated() {
        // FF followed by a non-marker byte resets the pending marker.
        let stream = [0xFF, 0xD8, 0xFF, 0x00, 0x42, 0xFF, 0xD9];
        let frames = scan(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], stream.to_vec());
    }

    #[test]
    fn frames_split_across_pushes() {
        let mut scanner = MarkerScanner::new();
        assert!(scanner.push(0xFF).is_none());
        assert!(scanner.push(0xD8).is_none());
        assert!(scanner.push(0x99).is_none());
        assert!(scanner.push(0xFF).is_none());
        let frame = scanner.push(0xD9).expect("frame should complete");
        assert_eq!(frame, vec![0xFF, 0xD8, 0x99, 0xFF, 0xD9]);
        assert_eq!(scanner.pending_len(), 0);
    }
}
