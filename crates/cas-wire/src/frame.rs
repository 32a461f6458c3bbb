//! 16-byte big-endian header framing over a CAS TCP byte stream.
//!
//! `<16-byte header><N-byte body>`, fields big-endian u32 each:
//! `message_id`, `data_format`, `magic_number`, `data_length`.

use bytes::{Buf, BytesMut};
use thiserror::Error;

pub const HEADER_LEN: usize = 16;
pub const MAX_BODY_LENGTH: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_id: u32,
    pub data_format: u32,
    pub magic_number: u32,
    pub data_length: u32,
}

impl FrameHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.data_format.to_be_bytes());
        out.extend_from_slice(&self.magic_number.to_be_bytes());
        out.extend_from_slice(&self.data_length.to_be_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        FrameHeader {
            message_id: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            data_format: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            magic_number: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            data_length: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("magic number mismatch: expected {expected:#x}, got {got:#x}")]
    BadMagic { expected: u32, got: u32 },
    #[error("body length {0} exceeds MAX_BODY_LENGTH ({MAX_BODY_LENGTH})")]
    BodyTooLarge(u32),
}

/// Consumes bytes from a stream and emits `(header, body)` records in order.
///
/// Holds at most one in-flight partial frame. On [`FrameError`] the entire
/// internal buffer is discarded and framing resumes from the next bytes fed
/// in — no resynchronisation-by-scanning is attempted.
pub struct Deframer {
    magic_number: u32,
    buf: BytesMut,
}

impl Deframer {
    pub fn new(magic_number: u32) -> Self {
        Deframer {
            magic_number,
            buf: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempts to extract the next complete frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Returns `Err` and
    /// purges the buffer on a framing violation — callers should log and
    /// keep calling `feed`/`next_frame` as new bytes arrive.
    pub fn next_frame(&mut self) -> Result<Option<(FrameHeader, Vec<u8>)>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::decode(&self.buf[..HEADER_LEN]);

        if header.magic_number != self.magic_number {
            self.buf.clear();
            return Err(FrameError::BadMagic {
                expected: self.magic_number,
                got: header.magic_number,
            });
        }
        if header.data_length as usize > MAX_BODY_LENGTH {
            self.buf.clear();
            return Err(FrameError::BodyTooLarge(header.data_length));
        }

        let total_len = HEADER_LEN + header.data_length as usize;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let body = self.buf.split_to(header.data_length as usize).to_vec();
        Ok(Some((header, body)))
    }
}

pub fn encode_frame(header: FrameHeader, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    header.encode(&mut out);
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0xCAFE_1234;

    #[test]
    fn framer_deframer_round_trip() {
        let header = FrameHeader {
            message_id: 2001,
            data_format: 1,
            magic_number: MAGIC,
            data_length: 5,
        };
        let wire = encode_frame(header, b"hello");

        let mut d = Deframer::new(MAGIC);
        d.feed(&wire);
        let (got_header, got_body) = d.next_frame().unwrap().unwrap();
        assert_eq!(got_header, header);
        assert_eq!(got_body, b"hello");
    }

    #[test]
    fn zero_length_body_is_legal_and_emitted_immediately() {
        let header = FrameHeader {
            message_id: 1012,
            data_format: 1,
            magic_number: MAGIC,
            data_length: 0,
        };
        let wire = encode_frame(header, b"");
        let mut d = Deframer::new(MAGIC);
        d.feed(&wire);
        let (_, body) = d.next_frame().unwrap().unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let header = FrameHeader {
            message_id: 1,
            data_format: 1,
            magic_number: MAGIC,
            data_length: 10,
        };
        let wire = encode_frame(header, b"0123456789");
        let mut d = Deframer::new(MAGIC);
        d.feed(&wire[..HEADER_LEN + 3]);
        assert_eq!(d.next_frame().unwrap(), None);
        d.feed(&wire[HEADER_LEN + 3..]);
        let (_, body) = d.next_frame().unwrap().unwrap();
        assert_eq!(body, b"0123456789");
    }

    #[test]
    fn bad_magic_purges_buffer_and_next_message_still_frames() {
        let bad_header = FrameHeader {
            message_id: 1,
            data_format: 1,
            magic_number: 0xDEAD_BEEF,
            data_length: 3,
        };
        let bad_wire = encode_frame(bad_header, b"abc");

        let good_header = FrameHeader {
            message_id: 2,
            data_format: 1,
            magic_number: MAGIC,
            data_length: 2,
        };
        let good_wire = encode_frame(good_header, b"ok");

        let mut d = Deframer::new(MAGIC);
        d.feed(&bad_wire);
        assert!(matches!(d.next_frame(), Err(FrameError::BadMagic { .. })));

        d.feed(&good_wire);
        let (header, body) = d.next_frame().unwrap().unwrap();
        assert_eq!(header, good_header);
        assert_eq!(body, b"ok");
    }

    #[test]
    fn body_exactly_max_length_is_accepted() {
        let header = FrameHeader {
            message_id: 1,
            data_format: 1,
            magic_number: MAGIC,
            data_length: MAX_BODY_LENGTH as u32,
        };
        let mut d = Deframer::new(MAGIC);
        let mut encoded = Vec::new();
        header.encode(&mut encoded);
        d.feed(&encoded);
        d.feed(&vec![0u8; MAX_BODY_LENGTH]);
        let (got_header, got_body) = d.next_frame().unwrap().unwrap();
        assert_eq!(got_header, header);
        assert_eq!(got_body.len(), MAX_BODY_LENGTH);
    }

    #[test]
    fn body_over_max_length_is_a_framing_error() {
        let header = FrameHeader {
            message_id: 1,
            data_format: 1,
            magic_number: MAGIC,
            data_length: (MAX_BODY_LENGTH + 1) as u32,
        };
        let mut d = Deframer::new(MAGIC);
        let mut encoded = Vec::new();
        header.encode(&mut encoded);
        d.feed(&encoded);
        assert!(matches!(d.next_frame(), Err(FrameError::BodyTooLarge(_))));
    }
}
