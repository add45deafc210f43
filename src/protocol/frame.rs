//! Wire format of the container runtime's multiplexed stdio protocol.
//!
//! Implements the 8-byte frame header:
//! ```text
//! ┌────────┬──────────┬──────────┐
//! │ Stream │ Reserved │ Length   │
//! │ 1 byte │ 3 bytes  │ 4 bytes  │
//! │        │ (zero)   │ uint32 BE│
//! └────────┴──────────┴──────────┘
//! ```
//!
//! A frame is the header followed by exactly `length` payload bytes.
//! The length field is Big Endian.

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Stream identity carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    /// Container stdin (tag 0).
    Stdin = 0,
    /// Container stdout (tag 1).
    Stdout = 1,
    /// Container stderr (tag 2).
    Stderr = 2,
}

impl StreamKind {
    /// Map a raw stream tag to a known stream, if any.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw stream tag. Unknown tags are preserved, not rejected; the
    /// demultiplexer forwards every stream to the same sink.
    pub stream: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new header for a known stream.
    pub fn new(stream: StreamKind, payload_length: u32) -> Self {
        Self {
            stream: stream as u8,
            payload_length,
        }
    }

    /// Encode the header to bytes (Big Endian length).
    ///
    /// # Example
    ///
    /// ```
    /// use jobwire::protocol::{FrameHeader, StreamKind, HEADER_SIZE};
    ///
    /// let header = FrameHeader::new(StreamKind::Stdout, 5);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.stream;
        buf[1..4].fill(0);
        buf[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode a header from bytes (Big Endian length).
    ///
    /// Returns `None` if the buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use jobwire::protocol::FrameHeader;
    ///
    /// let bytes = [2, 0, 0, 0, 0, 0, 0, 5];
    /// let header = FrameHeader::decode(&bytes).unwrap();
    /// assert_eq!(header.stream, 2);
    /// assert_eq!(header.payload_length, 5);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            stream: buf[0],
            payload_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// Build one complete frame (header + payload) as a byte vector.
pub fn build_frame(stream: StreamKind, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(stream, payload.len() as u32);
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = FrameHeader::new(StreamKind::Stderr, 100);
        let encoded = original.encode();
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = FrameHeader::new(StreamKind::Stdout, 0x0102_0304);
        let bytes = header.encode();

        // Stream tag
        assert_eq!(bytes[0], 1);

        // Reserved bytes are zero
        assert_eq!(&bytes[1..4], &[0, 0, 0]);

        // Length: 0x01020304 in BE
        assert_eq!(bytes[4], 0x01);
        assert_eq!(bytes[5], 0x02);
        assert_eq!(bytes[6], 0x03);
        assert_eq!(bytes[7], 0x04);
    }

    #[test]
    fn test_header_size_is_exactly_8() {
        assert_eq!(HEADER_SIZE, 8);
        let header = FrameHeader::new(StreamKind::Stdout, 0);
        assert_eq!(header.encode().len(), 8);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 7]; // One byte short
        assert!(FrameHeader::decode(&buf).is_none());
    }

    #[test]
    fn test_stream_kind_from_tag() {
        assert_eq!(StreamKind::from_tag(0), Some(StreamKind::Stdin));
        assert_eq!(StreamKind::from_tag(1), Some(StreamKind::Stdout));
        assert_eq!(StreamKind::from_tag(2), Some(StreamKind::Stderr));
        assert_eq!(StreamKind::from_tag(3), None);
    }

    #[test]
    fn test_unknown_tag_survives_decode() {
        let bytes = [7, 0, 0, 0, 0, 0, 0, 1];
        let header = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(header.stream, 7);
        assert_eq!(header.payload_length, 1);
    }

    #[test]
    fn test_build_frame() {
        let frame = build_frame(StreamKind::Stdout, b"alpha");
        assert_eq!(frame.len(), HEADER_SIZE + 5);
        assert_eq!(&frame[HEADER_SIZE..], b"alpha");
        let header = FrameHeader::decode(&frame).unwrap();
        assert_eq!(header.payload_length, 5);
    }
}
