//! Container stream demultiplexer.
//!
//! Decodes the length-prefixed multiplexed stdio protocol into a single
//! logical byte stream. Implements a state machine for frames arriving
//! split across arbitrary read boundaries:
//! - `Header`: 0-8 header bytes accumulated so far
//! - `Payload`: header decoded, N payload bytes still owed
//!
//! Payload bytes are forwarded downstream the moment they arrive; nothing
//! is buffered beyond the incomplete header. The stream tag is decoded but
//! not used to route: stdout and stderr both feed the one downstream sink.
//!
//! # Example
//!
//! ```
//! use jobwire::protocol::{build_frame, StreamDemux, StreamKind};
//! use jobwire::sink::{ByteSink, SharedSink};
//!
//! let (sink, captured) = SharedSink::new();
//! let mut demux = StreamDemux::new(Box::new(sink));
//!
//! let frame = build_frame(StreamKind::Stdout, b"hello");
//! demux.deliver(&frame).unwrap();
//! demux.close().unwrap();
//! assert_eq!(captured.borrow().as_slice(), b"hello");
//! ```

use tracing::{trace, warn};

use super::frame::{FrameHeader, HEADER_SIZE};
use crate::error::Result;
use crate::sink::ByteSink;

/// Per-frame parsing state.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Accumulating header bytes (0-8 so far).
    Header { have: usize },
    /// Header decoded, `remaining` payload bytes still owed.
    Payload { remaining: usize },
}

/// Push adapter decoding the multiplexed stdio protocol.
///
/// Partial headers and partial payloads are carried across calls and never
/// discarded; one delivered buffer may contain several complete frames or
/// span frame boundaries arbitrarily.
pub struct StreamDemux {
    sink: Box<dyn ByteSink>,
    state: State,
    header: [u8; HEADER_SIZE],
    closed: bool,
}

impl StreamDemux {
    /// Create a demultiplexer feeding the given downstream sink.
    pub fn new(sink: Box<dyn ByteSink>) -> Self {
        Self {
            sink,
            state: State::Header { have: 0 },
            header: [0u8; HEADER_SIZE],
            closed: false,
        }
    }
}

impl ByteSink for StreamDemux {
    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(crate::error::JobwireError::Closed);
        }

        let mut input = bytes;
        while !input.is_empty() {
            match self.state {
                State::Header { have } => {
                    let need = HEADER_SIZE - have;
                    let take = need.min(input.len());
                    self.header[have..have + take].copy_from_slice(&input[..take]);
                    input = &input[take..];

                    if have + take < HEADER_SIZE {
                        self.state = State::Header { have: have + take };
                        break;
                    }

                    let header =
                        FrameHeader::decode(&self.header).expect("accumulator holds a full header");
                    trace!(
                        stream = header.stream,
                        len = header.payload_length,
                        "frame header"
                    );
                    // A zero-length payload resets straight back to the
                    // header phase without requiring another delivery.
                    self.state = if header.payload_length == 0 {
                        State::Header { have: 0 }
                    } else {
                        State::Payload {
                            remaining: header.payload_length as usize,
                        }
                    };
                }

                State::Payload { remaining } => {
                    let take = remaining.min(input.len());
                    self.sink.deliver(&input[..take])?;
                    input = &input[take..];

                    self.state = if take == remaining {
                        State::Header { have: 0 }
                    } else {
                        State::Payload {
                            remaining: remaining - take,
                        }
                    };
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.state {
            State::Header { have: 0 } => {}
            State::Header { have } => {
                warn!(have, "stream closed mid-header; truncated frame dropped");
            }
            State::Payload { remaining } => {
                warn!(remaining, "stream closed mid-payload");
            }
        }
        self.sink.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{build_frame, StreamKind};
    use crate::sink::SharedSink;

    fn demux_with_capture() -> (StreamDemux, std::rc::Rc<std::cell::RefCell<Vec<u8>>>) {
        let (sink, captured) = SharedSink::new();
        (StreamDemux::new(Box::new(sink)), captured)
    }

    #[test]
    fn test_single_complete_frame() {
        let (mut demux, captured) = demux_with_capture();
        demux.deliver(&build_frame(StreamKind::Stdout, b"hello")).unwrap();
        assert_eq!(captured.borrow().as_slice(), b"hello");
    }

    #[test]
    fn test_multiple_frames_in_one_delivery() {
        let (mut demux, captured) = demux_with_capture();

        let mut combined = Vec::new();
        combined.extend(build_frame(StreamKind::Stdout, b"first"));
        combined.extend(build_frame(StreamKind::Stderr, b"second"));
        combined.extend(build_frame(StreamKind::Stdout, b"third"));

        demux.deliver(&combined).unwrap();
        assert_eq!(captured.borrow().as_slice(), b"firstsecondthird");
    }

    #[test]
    fn test_frame_split_at_every_boundary() {
        // stderr "alpha" then stdout "b", delivered in arbitrary-sized
        // slices, must always concatenate to "alphab".
        let mut wire = Vec::new();
        wire.extend(build_frame(StreamKind::Stderr, b"alpha"));
        wire.extend(build_frame(StreamKind::Stdout, b"b"));

        for split in 1..wire.len() {
            let (mut demux, captured) = demux_with_capture();
            demux.deliver(&wire[..split]).unwrap();
            demux.deliver(&wire[split..]).unwrap();
            assert_eq!(captured.borrow().as_slice(), b"alphab", "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let mut wire = Vec::new();
        wire.extend(build_frame(StreamKind::Stdout, b"alpha"));
        wire.extend(build_frame(StreamKind::Stderr, b"beta"));

        let (mut demux, captured) = demux_with_capture();
        for byte in &wire {
            demux.deliver(std::slice::from_ref(byte)).unwrap();
        }
        assert_eq!(captured.borrow().as_slice(), b"alphabeta");
    }

    #[test]
    fn test_zero_length_payload_resets_in_same_call() {
        let (mut demux, captured) = demux_with_capture();

        let mut combined = Vec::new();
        combined.extend(build_frame(StreamKind::Stdout, b""));
        combined.extend(build_frame(StreamKind::Stdout, b"after"));

        // The empty frame must not wedge the state machine; the next
        // frame in the same buffer is decoded in the same call.
        demux.deliver(&combined).unwrap();
        assert_eq!(captured.borrow().as_slice(), b"after");
    }

    #[test]
    fn test_trailing_zero_length_payload() {
        let (mut demux, captured) = demux_with_capture();
        demux.deliver(&build_frame(StreamKind::Stdout, b"")).unwrap();
        demux.close().unwrap();
        assert!(captured.borrow().is_empty());
    }

    #[test]
    fn test_both_streams_feed_one_sink_in_order() {
        let (mut demux, captured) = demux_with_capture();
        demux.deliver(&build_frame(StreamKind::Stdout, b"out")).unwrap();
        demux.deliver(&build_frame(StreamKind::Stderr, b"err")).unwrap();
        demux.deliver(&build_frame(StreamKind::Stdout, b"out2")).unwrap();
        assert_eq!(captured.borrow().as_slice(), b"outerrout2");
    }

    #[test]
    fn test_large_payload_across_many_deliveries() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let wire = build_frame(StreamKind::Stdout, &payload);

        let (mut demux, captured) = demux_with_capture();
        for chunk in wire.chunks(4096) {
            demux.deliver(chunk).unwrap();
        }
        assert_eq!(captured.borrow().as_slice(), payload.as_slice());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut demux, _captured) = demux_with_capture();
        demux.close().unwrap();
        demux.close().unwrap();
    }

    #[test]
    fn test_deliver_after_close_is_rejected() {
        let (mut demux, _captured) = demux_with_capture();
        demux.close().unwrap();
        let err = demux.deliver(b"x").unwrap_err();
        assert!(matches!(err, crate::error::JobwireError::Closed));
    }

    #[test]
    fn test_truncated_final_frame_is_not_an_error() {
        let (mut demux, captured) = demux_with_capture();
        let wire = build_frame(StreamKind::Stdout, b"hello");
        // Deliver the header and only part of the payload.
        demux.deliver(&wire[..HEADER_SIZE + 2]).unwrap();
        demux.close().unwrap();
        assert_eq!(captured.borrow().as_slice(), b"he");
    }
}
