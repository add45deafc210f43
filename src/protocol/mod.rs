//! Protocol module - the container runtime's multiplexed stdio framing.
//!
//! This module implements the byte-level protocol between the container
//! runtime and the data plane:
//! - 8-byte header encoding/decoding
//! - demultiplexer turning the framed stream back into a logical byte stream

mod demux;
mod frame;

pub use demux::StreamDemux;
pub use frame::{build_frame, FrameHeader, StreamKind, HEADER_SIZE};
