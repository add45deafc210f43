//! Stream connectors - uniform non-blocking wrappers around directional
//! I/O endpoints.
//!
//! A connector wraps exactly one readable or one writable endpoint (an OS
//! pipe, a named pipe, a standard stream, a remote download iterator) and
//! is driven by the select loop one bounded chunk at a time. Read
//! connectors push into an owned adapter chain; write connectors pull from
//! an owned byte source. Every connector owns its handle and releases it
//! exactly once on close, on any exit path.

mod download;
mod fd;
mod fifo;

pub use download::{DownloadChunks, DownloadReader};
pub use fd::{FdReader, FdWriter};
pub use fifo::{FifoReader, FifoWriter};

use std::os::fd::BorrowedFd;

use crate::error::Result;

/// Default bounded chunk moved per ready connector per loop iteration.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Result of a bounded transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Bytes were moved through the connector.
    Moved(usize),
    /// End of data (reader) or closed peer / exhausted upstream (writer).
    /// The loop retires the connector.
    End,
    /// The endpoint was not actually ready; try again next iteration.
    Blocked,
}

/// Result of an open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// The handle is acquired and pollable.
    Open,
    /// The peer side is not there yet (FIFO writer with no reader);
    /// the loop retries on a later iteration.
    AwaitingPeer,
}

/// Connector lifecycle. `Closed` is terminal; no further I/O is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Unopened,
    Open,
    Closed,
}

/// One directional endpoint driven by the select loop.
pub trait Connector {
    /// Handle usable for readiness polling, or `None` while the endpoint
    /// is not yet open or is not pollable (always-ready sources).
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Whether the underlying handle has been acquired.
    fn is_open(&self) -> bool;

    /// Acquire the underlying handle. Safe to call once; a deferred
    /// writer reports [`OpenState::AwaitingPeer`] until its peer shows up.
    fn open(&mut self) -> Result<OpenState>;

    /// Move at most `max` bytes through the connector: a reader pulls from
    /// its endpoint and pushes into its adapter chain, a writer pulls from
    /// its upstream source and writes to its endpoint.
    fn pump(&mut self, max: usize) -> Result<Pump>;

    /// Release the handle and close the owned adapter chain. Called
    /// exactly once on every exit path; subsequent calls are no-ops.
    fn close(&mut self) -> Result<()>;
}
