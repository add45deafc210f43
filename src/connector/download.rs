//! Read connector over a remote download iterator.
//!
//! Remote storage clients hand out downloads as an iterator of byte
//! chunks. The connector adapts that pull interface to the select loop:
//! it is not pollable (there is no fd to watch), so the loop treats it as
//! always ready and moves one bounded slice per iteration, keeping the
//! remainder of an oversized chunk carried for the next pass.

use std::os::fd::BorrowedFd;

use bytes::Bytes;

use super::{ConnState, Connector, OpenState, Pump};
use crate::error::{JobwireError, Result};
use crate::sink::ByteSink;

/// Chunks as produced by a remote download.
pub type DownloadChunks = Box<dyn Iterator<Item = std::io::Result<Bytes>>>;

/// Read connector feeding a remote download into an adapter chain.
pub struct DownloadReader {
    chunks: DownloadChunks,
    chain: Box<dyn ByteSink>,
    carry: Bytes,
    state: ConnState,
}

impl DownloadReader {
    /// Wrap a download iterator, feeding the given adapter chain.
    pub fn new(chunks: DownloadChunks, chain: Box<dyn ByteSink>) -> Self {
        Self {
            chunks,
            chain,
            carry: Bytes::new(),
            state: ConnState::Unopened,
        }
    }
}

impl Connector for DownloadReader {
    /// Not pollable; the loop treats this connector as always ready.
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    fn open(&mut self) -> Result<OpenState> {
        match self.state {
            ConnState::Unopened => {
                self.state = ConnState::Open;
                Ok(OpenState::Open)
            }
            ConnState::Open => Ok(OpenState::Open),
            ConnState::Closed => Err(JobwireError::Closed),
        }
    }

    fn pump(&mut self, max: usize) -> Result<Pump> {
        if self.state != ConnState::Open {
            return Err(JobwireError::Closed);
        }
        while self.carry.is_empty() {
            match self.chunks.next() {
                Some(Ok(chunk)) => self.carry = chunk,
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(Pump::End),
            }
        }
        let take = self.carry.len().min(max);
        let slice = self.carry.split_to(take);
        self.chain.deliver(&slice)?;
        Ok(Pump::Moved(take))
    }

    fn close(&mut self) -> Result<()> {
        if self.state == ConnState::Closed {
            return Ok(());
        }
        self.state = ConnState::Closed;
        self.chain.close()
    }
}
