//! Named-pipe (FIFO) connectors.
//!
//! The caller supplies a filesystem path that must already exist as a FIFO
//! with permissions allowing the requested open mode; the connector never
//! creates it. Both sides validate the path before any open that could
//! block, so a misconfigured endpoint surfaces as a fatal error instead of
//! a hang. A FIFO writer cannot open until a reader holds the other end:
//! the non-blocking open reports `ENXIO` until then, which the select loop
//! treats as "peer not ready yet" and retries.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use nix::unistd::{access, AccessFlags};
use tracing::debug;

use super::fd::{pump_read, pump_write};
use super::{ConnState, Connector, OpenState, Pump};
use crate::error::{JobwireError, Result};
use crate::sink::{ByteSink, ByteSource};

/// Check that `path` is an existing FIFO we may open with `flags`.
fn validate_fifo(path: &Path, flags: AccessFlags) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|err| {
        JobwireError::Endpoint(format!("named pipe {} unusable: {err}", path.display()))
    })?;
    if !meta.file_type().is_fifo() {
        return Err(JobwireError::Endpoint(format!(
            "{} is not a FIFO",
            path.display()
        )));
    }
    access(path, flags).map_err(|err| {
        JobwireError::Endpoint(format!(
            "named pipe {} not accessible: {err}",
            path.display()
        ))
    })?;
    Ok(())
}

/// Read connector over a named pipe.
pub struct FifoReader {
    path: PathBuf,
    file: Option<File>,
    chain: Box<dyn ByteSink>,
    scratch: Vec<u8>,
    state: ConnState,
}

impl FifoReader {
    /// Wrap an existing FIFO path, feeding the given adapter chain.
    pub fn new(path: impl Into<PathBuf>, chain: Box<dyn ByteSink>) -> Self {
        Self {
            path: path.into(),
            file: None,
            chain,
            scratch: Vec::new(),
            state: ConnState::Unopened,
        }
    }
}

impl Connector for FifoReader {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.file.as_ref().map(|f| f.as_fd())
    }

    fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    fn open(&mut self) -> Result<OpenState> {
        match self.state {
            ConnState::Unopened => {
                validate_fifo(&self.path, AccessFlags::R_OK)?;
                // A non-blocking read open succeeds whether or not a
                // writer is attached yet.
                let file = OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&self.path)?;
                debug!(path = %self.path.display(), "FIFO reader open");
                self.file = Some(file);
                self.state = ConnState::Open;
                Ok(OpenState::Open)
            }
            ConnState::Open => Ok(OpenState::Open),
            ConnState::Closed => Err(JobwireError::Closed),
        }
    }

    fn pump(&mut self, max: usize) -> Result<Pump> {
        let file = self.file.as_ref().ok_or(JobwireError::Closed)?;
        pump_read(file, self.chain.as_mut(), &mut self.scratch, max)
    }

    fn close(&mut self) -> Result<()> {
        if self.state == ConnState::Closed {
            return Ok(());
        }
        self.state = ConnState::Closed;
        drop(self.file.take());
        self.chain.close()
    }
}

/// Write connector over a named pipe, opened lazily once a reader exists.
pub struct FifoWriter {
    path: PathBuf,
    file: Option<File>,
    source: Box<dyn ByteSource>,
    carry: Bytes,
    exhausted: bool,
    state: ConnState,
}

impl FifoWriter {
    /// Wrap an existing FIFO path, fed from the given upstream source.
    pub fn new(path: impl Into<PathBuf>, source: Box<dyn ByteSource>) -> Self {
        Self {
            path: path.into(),
            file: None,
            source,
            carry: Bytes::new(),
            exhausted: false,
            state: ConnState::Unopened,
        }
    }
}

impl Connector for FifoWriter {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.file.as_ref().map(|f| f.as_fd())
    }

    fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    fn open(&mut self) -> Result<OpenState> {
        match self.state {
            ConnState::Unopened => {
                validate_fifo(&self.path, AccessFlags::W_OK)?;
                match OpenOptions::new()
                    .write(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&self.path)
                {
                    Ok(file) => {
                        debug!(path = %self.path.display(), "FIFO writer open");
                        self.file = Some(file);
                        self.state = ConnState::Open;
                        Ok(OpenState::Open)
                    }
                    // No reader on the other end yet; stay unopened and
                    // let the loop retry instead of blocking forever.
                    Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                        Ok(OpenState::AwaitingPeer)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            ConnState::Open => Ok(OpenState::Open),
            ConnState::Closed => Err(JobwireError::Closed),
        }
    }

    fn pump(&mut self, max: usize) -> Result<Pump> {
        let file = self.file.as_ref().ok_or(JobwireError::Closed)?;
        pump_write(
            file,
            self.source.as_mut(),
            &mut self.carry,
            &mut self.exhausted,
            max,
        )
    }

    fn close(&mut self) -> Result<()> {
        if self.state == ConnState::Closed {
            return Ok(());
        }
        self.state = ConnState::Closed;
        drop(self.file.take());
        Ok(())
    }
}
