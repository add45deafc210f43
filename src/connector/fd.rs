//! File-descriptor connectors for pipes and standard streams.
//!
//! Endpoints are plain fds (container stdio pipes, the controlling
//! process's own standard streams) switched to `O_NONBLOCK` at open so the
//! select loop can never be stalled by a single slow endpoint.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use bytes::Bytes;
use tracing::trace;

use super::{ConnState, Connector, OpenState, Pump};
use crate::error::{JobwireError, Result};
use crate::sink::{ByteSink, ByteSource};

/// Set `O_NONBLOCK` on a file descriptor using fcntl.
pub(crate) fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Read at most `max` bytes from `file` and push them into `chain`.
pub(crate) fn pump_read(
    mut file: &File,
    chain: &mut dyn ByteSink,
    scratch: &mut Vec<u8>,
    max: usize,
) -> Result<Pump> {
    if scratch.len() < max {
        scratch.resize(max, 0);
    }
    match file.read(&mut scratch[..max]) {
        Ok(0) => Ok(Pump::End),
        Ok(n) => {
            trace!(n, "read chunk");
            chain.deliver(&scratch[..n])?;
            Ok(Pump::Moved(n))
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(Pump::Blocked),
        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(Pump::Blocked),
        Err(err) => Err(err.into()),
    }
}

/// Write at most `max` bytes from `carry` (refilled from `source`) to `file`.
pub(crate) fn pump_write(
    mut file: &File,
    source: &mut dyn ByteSource,
    carry: &mut Bytes,
    exhausted: &mut bool,
    max: usize,
) -> Result<Pump> {
    if carry.is_empty() {
        if *exhausted {
            return Ok(Pump::End);
        }
        *carry = source.pull(max)?;
        if carry.is_empty() {
            *exhausted = true;
            return Ok(Pump::End);
        }
    }
    let take = carry.len().min(max);
    match file.write(&carry[..take]) {
        Ok(0) => Ok(Pump::Blocked),
        Ok(n) => {
            trace!(n, "wrote chunk");
            // A short write keeps the remainder carried for the next
            // iteration; nothing is re-pulled until the carry drains.
            *carry = carry.slice(n..);
            Ok(Pump::Moved(n))
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(Pump::Blocked),
        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(Pump::Blocked),
        // Peer hung up; the loop retires the connector.
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(Pump::End),
        Err(err) => Err(err.into()),
    }
}

/// Read connector over an inherited file descriptor.
pub struct FdReader {
    file: Option<File>,
    chain: Box<dyn ByteSink>,
    scratch: Vec<u8>,
    state: ConnState,
}

impl FdReader {
    /// Wrap a readable fd, feeding the given adapter chain.
    pub fn new(fd: impl Into<OwnedFd>, chain: Box<dyn ByteSink>) -> Self {
        Self {
            file: Some(File::from(fd.into())),
            chain,
            scratch: Vec::new(),
            state: ConnState::Unopened,
        }
    }

    /// Wrap a duplicate of the process's stdin.
    pub fn stdin(chain: Box<dyn ByteSink>) -> Result<Self> {
        let fd = std::io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::new(fd, chain))
    }
}

impl Connector for FdReader {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        match self.state {
            ConnState::Open => self.file.as_ref().map(|f| f.as_fd()),
            _ => None,
        }
    }

    fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    fn open(&mut self) -> Result<OpenState> {
        match self.state {
            ConnState::Unopened => {
                let file = self.file.as_ref().ok_or(JobwireError::Closed)?;
                set_nonblocking(file.as_raw_fd())?;
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

/// Write connector over an inherited file descriptor.
pub struct FdWriter {
    file: Option<File>,
    source: Box<dyn ByteSource>,
    carry: Bytes,
    exhausted: bool,
    state: ConnState,
}

impl FdWriter {
    /// Wrap a writable fd, fed from the given upstream source.
    pub fn new(fd: impl Into<OwnedFd>, source: Box<dyn ByteSource>) -> Self {
        Self {
            file: Some(File::from(fd.into())),
            source,
            carry: Bytes::new(),
            exhausted: false,
            state: ConnState::Unopened,
        }
    }

    /// Wrap a duplicate of the process's stdout.
    pub fn stdout(source: Box<dyn ByteSource>) -> Result<Self> {
        let fd = std::io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::new(fd, source))
    }

    /// Wrap a duplicate of the process's stderr.
    pub fn stderr(source: Box<dyn ByteSource>) -> Result<Self> {
        let fd = std::io::stderr().as_fd().try_clone_to_owned()?;
        Ok(Self::new(fd, source))
    }
}

impl Connector for FdWriter {
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        match self.state {
            ConnState::Open => self.file.as_ref().map(|f| f.as_fd()),
            _ => None,
        }
    }

    fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    fn open(&mut self) -> Result<OpenState> {
        match self.state {
            ConnState::Unopened => {
                let file = self.file.as_ref().ok_or(JobwireError::Closed)?;
                set_nonblocking(file.as_raw_fd())?;
                self.state = ConnState::Open;
                Ok(OpenState::Open)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BytesSource, SharedSink};

    #[test]
    fn test_fd_reader_pumps_until_end() {
        let (rx, tx) = std::io::pipe().unwrap();
        {
            let mut tx = tx;
            tx.write_all(b"hello pipe").unwrap();
        } // writer dropped: EOF

        let (sink, captured) = SharedSink::new();
        let mut reader = FdReader::new(OwnedFd::from(rx), Box::new(sink));
        assert_eq!(reader.open().unwrap(), OpenState::Open);

        let mut total = 0;
        loop {
            match reader.pump(4).unwrap() {
                Pump::Moved(n) => {
                    assert!(n <= 4);
                    total += n;
                }
                Pump::End => break,
                Pump::Blocked => {}
            }
        }
        assert_eq!(total, 10);
        reader.close().unwrap();
        assert_eq!(captured.borrow().as_slice(), b"hello pipe");
    }

    #[test]
    fn test_fd_reader_blocked_on_empty_pipe() {
        let (rx, _tx) = std::io::pipe().unwrap();
        let (sink, _captured) = SharedSink::new();
        let mut reader = FdReader::new(OwnedFd::from(rx), Box::new(sink));
        reader.open().unwrap();
        // Writer still open, nothing written: non-blocking read must not hang.
        assert_eq!(reader.pump(16).unwrap(), Pump::Blocked);
    }

    #[test]
    fn test_fd_writer_moves_source_to_pipe() {
        let (rx, tx) = std::io::pipe().unwrap();
        let mut writer = FdWriter::new(
            OwnedFd::from(tx),
            Box::new(BytesSource::new(&b"payload"[..])),
        );
        writer.open().unwrap();

        loop {
            match writer.pump(3).unwrap() {
                Pump::Moved(n) => assert!(n <= 3),
                Pump::End => break,
                Pump::Blocked => {}
            }
        }
        writer.close().unwrap();

        let mut rx = rx;
        let mut out = Vec::new();
        rx.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn test_fd_writer_peer_close_is_end_not_error() {
        let (rx, tx) = std::io::pipe().unwrap();
        drop(rx); // peer gone

        let mut writer = FdWriter::new(
            OwnedFd::from(tx),
            Box::new(BytesSource::new(&b"payload"[..])),
        );
        writer.open().unwrap();
        assert_eq!(writer.pump(16).unwrap(), Pump::End);
    }

    #[test]
    fn test_close_exactly_once() {
        let (rx, _tx) = std::io::pipe().unwrap();
        let (sink, _captured) = SharedSink::new();
        let mut reader = FdReader::new(OwnedFd::from(rx), Box::new(sink));
        reader.open().unwrap();
        reader.close().unwrap();
        // Second close is a no-op, not a double release.
        reader.close().unwrap();
        assert!(reader.pump(8).is_err());
    }

    #[test]
    fn test_open_after_close_is_rejected() {
        let (rx, _tx) = std::io::pipe().unwrap();
        let (sink, _captured) = SharedSink::new();
        let mut reader = FdReader::new(OwnedFd::from(rx), Box::new(sink));
        reader.close().unwrap();
        assert!(matches!(reader.open(), Err(JobwireError::Closed)));
    }
}
