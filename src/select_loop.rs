//! Single-threaded readiness-driven scheduler.
//!
//! Drives a set of read and write connectors concurrently by time-slicing
//! bounded chunks: each iteration polls every open connector once with a
//! short bounded timeout and moves at most one chunk per ready connector.
//! No worker pool, no preemption; the bounded poll is the only point that
//! may block, so the exit predicate (the sole cancellation mechanism)
//! stays responsive.
//!
//! Termination is two-part: the loop exits only when the exit predicate
//! held at the top of an iteration *and* that iteration moved no bytes in
//! either direction, so a final chunk arriving in the same iteration the
//! job exits is never dropped. Whatever path ends the run, every connector
//! is closed exactly once before `run` returns.
//!
//! # Example
//!
//! ```no_run
//! use jobwire::connector::FdReader;
//! use jobwire::select_loop::SelectLoop;
//! use jobwire::sink::FileSink;
//!
//! # fn main() -> jobwire::Result<()> {
//! # let stdout_fd: std::os::fd::OwnedFd = todo!();
//! let capture = FileSink::create("/tmp/job-stdout.log")?;
//! SelectLoop::new(|| false)
//!     .reader(FdReader::new(stdout_fd, Box::new(capture)))
//!     .run()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, trace, warn};

use crate::connector::{Connector, OpenState, Pump, DEFAULT_CHUNK_SIZE};
use crate::error::{JobwireError, Result};

/// Default bounded readiness-poll timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// The readiness-driven cooperative scheduler for one job execution.
pub struct SelectLoop {
    readers: Vec<Box<dyn Connector>>,
    writers: Vec<Box<dyn Connector>>,
    exit: Box<dyn FnMut() -> bool>,
    chunk_size: usize,
    poll_timeout_ms: u16,
}

impl SelectLoop {
    /// Create a loop with the given exit predicate.
    ///
    /// The predicate is evaluated once per iteration, before the I/O pass,
    /// so the iteration in which it first holds still drains ready data.
    pub fn new(exit: impl FnMut() -> bool + 'static) -> Self {
        Self {
            readers: Vec::new(),
            writers: Vec::new(),
            exit: Box::new(exit),
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u16,
        }
    }

    /// Add a read connector.
    pub fn reader(mut self, connector: impl Connector + 'static) -> Self {
        self.readers.push(Box::new(connector));
        self
    }

    /// Add a write connector.
    pub fn writer(mut self, connector: impl Connector + 'static) -> Self {
        self.writers.push(Box::new(connector));
        self
    }

    /// Override the bounded chunk size moved per ready connector.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    /// Override the bounded readiness-poll timeout.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        self
    }

    /// Run until the exit condition holds and all connectors are drained.
    ///
    /// Every connector is closed exactly once before this returns, on the
    /// normal path and on every error path; the first fatal error wins.
    pub fn run(mut self) -> Result<()> {
        let result = self.run_inner();
        let cleanup = self.close_all();
        match result {
            Err(err) => Err(err),
            Ok(()) => cleanup,
        }
    }

    fn run_inner(&mut self) -> Result<()> {
        // Setup errors are fatal before any processing: readers must open,
        // writers must at least validate (a missing peer is not an error,
        // the open defers until one appears).
        for reader in &mut self.readers {
            reader.open()?;
        }
        for writer in &mut self.writers {
            writer.open()?;
        }

        let mut active_r = vec![true; self.readers.len()];
        let mut active_w = vec![true; self.writers.len()];
        let mut first_error: Option<JobwireError> = None;

        loop {
            let exit_now = (self.exit)();

            // Open writers whose peer may have shown up.
            for (i, writer) in self.writers.iter_mut().enumerate() {
                if active_w[i] && !writer.is_open() {
                    match writer.open() {
                        Ok(OpenState::Open) => debug!(writer = i, "deferred writer opened"),
                        Ok(OpenState::AwaitingPeer) => {}
                        Err(err) => {
                            warn!(writer = i, %err, "writer failed to open");
                            active_w[i] = false;
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }

            // Bounded readiness poll over every open pollable connector.
            let mut ready_r = vec![false; self.readers.len()];
            let mut ready_w = vec![false; self.writers.len()];
            let mut polled = false;
            {
                let mut fds: Vec<PollFd> = Vec::new();
                let mut slots: Vec<(bool, usize)> = Vec::new();
                let mut instant = false;

                for (i, reader) in self.readers.iter().enumerate() {
                    if !active_r[i] || !reader.is_open() {
                        continue;
                    }
                    match reader.poll_fd() {
                        Some(fd) => {
                            fds.push(PollFd::new(fd, PollFlags::POLLIN));
                            slots.push((true, i));
                        }
                        // Always-ready source (no fd to watch).
                        None => {
                            ready_r[i] = true;
                            instant = true;
                        }
                    }
                }
                for (i, writer) in self.writers.iter().enumerate() {
                    if !active_w[i] || !writer.is_open() {
                        continue;
                    }
                    match writer.poll_fd() {
                        Some(fd) => {
                            fds.push(PollFd::new(fd, PollFlags::POLLOUT));
                            slots.push((false, i));
                        }
                        None => {
                            ready_w[i] = true;
                            instant = true;
                        }
                    }
                }

                if !fds.is_empty() {
                    // Zero timeout when an always-ready connector exists;
                    // its work must not wait on the poll.
                    let timeout_ms: u16 = if instant { 0 } else { self.poll_timeout_ms };
                    match poll(&mut fds, timeout_ms) {
                        Ok(_) => {
                            for (slot, (is_reader, i)) in fds.iter().zip(&slots) {
                                let revents = slot.revents().unwrap_or(PollFlags::empty());
                                let wanted = if *is_reader {
                                    PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR
                                } else {
                                    PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR
                                };
                                if revents.intersects(wanted) {
                                    if *is_reader {
                                        ready_r[*i] = true;
                                    } else {
                                        ready_w[*i] = true;
                                    }
                                }
                            }
                        }
                        // Interrupted poll: nothing ready this iteration.
                        Err(Errno::EINTR) => {}
                        Err(err) => return Err(err.into()),
                    }
                    polled = !instant;
                }
            }

            // One bounded chunk per ready connector, readers first.
            let mut moved = false;
            for (i, reader) in self.readers.iter_mut().enumerate() {
                if !active_r[i] || !ready_r[i] {
                    continue;
                }
                match reader.pump(self.chunk_size) {
                    Ok(Pump::Moved(n)) => moved |= n > 0,
                    Ok(Pump::End) => {
                        trace!(reader = i, "reader drained");
                        active_r[i] = false;
                    }
                    Ok(Pump::Blocked) => {}
                    Err(err) => {
                        warn!(reader = i, %err, "reader failed");
                        active_r[i] = false;
                        first_error.get_or_insert(err);
                    }
                }
            }
            for (i, writer) in self.writers.iter_mut().enumerate() {
                if !active_w[i] || !ready_w[i] {
                    continue;
                }
                match writer.pump(self.chunk_size) {
                    Ok(Pump::Moved(n)) => moved |= n > 0,
                    Ok(Pump::End) => {
                        trace!(writer = i, "writer done");
                        active_w[i] = false;
                    }
                    Ok(Pump::Blocked) => {}
                    Err(err) => {
                        warn!(writer = i, %err, "writer failed");
                        active_w[i] = false;
                        first_error.get_or_insert(err);
                    }
                }
            }

            // Two-part termination: the exit condition held before this
            // iteration's I/O pass and the pass moved nothing.
            if exit_now && !moved {
                break;
            }

            // A failed connector was the last one standing: nothing left
            // to drain, surface the error now.
            if first_error.is_some()
                && !active_r.iter().any(|&a| a)
                && !active_w.iter().any(|&a| a)
            {
                break;
            }

            // Keep cancellation responsive without spinning when there was
            // nothing to poll and nothing moved.
            if !moved && !polled {
                std::thread::sleep(Duration::from_millis(self.poll_timeout_ms as u64));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Close every connector exactly once, collecting the first failure
    /// while still running every other close.
    fn close_all(&mut self) -> Result<()> {
        let mut first_error: Option<JobwireError> = None;
        for connector in self.readers.iter_mut().chain(self.writers.iter_mut()) {
            if let Err(err) = connector.close() {
                warn!(%err, "connector close failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::rc::Rc;

    use super::*;
    use crate::connector::{FdReader, FdWriter};
    use crate::sink::{ByteSink, BytesSource, SharedSink};

    /// Sink that records whether it was closed.
    struct CloseProbe {
        closed: Rc<Cell<bool>>,
        fail_deliver: bool,
    }

    impl ByteSink for CloseProbe {
        fn deliver(&mut self, _bytes: &[u8]) -> crate::Result<()> {
            if self.fail_deliver {
                Err(JobwireError::Protocol("sink refused delivery".to_string()))
            } else {
                Ok(())
            }
        }

        fn close(&mut self) -> crate::Result<()> {
            self.closed.set(true);
            Ok(())
        }
    }

    #[test]
    fn test_drains_reader_even_when_exit_is_already_true() {
        let (rx, tx) = std::io::pipe().unwrap();
        {
            let mut tx = tx;
            tx.write_all(b"final output").unwrap();
        }

        let (sink, captured) = SharedSink::new();
        // Exit condition holds from the start; the data in flight must
        // still be drained before termination.
        SelectLoop::new(|| true)
            .reader(FdReader::new(OwnedFd::from(rx), Box::new(sink)))
            .chunk_size(4)
            .run()
            .unwrap();

        assert_eq!(captured.borrow().as_slice(), b"final output");
    }

    #[test]
    fn test_writer_pending_data_gets_post_exit_drain() {
        let (rx, tx) = std::io::pipe().unwrap();

        SelectLoop::new(|| true)
            .writer(FdWriter::new(
                OwnedFd::from(tx),
                Box::new(BytesSource::new(&b"late bytes"[..])),
            ))
            .chunk_size(3)
            .run()
            .unwrap();

        let mut rx = rx;
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut rx, &mut out).unwrap();
        assert_eq!(out, b"late bytes");
    }

    #[test]
    fn test_exit_predicate_is_polled_while_idle() {
        // Reader on a pipe that never produces; the predicate flips after
        // a few evaluations and the loop must notice within its bounded
        // waits instead of hanging.
        let (rx, _tx) = std::io::pipe().unwrap();
        let calls = Rc::new(Cell::new(0usize));
        let calls_in_pred = calls.clone();

        let (sink, captured) = SharedSink::new();
        SelectLoop::new(move || {
            calls_in_pred.set(calls_in_pred.get() + 1);
            calls_in_pred.get() >= 3
        })
        .reader(FdReader::new(OwnedFd::from(rx), Box::new(sink)))
        .poll_timeout(Duration::from_millis(5))
        .run()
        .unwrap();

        assert!(calls.get() >= 3);
        assert!(captured.borrow().is_empty());
    }

    #[test]
    fn test_two_connectors_interleave() {
        let (rx_a, tx_a) = std::io::pipe().unwrap();
        let (rx_b, tx_b) = std::io::pipe().unwrap();
        {
            let (mut tx_a, mut tx_b) = (tx_a, tx_b);
            tx_a.write_all(b"aaaa").unwrap();
            tx_b.write_all(b"bbbb").unwrap();
        }

        let (sink_a, cap_a) = SharedSink::new();
        let (sink_b, cap_b) = SharedSink::new();
        SelectLoop::new(|| true)
            .reader(FdReader::new(OwnedFd::from(rx_a), Box::new(sink_a)))
            .reader(FdReader::new(OwnedFd::from(rx_b), Box::new(sink_b)))
            .run()
            .unwrap();

        assert_eq!(cap_a.borrow().as_slice(), b"aaaa");
        assert_eq!(cap_b.borrow().as_slice(), b"bbbb");
    }

    #[test]
    fn test_chain_error_fails_run_but_closes_everything() {
        let (rx, tx) = std::io::pipe().unwrap();
        {
            let mut tx = tx;
            tx.write_all(b"data").unwrap();
        }
        let (healthy_rx, _healthy_tx) = std::io::pipe().unwrap();

        let failing_closed = Rc::new(Cell::new(false));
        let healthy_closed = Rc::new(Cell::new(false));

        let result = SelectLoop::new(|| true)
            .reader(FdReader::new(
                OwnedFd::from(rx),
                Box::new(CloseProbe {
                    closed: failing_closed.clone(),
                    fail_deliver: true,
                }),
            ))
            .reader(FdReader::new(
                OwnedFd::from(healthy_rx),
                Box::new(CloseProbe {
                    closed: healthy_closed.clone(),
                    fail_deliver: false,
                }),
            ))
            .run();

        assert!(matches!(result, Err(JobwireError::Protocol(_))));
        // Cleanup ran for every connector despite the failure.
        assert!(failing_closed.get());
        assert!(healthy_closed.get());
    }

    #[test]
    fn test_empty_loop_terminates() {
        SelectLoop::new(|| true).run().unwrap();
    }
}
