//! Adapter-chain interfaces and plain byte sinks/sources.
//!
//! A connector delivers bytes to a downstream chain of push adapters
//! (demultiplexer, progress decoder, upload writer, plain sink). Adapters
//! are stateful, ordered, and singly owned by the connector that feeds
//! them; an adapter never outlives its connector.
//!
//! # Example
//!
//! ```
//! use jobwire::sink::{ByteSink, SharedSink};
//!
//! let (mut sink, captured) = SharedSink::new();
//! sink.deliver(b"hello").unwrap();
//! sink.close().unwrap();
//! assert_eq!(captured.borrow().as_slice(), b"hello");
//! ```

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::Result;

/// Downstream byte consumer chained behind a read connector.
///
/// `deliver` pushes one bounded chunk; `close` flushes any withheld state
/// and is forwarded down the chain. After `close`, no further delivery is
/// permitted.
pub trait ByteSink {
    /// Consume one chunk of bytes, in stream order.
    fn deliver(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flush withheld state and close the downstream chain.
    fn close(&mut self) -> Result<()>;
}

/// Upstream byte producer feeding a write connector.
///
/// `pull` returns at most `max` bytes; an empty return signals exhaustion.
pub trait ByteSource {
    /// Produce the next chunk, at most `max` bytes long.
    fn pull(&mut self, max: usize) -> Result<Bytes>;
}

/// Sink that appends to a local file through a buffered writer.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create the target file (truncating an existing one).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Wrap an already-open file.
    pub fn from_file(file: File) -> Self {
        Self {
            writer: BufWriter::new(file),
        }
    }
}

impl ByteSink for FileSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink that collects bytes into a shared in-memory buffer.
///
/// The loop owns the sink while a handle to the same buffer stays with the
/// caller for inspection after the run. Single-threaded by design, like
/// everything else in one job execution, so a plain `Rc<RefCell<..>>`
/// suffices.
pub struct SharedSink {
    data: Rc<RefCell<Vec<u8>>>,
}

impl SharedSink {
    /// Create a sink and a handle to the buffer it fills.
    pub fn new() -> (Self, Rc<RefCell<Vec<u8>>>) {
        let data = Rc::new(RefCell::new(Vec::new()));
        (Self { data: data.clone() }, data)
    }
}

impl ByteSink for SharedSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        self.data.borrow_mut().extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source that reads a local file in bounded chunks.
pub struct FileSource {
    file: File,
    eof: bool,
}

impl FileSource {
    /// Open the file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file, eof: false })
    }

    /// Wrap an already-open file.
    pub fn from_file(file: File) -> Self {
        Self { file, eof: false }
    }
}

impl ByteSource for FileSource {
    fn pull(&mut self, max: usize) -> Result<Bytes> {
        if self.eof || max == 0 {
            return Ok(Bytes::new());
        }
        let mut buf = vec![0u8; max];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            self.eof = true;
            return Ok(Bytes::new());
        }
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }
}

/// Source over an in-memory byte buffer.
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    /// Wrap a byte buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for BytesSource {
    fn pull(&mut self, max: usize) -> Result<Bytes> {
        if self.data.is_empty() || max == 0 {
            return Ok(Bytes::new());
        }
        let n = max.min(self.data.len());
        Ok(self.data.split_to(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_sink_accumulates_in_order() {
        let (mut sink, captured) = SharedSink::new();
        sink.deliver(b"alpha").unwrap();
        sink.deliver(b"beta").unwrap();
        sink.close().unwrap();
        assert_eq!(captured.borrow().as_slice(), b"alphabeta");
    }

    #[test]
    fn test_bytes_source_bounded_pulls() {
        let mut src = BytesSource::new(&b"abcdefgh"[..]);
        assert_eq!(&src.pull(3).unwrap()[..], b"abc");
        assert_eq!(&src.pull(3).unwrap()[..], b"def");
        assert_eq!(&src.pull(3).unwrap()[..], b"gh");
        assert!(src.pull(3).unwrap().is_empty());
        // Stays exhausted.
        assert!(src.pull(3).unwrap().is_empty());
    }

    #[test]
    fn test_bytes_source_zero_max() {
        let mut src = BytesSource::new(&b"abc"[..]);
        assert!(src.pull(0).unwrap().is_empty());
        assert_eq!(&src.pull(8).unwrap()[..], b"abc");
    }

    #[test]
    fn test_file_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = FileSink::create(&path).unwrap();
        sink.deliver(b"first ").unwrap();
        sink.deliver(b"second").unwrap();
        sink.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"first second");
    }

    #[test]
    fn test_file_source_reads_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut src = FileSource::open(&path).unwrap();
        let mut out = Vec::new();
        loop {
            let chunk = src.pull(4).unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 4);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, b"0123456789");
    }
}
