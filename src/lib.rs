//! # jobwire
//!
//! Streaming data plane for containerized command-line jobs.
//!
//! This crate connects a running container's stdio and auxiliary files to
//! heterogeneous endpoints - OS pipes, named pipes, remote downloads, a
//! remote storage upload - and moves bytes between them live, without
//! buffering whole payloads and without letting any single endpoint stall
//! the controlling process.
//!
//! ## Architecture
//!
//! ```text
//! container stdout pipe ─► FdReader ─► StreamDemux ─► ProgressDecoder ─► ChunkedUpload
//! local input file      ─► FifoWriter ──────────────────────────────► container stdin FIFO
//!                              │
//!                        SelectLoop (single thread, bounded poll,
//!                                    one chunk per ready connector)
//! ```
//!
//! - **Connectors** wrap one directional endpoint each and are driven by
//!   the [`select_loop::SelectLoop`], a single-threaded readiness-driven
//!   scheduler.
//! - **Push adapters** ([`protocol::StreamDemux`],
//!   [`progress::ProgressDecoder`], [`upload::ChunkedUpload`], plain
//!   sinks) chain behind a reader and decode the byte stream in flight.
//! - [`privilege`] fixes ownership of container-written output paths once
//!   the loop has drained.
//!
//! ## Example
//!
//! ```ignore
//! use jobwire::connector::FdReader;
//! use jobwire::progress::{JsonLinesProgress, ProgressDecoder};
//! use jobwire::protocol::StreamDemux;
//! use jobwire::select_loop::SelectLoop;
//! use jobwire::sink::FileSink;
//! use jobwire::upload::ChunkedUpload;
//!
//! let upload = ChunkedUpload::builder(output_url)
//!     .header("Authorization", auth)
//!     .open()?;
//! let progress = ProgressDecoder::new(
//!     Box::new(upload),
//!     Box::new(JsonLinesProgress::new(std::io::stderr())),
//! );
//! let demux = StreamDemux::new(Box::new(progress));
//!
//! SelectLoop::new(move || container.exited())
//!     .reader(FdReader::new(attach_fd, Box::new(demux)))
//!     .run()?;
//! ```

pub mod connector;
pub mod error;
pub mod privilege;
pub mod progress;
pub mod protocol;
pub mod select_loop;
pub mod sink;
pub mod upload;

pub use error::{JobwireError, Result};
pub use select_loop::SelectLoop;
