//! Progress module - the embedded marker sub-protocol.
//!
//! Command-line tools announce their progress inline, as tag-delimited
//! markers mixed into their output stream. This module extracts those
//! markers, forwards everything else untouched, and hands structured
//! updates to the job-tracking seam.

mod decoder;
mod report;

pub use decoder::ProgressDecoder;
pub use report::{JsonLinesProgress, ProgressConsumer, ProgressUpdate, SharedProgress};
