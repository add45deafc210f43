//! Progress update model and consumers.
//!
//! Structured updates extracted from the embedded marker sub-protocol are
//! handed to a [`ProgressConsumer`], the seam to the external job-tracking
//! service. The crate ships two consumers: an in-memory collector for
//! single-threaded wiring and a JSON-lines writer for piping updates to
//! another process.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One structured progress update.
///
/// `current` is the reported fraction, `total` the scale it is measured
/// against (always 1 for the marker protocol), `message` the most recently
/// seen comment or `"Unknown"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub current: f64,
    pub total: f64,
    pub message: String,
}

/// Receiver of structured progress updates.
///
/// Consumers absorb their own failures: a progress report that cannot be
/// delivered must not interrupt the byte stream it was extracted from.
pub trait ProgressConsumer {
    /// Accept one update.
    fn update(&mut self, update: &ProgressUpdate);
}

/// Consumer that collects updates into a shared vector.
pub struct SharedProgress {
    updates: Rc<RefCell<Vec<ProgressUpdate>>>,
}

impl SharedProgress {
    /// Create a consumer and a handle to the vector it fills.
    pub fn new() -> (Self, Rc<RefCell<Vec<ProgressUpdate>>>) {
        let updates = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl ProgressConsumer for SharedProgress {
    fn update(&mut self, update: &ProgressUpdate) {
        self.updates.borrow_mut().push(update.clone());
    }
}

/// Consumer that writes one JSON object per line.
///
/// Writes an explicit `\n` and flushes after every update: the receiving
/// side waits for complete lines.
pub struct JsonLinesProgress<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesProgress<W> {
    /// Wrap any writer (a pipe to the job tracker, stderr, a log file).
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> ProgressConsumer for JsonLinesProgress<W> {
    fn update(&mut self, update: &ProgressUpdate) {
        let line = match serde_json::to_string(update) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "progress update not serializable");
                return;
            }
        };
        let result = self
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(err) = result {
            warn!(%err, "progress update dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_progress_collects() {
        let (mut consumer, updates) = SharedProgress::new();
        consumer.update(&ProgressUpdate {
            current: 0.5,
            total: 1.0,
            message: "halfway".to_string(),
        });
        assert_eq!(updates.borrow().len(), 1);
        assert_eq!(updates.borrow()[0].message, "halfway");
    }

    #[test]
    fn test_json_lines_one_object_per_line() {
        let mut buf = Vec::new();
        {
            let mut consumer = JsonLinesProgress::new(&mut buf);
            consumer.update(&ProgressUpdate {
                current: 0.1,
                total: 1.0,
                message: "a".to_string(),
            });
            consumer.update(&ProgressUpdate {
                current: 0.2,
                total: 1.0,
                message: "b".to_string(),
            });
        }
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: ProgressUpdate = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.current, 0.1);
        assert_eq!(first.message, "a");
    }
}
