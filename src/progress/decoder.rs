//! Progress marker decoder.
//!
//! Scans a logical byte stream for the embedded tag-delimited progress
//! sub-protocol, forwards everything else downstream unchanged, and emits
//! structured updates for recognized progress fractions. A tag may arrive
//! split across any number of deliveries; bytes that might still become a
//! tag are withheld until they can be decided, and an open tag whose close
//! never arrives is flushed as literal data when the stream closes.
//!
//! Token vocabulary (case-sensitive ASCII, flat):
//! - standalone stage markers: `<filter-start>`, `</filter-start>`,
//!   `<filter-end>`, `</filter-end>`
//! - content tags: `<filter-name>TEXT</filter-name>`,
//!   `<filter-comment>TEXT</filter-comment>`,
//!   `<filter-progress>FLOAT</filter-progress>`,
//!   `<filter-stage-progress>FLOAT</filter-stage-progress>`,
//!   `<filter-time>FLOAT</filter-time>`
//!
//! # Example
//!
//! ```
//! use jobwire::progress::{ProgressDecoder, SharedProgress};
//! use jobwire::sink::{ByteSink, SharedSink};
//!
//! let (sink, literal) = SharedSink::new();
//! let (consumer, updates) = SharedProgress::new();
//! let mut decoder = ProgressDecoder::new(Box::new(sink), Box::new(consumer));
//!
//! decoder.deliver(b"<filter-comment>C</filter-comment>").unwrap();
//! decoder.deliver(b"<filter-progress>0.1</filter-progress>Test").unwrap();
//! decoder.close().unwrap();
//!
//! assert_eq!(literal.borrow().as_slice(), b"Test");
//! assert_eq!(updates.borrow()[0].current, 0.1);
//! assert_eq!(updates.borrow()[0].message, "C");
//! ```

use bytes::BytesMut;
use tracing::{debug, warn};

use super::report::{ProgressConsumer, ProgressUpdate};
use crate::error::{JobwireError, Result};
use crate::sink::ByteSink;

/// Standalone stage markers, complete on their own.
const STAGE_MARKERS: [&[u8]; 4] = [
    b"<filter-start>",
    b"</filter-start>",
    b"<filter-end>",
    b"</filter-end>",
];

/// What a content tag's TEXT means.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ContentKind {
    Name,
    Comment,
    Fraction,
    StageFraction,
    Time,
}

/// Content tags, wrapped as `<name>TEXT</name>`.
const CONTENT_TAGS: [(&[u8], &[u8], ContentKind); 5] = [
    (b"<filter-name>", b"</filter-name>", ContentKind::Name),
    (b"<filter-comment>", b"</filter-comment>", ContentKind::Comment),
    (b"<filter-progress>", b"</filter-progress>", ContentKind::Fraction),
    (
        b"<filter-stage-progress>",
        b"</filter-stage-progress>",
        ContentKind::StageFraction,
    ),
    (b"<filter-time>", b"</filter-time>", ContentKind::Time),
];

/// Semantic effect of one complete token.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    StageStart,
    StageStartClose,
    StageEnd,
    StageEndClose,
    SetName(String),
    SetComment(String),
    Fraction(f64),
    StageFraction(f64),
    StageTime(f64),
    /// Recognized shape, undecodable content; pass the bytes through.
    Literal,
}

/// One scan over the pending buffer.
#[derive(Debug)]
enum Scan {
    /// Complete token spanning `start..end`.
    Token {
        start: usize,
        end: usize,
        action: Action,
    },
    /// A token may begin at `start` but cannot be decided yet.
    Partial { start: usize },
    /// No token and no possible token start anywhere.
    Nothing,
}

/// Outcome of matching one candidate position against the vocabulary.
enum TokenMatch {
    Complete { len: usize, action: Action },
    Incomplete,
    No,
}

/// Push adapter extracting progress markers from a byte stream.
pub struct ProgressDecoder {
    sink: Box<dyn ByteSink>,
    consumer: Box<dyn ProgressConsumer>,
    pending: BytesMut,
    stage: Option<String>,
    comment: Option<String>,
    closed: bool,
}

impl ProgressDecoder {
    /// Create a decoder forwarding literal bytes to `sink` and structured
    /// updates to `consumer`.
    pub fn new(sink: Box<dyn ByteSink>, consumer: Box<dyn ProgressConsumer>) -> Self {
        Self {
            sink,
            consumer,
            pending: BytesMut::new(),
            stage: None,
            comment: None,
            closed: false,
        }
    }

    /// Process as much of the pending buffer as can be decided.
    fn drain(&mut self) -> Result<()> {
        loop {
            match scan(&self.pending) {
                Scan::Token { start, end, action } => {
                    if start > 0 {
                        let literal = self.pending.split_to(start);
                        self.sink.deliver(&literal)?;
                    }
                    let tag = self.pending.split_to(end - start);
                    if action == Action::Literal {
                        self.sink.deliver(&tag)?;
                    } else {
                        self.apply(action);
                    }
                }
                Scan::Partial { start } => {
                    if start > 0 {
                        let literal = self.pending.split_to(start);
                        self.sink.deliver(&literal)?;
                    }
                    return Ok(());
                }
                Scan::Nothing => {
                    if !self.pending.is_empty() {
                        let literal = self.pending.split();
                        self.sink.deliver(&literal)?;
                    }
                    return Ok(());
                }
            }
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::StageStart => debug!("stage block opened"),
            Action::StageStartClose => {}
            Action::StageEnd => debug!(stage = ?self.stage, "stage block ended"),
            Action::StageEndClose => {}
            Action::SetName(name) => {
                debug!(stage = %name, "stage name");
                self.stage = Some(name);
            }
            Action::SetComment(comment) => {
                self.comment = Some(comment);
            }
            Action::Fraction(value) | Action::StageFraction(value) => {
                let update = ProgressUpdate {
                    current: value,
                    total: 1.0,
                    message: self
                        .comment
                        .clone()
                        .unwrap_or_else(|| "Unknown".to_string()),
                };
                debug!(current = value, "progress");
                self.consumer.update(&update);
            }
            Action::StageTime(seconds) => {
                debug!(seconds, stage = ?self.stage, "stage time");
            }
            Action::Literal => unreachable!("literal actions are handled in drain"),
        }
    }
}

impl ByteSink for ProgressDecoder {
    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(JobwireError::Closed);
        }
        self.pending.extend_from_slice(bytes);
        self.drain()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.pending.is_empty() {
            // An incomplete trailing tag is not a parse error, it is
            // undecodable literal data.
            warn!(
                withheld = self.pending.len(),
                "stream closed inside a possible progress tag; flushing as literal"
            );
            let rest = self.pending.split();
            self.sink.deliver(&rest)?;
        }
        self.sink.close()
    }
}

/// Find the next token or possible token start in `buf`.
fn scan(buf: &[u8]) -> Scan {
    let mut from = 0;
    while let Some(offset) = buf[from..].iter().position(|&b| b == b'<') {
        let start = from + offset;
        match match_token(&buf[start..]) {
            TokenMatch::Complete { len, action } => {
                return Scan::Token {
                    start,
                    end: start + len,
                    action,
                }
            }
            TokenMatch::Incomplete => return Scan::Partial { start },
            TokenMatch::No => from = start + 1,
        }
    }
    Scan::Nothing
}

/// Match `tail` (which begins with `<`) against the vocabulary.
fn match_token(tail: &[u8]) -> TokenMatch {
    let markers = [
        (STAGE_MARKERS[0], Action::StageStart),
        (STAGE_MARKERS[1], Action::StageStartClose),
        (STAGE_MARKERS[2], Action::StageEnd),
        (STAGE_MARKERS[3], Action::StageEndClose),
    ];
    for (marker, action) in markers {
        if tail.starts_with(marker) {
            return TokenMatch::Complete {
                len: marker.len(),
                action,
            };
        }
    }

    for (open, close, kind) in CONTENT_TAGS {
        if let Some(rest) = tail.strip_prefix(open) {
            return match find_subslice(rest, close) {
                Some(at) => TokenMatch::Complete {
                    len: open.len() + at + close.len(),
                    action: content_action(kind, &rest[..at]),
                },
                // Open tag seen, close tag still owed.
                None => TokenMatch::Incomplete,
            };
        }
    }

    // The buffer may end in the middle of any token; withhold the suffix
    // so a tag split across deliveries is still recognized.
    let could_continue = STAGE_MARKERS
        .iter()
        .any(|marker| marker.starts_with(tail))
        || CONTENT_TAGS
            .iter()
            .any(|(open, _, _)| open.starts_with(tail));
    if could_continue {
        TokenMatch::Incomplete
    } else {
        TokenMatch::No
    }
}

fn content_action(kind: ContentKind, content: &[u8]) -> Action {
    match kind {
        ContentKind::Name => Action::SetName(String::from_utf8_lossy(content).into_owned()),
        ContentKind::Comment => Action::SetComment(String::from_utf8_lossy(content).into_owned()),
        ContentKind::Fraction | ContentKind::StageFraction | ContentKind::Time => {
            let parsed = std::str::from_utf8(content)
                .ok()
                .and_then(|text| text.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite());
            match (kind, parsed) {
                (ContentKind::Fraction, Some(value)) => Action::Fraction(value),
                (ContentKind::StageFraction, Some(value)) => Action::StageFraction(value),
                (ContentKind::Time, Some(value)) => Action::StageTime(value),
                _ => {
                    warn!(?kind, "unparseable numeric tag content; passing through");
                    Action::Literal
                }
            }
        }
    }
}

/// Locate `needle` inside `haystack`.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
