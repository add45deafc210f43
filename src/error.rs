//! Error types for jobwire.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for all jobwire operations.
#[derive(Debug, Error)]
pub enum JobwireError {
    /// I/O error on a pipe, FIFO, socket, or file endpoint.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (progress reporting).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, bad response line, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Endpoint setup error: missing FIFO, wrong file type, no permission,
    /// unusable URL. Raised at `open()` time, before the loop starts.
    #[error("Endpoint error: {0}")]
    Endpoint(String),

    /// The remote end rejected a chunked upload with a non-2xx status.
    #[error("Upload rejected with HTTP status {status}")]
    HttpStatus { status: u16 },

    /// The privileged fix-up container failed to run to completion.
    #[error("Privilege fix-up failed for {paths:?}: {detail}")]
    PrivilegeFix { paths: Vec<PathBuf>, detail: String },

    /// I/O was attempted on a connector or adapter already closed.
    #[error("Endpoint closed")]
    Closed,
}

/// Result type alias using JobwireError.
pub type Result<T> = std::result::Result<T, JobwireError>;

impl From<nix::Error> for JobwireError {
    fn from(errno: nix::Error) -> Self {
        JobwireError::Io(std::io::Error::from_raw_os_error(errno as i32))
    }
}
