//! Progress filter - example of decoding embedded progress markers.
//!
//! Reads a byte stream on stdin, strips the `<filter-...>` progress
//! markers out of it, forwards the remaining bytes to stdout unchanged,
//! and prints one JSON object per recognized progress update on stderr.
//!
//! # Running
//!
//! ```sh
//! printf '<filter-comment>mapping</filter-comment>work<filter-progress>0.5</filter-progress>\n' \
//!     | cargo run --example progress_filter
//! ```

use std::io::{Read, Write};

use jobwire::progress::{JsonLinesProgress, ProgressDecoder};
use jobwire::sink::ByteSink;

/// Sink forwarding literal bytes to the process's stdout.
struct StdoutSink;

impl ByteSink for StdoutSink {
    fn deliver(&mut self, bytes: &[u8]) -> jobwire::Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(bytes)?;
        handle.flush()?;
        Ok(())
    }

    fn close(&mut self) -> jobwire::Result<()> {
        Ok(())
    }
}

fn main() -> jobwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut decoder = ProgressDecoder::new(
        Box::new(StdoutSink),
        Box::new(JsonLinesProgress::new(std::io::stderr())),
    );

    let mut stdin = std::io::stdin().lock();
    let mut buf = [0u8; 4096];
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => decoder.deliver(&buf[..n])?,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    decoder.close()
}
