//! HTTP/1.1 chunked-transfer upload writer.
//!
//! Streams captured bytes to a remote storage endpoint as they arrive,
//! without knowing the total length up front. Each delivered chunk becomes
//! exactly one wire-level chunk (hex length, CRLF, bytes, CRLF), so caller
//! chunk boundaries are preserved. `close` terminates the stream with the
//! single `0\r\n\r\n` terminator, reads the response, and fails on any
//! status outside the 2xx range.
//!
//! Speaks plain HTTP over TCP and HTTPS via rustls.
//!
//! # Example
//!
//! ```no_run
//! use jobwire::sink::ByteSink;
//! use jobwire::upload::ChunkedUpload;
//!
//! # fn main() -> jobwire::Result<()> {
//! let mut upload = ChunkedUpload::builder("https://storage.example/api/datasets/d41/content")
//!     .header("Authorization", "Bearer t0k3n")
//!     .open()?;
//! upload.deliver(b"captured output")?;
//! upload.close()?;
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tracing::{debug, trace, warn};
use url::{Position, Url};

use crate::error::{JobwireError, Result};
use crate::sink::ByteSink;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-operation read/write timeout on the connection.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection abstraction over plain TCP and TLS.
enum Transport {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Transport {
    fn socket(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            Transport::Tls(stream) => &stream.sock,
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

/// Configuration for a chunked upload connection.
pub struct ChunkedUploadBuilder {
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ChunkedUploadBuilder {
    /// Override the request method (default `PUT`).
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Add a custom request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Override the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-operation I/O timeout.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Connect and send the request head.
    pub fn open(self) -> Result<ChunkedUpload> {
        let url = Url::parse(&self.url)
            .map_err(|err| JobwireError::Endpoint(format!("bad upload URL {}: {err}", self.url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| JobwireError::Endpoint(format!("upload URL {url} has no host")))?
            .to_string();
        let port = url.port_or_known_default().ok_or_else(|| {
            JobwireError::Endpoint(format!("upload URL {url} has no usable port"))
        })?;

        let addr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                JobwireError::Endpoint(format!("upload host {host}:{port} did not resolve"))
            })?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;

        let mut transport = match url.scheme() {
            "http" => Transport::Plain(stream),
            "https" => {
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                let config = rustls::ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                let server_name = ServerName::try_from(host.clone()).map_err(|err| {
                    JobwireError::Endpoint(format!("bad TLS server name {host}: {err}"))
                })?;
                let conn =
                    rustls::ClientConnection::new(Arc::new(config), server_name).map_err(|err| {
                        JobwireError::Endpoint(format!("TLS setup for {host} failed: {err}"))
                    })?;
                Transport::Tls(Box::new(rustls::StreamOwned::new(conn, stream)))
            }
            other => {
                return Err(JobwireError::Endpoint(format!(
                    "unsupported upload scheme {other}"
                )))
            }
        };

        // Host header carries the port only when it is not the default.
        let host_header = if url.port().is_some() {
            format!("{host}:{port}")
        } else {
            host
        };
        let target = &url[Position::BeforePath..Position::AfterQuery];

        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, target);
        head.push_str(&format!("Host: {host_header}\r\n"));
        head.push_str("Transfer-Encoding: chunked\r\n");
        head.push_str("Connection: close\r\n");
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");

        transport.write_all(head.as_bytes())?;
        transport.flush()?;
        debug!(url = %url, method = %self.method, "chunked upload started");

        Ok(ChunkedUpload {
            transport,
            url,
            closed: false,
        })
    }
}

/// Writer streaming a request body as chunked transfer encoding.
pub struct ChunkedUpload {
    transport: Transport,
    url: Url,
    closed: bool,
}

impl ChunkedUpload {
    /// Start configuring an upload to `url`.
    pub fn builder(url: impl Into<String>) -> ChunkedUploadBuilder {
        ChunkedUploadBuilder {
            url: url.into(),
            method: "PUT".to_string(),
            headers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Send one wire chunk: hex length, CRLF, data, CRLF.
    fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        write!(self.transport, "{:X}\r\n", data.len())?;
        self.transport.write_all(data)?;
        self.transport.write_all(b"\r\n")?;
        Ok(())
    }

    /// Tear the connection down without the terminator (write failed).
    fn abort(&mut self) {
        self.closed = true;
        let _ = self.transport.socket().shutdown(Shutdown::Both);
    }

    /// Send the terminator, read the response, check the status.
    fn finish(&mut self) -> Result<()> {
        self.transport.write_all(b"0\r\n\r\n")?;
        self.transport.flush()?;

        let mut response = Vec::with_capacity(1024);
        let mut tmp = [0u8; 1024];
        loop {
            match self.transport.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&tmp[..n]);
                    if find_header_end(&response).is_some() {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                // A server that closes without close_notify still gave us
                // its status line; use what arrived.
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
        }

        let status = parse_status(&response)?;
        debug!(url = %self.url, status, "chunked upload finished");
        if !(200..300).contains(&status) {
            return Err(JobwireError::HttpStatus { status });
        }
        Ok(())
    }
}

impl ByteSink for ChunkedUpload {
    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(JobwireError::Closed);
        }
        // A zero-length chunk is the wire terminator; only close() may
        // send it.
        if bytes.is_empty() {
            return Ok(());
        }
        trace!(len = bytes.len(), "upload chunk");
        if let Err(err) = self.write_chunk(bytes) {
            // Release the socket before the error propagates.
            warn!(url = %self.url, %err, "upload write failed");
            self.abort();
            return Err(err.into());
        }
        Ok(())
    }

    /// Idempotent: the terminator is sent exactly once; later calls are
    /// no-ops even if the first close failed.
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finish()
    }
}

/// Find the end of the HTTP response head.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Parse the numeric status out of the response status line.
fn parse_status(response: &[u8]) -> Result<u16> {
    let line_end = response
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(response.len());
    let line = String::from_utf8_lossy(&response[..line_end]);
    line.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            JobwireError::Protocol(format!("malformed upload response: {:?}", line.trim_end()))
        })
}
