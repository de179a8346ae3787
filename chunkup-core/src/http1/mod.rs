//! Chunked uploads over HTTP/1.1 on a plain TCP connection.
//!
//! [`Http1Transfer`] is a non-blocking state machine around a tokio
//! [`TcpStream`]: every increment writes what the socket accepts and reads what
//! has arrived, using only `try_write` and `try_read`. [`TokioDriver`] opens
//! the connection and waits on socket readiness between increments.
//!
//! TLS is not supported; destinations must use `http`.

mod driver;
pub mod encode;
pub mod parse;

pub use driver::TokioDriver;

use crate::{
    error::{ConfigError, TransferError},
    factory::HandleFactory,
    transfer::{Pull, RequestConfig, Transfer, TransferIo},
};
use parse::ResponseParser;
use std::{io, time::Duration};
use tokio::{io::Interest, net::TcpStream};
use url::Position;

/// The most body bytes pulled into one chunk.
pub const DEFAULT_MAX_CHUNK: usize = 64 * 1024;
const READ_SIZE: usize = 16 * 1024;
/// Bounds the socket operations of one increment so that a fast peer cannot
/// keep a single increment running indefinitely.
const MAX_STEPS: usize = 8;

#[derive(Debug)]
enum Connection {
    Pending,
    Open(TcpStream),
    Closed,
}

/// One chunked upload over one TCP connection.
#[derive(Debug)]
pub struct Http1Transfer {
    authority: Option<String>,
    connection: Connection,
    head: Option<Vec<u8>>,
    outgoing: Vec<u8>,
    written: usize,
    scratch: Vec<u8>,
    body_ended: bool,
    paused: bool,
    parser: ResponseParser,
}

impl Http1Transfer {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            authority: None,
            connection: Connection::Pending,
            head: None,
            outgoing: Vec::new(),
            written: 0,
            scratch: vec![0; max_chunk.max(1)],
            body_ended: false,
            paused: false,
            parser: ResponseParser::new(),
        }
    }

    /// The `host:port` to connect to, while the connection has not been
    /// opened yet.
    pub fn pending_connect(&self) -> Option<&str> {
        match self.connection {
            Connection::Pending => self.authority.as_deref(),
            _ => None,
        }
    }

    /// Installs the connection opened by the driver.
    pub fn attach(&mut self, stream: TcpStream) {
        self.connection = Connection::Open(stream);
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        match &self.connection {
            Connection::Open(stream) => Some(stream),
            _ => None,
        }
    }

    /// What the transfer is waiting for. Writability only matters while
    /// there is output queued or body bytes may still be pulled.
    pub fn interest(&self) -> Interest {
        let has_output = self.written < self.outgoing.len() || self.head.is_some();
        if has_output || (!self.body_ended && !self.paused) {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Queues the next piece of output. Returns false when there is nothing
    /// to send right now.
    fn refill(&mut self, io: &mut TransferIo<'_>) -> bool {
        self.outgoing.clear();
        self.written = 0;
        if let Some(head) = self.head.take() {
            self.outgoing = head;
            return true;
        }
        if self.body_ended {
            return false;
        }
        match io.pull(&mut self.scratch) {
            Pull::Data(n) => {
                encode::chunk(&self.scratch[..n], &mut self.outgoing);
                n > 0
            }
            Pull::Pause => {
                self.paused = true;
                false
            }
            Pull::End => {
                tracing::trace!("queued last chunk");
                self.outgoing.extend_from_slice(encode::LAST_CHUNK);
                self.body_ended = true;
                true
            }
        }
    }

    fn send(&mut self, io: &mut TransferIo<'_>) -> Result<(), TransferError> {
        for _ in 0..MAX_STEPS {
            if self.written == self.outgoing.len() && !self.refill(io) {
                return Ok(());
            }
            let Connection::Open(stream) = &self.connection else {
                return Ok(());
            };
            match stream.try_write(&self.outgoing[self.written..]) {
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn receive(&mut self, io: &mut TransferIo<'_>) -> Result<(), TransferError> {
        let mut buf = [0u8; READ_SIZE];
        for _ in 0..MAX_STEPS {
            let Connection::Open(stream) = &self.connection else {
                return Ok(());
            };
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    tracing::trace!("peer closed the connection");
                    self.connection = Connection::Closed;
                    return self.parser.finish();
                }
                Ok(n) => {
                    self.parser.feed(&buf[..n], io)?;
                    if self.parser.is_complete() {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Default for Http1Transfer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK)
    }
}

impl Transfer for Http1Transfer {
    fn configure(&mut self, request: &RequestConfig) -> Result<(), ConfigError> {
        let url = request.destination();
        if url.scheme() != "http" {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or(ConfigError::MissingHost)?;
        let port = url
            .port_or_known_default()
            .ok_or(ConfigError::MissingHost)?;

        let headers = request.headers();
        for framing in ["content-length", "transfer-encoding"] {
            if headers.contains(framing) {
                return Err(ConfigError::Rejected(format!(
                    "{framing} conflicts with chunked transfer encoding"
                )));
            }
        }

        let target = match &url[Position::BeforePath..Position::AfterQuery] {
            "" => "/",
            target => target,
        };
        let host_header = &url[Position::BeforeHost..Position::AfterPort];
        self.head = Some(encode::request_head(
            request.method(),
            target,
            host_header,
            request.user_agent(),
            headers,
        ));
        self.authority = Some(format!("{host}:{port}"));
        Ok(())
    }

    fn perform(&mut self, io: &mut TransferIo<'_>) -> Result<usize, TransferError> {
        if self.authority.is_none() {
            return Err(TransferError::NotConfigured);
        }
        if self.parser.is_complete() {
            return Ok(0);
        }
        match self.connection {
            Connection::Pending => return Ok(1),
            Connection::Closed => return Err(TransferError::ConnectionClosed),
            Connection::Open(_) => {}
        }

        self.paused = false;
        self.send(io)?;
        self.receive(io)?;

        if self.parser.is_complete() {
            io.complete();
            // The request is not reused, so neither is the connection.
            self.connection = Connection::Closed;
            return Ok(0);
        }
        Ok(1)
    }

    fn reset(&mut self) {
        let max_chunk = self.scratch.len();
        *self = Self::new(max_chunk);
    }
}

/// Creates [`Http1Transfer`]s and [`TokioDriver`]s.
#[derive(Debug, Clone)]
pub struct Http1Factory {
    pub connect_timeout: Duration,
    pub max_chunk: usize,
}

impl Default for Http1Factory {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_chunk: DEFAULT_MAX_CHUNK,
        }
    }
}

impl HandleFactory for Http1Factory {
    type Transfer = Http1Transfer;
    type Driver = TokioDriver;

    fn create_handle(&self) -> Http1Transfer {
        Http1Transfer::new(self.max_chunk)
    }

    fn create_driver(&self) -> TokioDriver {
        TokioDriver::new(self.connect_timeout)
    }

    fn cleanup_handle(&self, handle: Http1Transfer) {
        drop(handle);
    }

    fn cleanup_driver(&self, driver: TokioDriver) {
        drop(driver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderMap;

    fn configure(destination: &str, headers: HeaderMap) -> Result<Http1Transfer, ConfigError> {
        let request = RequestConfig::new(destination, "agent/1")?.with_headers(headers)?;
        let mut transfer = Http1Transfer::default();
        transfer.configure(&request)?;
        Ok(transfer)
    }

    #[test]
    fn configure_builds_head() {
        let transfer = configure("http://example.com:8080/a/b?c=d", HeaderMap::new()).unwrap();
        assert_eq!(transfer.pending_connect(), Some("example.com:8080"));
        let head = String::from_utf8(transfer.head.clone().unwrap()).unwrap();
        assert!(head.starts_with("POST /a/b?c=d HTTP/1.1\r\nhost: example.com:8080\r\n"));
        assert!(head.ends_with("transfer-encoding: chunked\r\n\r\n"));
    }

    #[test]
    fn default_port_and_path() {
        let transfer = configure("http://example.com", HeaderMap::new()).unwrap();
        assert_eq!(transfer.pending_connect(), Some("example.com:80"));
        let head = String::from_utf8(transfer.head.clone().unwrap()).unwrap();
        assert!(head.starts_with("POST / HTTP/1.1\r\nhost: example.com\r\n"));
    }

    #[test]
    fn rejects_conflicting_options() {
        assert_eq!(
            configure("https://example.com/", HeaderMap::new()).unwrap_err(),
            ConfigError::UnsupportedScheme("https".into())
        );
        let headers: HeaderMap = [("Content-Length", "10")].into_iter().collect();
        assert!(matches!(
            configure("http://example.com/", headers),
            Err(ConfigError::Rejected(_))
        ));
    }

    #[test]
    fn interest_tracks_output() {
        let mut transfer = configure("http://example.com/", HeaderMap::new()).unwrap();
        assert!(transfer.interest().is_writable());
        transfer.head = None;
        transfer.paused = true;
        assert!(!transfer.interest().is_writable());
        assert!(transfer.interest().is_readable());
    }

    #[test]
    fn reset_forgets_configuration() {
        let mut transfer = configure("http://example.com/", HeaderMap::new()).unwrap();
        transfer.reset();
        assert_eq!(transfer.pending_connect(), None);
        assert!(transfer.head.is_none());
    }
}
