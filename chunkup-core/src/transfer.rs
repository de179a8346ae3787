//! The [`Transfer`] trait and the context a session hands to it.

use crate::{
    buffer::DoubleBuffer,
    error::ConfigError,
    headers::{is_token_byte, HeaderMap},
    response::{ResponseAccumulator, ResponseSink},
};
use url::Url;

/// Everything a transport needs to start an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfig {
    destination: Url,
    method: String,
    headers: HeaderMap,
    user_agent: String,
}

impl RequestConfig {
    /// Parses `destination` and builds a `POST` request with no extra headers.
    pub fn new(destination: &str, user_agent: impl Into<String>) -> Result<Self, ConfigError> {
        let destination = Url::parse(destination)?;
        Self::from_url(destination, user_agent)
    }

    pub fn from_url(destination: Url, user_agent: impl Into<String>) -> Result<Self, ConfigError> {
        if destination.cannot_be_a_base() || destination.host_str().is_none() {
            return Err(ConfigError::MissingHost);
        }
        Ok(Self {
            destination,
            method: "POST".to_string(),
            headers: HeaderMap::new(),
            user_agent: user_agent.into(),
        })
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Result<Self, ConfigError> {
        let method = method.into();
        if method.is_empty() || !method.bytes().all(is_token_byte) {
            return Err(ConfigError::InvalidMethod(method));
        }
        self.method = method;
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Result<Self, ConfigError> {
        headers.validate()?;
        self.headers = headers;
        Ok(self)
    }

    pub fn destination(&self) -> &Url {
        &self.destination
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

/// The answer to a transport's request for more body bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// This many bytes were copied into the transport's buffer.
    Data(usize),
    /// The current buffer is exhausted but the body is not finished. The
    /// transport should ask again on a later increment.
    Pause,
    /// The body is finished. This is the zero-length read that terminates a
    /// chunked body; it is only answered once the session is closing.
    End,
}

/// A single network transfer driven one increment at a time.
///
/// A transport never calls back into the session on its own. Instead the
/// session passes a fresh [`TransferIo`] into every [`perform`](Self::perform)
/// call, and the transport pulls body bytes and reports response pieces
/// through it. Nothing the transport holds refers to the session, so a
/// session can be moved freely between increments.
pub trait Transfer: Send + 'static {
    /// Applies the destination, method, and headers. The body is always sent
    /// with chunked transfer encoding, so a transport should reject options
    /// that contradict it.
    fn configure(&mut self, request: &RequestConfig) -> Result<(), ConfigError>;

    /// Performs one bounded increment of work: writes whatever output the
    /// connection accepts without blocking, pulling body bytes from `io`
    /// as needed, and reads whatever response bytes have arrived.
    ///
    /// Returns the number of transfers that still have outstanding work,
    /// which is 0 once the response is complete or the transfer has ended.
    fn perform(&mut self, io: &mut TransferIo<'_>) -> Result<usize, crate::TransferError>;

    /// Returns the handle to its unconfigured state so it can be reused.
    fn reset(&mut self);
}

/// The session's side of one [`Transfer::perform`] increment.
pub struct TransferIo<'a> {
    buffer: &'a mut DoubleBuffer,
    response: &'a mut ResponseAccumulator,
    closing: bool,
    body_closed: &'a mut bool,
    paused: &'a mut bool,
}

impl<'a> TransferIo<'a> {
    pub(crate) fn new(
        buffer: &'a mut DoubleBuffer,
        response: &'a mut ResponseAccumulator,
        closing: bool,
        body_closed: &'a mut bool,
        paused: &'a mut bool,
    ) -> Self {
        Self {
            buffer,
            response,
            closing,
            body_closed,
            paused,
        }
    }

    /// Serves up to `out.len()` body bytes from the session's current buffer.
    pub fn pull(&mut self, out: &mut [u8]) -> Pull {
        if !self.buffer.is_drained() {
            *self.paused = false;
            return Pull::Data(self.buffer.read_into(out));
        }
        if self.closing {
            *self.body_closed = true;
            Pull::End
        } else {
            *self.paused = true;
            Pull::Pause
        }
    }

    /// Marks the response as fully received.
    pub fn complete(&mut self) {
        self.response.complete();
    }
}

impl ResponseSink for TransferIo<'_> {
    fn status(&mut self, code: u16) {
        self.response.status(code);
    }

    fn header(&mut self, name: &str, value: &str) {
        self.response.header(name, value);
    }

    fn payload(&mut self, bytes: &[u8]) {
        self.response.payload(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let request = RequestConfig::new("http://example.com/upload?x=1", "agent/1").unwrap();
        assert_eq!(request.method(), "POST");
        assert_eq!(request.user_agent(), "agent/1");
        assert!(request.headers().is_empty());
        assert_eq!(request.destination().path(), "/upload");
    }

    #[test]
    fn request_rejects_bad_input() {
        assert!(matches!(
            RequestConfig::new("not a url", "a"),
            Err(ConfigError::InvalidDestination(_))
        ));
        assert_eq!(
            RequestConfig::new("mailto:someone@example.com", "a"),
            Err(ConfigError::MissingHost)
        );
        let request = RequestConfig::new("http://example.com", "a").unwrap();
        assert_eq!(
            request.clone().with_method("PO ST"),
            Err(ConfigError::InvalidMethod("PO ST".into()))
        );
        let headers: HeaderMap = [("bad header", "v")].into_iter().collect();
        assert!(request.with_headers(headers).is_err());
    }

    #[test]
    fn pull_pauses_until_closing() {
        let mut buffer = DoubleBuffer::default();
        buffer.swap(b"abc".to_vec());
        let mut response = ResponseAccumulator::new();
        let (mut body_closed, mut paused) = (false, false);
        let mut out = [0u8; 2];

        let mut io = TransferIo::new(&mut buffer, &mut response, false, &mut body_closed, &mut paused);
        assert_eq!(io.pull(&mut out), Pull::Data(2));
        assert_eq!(io.pull(&mut out), Pull::Data(1));
        assert_eq!(io.pull(&mut out), Pull::Pause);
        assert!(paused);
        assert!(!body_closed);

        let mut io = TransferIo::new(&mut buffer, &mut response, true, &mut body_closed, &mut paused);
        assert_eq!(io.pull(&mut out), Pull::End);
        assert!(body_closed);
    }
}
