//! Collecting the server's answer to an upload.

use crate::headers::HeaderMap;

/// Receives the pieces of a response as a transport decodes them.
pub trait ResponseSink {
    /// Records the final status code. Interim (1xx) responses are never
    /// reported.
    fn status(&mut self, code: u16);
    fn header(&mut self, name: &str, value: &str);
    /// Appends body bytes, already stripped of any transfer framing.
    fn payload(&mut self, bytes: &[u8]);
}

/// The completed response to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    payload: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, payload: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            payload,
        }
    }

    /// HTTP status code (e.g. 200, 404).
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A response under construction.
///
/// The transport fills it in while the session drives the event loop. Once
/// the transport marks it complete it is frozen into a [`Response`].
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    status: Option<u16>,
    headers: HeaderMap,
    payload: Vec<u8>,
    complete: bool,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the response as fully received. Later sink calls are ignored.
    pub fn complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status
    }

    /// The number of payload bytes received so far.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Moves the collected pieces out into a [`Response`], leaving the
    /// accumulator empty. A transport that never reported a status yields 0.
    pub fn finish(&mut self) -> Response {
        let taken = std::mem::take(self);
        Response::new(taken.status.unwrap_or_default(), taken.headers, taken.payload)
    }
}

impl ResponseSink for ResponseAccumulator {
    fn status(&mut self, code: u16) {
        if !self.complete {
            self.status = Some(code);
        }
    }

    fn header(&mut self, name: &str, value: &str) {
        if !self.complete {
            self.headers.append(name, value);
        }
    }

    fn payload(&mut self, bytes: &[u8]) {
        if !self.complete {
            self.payload.extend_from_slice(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_freezes() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.status(201);
        accumulator.header("Location", "/objects/1");
        accumulator.payload(b"{\"id\":");
        accumulator.payload(b"1}");
        assert_eq!(accumulator.payload_len(), 8);
        accumulator.complete();
        accumulator.payload(b"ignored");

        let response = accumulator.finish();
        assert_eq!(response.status(), 201);
        assert!(response.is_success());
        assert_eq!(response.header("location"), Some("/objects/1"));
        assert_eq!(response.text(), "{\"id\":1}");
        assert!(!accumulator.is_complete());
    }

    #[test]
    fn missing_status_is_zero() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.complete();
        assert_eq!(accumulator.finish().status(), 0);
    }
}
