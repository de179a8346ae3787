//! Request head serialization and chunk framing.

use crate::headers::HeaderMap;
use std::io::Write;

/// The terminating zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Serializes a request head announcing a chunked body.
///
/// `host` is used unless `headers` carries its own `host` field.
pub fn request_head(
    method: &str,
    target: &str,
    host: &str,
    user_agent: &str,
    headers: &HeaderMap,
) -> Vec<u8> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(method.as_bytes());
    head.push(b' ');
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    if !headers.contains("host") {
        push_field(&mut head, "host", host);
    }
    if !user_agent.is_empty() && !headers.contains("user-agent") {
        push_field(&mut head, "user-agent", user_agent);
    }
    for (name, value) in headers.iter() {
        push_field(&mut head, name, value);
    }
    push_field(&mut head, "transfer-encoding", "chunked");
    head.extend_from_slice(b"\r\n");
    head
}

fn push_field(head: &mut Vec<u8>, name: &str, value: &str) {
    head.extend_from_slice(name.as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value.as_bytes());
    head.extend_from_slice(b"\r\n");
}

/// Appends `data` to `out` as one chunk. Empty data would terminate the body,
/// so it produces nothing.
pub fn chunk(data: &[u8], out: &mut Vec<u8>) {
    if data.is_empty() {
        return;
    }
    // Writing into a Vec cannot fail.
    let _ = write!(out, "{:x}\r\n", data.len());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_announces_chunked_body() {
        let headers: HeaderMap = [("Content-Type", "text/plain")].into_iter().collect();
        let head = request_head("POST", "/upload?x=1", "example.com:8080", "agent/1", &headers);
        assert_eq!(
            std::str::from_utf8(&head).unwrap(),
            "POST /upload?x=1 HTTP/1.1\r\n\
             host: example.com:8080\r\n\
             user-agent: agent/1\r\n\
             Content-Type: text/plain\r\n\
             transfer-encoding: chunked\r\n\
             \r\n"
        );
    }

    #[test]
    fn caller_host_wins() {
        let headers: HeaderMap = [("Host", "virtual.test")].into_iter().collect();
        let head = request_head("PUT", "/", "10.0.0.1", "", &headers);
        let head = String::from_utf8(head).unwrap();
        assert!(head.contains("Host: virtual.test\r\n"));
        assert!(!head.contains("host: 10.0.0.1"));
        assert!(!head.contains("user-agent"));
    }

    #[test]
    fn chunk_framing() {
        let mut out = Vec::new();
        chunk(b"hello world, this is 30 bytes!", &mut out);
        assert_eq!(out, b"1e\r\nhello world, this is 30 bytes!\r\n");

        out.clear();
        chunk(b"", &mut out);
        assert!(out.is_empty());
    }
}
