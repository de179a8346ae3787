//! Incremental HTTP/1.1 response parsing.
//!
//! Bytes arrive in whatever pieces the socket hands out. The parser buffers
//! the response head until it is complete, then streams the body to a
//! [`ResponseSink`] as soon as it is decoded.

use crate::{error::TransferError, headers::is_token_byte, response::ResponseSink};
use nom::{
    bytes::complete::{tag, take_until, take_while, take_while1, take_while_m_n},
    character::{complete::char, is_digit, is_hex_digit},
    branch::alt,
    combinator::{eof, map_res, opt, rest},
    multi::many0,
    sequence::{pair, preceded, terminated},
    IResult,
};

/// Responses with longer heads are rejected.
const MAX_HEAD_LEN: usize = 64 * 1024;
/// Chunk-size and trailer lines longer than this are rejected.
const MAX_LINE_LEN: usize = 4 * 1024;

#[derive(Debug, PartialEq, Eq)]
struct Head<'a> {
    status: u16,
    fields: Vec<(&'a [u8], &'a [u8])>,
}

fn status_line(input: &[u8]) -> IResult<&[u8], u16> {
    let (input, _) = tag("HTTP/1.")(input)?;
    let (input, _) = take_while_m_n(1, 1, is_digit)(input)?;
    let (input, _) = char(' ')(input)?;
    let (input, code) = map_res(take_while_m_n(3, 3, is_digit), parse_decimal)(input)?;
    // The reason phrase is optional, but the code must stand alone.
    let (input, _) = alt((
        tag("\r\n"),
        terminated(preceded(char(' '), take_until("\r\n")), tag("\r\n")),
    ))(input)?;
    Ok((input, code))
}

fn header_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, name) = take_while1(is_token_byte)(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = take_while(is_blank)(input)?;
    let (input, value) = terminated(take_until("\r\n"), tag("\r\n"))(input)?;
    Ok((input, (name, trim_end(value))))
}

fn response_head(input: &[u8]) -> IResult<&[u8], Head<'_>> {
    let (input, (status, fields)) =
        terminated(pair(status_line, many0(header_line)), tag("\r\n"))(input)?;
    Ok((input, Head { status, fields }))
}

/// `1a;name=value` yields 26. Extensions are ignored.
fn chunk_size_line(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, size) = map_res(take_while1(is_hex_digit), parse_hex)(input)?;
    let (input, _) = take_while(is_blank)(input)?;
    let (input, _) = opt(preceded(char(';'), rest))(input)?;
    let (input, _) = eof(input)?;
    Ok((input, size))
}

fn is_blank(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

fn parse_decimal(digits: &[u8]) -> Result<u16, std::num::ParseIntError> {
    String::from_utf8_lossy(digits).parse()
}

fn parse_hex(digits: &[u8]) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(&String::from_utf8_lossy(digits), 16)
}

fn trim_end(value: &[u8]) -> &[u8] {
    let end = value
        .iter()
        .rposition(|&b| !is_blank(b))
        .map_or(0, |i| i + 1);
    &value[..end]
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|i| i + 4)
}

fn malformed(what: impl Into<String>) -> TransferError {
    TransferError::Protocol(what.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

/// Decodes a chunked body one piece at a time.
#[derive(Debug)]
struct ChunkedDecoder {
    state: ChunkState,
    line: Vec<u8>,
}

impl ChunkedDecoder {
    fn new() -> Self {
        Self {
            state: ChunkState::Size,
            line: Vec::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    fn decode(&mut self, mut data: &[u8], sink: &mut impl ResponseSink) -> Result<(), TransferError> {
        while !data.is_empty() {
            match self.state {
                ChunkState::Data(remaining) => {
                    let count = (data.len() as u64).min(remaining) as usize;
                    sink.payload(&data[..count]);
                    data = &data[count..];
                    let left = remaining - count as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                }
                ChunkState::Done => break,
                state => {
                    let Some(line) = self.take_line(&mut data)? else {
                        break;
                    };
                    self.state = match state {
                        ChunkState::Size => match chunk_size_line(&line) {
                            Ok((_, 0)) => ChunkState::Trailer,
                            Ok((_, size)) => ChunkState::Data(size),
                            Err(_) => return Err(malformed("invalid chunk size")),
                        },
                        ChunkState::DataEnd if line.is_empty() => ChunkState::Size,
                        ChunkState::DataEnd => return Err(malformed("chunk data overran its size")),
                        // Trailer fields are read and dropped.
                        _ if line.is_empty() => ChunkState::Done,
                        _ => ChunkState::Trailer,
                    };
                }
            }
        }
        Ok(())
    }

    /// Removes one CRLF-terminated line from the front of `data`. Partial
    /// lines are kept until the rest arrives.
    fn take_line(&mut self, data: &mut &[u8]) -> Result<Option<Vec<u8>>, TransferError> {
        match data.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                self.line.extend_from_slice(&data[..newline]);
                *data = &data[newline + 1..];
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            None => {
                self.line.extend_from_slice(data);
                *data = &[];
                if self.line.len() > MAX_LINE_LEN {
                    return Err(malformed("chunk line too long"));
                }
                Ok(None)
            }
        }
    }
}

#[derive(Debug)]
enum Body {
    Length(u64),
    Chunked(ChunkedDecoder),
    UntilClose,
}

#[derive(Debug)]
enum State {
    Head,
    Body(Body),
    Done,
}

/// Parses one response, skipping any interim 1xx responses before it.
#[derive(Debug)]
pub struct ResponseParser {
    state: State,
    pending: Vec<u8>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: State::Head,
            pending: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Whether any part of the final response has been parsed yet.
    pub fn has_started(&self) -> bool {
        !matches!(self.state, State::Head) || !self.pending.is_empty()
    }

    /// Feeds the next bytes from the connection.
    pub fn feed(&mut self, data: &[u8], sink: &mut impl ResponseSink) -> Result<(), TransferError> {
        match &mut self.state {
            State::Head => {
                self.pending.extend_from_slice(data);
                self.parse_heads(sink)
            }
            State::Body(body) => {
                if Self::feed_body(body, data, sink)? {
                    self.state = State::Done;
                }
                Ok(())
            }
            State::Done => Ok(()),
        }
    }

    /// Tells the parser the peer closed the connection. Only a body delimited
    /// by the close itself may end here.
    pub fn finish(&mut self) -> Result<(), TransferError> {
        match self.state {
            State::Done => Ok(()),
            State::Body(Body::UntilClose) => {
                self.state = State::Done;
                Ok(())
            }
            _ if self.has_started() => Err(TransferError::Truncated),
            _ => Err(TransferError::ConnectionClosed),
        }
    }

    fn parse_heads(&mut self, sink: &mut impl ResponseSink) -> Result<(), TransferError> {
        loop {
            let Some(end) = find_head_end(&self.pending) else {
                if self.pending.len() > MAX_HEAD_LEN {
                    return Err(malformed("response head too long"));
                }
                return Ok(());
            };

            let head_bytes: Vec<u8> = self.pending.drain(..end).collect();
            let head = match response_head(&head_bytes) {
                Ok((_, head)) => head,
                Err(_) => return Err(malformed("invalid status line or header field")),
            };

            if (100..200).contains(&head.status) {
                tracing::trace!(status = head.status, "skipping interim response");
                continue;
            }

            sink.status(head.status);
            let mut chunked = false;
            let mut length = None;
            for (name, value) in &head.fields {
                let name = String::from_utf8_lossy(name);
                let value = String::from_utf8_lossy(value);
                if name.eq_ignore_ascii_case("transfer-encoding") {
                    chunked = value
                        .rsplit(',')
                        .next()
                        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
                } else if name.eq_ignore_ascii_case("content-length") {
                    let parsed = value
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| malformed("invalid content-length"))?;
                    length = Some(parsed);
                }
                sink.header(&name, &value);
            }

            let body = if matches!(head.status, 204 | 304) {
                None
            } else if chunked {
                Some(Body::Chunked(ChunkedDecoder::new()))
            } else {
                match length {
                    Some(0) => None,
                    Some(length) => Some(Body::Length(length)),
                    None => Some(Body::UntilClose),
                }
            };

            let Some(mut body) = body else {
                self.state = State::Done;
                return Ok(());
            };
            let leftover = std::mem::take(&mut self.pending);
            self.state = if Self::feed_body(&mut body, &leftover, sink)? {
                State::Done
            } else {
                State::Body(body)
            };
            return Ok(());
        }
    }

    /// Returns whether the body is complete.
    fn feed_body(
        body: &mut Body,
        data: &[u8],
        sink: &mut impl ResponseSink,
    ) -> Result<bool, TransferError> {
        match body {
            Body::Length(remaining) => {
                let count = (data.len() as u64).min(*remaining) as usize;
                sink.payload(&data[..count]);
                *remaining -= count as u64;
                Ok(*remaining == 0)
            }
            Body::Chunked(decoder) => {
                decoder.decode(data, sink)?;
                Ok(decoder.is_done())
            }
            Body::UntilClose => {
                sink.payload(data);
                Ok(false)
            }
        }
    }
}
