//! Per-message parse record.
//!
//! An [`HttpMessage`] carries everything the analyzer needs to resume parsing a request or
//! a response after any byte, and every byte offset the pipelines rely on once the headers
//! are complete. All offsets are absolute positions in the owning [`Buffer`].
//!
//! # Offset bookkeeping
//!
//! In-place edits move bytes around, so every cached offset located after an edit must be
//! moved by the edit delta. This is the complete list of offsets kept in a message:
//!
//! - `som`, `sol`, `eol`, `col`, `sov`, `eoh`
//! - the start line spans (method, URI and version, or version, code and reason)
//! - the recorded error position, if any
//!
//! [`HttpMessage::shift`] moves all of them at once, and [`HttpMessage::replace`] /
//! [`HttpMessage::insert_line`] pair a buffer edit with the matching shift. Header lengths
//! kept in the [`HeaderIndex`](crate::protocol::HeaderIndex) are the caller's business.

use crate::protocol::{Buffer, EditError};
use crate::utils;

/// Parser position, one variant per resumption point.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseState {
    /// request: before the start line, empty lines allowed
    RqBefore = 0,
    /// request: CR seen before the start line
    RqBeforeCr,
    RqMeth,
    RqMethSp,
    RqUri,
    RqUriSp,
    RqVer,
    /// request line terminator
    RqLineEnd,

    /// response: before the start line, empty lines allowed
    RpBefore,
    /// response: CR seen before the start line
    RpBeforeCr,
    RpVer,
    RpVerSp,
    RpCode,
    RpCodeSp,
    RpReason,
    /// status line terminator
    RpLineEnd,

    /// first byte of a header line, or the final CRLF
    HdrFirst,
    HdrName,
    HdrCol,
    /// SP/HT before the value
    HdrL1Sp,
    /// LF expected before the value
    HdrL1Lf,
    /// fold or new header, before the value
    HdrL1Lws,
    HdrVal,
    /// LF expected after the value
    HdrL2Lf,
    /// fold or new header, after the value
    HdrL2Lws,

    /// LF of the empty line ending the headers
    LastLf,
    /// headers complete
    Body,
    Error,
}

/// A field of the start line, as an absolute offset and a length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub off: usize,
    pub len: usize,
}

impl Span {
    pub const fn new(off: usize, len: usize) -> Self {
        Self { off, len }
    }

    #[inline]
    pub const fn end(&self) -> usize {
        self.off + self.len
    }

    #[inline]
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.off..self.end()]
    }

    fn shift(&mut self, pivot: usize, delta: isize) {
        if self.off >= pivot {
            self.off = utils::shift(self.off, delta);
        }
    }
}

/// Fields of a request line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestLine {
    /// line length, terminator excluded
    pub len: usize,
    pub method: Span,
    pub uri: Span,
    /// empty for HTTP/0.9 requests
    pub version: Span,
}

impl RequestLine {
    /// Returns `true` for an `HTTP/1.1`-shaped version.
    pub fn is_http11(&self, bytes: &[u8]) -> bool {
        self.version.len == 8 && bytes[self.version.off + 7] == b'1'
    }
}

/// Fields of a status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusLine {
    /// line length, terminator excluded
    pub len: usize,
    pub version: Span,
    pub code: Span,
    /// empty when the server sends no reason phrase
    pub reason: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartLine {
    Request(RequestLine),
    Status(StatusLine),
}

impl StartLine {
    pub fn len(&self) -> usize {
        match self {
            StartLine::Request(rq) => rq.len,
            StartLine::Status(st) => st.len,
        }
    }

    fn shift(&mut self, pivot: usize, delta: isize) {
        match self {
            StartLine::Request(rq) => {
                rq.method.shift(pivot, delta);
                rq.uri.shift(pivot, delta);
                rq.version.shift(pivot, delta);
            }
            StartLine::Status(st) => {
                st.version.shift(pivot, delta);
                st.code.shift(pivot, delta);
                st.reason.shift(pivot, delta);
            }
        }
    }
}

/// How invalid bytes in header names are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrPos {
    /// reject the message
    Block,
    /// accept, the first offending offset is not recorded yet
    Pass,
    /// accepted, first offending byte at this offset
    At(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub state: ParseState,
    /// start of message
    pub som: usize,
    /// start of the line being parsed
    pub sol: usize,
    /// end of the line being parsed
    pub eol: usize,
    /// colon of the header being parsed
    pub col: usize,
    /// start of value of the header being parsed
    pub sov: usize,
    /// end of headers, the empty line
    pub eoh: usize,
    pub sl: StartLine,
    /// cached body length hint
    pub hdr_content_len: u64,
    pub err_pos: ErrPos,
}

impl HttpMessage {
    pub fn request() -> Self {
        Self::with_start(ParseState::RqBefore, StartLine::Request(RequestLine::default()))
    }

    pub fn response() -> Self {
        Self::with_start(ParseState::RpBefore, StartLine::Status(StatusLine::default()))
    }

    fn with_start(state: ParseState, sl: StartLine) -> Self {
        Self { state, som: 0, sol: 0, eol: 0, col: 0, sov: 0, eoh: 0, sl, hdr_content_len: 0, err_pos: ErrPos::Block }
    }

    /// Prepares the message for the response following an interim one, expected at `at`.
    pub fn restart_response(&mut self, at: usize) {
        let err_pos = match self.err_pos {
            ErrPos::Block => ErrPos::Block,
            ErrPos::Pass | ErrPos::At(_) => ErrPos::Pass,
        };
        *self = Self::response();
        self.som = at;
        self.sol = at;
        self.err_pos = err_pos;
    }

    /// Returns `true` once the headers are complete.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Body
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.state == ParseState::Error
    }

    /// Returns the request line, or an empty one for a response.
    pub fn rq(&self) -> RequestLine {
        match self.sl {
            StartLine::Request(rq) => rq,
            StartLine::Status(_) => RequestLine::default(),
        }
    }

    /// Returns the status line, or an empty one for a request.
    pub fn st(&self) -> StatusLine {
        match self.sl {
            StartLine::Status(st) => st,
            StartLine::Request(_) => StatusLine::default(),
        }
    }

    /// Moves every cached offset at or after `pivot` by `delta`.
    pub fn shift(&mut self, pivot: usize, delta: isize) {
        if delta == 0 {
            return;
        }

        for offset in [&mut self.som, &mut self.sol, &mut self.eol, &mut self.col, &mut self.sov, &mut self.eoh] {
            if *offset >= pivot {
                *offset = utils::shift(*offset, delta);
            }
        }

        self.sl.shift(pivot, delta);

        if let ErrPos::At(pos) = self.err_pos
            && pos >= pivot
        {
            self.err_pos = ErrPos::At(utils::shift(pos, delta));
        }
    }

    /// Replaces `start..end` in `buf` and shifts the offsets located after the edit.
    pub fn replace(&mut self, buf: &mut Buffer, start: usize, end: usize, text: &[u8]) -> Result<isize, EditError> {
        let delta = buf.replace(start, end, text)?;
        self.shift(end, delta);
        Ok(delta)
    }

    /// Inserts `text` CRLF at `pos` in `buf` and shifts the offsets located at or after `pos`.
    pub fn insert_line(&mut self, buf: &mut Buffer, pos: usize, text: &[u8]) -> Result<isize, EditError> {
        let delta = buf.insert_line(pos, text)?;
        self.shift(pos, delta);
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order() {
        assert_eq!(ParseState::RqBefore as u8, 0);
        assert_eq!(ParseState::RqLineEnd as u8, 7);
        assert_eq!(ParseState::RpBefore as u8, 8);
        assert_eq!(ParseState::HdrFirst as u8, 16);
        assert_eq!(ParseState::LastLf as u8, 25);
        assert_eq!(ParseState::Error as u8, 27);
    }

    #[test]
    fn test_shift_moves_offsets_after_pivot() {
        let mut msg = HttpMessage::request();
        msg.sl = StartLine::Request(RequestLine {
            len: 14,
            method: Span::new(0, 3),
            uri: Span::new(4, 1),
            version: Span::new(6, 8),
        });
        msg.eoh = 40;
        msg.sol = 20;
        msg.err_pos = ErrPos::At(30);

        msg.shift(20, -5);

        assert_eq!(msg.eoh, 35);
        assert_eq!(msg.sol, 15);
        assert_eq!(msg.err_pos, ErrPos::At(25));
        assert_eq!(msg.rq().uri, Span::new(4, 1));
        assert_eq!(msg.som, 0);
    }

    #[test]
    fn test_replace_shifts_end_of_headers() {
        let mut buf = Buffer::from("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        let mut msg = HttpMessage::request();
        msg.eoh = 40;

        let delta = msg.replace(&mut buf, 28, 38, b"close").unwrap();
        assert_eq!(delta, -5);
        assert_eq!(msg.eoh, 35);
        assert_eq!(&buf.as_bytes()[msg.eoh..], b"\r\n");

        msg.insert_line(&mut buf, msg.eoh, b"X-A: 1").unwrap();
        assert_eq!(msg.eoh, 43);
        assert_eq!(&buf.as_bytes()[msg.eoh..], b"\r\n");
    }

    #[test]
    fn test_restart_response_keeps_policy() {
        let mut msg = HttpMessage::response();
        msg.err_pos = ErrPos::At(12);
        msg.state = ParseState::Body;
        msg.restart_response(40);
        assert_eq!(msg.state, ParseState::RpBefore);
        assert_eq!(msg.som, 40);
        assert_eq!(msg.err_pos, ErrPos::Pass);
    }

    #[test]
    fn test_http11_detection() {
        let bytes = b"GET / HTTP/1.1";
        let rq = RequestLine { len: 14, method: Span::new(0, 3), uri: Span::new(4, 1), version: Span::new(6, 8) };
        assert!(rq.is_http11(bytes));
        assert!(!RequestLine::default().is_http11(bytes));
    }
}
