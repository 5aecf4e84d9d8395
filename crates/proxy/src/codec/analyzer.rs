//! Resumable HTTP message analyzer.
//!
//! [`analyze`] drives one request or response from its stored [`ParseState`] over the bytes
//! available in the buffer, until the empty line ending the headers is found, an invalid
//! byte is met, or the data runs out. It can be interrupted after any byte and called again
//! once more data arrived, with no information loss.
//!
//! # Features
//!
//! - Empty lines before the start line are removed from the buffer
//! - CRLF and bare LF line endings, in any mix
//! - Line folding: the fold bytes are overwritten with spaces in place, so a folded header
//!   is seen as a single line by everything downstream
//! - Each complete header line is registered in the [`HeaderIndex`]
//! - Invalid bytes in header names are rejected or tolerated depending on [`ErrPos`]
//!
//! # Example
//!
//! ```
//! use micro_proxy::codec::analyze;
//! use micro_proxy::protocol::{Buffer, HeaderIndex, HttpMessage};
//!
//! let mut buf = Buffer::from("GET /x HTTP/1.1\r\nHost: a");
//! let mut msg = HttpMessage::request();
//! let mut idx = HeaderIndex::default();
//!
//! analyze(&mut buf, &mut msg, &mut idx);
//! assert!(!msg.is_complete());
//!
//! buf.append(b"\r\n\r\n");
//! analyze(&mut buf, &mut msg, &mut idx);
//! assert!(msg.is_complete());
//! assert_eq!(idx.used(), 1);
//! ```

use tracing::trace;

use crate::codec::start_line::{Progress, parse_request_line, parse_status_line};
use crate::protocol::chars::{is_crlf, is_spht, is_token};
use crate::protocol::{Buffer, ErrPos, HeaderIndex, HttpMessage, ParseState, StartLine};

enum Step {
    /// continue in this state at the current byte
    Next(ParseState),
    /// invalid byte at the current offset
    Invalid,
    /// headers complete
    Complete,
}

/// Resumes parsing `msg` over the bytes of `buf` not examined yet.
///
/// On return, `msg.state` is either the state to resume from, [`ParseState::Body`] when the
/// headers are complete, or [`ParseState::Error`]. The buffer read cursor points to the
/// first byte not examined, which is the first body byte once the headers are complete.
pub fn analyze(buf: &mut Buffer, msg: &mut HttpMessage, idx: &mut HeaderIndex) {
    use ParseState::*;

    let mut state = msg.state;
    let mut ptr = buf.read_cursor();
    let mut end = buf.len();

    if ptr >= end || matches!(state, Body | Error) {
        return;
    }

    // stores the resumption point and leaves when the next byte is not available yet
    macro_rules! eat {
        ($next:expr) => {{
            ptr += 1;
            if ptr >= end {
                msg.state = $next;
                buf.set_read_cursor(ptr);
                trace!(state = ?msg.state, offset = ptr, "message analyzer out of data");
                return;
            }
            Step::Next($next)
        }};
    }

    loop {
        let c = buf.as_bytes()[ptr];

        let step = match state {
            RpBefore => {
                if is_token(c) {
                    // empty lines since the expected start of the response are dropped
                    let start = msg.som.min(ptr);
                    if ptr != start {
                        buf.set_read_cursor(ptr);
                        if buf.erase(start, ptr).is_err() {
                            msg.state = Error;
                            return;
                        }
                        ptr = start;
                        end = buf.len();
                    }
                    msg.sol = ptr;
                    msg.som = ptr;
                    idx.reset();
                    Step::Next(RpVer)
                } else if !is_crlf(c) {
                    Step::Invalid
                } else if c == b'\n' {
                    eat!(RpBefore)
                } else {
                    eat!(RpBeforeCr)
                }
            }

            RpBeforeCr => {
                if c == b'\n' {
                    eat!(RpBefore)
                } else {
                    Step::Invalid
                }
            }

            RpVer | RpVerSp | RpCode | RpCodeSp | RpReason => {
                let StartLine::Status(st) = &mut msg.sl else {
                    msg.state = Error;
                    return;
                };
                match parse_status_line(buf.as_bytes(), st, msg.som, msg.sol, state, ptr) {
                    Progress::Done(eol) => {
                        ptr = eol;
                        let cr = buf.as_bytes()[ptr] == b'\r';
                        idx.set_start(st.len, cr);
                        msg.sol = ptr;
                        if cr { eat!(RpLineEnd) } else { Step::Next(RpLineEnd) }
                    }
                    Progress::Pending(next, at) => {
                        msg.state = next;
                        buf.set_read_cursor(at);
                        return;
                    }
                    Progress::Failed(at) => {
                        ptr = at;
                        Step::Invalid
                    }
                }
            }

            RpLineEnd => {
                if c == b'\n' {
                    eat!(HdrFirst)
                } else {
                    Step::Invalid
                }
            }

            RqBefore => {
                if is_token(c) {
                    if ptr != 0 {
                        // leading empty lines are dropped
                        buf.set_read_cursor(ptr);
                        if buf.erase(0, ptr).is_err() {
                            msg.state = Error;
                            return;
                        }
                        ptr = 0;
                        end = buf.len();
                    }
                    msg.sol = 0;
                    msg.som = 0;
                    idx.reset();
                    Step::Next(RqMeth)
                } else if !is_crlf(c) {
                    Step::Invalid
                } else if c == b'\n' {
                    eat!(RqBefore)
                } else {
                    eat!(RqBeforeCr)
                }
            }

            RqBeforeCr => {
                if c == b'\n' {
                    eat!(RqBefore)
                } else {
                    Step::Invalid
                }
            }

            RqMeth | RqMethSp | RqUri | RqUriSp | RqVer => {
                let StartLine::Request(rq) = &mut msg.sl else {
                    msg.state = Error;
                    return;
                };
                match parse_request_line(buf.as_bytes(), rq, msg.som, msg.sol, state, ptr) {
                    Progress::Done(eol) => {
                        ptr = eol;
                        let cr = buf.as_bytes()[ptr] == b'\r';
                        idx.set_start(rq.len, cr);
                        msg.sol = ptr;
                        if cr { eat!(RqLineEnd) } else { Step::Next(RqLineEnd) }
                    }
                    Progress::Pending(next, at) => {
                        msg.state = next;
                        buf.set_read_cursor(at);
                        return;
                    }
                    Progress::Failed(at) => {
                        ptr = at;
                        Step::Invalid
                    }
                }
            }

            RqLineEnd => {
                if msg.rq().version.len == 0 {
                    // HTTP/0.9: no header may follow
                    Step::Next(LastLf)
                } else if c == b'\n' {
                    eat!(HdrFirst)
                } else {
                    Step::Invalid
                }
            }

            HdrFirst => {
                msg.sol = ptr;
                if !is_crlf(c) {
                    Step::Next(HdrName)
                } else if c == b'\r' {
                    eat!(LastLf)
                } else {
                    Step::Next(LastLf)
                }
            }

            HdrName | HdrCol => {
                if is_token(c) {
                    eat!(HdrName)
                } else if c == b':' {
                    msg.col = ptr;
                    eat!(HdrL1Sp)
                } else if msg.err_pos == ErrPos::Block || c == b'\n' {
                    Step::Invalid
                } else {
                    if msg.err_pos == ErrPos::Pass {
                        msg.err_pos = ErrPos::At(ptr);
                    }
                    eat!(HdrName)
                }
            }

            HdrL1Sp => {
                if is_spht(c) {
                    eat!(HdrL1Sp)
                } else {
                    msg.sov = ptr;
                    if !is_crlf(c) {
                        Step::Next(HdrVal)
                    } else if c == b'\r' {
                        eat!(HdrL1Lf)
                    } else {
                        Step::Next(HdrL1Lf)
                    }
                }
            }

            HdrL1Lf => {
                if c == b'\n' {
                    eat!(HdrL1Lws)
                } else {
                    Step::Invalid
                }
            }

            HdrL1Lws => {
                if is_spht(c) {
                    buf.as_mut_bytes()[msg.sov..ptr].fill(b' ');
                    msg.sov = ptr;
                    Step::Next(HdrL1Sp)
                } else {
                    // the value was only made of spaces
                    msg.eol = msg.sov;
                    complete_header(buf, msg, idx)
                }
            }

            HdrVal => {
                if !is_crlf(c) {
                    eat!(HdrVal)
                } else {
                    msg.eol = ptr;
                    if c == b'\r' { eat!(HdrL2Lf) } else { Step::Next(HdrL2Lf) }
                }
            }

            HdrL2Lf => {
                if c == b'\n' {
                    eat!(HdrL2Lws)
                } else {
                    Step::Invalid
                }
            }

            HdrL2Lws => {
                if is_spht(c) {
                    buf.as_mut_bytes()[msg.eol..ptr].fill(b' ');
                    msg.eol = ptr;
                    Step::Next(HdrVal)
                } else {
                    complete_header(buf, msg, idx)
                }
            }

            LastLf => {
                if c == b'\n' {
                    Step::Complete
                } else {
                    Step::Invalid
                }
            }

            Body | Error => return,
        };

        match step {
            Step::Next(next) => state = next,
            Step::Complete => {
                ptr += 1;
                buf.set_read_cursor(ptr);
                msg.eoh = msg.sol;
                msg.state = Body;
                trace!(eoh = msg.eoh, headers = idx.used(), "message headers complete");
                return;
            }
            Step::Invalid => {
                msg.state = Error;
                buf.set_read_cursor(ptr);
                trace!(?state, offset = ptr, "invalid message");
                return;
            }
        }
    }
}

/// Registers the header line `sol..eol` and moves on to the next line.
fn complete_header(buf: &Buffer, msg: &HttpMessage, idx: &mut HeaderIndex) -> Step {
    let cr = buf.as_bytes()[msg.eol] == b'\r';
    match idx.append(msg.eol - msg.sol, cr) {
        Ok(_) => Step::Next(ParseState::HdrFirst),
        Err(e) => {
            trace!(cause = %e, "header rejected");
            Step::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Span;
    use indoc::indoc;

    fn analyze_all(text: &[u8]) -> (Buffer, HttpMessage, HeaderIndex) {
        let mut buf = Buffer::from(text);
        let mut msg = HttpMessage::request();
        let mut idx = HeaderIndex::default();
        analyze(&mut buf, &mut msg, &mut idx);
        (buf, msg, idx)
    }

    fn header_lines(buf: &Buffer, msg: &HttpMessage, idx: &HeaderIndex) -> Vec<Vec<u8>> {
        let mut sol = msg.som + idx.first_pos();
        idx.iter()
            .map(|h| {
                let line = buf.as_bytes()[sol..sol + idx.len(h)].to_vec();
                sol += idx.full_len(h);
                line
            })
            .collect()
    }

    #[test]
    fn test_request_round_trip() {
        let (buf, msg, idx) = analyze_all(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
        let bytes = buf.as_bytes();
        let rq = msg.rq();

        assert_eq!(msg.state, ParseState::Body);
        assert_eq!(rq.method.slice(bytes), b"GET");
        assert_eq!(rq.uri.slice(bytes), b"/x");
        assert_eq!(rq.version.len, 8);
        assert_eq!(idx.used(), 1);
        assert_eq!(idx.first().map(|h| idx.len(h)), Some("Host: a".len()));
        assert_eq!(msg.eoh, 26);
        assert_eq!(&bytes[msg.eoh..], b"\r\n");
        assert_eq!(buf.read_cursor(), bytes.len());
    }

    #[test]
    fn test_index_ordering_adds_up_to_eoh() {
        let (buf, msg, idx) = analyze_all(indoc! {r##"
        POST /upload HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*
        Content-Length: 3

        abc"##}
        .as_bytes());

        assert!(msg.is_complete());
        assert_eq!(
            header_lines(&buf, &msg, &idx),
            vec![
                b"Host: 127.0.0.1:8080".to_vec(),
                b"User-Agent: curl/7.79.1".to_vec(),
                b"Accept: */*".to_vec(),
                b"Content-Length: 3".to_vec(),
            ]
        );

        let total: usize = idx.iter().map(|h| idx.full_len(h)).sum();
        assert_eq!(msg.som + idx.first_pos() + total, msg.eoh);
        assert_eq!(&buf.as_bytes()[buf.read_cursor()..], b"abc");
    }

    #[test]
    fn test_resumable_at_every_split() {
        let text: &[u8] = b"\r\nPUT /a/b?c=d HTTP/1.0\r\nHost: example.com\r\nX-Fold: one\r\n  two\nAccept:\r\n\tx\r\nEmpty:\r\n\r\n";
        let (whole_buf, whole_msg, whole_idx) = analyze_all(text);
        assert!(whole_msg.is_complete());

        for split in 1..text.len() {
            let mut buf = Buffer::new();
            let mut msg = HttpMessage::request();
            let mut idx = HeaderIndex::default();

            buf.append(&text[..split]);
            analyze(&mut buf, &mut msg, &mut idx);
            assert!(!msg.is_complete(), "complete too early at split {split}");
            buf.append(&text[split..]);
            analyze(&mut buf, &mut msg, &mut idx);

            assert_eq!(msg, whole_msg, "split at {split}");
            assert_eq!(idx, whole_idx, "split at {split}");
            assert_eq!(buf.as_bytes(), whole_buf.as_bytes(), "split at {split}");
        }
    }

    #[test]
    fn test_response_resumable_with_leading_lines() {
        let text: &[u8] = b"\r\n\nHTTP/1.0 200 OK\r\nA: b\r\n\r\n";
        let mut whole = Buffer::from(text);
        let mut whole_msg = HttpMessage::response();
        let mut whole_idx = HeaderIndex::default();
        analyze(&mut whole, &mut whole_msg, &mut whole_idx);
        assert_eq!(whole_msg.som, 0);
        assert!(whole.as_bytes().starts_with(b"HTTP/1.0 200"));

        for split in 1..text.len() {
            let mut buf = Buffer::new();
            let mut msg = HttpMessage::response();
            let mut idx = HeaderIndex::default();
            buf.append(&text[..split]);
            analyze(&mut buf, &mut msg, &mut idx);
            buf.append(&text[split..]);
            analyze(&mut buf, &mut msg, &mut idx);

            assert_eq!(msg, whole_msg, "split at {split}");
            assert_eq!(idx, whole_idx, "split at {split}");
            assert_eq!(buf.as_bytes(), whole.as_bytes(), "split at {split}");
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let text = b"HTTP/1.1 301 Moved\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n";
        let mut buf = Buffer::new();
        let mut msg = HttpMessage::response();
        let mut idx = HeaderIndex::default();

        for &b in text {
            assert!(!msg.is_complete());
            buf.append(&[b]);
            analyze(&mut buf, &mut msg, &mut idx);
        }

        assert!(msg.is_complete());
        assert_eq!(msg.st().code.slice(buf.as_bytes()), b"301");
        assert_eq!(idx.used(), 2);
    }

    #[test]
    fn test_http09_request() {
        let (buf, msg, idx) = analyze_all(b"GET /old\r\n");

        assert!(msg.is_complete());
        assert_eq!(msg.rq().version, Span::new(8, 0));
        assert_eq!(msg.rq().uri.slice(buf.as_bytes()), b"/old");
        assert_eq!(msg.eoh, 8);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_folding_is_flattened() {
        let (buf, msg, idx) = analyze_all(b"GET / HTTP/1.0\r\nX-A: one\r\n two\r\n\tthree\r\n\r\n");

        assert!(msg.is_complete());
        assert_eq!(header_lines(&buf, &msg, &idx), vec![b"X-A: one   two  \tthree".to_vec()]);
        assert_eq!(idx.used(), 1);
    }

    #[test]
    fn test_fold_before_value() {
        let (buf, msg, idx) = analyze_all(b"GET / HTTP/1.0\r\nX-A:\r\n value\r\n\r\n");

        assert!(msg.is_complete());
        assert_eq!(header_lines(&buf, &msg, &idx), vec![b"X-A:   value".to_vec()]);
    }

    #[test]
    fn test_leading_empty_lines_removed() {
        let (buf, msg, _) = analyze_all(b"\r\n\nGET / HTTP/1.0\r\n\r\n");

        assert!(msg.is_complete());
        assert_eq!(msg.som, 0);
        assert_eq!(buf.as_bytes(), b"GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn test_invalid_header_name() {
        let text = b"GET / HTTP/1.0\r\nBad Name: x\r\n\r\n";

        let (buf, msg, _) = analyze_all(text);
        assert!(msg.is_error());
        assert_eq!(buf.read_cursor(), 19);

        let mut buf = Buffer::from(text.as_slice());
        let mut msg = HttpMessage::request();
        msg.err_pos = ErrPos::Pass;
        let mut idx = HeaderIndex::default();
        analyze(&mut buf, &mut msg, &mut idx);
        assert!(msg.is_complete());
        assert_eq!(msg.err_pos, ErrPos::At(19));
        assert_eq!(idx.used(), 1);
    }

    #[test]
    fn test_too_many_headers() {
        let mut text = b"GET / HTTP/1.0\r\n".to_vec();
        for i in 0..4 {
            text.extend_from_slice(format!("X-{i}: {i}\r\n").as_bytes());
        }
        text.extend_from_slice(b"\r\n");

        let mut buf = Buffer::from(text.as_slice());
        let mut msg = HttpMessage::request();
        let mut idx = HeaderIndex::new(4);
        analyze(&mut buf, &mut msg, &mut idx);
        assert!(msg.is_error());
    }

    #[test]
    fn test_garbage_before_start_line() {
        let (_, msg, _) = analyze_all(b" GET / HTTP/1.0\r\n\r\n");
        assert!(msg.is_error());

        let (_, msg, _) = analyze_all(b"\rGET / HTTP/1.0\r\n\r\n");
        assert!(msg.is_error());
    }

    #[test]
    fn test_response_after_forwarded_interim() {
        let mut buf = Buffer::from("HTTP/1.1 100 Continue\r\n\r\n\r\nHTTP/1.1 200 OK\r\nA: b\r\n\r\n");
        let mut msg = HttpMessage::response();
        let mut idx = HeaderIndex::default();

        analyze(&mut buf, &mut msg, &mut idx);
        assert!(msg.is_complete());
        assert_eq!(msg.st().code.slice(buf.as_bytes()), b"100");

        msg.restart_response(buf.read_cursor());
        analyze(&mut buf, &mut msg, &mut idx);
        assert!(msg.is_complete());
        assert_eq!(msg.som, 25);
        assert_eq!(msg.st().code.slice(buf.as_bytes()), b"200");
        assert_eq!(&buf.as_bytes()[..msg.som], b"HTTP/1.1 100 Continue\r\n\r\n");
        assert_eq!(idx.used(), 1);
        assert_eq!(msg.st().len, "HTTP/1.1 200 OK".len());
    }

    #[test]
    fn test_matches_httparse() {
        let requests: [&[u8]; 3] = [
            b"GET /index.html HTTP/1.1\r\nHost: 127.0.0.1:8080\r\nAccept: */*\r\n\r\n",
            b"DELETE /a?b=c HTTP/1.0\nConnection: close\nX: y\nZ: w\n\n",
            b"OPTIONS * HTTP/1.1\r\nHost: h\r\n\r\n",
        ];

        for request in requests {
            let mut headers = [httparse::EMPTY_HEADER; 16];
            let mut oracle = httparse::Request::new(&mut headers);
            let status = oracle.parse(request).unwrap();

            let (buf, msg, idx) = analyze_all(request);
            let bytes = buf.as_bytes();
            let rq = msg.rq();

            assert!(msg.is_complete());
            assert_eq!(Some(buf.read_cursor()), status.is_complete().then(|| status.unwrap()));
            assert_eq!(oracle.method.map(str::as_bytes), Some(rq.method.slice(bytes)));
            assert_eq!(oracle.path.map(str::as_bytes), Some(rq.uri.slice(bytes)));
            assert_eq!(oracle.headers.len(), idx.used());
            for (header, line) in oracle.headers.iter().zip(header_lines(&buf, &msg, &idx)) {
                assert!(line.starts_with(header.name.as_bytes()));
                assert!(line.ends_with(header.value));
            }
        }
    }
}
