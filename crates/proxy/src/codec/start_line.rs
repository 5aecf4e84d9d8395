//! Resumable parsers for request and status lines.
//!
//! Both parsers consume bytes from `ptr` to the end of the data, record field boundaries
//! as they are crossed, and stop on the first CR or LF, leaving it unconsumed. When the data
//! runs out first, they report the state to resume from, so a later call continues exactly
//! where this one stopped without scanning anything twice.
//!
//! A request line whose method or URI is directly followed by CR or LF is an HTTP/0.9
//! request: the missing fields are recorded as empty spans at the terminator.

use crate::protocol::chars::{is_crlf, is_lws, is_spht, is_token, is_ver_token};
use crate::protocol::{ParseState, RequestLine, Span, StatusLine};

/// Outcome of a start line parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The line is complete, the terminator starts at this offset.
    Done(usize),
    /// Out of data, resume from this state and offset.
    Pending(ParseState, usize),
    /// Invalid byte at this offset.
    Failed(usize),
}

/// Consumes one byte, then either continues in state `$next` or reports it as pending.
macro_rules! eat_or_pending {
    ($ptr:ident, $end:ident, $next:expr) => {{
        $ptr += 1;
        if $ptr >= $end {
            return Progress::Pending($next, $ptr);
        }
        $next
    }};
}

/// Parses a request line from `ptr`, in parser state `state`.
///
/// # Arguments
/// * `bytes` - buffer contents, `ptr < bytes.len()`
/// * `rq` - request line being filled
/// * `som` - start of message, where the method starts
/// * `sol` - start of line, used to compute the line length
/// * `state` - one of the request line states, from [`ParseState::RqMeth`] to [`ParseState::RqVer`]
pub fn parse_request_line(
    bytes: &[u8],
    rq: &mut RequestLine,
    som: usize,
    sol: usize,
    mut state: ParseState,
    mut ptr: usize,
) -> Progress {
    use ParseState::*;

    let end = bytes.len();

    loop {
        let c = bytes[ptr];
        state = match state {
            RqMeth => {
                if is_token(c) {
                    eat_or_pending!(ptr, end, RqMeth)
                } else if is_spht(c) {
                    rq.method = Span::new(som, ptr - som);
                    eat_or_pending!(ptr, end, RqMethSp)
                } else if is_crlf(c) {
                    rq.method = Span::new(som, ptr - som);
                    rq.uri = Span::new(ptr, 0);
                    rq.version = Span::new(ptr, 0);
                    break;
                } else {
                    return Progress::Failed(ptr);
                }
            }

            RqMethSp => {
                if !is_lws(c) {
                    rq.uri.off = ptr;
                    RqUri
                } else if is_spht(c) {
                    eat_or_pending!(ptr, end, RqMethSp)
                } else {
                    rq.uri = Span::new(ptr, 0);
                    rq.version = Span::new(ptr, 0);
                    break;
                }
            }

            RqUri => {
                if !is_lws(c) {
                    eat_or_pending!(ptr, end, RqUri)
                } else if is_spht(c) {
                    rq.uri.len = ptr - rq.uri.off;
                    eat_or_pending!(ptr, end, RqUriSp)
                } else {
                    rq.uri.len = ptr - rq.uri.off;
                    rq.version = Span::new(ptr, 0);
                    break;
                }
            }

            RqUriSp => {
                if !is_lws(c) {
                    rq.version.off = ptr;
                    RqVer
                } else if is_spht(c) {
                    eat_or_pending!(ptr, end, RqUriSp)
                } else {
                    rq.version = Span::new(ptr, 0);
                    break;
                }
            }

            RqVer => {
                if is_ver_token(c) {
                    eat_or_pending!(ptr, end, RqVer)
                } else if is_crlf(c) {
                    rq.version.len = ptr - rq.version.off;
                    break;
                } else {
                    return Progress::Failed(ptr);
                }
            }

            _ => return Progress::Failed(ptr),
        };
    }

    rq.len = ptr - sol;
    Progress::Done(ptr)
}

/// Parses a status line from `ptr`, in parser state `state`.
///
/// The version starts at `som`. A status line without reason phrase is accepted, an empty
/// status code is not.
pub fn parse_status_line(
    bytes: &[u8],
    st: &mut StatusLine,
    som: usize,
    sol: usize,
    mut state: ParseState,
    mut ptr: usize,
) -> Progress {
    use ParseState::*;

    let end = bytes.len();

    loop {
        let c = bytes[ptr];
        state = match state {
            RpVer => {
                if is_ver_token(c) {
                    eat_or_pending!(ptr, end, RpVer)
                } else if is_spht(c) {
                    st.version = Span::new(som, ptr - som);
                    eat_or_pending!(ptr, end, RpVerSp)
                } else {
                    return Progress::Failed(ptr);
                }
            }

            RpVerSp => {
                if !is_lws(c) {
                    st.code.off = ptr;
                    RpCode
                } else if is_spht(c) {
                    eat_or_pending!(ptr, end, RpVerSp)
                } else {
                    return Progress::Failed(ptr);
                }
            }

            RpCode => {
                if !is_lws(c) {
                    eat_or_pending!(ptr, end, RpCode)
                } else if is_spht(c) {
                    st.code.len = ptr - st.code.off;
                    eat_or_pending!(ptr, end, RpCodeSp)
                } else {
                    st.code.len = ptr - st.code.off;
                    st.reason = Span::new(ptr, 0);
                    break;
                }
            }

            RpCodeSp => {
                if !is_lws(c) {
                    st.reason.off = ptr;
                    RpReason
                } else if is_spht(c) {
                    eat_or_pending!(ptr, end, RpCodeSp)
                } else {
                    st.reason = Span::new(ptr, 0);
                    break;
                }
            }

            RpReason => {
                if !is_crlf(c) {
                    eat_or_pending!(ptr, end, RpReason)
                } else {
                    st.reason.len = ptr - st.reason.off;
                    break;
                }
            }

            _ => return Progress::Failed(ptr),
        };
    }

    st.len = ptr - sol;
    Progress::Done(ptr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line: &[u8]) -> (RequestLine, Progress) {
        let mut rq = RequestLine::default();
        let progress = parse_request_line(line, &mut rq, 0, 0, ParseState::RqMeth, 0);
        (rq, progress)
    }

    #[test]
    fn test_request_line() {
        let line = b"GET /index.html HTTP/1.1\r\n";
        let (rq, progress) = request(line);

        assert_eq!(progress, Progress::Done(24));
        assert_eq!(rq.method.slice(line), b"GET");
        assert_eq!(rq.uri.slice(line), b"/index.html");
        assert_eq!(rq.version.slice(line), b"HTTP/1.1");
        assert_eq!(rq.len, 24);
    }

    #[test]
    fn test_request_line_http09() {
        let line = b"GET /old\r\n";
        let (rq, progress) = request(line);
        assert_eq!(progress, Progress::Done(8));
        assert_eq!(rq.uri.slice(line), b"/old");
        assert_eq!(rq.version, Span::new(8, 0));

        let line = b"GET\n";
        let (rq, progress) = request(line);
        assert_eq!(progress, Progress::Done(3));
        assert_eq!(rq.uri, Span::new(3, 0));
        assert_eq!(rq.version, Span::new(3, 0));
    }

    #[test]
    fn test_request_line_pending_and_resume() {
        let line = b"POST /a HTTP/1.0\r\n";
        let mut rq = RequestLine::default();

        let progress = parse_request_line(&line[..6], &mut rq, 0, 0, ParseState::RqMeth, 0);
        assert_eq!(progress, Progress::Pending(ParseState::RqUri, 6));

        let progress = parse_request_line(line, &mut rq, 0, 0, ParseState::RqUri, 6);
        assert_eq!(progress, Progress::Done(16));
        assert_eq!(rq.uri.slice(line), b"/a");
        assert_eq!(rq.version.slice(line), b"HTTP/1.0");
    }

    #[test]
    fn test_request_line_bad_version() {
        let (_, progress) = request(b"GET / HTTX/1.1\r\n");
        assert_eq!(progress, Progress::Failed(9));

        let (_, progress) = request(b"G\x01T / HTTP/1.1\r\n");
        assert_eq!(progress, Progress::Failed(1));
    }

    #[test]
    fn test_status_line() {
        let line = b"HTTP/1.1 200 OK\r\n";
        let mut st = StatusLine::default();
        let progress = parse_status_line(line, &mut st, 0, 0, ParseState::RpVer, 0);

        assert_eq!(progress, Progress::Done(15));
        assert_eq!(st.version.slice(line), b"HTTP/1.1");
        assert_eq!(st.code.slice(line), b"200");
        assert_eq!(st.reason.slice(line), b"OK");
    }

    #[test]
    fn test_status_line_without_reason() {
        let line = b"HTTP/1.0 404\n";
        let mut st = StatusLine::default();
        let progress = parse_status_line(line, &mut st, 0, 0, ParseState::RpVer, 0);

        assert_eq!(progress, Progress::Done(12));
        assert_eq!(st.code.slice(line), b"404");
        assert_eq!(st.reason, Span::new(12, 0));
    }

    #[test]
    fn test_status_line_missing_code() {
        let mut st = StatusLine::default();
        let progress = parse_status_line(b"HTTP/1.0 \r\n", &mut st, 0, 0, ParseState::RpVer, 0);
        assert_eq!(progress, Progress::Failed(9));
    }
}
