//! Built-in conditions.
//!
//! Each [`Acl`] fetches one sample from the session (method, URI, a header, the status...)
//! and matches it against its patterns; the condition is true when any pattern matches.
//! Header fetches read the request headers while the request is being processed, and the
//! response headers once the response head is complete.

use bytes::Bytes;
use regex::bytes::Regex;

use crate::protocol::header::{HdrCtx, find_header, get_path};
use crate::protocol::{ParseState, Span};
use crate::proxy::Condition;
use crate::session::Session;
use crate::utils::{parse_leading_uint, starts_with_ignore_case};

/// An inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub const fn contains(&self, value: i64) -> bool {
        self.min <= value && value <= self.max
    }
}

#[derive(Debug, Clone)]
pub enum Acl {
    /// request method, exact
    Method(Vec<Bytes>),
    /// request version without the `HTTP/` prefix
    ReqVer(Vec<Bytes>),
    /// response version without the `HTTP/` prefix
    RespVer(Vec<Bytes>),
    Status(Vec<IntRange>),
    Url(Vec<Bytes>),
    UrlBeg(Vec<Bytes>),
    UrlEnd(Vec<Bytes>),
    UrlSub(Vec<Bytes>),
    UrlReg(Regex),
    /// path part of the URI, query string excluded
    PathBeg(Vec<Bytes>),
    PathEnd(Vec<Bytes>),
    /// header value equal to a pattern, ignoring case, for each comma separated value
    Hdr(Bytes, Vec<Bytes>),
    HdrBeg(Bytes, Vec<Bytes>),
    HdrSub(Bytes, Vec<Bytes>),
    /// number of values of a header
    HdrCnt(Bytes, Vec<IntRange>),
    AlwaysTrue,
    AlwaysFalse,
    Not(Box<Acl>),
    All(Vec<Acl>),
    Any(Vec<Acl>),
}

impl Acl {
    pub fn matches(&self, s: &Session) -> bool {
        match self {
            Acl::Method(values) => request_span(s, |rq| rq.method).is_some_and(|m| values.iter().any(|v| v == m)),
            Acl::ReqVer(values) => request_span(s, |rq| rq.version).is_some_and(|ver| match_version(ver, values)),
            Acl::RespVer(values) => response_version(s).is_some_and(|ver| match_version(ver, values)),
            Acl::Status(ranges) => s.txn.rsp.is_complete() && in_ranges(ranges, i64::from(s.txn.status)),
            Acl::Url(values) => uri(s).is_some_and(|u| values.iter().any(|v| v == u)),
            Acl::UrlBeg(values) => uri(s).is_some_and(|u| values.iter().any(|v| u.starts_with(v))),
            Acl::UrlEnd(values) => uri(s).is_some_and(|u| values.iter().any(|v| u.ends_with(v))),
            Acl::UrlSub(values) => uri(s).is_some_and(|u| values.iter().any(|v| contains(u, v))),
            Acl::UrlReg(regex) => uri(s).is_some_and(|u| regex.is_match(u)),
            Acl::PathBeg(values) => path(s).is_some_and(|p| values.iter().any(|v| p.starts_with(v))),
            Acl::PathEnd(values) => path(s).is_some_and(|p| values.iter().any(|v| p.ends_with(v))),
            Acl::Hdr(name, values) => any_value(s, name, |val| values.iter().any(|v| val.eq_ignore_ascii_case(v))),
            Acl::HdrBeg(name, values) => any_value(s, name, |val| values.iter().any(|v| starts_with_ignore_case(val, v))),
            Acl::HdrSub(name, values) => any_value(s, name, |val| {
                let val = val.to_ascii_lowercase();
                values.iter().any(|v| contains(&val, &v.to_ascii_lowercase()))
            }),
            Acl::HdrCnt(name, ranges) => {
                let mut count = 0;
                any_value(s, name, |_| {
                    count += 1;
                    false
                });
                in_ranges(ranges, count)
            }
            Acl::AlwaysTrue => true,
            Acl::AlwaysFalse => false,
            Acl::Not(acl) => !acl.matches(s),
            Acl::All(acls) => acls.iter().all(|acl| acl.matches(s)),
            Acl::Any(acls) => acls.iter().any(|acl| acl.matches(s)),
        }
    }
}

impl Condition for Acl {
    fn eval(&self, session: &Session) -> bool {
        self.matches(session)
    }
}

fn in_ranges(ranges: &[IntRange], value: i64) -> bool {
    ranges.iter().any(|r| r.contains(value))
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || hay.windows(needle.len()).any(|w| w == needle)
}

fn match_version(version: &[u8], values: &[Bytes]) -> bool {
    let version = version.strip_prefix(b"HTTP/").unwrap_or(version);
    values.iter().any(|v| v == version)
}

fn request_span<'a>(s: &'a Session, field: impl FnOnce(crate::protocol::RequestLine) -> Span) -> Option<&'a [u8]> {
    if !s.txn.req.is_complete() {
        return None;
    }
    Some(field(s.txn.req.rq()).slice(s.req.as_bytes()))
}

fn response_version(s: &Session) -> Option<&[u8]> {
    s.txn.rsp.is_complete().then(|| s.txn.rsp.st().version.slice(s.rep.as_bytes()))
}

fn uri(s: &Session) -> Option<&[u8]> {
    request_span(s, |rq| rq.uri)
}

fn path(s: &Session) -> Option<&[u8]> {
    if !s.txn.req.is_complete() {
        return None;
    }
    let bytes = s.req.as_bytes();
    let uri = s.txn.req.rq().uri;
    let start = get_path(bytes, uri)?;
    let path = &bytes[start..uri.end()];
    let end = path.iter().position(|&c| c == b'?').unwrap_or(path.len());
    Some(&path[..end])
}

/// Calls `f` on each value of header `name`, stopping at the first `true`.
fn any_value(s: &Session, name: &[u8], mut f: impl FnMut(&[u8]) -> bool) -> bool {
    let (bytes, som) = if s.txn.rsp.is_complete() {
        (s.rep.as_bytes(), s.txn.rsp.som)
    } else if s.txn.req.is_complete() && matches!(s.txn.rsp.state, ParseState::RpBefore | ParseState::RpBeforeCr) {
        (s.req.as_bytes(), s.txn.req.som)
    } else {
        return false;
    };

    let mut ctx = HdrCtx::default();
    while find_header(name, bytes, som, &s.txn.hdr_idx, &mut ctx) {
        if f(ctx.value(bytes)) {
            return true;
        }
    }
    false
}

/// Parses the status code of a response line span.
pub(crate) fn status_code(code: &[u8]) -> u16 {
    u16::try_from(parse_leading_uint(code)).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::analyze;
    use crate::proxy::Proxy;
    use indoc::indoc;
    use std::time::Instant;
    use triomphe::Arc;

    fn session(request: &str) -> Session {
        let mut s = Session::new(1, Arc::new(Proxy::new("fe")), "10.0.0.1:4000".parse().unwrap(), Instant::now());
        s.req.append(request.as_bytes());
        analyze(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx);
        assert!(s.txn.req.is_complete());
        s
    }

    fn values(v: &[&str]) -> Vec<Bytes> {
        v.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect()
    }

    #[test]
    fn test_request_line_fetches() {
        let s = session("POST /img/logo.png?v=2 HTTP/1.1\r\nHost: a\r\n\r\n");

        assert!(Acl::Method(values(&["GET", "POST"])).matches(&s));
        assert!(!Acl::Method(values(&["post"])).matches(&s));
        assert!(Acl::ReqVer(values(&["1.1"])).matches(&s));
        assert!(Acl::UrlBeg(values(&["/img/"])).matches(&s));
        assert!(Acl::UrlEnd(values(&["v=2"])).matches(&s));
        assert!(Acl::UrlSub(values(&["logo"])).matches(&s));
        assert!(Acl::UrlReg(Regex::new(r"\.png").unwrap()).matches(&s));
        assert!(Acl::PathEnd(values(&[".png"])).matches(&s));
        assert!(!Acl::Url(values(&["/img/logo.png"])).matches(&s));
        assert!(!Acl::RespVer(values(&["1.1"])).matches(&s));
    }

    #[test]
    fn test_header_fetches() {
        let s = session(indoc! {"
        GET / HTTP/1.0
        Accept: text/html, Text/Plain
        Host: www.Example.com
        Accept: */*

        "});

        assert!(Acl::Hdr(Bytes::from_static(b"accept"), values(&["text/plain"])).matches(&s));
        assert!(Acl::HdrBeg(Bytes::from_static(b"host"), values(&["WWW."])).matches(&s));
        assert!(Acl::HdrSub(Bytes::from_static(b"host"), values(&["example"])).matches(&s));
        assert!(Acl::HdrCnt(Bytes::from_static(b"accept"), vec![IntRange::new(3, 3)]).matches(&s));
        assert!(!Acl::HdrCnt(Bytes::from_static(b"cookie"), vec![IntRange::new(1, i64::MAX)]).matches(&s));
    }

    #[test]
    fn test_combinators() {
        let s = session("GET / HTTP/1.0\r\n\r\n");
        assert!(Acl::Not(Box::new(Acl::AlwaysFalse)).matches(&s));
        assert!(!Acl::All(vec![Acl::AlwaysTrue, Acl::AlwaysFalse]).matches(&s));
        assert!(Acl::Any(vec![Acl::AlwaysFalse, Acl::Url(values(&["/"]))]).matches(&s));
        assert!(Acl::All(Vec::new()).eval(&s));
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(b"200"), 200);
        assert_eq!(status_code(b"99999999"), u16::MAX);
    }
}
