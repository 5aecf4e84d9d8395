//! Regular expression filters.
//!
//! Filters run in declared order. Each one is tried on the start line first and, only when
//! the start line did not match, on every header line in index order. Verdicts are sticky:
//! once a message is denied or tarpitted no further filter runs, and once it is allowed
//! the remaining allow, deny and tarpit filters are skipped.

use tracing::debug;

use crate::codec::{Progress, parse_request_line, parse_status_line};
use crate::pipeline::acl::status_code;
use crate::protocol::error::PipelineError;
use crate::protocol::header::HeaderCursor;
use crate::protocol::{Method, ParseError, ParseState, RequestLine, StartLine, StatusLine};
use crate::proxy::{Action, HdrExp, incr};
use crate::session::{Session, TxnFlags};

/// Runs request filters `exps` over the request head.
///
/// # Errors
/// Fails when a rewritten request line no longer parses or a rewrite does not fit.
pub(crate) fn apply_request_filters(s: &mut Session, exps: &[HdrExp]) -> Result<(), PipelineError> {
    for exp in exps {
        if s.txn.flags.intersects(TxnFlags::CLDENY | TxnFlags::CLTARPIT) {
            break;
        }
        if s.txn.flags.contains(TxnFlags::CLALLOW) && is_request_verdict(&exp.action, true) {
            continue;
        }
        if !filter_request_line(s, exp)? {
            filter_request_headers(s, exp)?;
        }
    }
    Ok(())
}

/// Runs response filters `exps` over the response head.
///
/// # Errors
/// Fails when a rewritten status line no longer parses or a rewrite does not fit.
pub(crate) fn apply_response_filters(s: &mut Session, exps: &[HdrExp]) -> Result<(), PipelineError> {
    for exp in exps {
        if s.txn.flags.contains(TxnFlags::SVDENY) {
            break;
        }
        if s.txn.flags.contains(TxnFlags::SVALLOW) && matches!(exp.action, Action::Allow | Action::Deny | Action::Pass) {
            continue;
        }
        if !filter_status_line(s, exp)? {
            filter_response_headers(s, exp)?;
        }
    }
    Ok(())
}

fn is_request_verdict(action: &Action, with_pass: bool) -> bool {
    match action {
        Action::Allow | Action::Deny | Action::Tarpit => true,
        Action::Pass => with_pass,
        _ => false,
    }
}

/// Returns `true` when the filter is done with this message.
fn filter_request_line(s: &mut Session, exp: &HdrExp) -> Result<bool, PipelineError> {
    if s.txn.flags.intersects(TxnFlags::CLDENY | TxnFlags::CLTARPIT) {
        return Ok(true);
    }
    if s.txn.flags.contains(TxnFlags::CLALLOW) && is_request_verdict(&exp.action, false) {
        return Ok(false);
    }
    if matches!(exp.action, Action::Remove) {
        return Ok(false);
    }

    let som = s.txn.req.som;
    let end = som + s.txn.req.rq().len;
    let Some(replacement) = exp.apply(&s.req.as_bytes()[som..end]) else {
        return Ok(false);
    };

    match &exp.action {
        Action::SetBackend(be) => {
            if !s.is_backend_frontend() {
                return Ok(false);
            }
            s.switch_backend(be.clone());
            Ok(true)
        }
        Action::Allow => {
            s.txn.flags.insert(TxnFlags::CLALLOW);
            Ok(true)
        }
        Action::Deny => {
            debug!(session = s.id, "request denied by filter on request line");
            s.txn.flags.insert(TxnFlags::CLDENY);
            incr(&s.be.counters.denied_req);
            Ok(true)
        }
        Action::Tarpit => {
            debug!(session = s.id, "request tarpitted by filter on request line");
            s.txn.flags.insert(TxnFlags::CLTARPIT);
            incr(&s.be.counters.denied_req);
            Ok(true)
        }
        Action::Replace(_) => {
            s.txn.req.replace(&mut s.req, som, end, &replacement)?;
            reparse_request_line(s)?;
            Ok(true)
        }
        Action::Pass | Action::Remove => Ok(false),
    }
}

fn filter_request_headers(s: &mut Session, exp: &HdrExp) -> Result<(), PipelineError> {
    let mut cursor = HeaderCursor::new(&s.txn.req, &s.txn.hdr_idx);

    loop {
        if s.txn.flags.intersects(TxnFlags::CLDENY | TxnFlags::CLTARPIT) {
            return Ok(());
        }
        if s.txn.flags.contains(TxnFlags::CLALLOW) && is_request_verdict(&exp.action, false) {
            return Ok(());
        }
        if !cursor.advance(&s.txn.hdr_idx) {
            return Ok(());
        }

        let Some(replacement) = exp.apply(cursor.line(s.req.as_bytes(), &s.txn.hdr_idx)) else {
            continue;
        };

        match &exp.action {
            Action::SetBackend(be) => {
                if s.is_backend_frontend() {
                    s.switch_backend(be.clone());
                    return Ok(());
                }
            }
            Action::Allow => {
                s.txn.flags.insert(TxnFlags::CLALLOW);
                return Ok(());
            }
            Action::Deny | Action::Tarpit => {
                let flag = if matches!(exp.action, Action::Deny) { TxnFlags::CLDENY } else { TxnFlags::CLTARPIT };
                debug!(session = s.id, verdict = ?exp.action, "request verdict set by header filter");
                s.txn.flags.insert(flag);
                incr(&s.be.counters.denied_req);
                return Ok(());
            }
            Action::Replace(_) => {
                let (sol, eol) = (cursor.sol(), cursor.eol(&s.txn.hdr_idx));
                cursor.replace(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, sol, eol, &replacement)?;
            }
            Action::Remove => {
                cursor.remove(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx)?;
            }
            Action::Pass => {}
        }
    }
}

fn filter_status_line(s: &mut Session, exp: &HdrExp) -> Result<bool, PipelineError> {
    if s.txn.flags.contains(TxnFlags::SVDENY) {
        return Ok(true);
    }
    if s.txn.flags.contains(TxnFlags::SVALLOW) && matches!(exp.action, Action::Allow | Action::Deny) {
        return Ok(false);
    }
    if matches!(exp.action, Action::Remove) {
        return Ok(false);
    }

    let som = s.txn.rsp.som;
    let end = som + s.txn.rsp.st().len;
    let Some(replacement) = exp.apply(&s.rep.as_bytes()[som..end]) else {
        return Ok(false);
    };

    match &exp.action {
        Action::Allow => {
            s.txn.flags.insert(TxnFlags::SVALLOW);
            Ok(true)
        }
        Action::Deny => {
            debug!(session = s.id, "response denied by filter on status line");
            s.txn.flags.insert(TxnFlags::SVDENY);
            Ok(true)
        }
        Action::Replace(_) => {
            s.txn.rsp.replace(&mut s.rep, som, end, &replacement)?;
            reparse_status_line(s)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn filter_response_headers(s: &mut Session, exp: &HdrExp) -> Result<(), PipelineError> {
    let mut cursor = HeaderCursor::new(&s.txn.rsp, &s.txn.hdr_idx);

    loop {
        if s.txn.flags.contains(TxnFlags::SVDENY) {
            return Ok(());
        }
        if s.txn.flags.contains(TxnFlags::SVALLOW) && matches!(exp.action, Action::Allow | Action::Deny) {
            return Ok(());
        }
        if !cursor.advance(&s.txn.hdr_idx) {
            return Ok(());
        }

        let Some(replacement) = exp.apply(cursor.line(s.rep.as_bytes(), &s.txn.hdr_idx)) else {
            continue;
        };

        match &exp.action {
            Action::Allow => {
                s.txn.flags.insert(TxnFlags::SVALLOW);
                return Ok(());
            }
            Action::Deny => {
                debug!(session = s.id, "response denied by header filter");
                s.txn.flags.insert(TxnFlags::SVDENY);
                return Ok(());
            }
            Action::Replace(_) => {
                let (sol, eol) = (cursor.sol(), cursor.eol(&s.txn.hdr_idx));
                cursor.replace(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, sol, eol, &replacement)?;
            }
            Action::Remove => {
                cursor.remove(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx)?;
            }
            _ => {}
        }
    }
}

/// Parses the request line again after it was rewritten, refreshing the method.
pub(crate) fn reparse_request_line(s: &mut Session) -> Result<(), PipelineError> {
    let som = s.txn.req.som;
    let bytes = s.req.as_bytes();
    let mut rq = RequestLine::default();

    match parse_request_line(bytes, &mut rq, som, som, ParseState::RqMeth, som) {
        Progress::Done(eol) => {
            let cr = bytes[eol] == b'\r';
            s.txn.meth = Method::classify(rq.method.slice(bytes));
            s.txn.req.sl = StartLine::Request(rq);
            s.txn.req.sol = som;
            s.txn.hdr_idx.set_start(rq.len, cr);
            Ok(())
        }
        Progress::Failed(pos) | Progress::Pending(_, pos) => Err(ParseError::invalid_start_line(pos).into()),
    }
}

/// Parses the status line again after it was rewritten, refreshing the status.
pub(crate) fn reparse_status_line(s: &mut Session) -> Result<(), PipelineError> {
    let som = s.txn.rsp.som;
    let bytes = s.rep.as_bytes();
    let mut st = StatusLine::default();

    match parse_status_line(bytes, &mut st, som, som, ParseState::RpVer, som) {
        Progress::Done(eol) => {
            let cr = bytes[eol] == b'\r';
            s.txn.status = status_code(st.code.slice(bytes));
            s.txn.rsp.sl = StartLine::Status(st);
            s.txn.rsp.sol = som;
            s.txn.hdr_idx.set_start(st.len, cr);
            Ok(())
        }
        Progress::Failed(pos) | Progress::Pending(_, pos) => Err(ParseError::invalid_start_line(pos).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::analyze;
    use crate::proxy::Proxy;
    use bytes::Bytes;
    use indoc::indoc;
    use regex::bytes::Regex;
    use std::time::Instant;
    use triomphe::Arc;

    fn session(fe: Proxy, request: &str) -> Session {
        let mut s = Session::new(1, Arc::new(fe), "10.0.0.1:4000".parse().unwrap(), Instant::now());
        s.req.append(request.as_bytes());
        analyze(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx);
        assert!(s.txn.req.is_complete());
        s.txn.meth = Method::classify(s.txn.req.rq().method.slice(s.req.as_bytes()));
        s
    }

    fn exp(pattern: &str, action: Action) -> HdrExp {
        HdrExp::new(Regex::new(pattern).unwrap(), action)
    }

    fn text(s: &Session) -> &str {
        std::str::from_utf8(s.req.as_bytes()).unwrap()
    }

    const REQUEST: &str = indoc! {"
        GET /old/page HTTP/1.1\r
        Host: example.com\r
        X-Debug: 1\r
        User-Agent: curl\r
        \r
    "};

    #[test]
    fn test_replace_request_line_reparses() {
        let mut s = session(Proxy::new("fe"), REQUEST);
        let exps = vec![exp("^GET /old/(.*) (HTTP/1..)", Action::Replace(Bytes::from_static(br"POST /new/\1 \2")))];

        apply_request_filters(&mut s, &exps).unwrap();

        assert!(text(&s).starts_with("POST /new/page HTTP/1.1\r\nHost: example.com\r\n"));
        assert_eq!(s.txn.meth, Method::Post);
        assert_eq!(s.txn.req.rq().uri.slice(s.req.as_bytes()), b"/new/page");
        assert_eq!(s.txn.req.eoh, s.req.len() - 2);
    }

    #[test]
    fn test_remove_and_replace_headers() {
        let mut s = session(Proxy::new("fe"), REQUEST);
        let exps = vec![
            exp("^X-Debug:", Action::Remove),
            exp("^User-Agent: (.*)", Action::Replace(Bytes::from_static(br"User-Agent: proxied \1"))),
        ];

        apply_request_filters(&mut s, &exps).unwrap();

        assert_eq!(text(&s), "GET /old/page HTTP/1.1\r\nHost: example.com\r\nUser-Agent: proxied curl\r\n\r\n");
        assert_eq!(s.txn.hdr_idx.used(), 2);
        assert_eq!(s.txn.req.eoh, s.req.len() - 2);
    }

    #[test]
    fn test_allow_skips_later_verdicts() {
        let fe = Proxy::new("fe");
        let mut s = session(fe, REQUEST);
        let exps = vec![
            exp("^Host: example", Action::Allow),
            exp("^User-Agent: curl", Action::Deny),
            exp("^X-Debug:", Action::Remove),
        ];

        apply_request_filters(&mut s, &exps).unwrap();

        assert!(s.txn.flags.contains(TxnFlags::CLALLOW));
        assert!(!s.txn.flags.contains(TxnFlags::CLDENY));
        assert!(!text(&s).contains("X-Debug"));
    }

    #[test]
    fn test_deny_stops_filters() {
        let mut s = session(Proxy::new("fe"), REQUEST);
        let exps = vec![exp("^User-Agent: curl", Action::Tarpit), exp("^Host:", Action::Remove)];

        apply_request_filters(&mut s, &exps).unwrap();

        assert!(s.txn.flags.contains(TxnFlags::CLTARPIT));
        assert!(text(&s).contains("Host: example.com"));
        assert_eq!(s.be.counters.snapshot().denied_req, 1);
    }

    #[test]
    fn test_set_backend_once() {
        let be1 = Arc::new(Proxy::new("be1"));
        let be2 = Arc::new(Proxy::new("be2"));
        let mut s = session(Proxy::new("fe"), REQUEST);
        let exps = vec![exp("^GET", Action::SetBackend(be1.clone())), exp("^Host:", Action::SetBackend(be2))];

        apply_request_filters(&mut s, &exps).unwrap();

        assert!(Arc::ptr_eq(&s.be, &be1));
    }

    #[test]
    fn test_invalid_rewrite_is_an_error() {
        let mut s = session(Proxy::new("fe"), REQUEST);
        let exps = vec![exp("^GET .*", Action::Replace(Bytes::from_static(b"G\x01T / HTTP/1.0")))];

        assert!(apply_request_filters(&mut s, &exps).is_err());
    }

    #[test]
    fn test_response_filters() {
        let mut s = session(Proxy::new("fe"), "GET / HTTP/1.0\r\n\r\n");
        s.txn.hdr_idx.reset();
        s.rep.append(b"HTTP/1.0 200 OK\r\nServer: apache\r\nX-Powered-By: php\r\n\r\n");
        analyze(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx);
        assert!(s.txn.rsp.is_complete());

        let exps = vec![
            exp("^HTTP/1.0 200 (.*)", Action::Replace(Bytes::from_static(br"HTTP/1.0 203 \1"))),
            exp("^X-Powered-By:", Action::Remove),
            exp("^Server: apache", Action::Deny),
        ];
        apply_response_filters(&mut s, &exps).unwrap();

        assert_eq!(s.txn.status, 203);
        assert!(s.txn.flags.contains(TxnFlags::SVDENY));
        assert_eq!(s.rep.as_bytes(), b"HTTP/1.0 203 OK\r\nServer: apache\r\n\r\n");
    }
}
