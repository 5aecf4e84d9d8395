//! Response analyser.
//!
//! Waits for a complete response head from the server, then applies the backend and the
//! frontend policies to it: filters, `Connection` handling, added headers, persistence
//! cookies and cacheability checks. Interim (1xx) responses are forwarded as they are and
//! the analysis starts over with the response that follows.

use std::sync::atomic::AtomicU64;
use std::time::Instant;

use tracing::{debug, error, trace, warn};
use triomphe::Arc;

use crate::codec::analyze;
use crate::protocol::error::PipelineError;
use crate::protocol::fixed::HttpErr;
use crate::protocol::header::{add_tail, capture_headers};
use crate::protocol::{Analysers, BufferFlags, Method, ParseState};
use crate::proxy::{CLOSE_OPTIONS, Proxy, ProxyOptions, incr};
use crate::session::{ErrCode, FinState, Session, SessionFlags, TxnFlags};

use super::acl::status_code;
use super::cache::{check_response_cacheability, initial_flags};
use super::cookie::manage_server_cookies;
use super::filter::apply_response_filters;
use super::{Analysis, capture_bad_response, client_reply, has_error_pos, normalize_connection};

const EXPIRED_COOKIE: &[u8] = b"; Expires=Thu, 01-Jan-1970 00:00:01 GMT";

/// Analyses the response head received so far.
///
/// # Returns
/// - [`Analysis::Pending`] while the head is incomplete
/// - [`Analysis::Forward`] once the final response head is processed
/// - [`Analysis::Close`] when the response was replaced by an error or the client is gone
pub fn process_response(s: &mut Session, now: Instant) -> Analysis {
    loop {
        if !s.rep.analysers.contains(Analysers::RTR_HTTP_HDR) {
            return Analysis::Forward;
        }

        // the header index still describes the request until the response starts
        if s.txn.rsp.state == ParseState::RpBefore {
            s.txn.hdr_idx.reset();
        }
        if s.rep.read_cursor() < s.rep.len() {
            analyze(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx);
        }

        if !s.txn.rsp.is_complete() {
            return wait_for_response(s);
        }

        if has_error_pos(s.txn.rsp.err_pos) {
            capture_bad_response(s);
        }
        s.rep.analysers.remove(Analysers::RTR_HTTP_HDR);

        match analyse_response_head(s, now) {
            Ok(true) => continue,
            Ok(false) => {
                s.rep.set_rlim_max();
                return Analysis::Forward;
            }
            Err(Refusal::Invalid(cur, err)) => {
                warn!(proxy = %cur.id, session = s.id, error = %err, "rejecting response");
                if let Some(srv) = &s.srv {
                    incr(&srv.counters.failed_resp);
                }
                incr(&cur.counters.failed_resp);
                bad_gateway(s);
                return Analysis::Close;
            }
            Err(Refusal::Denied) => {
                bad_gateway(s);
                return Analysis::Close;
            }
        }
    }
}

/// Why a complete response is not forwarded.
enum Refusal {
    /// the response could not be processed with the rules of this proxy
    Invalid(Arc<Proxy>, PipelineError),
    /// a security rule blocked the response
    Denied,
}

/// Handles an incomplete response head: error, event, or wait for more.
fn wait_for_response(s: &mut Session) -> Analysis {
    let flags = s.rep.flags();

    if s.txn.rsp.is_error() || flags.contains(BufferFlags::FULL) {
        if s.txn.rsp.is_error() || has_error_pos(s.txn.rsp.err_pos) {
            capture_bad_response(s);
        }
        count_failed_response(s);
        server_error(s, HttpErr::BadGateway, ErrCode::ProxyCond);
        return Analysis::Close;
    }

    let failure = if flags.contains(BufferFlags::READ_ERROR) {
        Some((HttpErr::BadGateway, ErrCode::ServerClosed))
    } else if flags.contains(BufferFlags::READ_TIMEOUT) {
        Some((HttpErr::GatewayTimeout, ErrCode::ServerTimeout))
    } else if flags.contains(BufferFlags::SHUTR) {
        Some((HttpErr::BadGateway, ErrCode::ServerClosed))
    } else {
        None
    };

    if let Some((err, code)) = failure {
        if has_error_pos(s.txn.rsp.err_pos) {
            capture_bad_response(s);
        }
        count_failed_response(s);
        server_error(s, err, code);
        return Analysis::Close;
    }

    if flags.contains(BufferFlags::WRITE_ERROR) {
        if has_error_pos(s.txn.rsp.err_pos) {
            capture_bad_response(s);
        }
        debug!(session = s.id, "client gone while waiting for the response");
        s.rep.set_flags(BufferFlags::SHUTR);
        s.rep.analysers = Analysers::empty();
        incr(&s.be.counters.failed_resp);
        s.term.set(ErrCode::ClientClosed, FinState::Headers);
        return Analysis::Close;
    }

    trace!(session = s.id, len = s.rep.len(), state = ?s.txn.rsp.state, "waiting for response head");
    Analysis::Pending
}

fn count_failed_response(s: &Session) {
    if let Some(srv) = &s.srv {
        incr(&srv.counters.failed_resp);
    }
    incr(&s.be.counters.failed_resp);
}

/// Replaces the response with error `err` and shuts both directions.
fn server_error(s: &mut Session, err: HttpErr, code: ErrCode) {
    s.rep.set_flags(BufferFlags::SHUTR);
    s.req.set_flags(BufferFlags::SHUTW);
    s.rep.analysers = Analysers::empty();

    let msg = s.error_reply(err);
    client_reply(s, err.code(), msg, code, FinState::Headers);
}

fn bad_gateway(s: &mut Session) {
    server_error(s, HttpErr::BadGateway, ErrCode::ProxyCond);
}

fn deny_response(s: &Session, counter: &AtomicU64) -> Refusal {
    if let Some(srv) = &s.srv {
        incr(&srv.counters.failed_secu);
    }
    incr(counter);
    Refusal::Denied
}

/// Processes a complete response head.
///
/// # Returns
/// `true` for an interim response, after which the next response is analysed.
fn analyse_response_head(s: &mut Session, now: Instant) -> Result<bool, Refusal> {
    s.txn.rsp.sol = s.txn.rsp.som;

    let st = s.txn.rsp.st();
    s.txn.status = status_code(st.code.slice(s.rep.as_bytes()));
    let status = s.txn.status;

    if s.be.options.intersects(ProxyOptions::CHK_CACHE | ProxyOptions::COOK_NOC) {
        s.txn.flags.insert(initial_flags(status, s.txn.meth));
    }

    if !s.fe.rsp_captures.is_empty() {
        let som = s.txn.rsp.som;
        capture_headers(s.rep.as_bytes(), som, &s.txn.hdr_idx, &s.fe.rsp_captures, &mut s.txn.rsp_cap);
    }

    s.flags.remove(SessionFlags::CONN_CLOSED);

    // the backend rules apply first, then the frontend ones
    let mut cur = s.be.clone();
    loop {
        if !cur.rsp_exp.is_empty()
            && let Err(err) = apply_response_filters(s, &cur.rsp_exp)
        {
            return Err(Refusal::Invalid(cur, err));
        }

        if s.txn.flags.contains(TxnFlags::SVDENY) {
            debug!(proxy = %cur.id, session = s.id, "response denied by filter");
            return Err(deny_response(s, &cur.counters.denied_resp));
        }

        if s.options().intersects(CLOSE_OPTIONS) && !s.flags.contains(SessionFlags::CONN_CLOSED) && status >= 200 {
            normalize_connection(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, &mut s.flags)
                .map_err(|err| Refusal::Invalid(cur.clone(), err.into()))?;
        }

        if status >= 200 {
            for line in &cur.rsp_add {
                add_tail(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, line)
                    .map_err(|err| Refusal::Invalid(cur.clone(), err))?;
            }
        }

        if Arc::ptr_eq(&cur, &s.fe) {
            break;
        }
        cur = s.fe.clone();
    }

    // past the loop, failures are accounted on the frontend
    let invalid = |err| Refusal::Invalid(cur.clone(), err);
    let be = s.be.clone();

    if (be.cookie.is_some()
        || be.appsession.is_some()
        || s.fe.capture_cookie.is_some()
        || be.options.contains(ProxyOptions::CHK_CACHE))
        && status >= 200
    {
        manage_server_cookies(s, now).map_err(invalid)?;
    }

    if be.options.intersects(ProxyOptions::COOK_NOC | ProxyOptions::CHK_CACHE) && status >= 200 {
        check_response_cacheability(&mut s.txn.flags, &s.rep, &s.txn.rsp, &s.txn.hdr_idx);
    }

    if status >= 200 {
        insert_server_cookie(s, &be).map_err(invalid)?;
    }

    if s.txn.flags.contains(TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK | TxnFlags::SCK_ANY)
        && be.options.contains(ProxyOptions::CHK_CACHE)
        && status >= 200
    {
        let server = s.srv.as_ref().map_or("<dispatch>", |srv| srv.id.as_str());
        error!(proxy = %be.id, server, session = s.id, "blocking cacheable cookie in response");
        return Err(deny_response(s, &be.counters.denied_resp));
    }

    if !s.flags.contains(SessionFlags::CONN_CLOSED) && s.options().intersects(CLOSE_OPTIONS) && status >= 200 {
        let bytes = s.rep.as_bytes();
        let version = s.txn.rsp.st().version;
        if version.len != 8 || bytes[version.off + 7] != b'0' {
            add_tail(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, b"Connection: close").map_err(invalid)?;
        }
        s.flags.insert(SessionFlags::CONN_CLOSED);
    }

    if status < 200 {
        debug!(session = s.id, status, "forwarding interim response");
        let next = s.rep.read_cursor();
        s.txn.hdr_idx.reset();
        s.rep.forward(next - s.txn.rsp.som);
        s.txn.rsp.restart_response(next);
        s.txn.status = 0;
        s.rep.analysers.insert(Analysers::RTR_HTTP_HDR);
        return Ok(true);
    }

    Ok(false)
}

/// Adds the persistence cookie of the server which answered, when the client did not
/// present it.
fn insert_server_cookie(s: &mut Session, be: &Proxy) -> Result<(), PipelineError> {
    let (Some(srv), Some(cookie)) = (&s.srv, &be.cookie) else {
        return Ok(());
    };
    if s.flags.contains(SessionFlags::DIRECT)
        || !be.options.contains(ProxyOptions::COOK_INS)
        || (be.options.contains(ProxyOptions::COOK_POST) && s.txn.meth != Method::Post)
    {
        return Ok(());
    }

    let mut line = b"Set-Cookie: ".to_vec();
    line.extend_from_slice(&cookie.name);
    line.push(b'=');
    match &srv.cookie {
        Some(value) => line.extend_from_slice(value),
        // servers without a cookie make the client forget it
        None => line.extend_from_slice(EXPIRED_COOKIE),
    }
    line.extend_from_slice(b"; path=/");
    if let Some(domain) = &cookie.domain {
        line.extend_from_slice(b"; domain=");
        line.extend_from_slice(domain);
    }

    add_tail(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, &line)?;
    s.txn.flags.insert(TxnFlags::SCK_INSERTED);

    if be.options.contains(ProxyOptions::COOK_NOC) && s.txn.flags.contains(TxnFlags::CACHEABLE) {
        s.txn.flags.remove(TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK);
        add_tail(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, b"Cache-control: private")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::run_request_analysers;
    use crate::proxy::{Action, CookieConfig, HdrExp, Server};
    use bytes::Bytes;
    use indoc::indoc;
    use regex::bytes::Regex;

    fn session(fe: Proxy, request: &str) -> Session {
        let mut s = Session::new(1, Arc::new(fe), "10.0.0.1:4000".parse().unwrap(), Instant::now());
        s.req.append(request.as_bytes());
        assert_eq!(run_request_analysers(&mut s, Instant::now()), Analysis::Forward);
        s
    }

    fn respond(s: &mut Session, response: &str) -> Analysis {
        s.rep.append(response.as_bytes());
        process_response(s, Instant::now())
    }

    fn head(s: &Session) -> &str {
        std::str::from_utf8(s.rep.as_bytes()).unwrap()
    }

    fn cookie_backend(options: ProxyOptions) -> Proxy {
        Proxy {
            options: ProxyOptions::COOK_INS | options,
            cookie: Some(CookieConfig {
                name: Bytes::from_static(b"SERVERID"),
                domain: Some(Bytes::from_static(b".example.com")),
            }),
            ..Proxy::new("fe")
        }
    }

    #[test]
    fn test_simple_response() {
        let mut s = session(Proxy::new("fe"), "GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(respond(&mut s, "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"), Analysis::Forward);
        assert_eq!(s.txn.status, 200);
        assert!(s.rep.analysers.is_empty());
        assert_eq!(s.txn.hdr_idx.used(), 1);
    }

    #[test]
    fn test_incomplete_response() {
        let mut s = session(Proxy::new("fe"), "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(respond(&mut s, "HTTP/1.1 200 OK\r\nServ"), Analysis::Pending);
        assert_eq!(respond(&mut s, "er: x\r\n"), Analysis::Pending);
        assert_eq!(respond(&mut s, "\r\n"), Analysis::Forward);
        assert_eq!(s.txn.status, 200);
    }

    #[test]
    fn test_server_events() {
        let cases = [
            (BufferFlags::SHUTR, 502, "SH"),
            (BufferFlags::READ_ERROR, 502, "SH"),
            (BufferFlags::READ_TIMEOUT, 504, "sH"),
        ];
        for (flag, status, term) in cases {
            let mut s = session(Proxy::new("fe"), "GET / HTTP/1.1\r\n\r\n");
            s.rep.append(b"HTTP/1.1 200");
            s.rep.set_flags(flag);

            assert_eq!(process_response(&mut s, Instant::now()), Analysis::Close);
            assert_eq!(s.txn.status, status);
            assert_eq!(s.term.to_string(), term);
            assert!(s.req.flags().contains(BufferFlags::SHUTW));
            assert_eq!(s.be.counters.snapshot().failed_resp, 1);
        }
    }

    #[test]
    fn test_client_gone() {
        let mut s = session(Proxy::new("fe"), "GET / HTTP/1.1\r\n\r\n");
        s.rep.set_flags(BufferFlags::WRITE_ERROR);
        assert_eq!(process_response(&mut s, Instant::now()), Analysis::Close);
        assert!(s.reply.is_none());
        assert_eq!(s.term.to_string(), "CH");
    }

    #[test]
    fn test_invalid_response() {
        let mut s = session(Proxy::new("fe"), "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(respond(&mut s, "HTTP/1.1 200 OK\r\nBad Header\r\n\r\n"), Analysis::Close);
        assert_eq!(s.txn.status, 502);
        assert_eq!(s.term.to_string(), "PH");
        assert!(s.be.invalid_rep.load().is_some());
        assert!(std::str::from_utf8(s.reply.as_deref().unwrap()).unwrap().starts_with("HTTP/1.0 502"));
    }

    #[test]
    fn test_interim_response() {
        let fe = Proxy { rsp_add: vec![Bytes::from_static(b"X-Proxy: fe")], ..Proxy::new("fe") };
        let mut s = session(fe, "POST /upload HTTP/1.1\r\nExpect: 100-continue\r\n\r\n");

        assert_eq!(respond(&mut s, "HTTP/1.1 100 Continue\r\n\r\n"), Analysis::Pending);
        assert_eq!(s.rep.pending_output(), b"HTTP/1.1 100 Continue\r\n\r\n");
        assert_eq!(s.txn.status, 0);
        assert!(s.rep.analysers.contains(Analysers::RTR_HTTP_HDR));

        assert_eq!(respond(&mut s, "HTTP/1.1 201 Created\r\n\r\n"), Analysis::Forward);
        assert_eq!(s.txn.status, 201);
        assert_eq!(s.txn.rsp.som, 25);
        assert_eq!(head(&s), "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nX-Proxy: fe\r\n\r\n");
    }

    #[test]
    fn test_connection_close() {
        let fe = Proxy { options: ProxyOptions::HTTP_CLOSE, ..Proxy::new("fe") };
        let mut s = session(fe, "GET / HTTP/1.1\r\n\r\n");
        respond(&mut s, indoc! {"
            HTTP/1.1 200 OK\r
            Connection: Keep-Alive\r
            Connection: TE\r
            \r
        "});
        assert_eq!(head(&s), "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n");

        let fe = Proxy { options: ProxyOptions::HTTP_CLOSE, ..Proxy::new("fe") };
        let mut s = session(fe, "GET / HTTP/1.1\r\n\r\n");
        respond(&mut s, "HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(head(&s), "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n");

        let fe = Proxy { options: ProxyOptions::HTTP_CLOSE, ..Proxy::new("fe") };
        let mut s = session(fe, "GET / HTTP/1.1\r\n\r\n");
        respond(&mut s, "HTTP/1.0 200 OK\r\n\r\n");
        assert_eq!(head(&s), "HTTP/1.0 200 OK\r\n\r\n");
    }

    #[test]
    fn test_backend_rules_before_frontend() {
        let be = Arc::new(Proxy { rsp_add: vec![Bytes::from_static(b"X-Layer: be")], ..Proxy::new("be") });
        let fe = Proxy { rsp_add: vec![Bytes::from_static(b"X-Layer: fe")], default_backend: Some(be), ..Proxy::new("fe") };
        let mut s = session(fe, "GET / HTTP/1.1\r\n\r\n");

        respond(&mut s, "HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(head(&s), "HTTP/1.1 200 OK\r\nX-Layer: be\r\nX-Layer: fe\r\n\r\n");
    }

    #[test]
    fn test_denied_response() {
        let fe = Proxy {
            rsp_exp: vec![HdrExp::new(Regex::new("^Server: .*IIS").unwrap(), Action::Deny)],
            ..Proxy::new("fe")
        };
        let mut s = session(fe, "GET / HTTP/1.1\r\n\r\n");
        s.assign_server(Arc::new(Server::new("s1")), false);

        assert_eq!(respond(&mut s, "HTTP/1.1 200 OK\r\nServer: Microsoft-IIS/6.0\r\n\r\n"), Analysis::Close);
        assert_eq!(s.txn.status, 502);
        assert_eq!(s.fe.counters.snapshot().denied_resp, 1);
        let srv = s.srv.as_ref().unwrap();
        assert_eq!(srv.counters.failed_secu.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cookie_insertion() {
        let mut s = session(cookie_backend(ProxyOptions::empty()), "GET / HTTP/1.1\r\n\r\n");
        s.assign_server(Arc::new(Server::new("s1").with_cookie("A")), false);

        respond(&mut s, "HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(head(&s), "HTTP/1.1 200 OK\r\nSet-Cookie: SERVERID=A; path=/; domain=.example.com\r\n\r\n");
        assert!(s.txn.flags.contains(TxnFlags::SCK_INSERTED));
    }

    #[test]
    fn test_cookie_removal_for_server_without_cookie() {
        let mut s = session(cookie_backend(ProxyOptions::empty()), "GET / HTTP/1.1\r\n\r\n");
        s.assign_server(Arc::new(Server::new("backup")), false);

        respond(&mut s, "HTTP/1.1 200 OK\r\n\r\n");
        assert!(head(&s).contains(
            "Set-Cookie: SERVERID=; Expires=Thu, 01-Jan-1970 00:00:01 GMT; path=/; domain=.example.com\r\n"
        ));
    }

    #[test]
    fn test_cookie_not_inserted() {
        // the client already presented the cookie
        let mut s = session(cookie_backend(ProxyOptions::empty()), "GET / HTTP/1.1\r\n\r\n");
        s.assign_server(Arc::new(Server::new("s1").with_cookie("A")), true);
        respond(&mut s, "HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(head(&s), "HTTP/1.1 200 OK\r\n\r\n");

        // insertion on POST only
        let mut s = session(cookie_backend(ProxyOptions::COOK_POST), "GET / HTTP/1.1\r\n\r\n");
        s.assign_server(Arc::new(Server::new("s1").with_cookie("A")), false);
        respond(&mut s, "HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(head(&s), "HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn test_cookie_insertion_marks_private() {
        let mut s = session(cookie_backend(ProxyOptions::COOK_NOC), "GET / HTTP/1.1\r\n\r\n");
        s.assign_server(Arc::new(Server::new("s1").with_cookie("A")), false);

        respond(&mut s, "HTTP/1.1 200 OK\r\n\r\n");
        assert!(head(&s).ends_with("domain=.example.com\r\nCache-control: private\r\n\r\n"));
        assert!(!s.txn.flags.intersects(TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK));
    }

    #[test]
    fn test_cacheable_cookie_blocked() {
        let fe = Proxy { options: ProxyOptions::CHK_CACHE, ..Proxy::new("fe") };
        let mut s = session(fe, "GET / HTTP/1.1\r\n\r\n");

        assert_eq!(respond(&mut s, "HTTP/1.1 200 OK\r\nSet-Cookie: id=42\r\n\r\n"), Analysis::Close);
        assert_eq!(s.txn.status, 502);
        assert_eq!(s.fe.counters.snapshot().denied_resp, 1);

        let fe = Proxy { options: ProxyOptions::CHK_CACHE, ..Proxy::new("fe") };
        let mut s = session(fe, "GET / HTTP/1.1\r\n\r\n");
        let response = "HTTP/1.1 200 OK\r\nCache-Control: private\r\nSet-Cookie: id=42\r\n\r\n";
        assert_eq!(respond(&mut s, response), Analysis::Forward);
    }
}
