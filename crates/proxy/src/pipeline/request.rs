//! Request analysers.
//!
//! [`process_request`] waits for a complete request head, then walks the frontend and the
//! selected backends in turn: block conditions, filters, `Connection` handling, added
//! headers, statistics access, redirects and backend switching. Once the backend is
//! settled, persistence is looked up and the forwarded address headers are added.
//!
//! [`process_tarpit`] holds a tarpitted request until its deadline, and
//! [`process_request_body`] waits for the first body bytes when a POST body may carry the
//! balancing parameter.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::codec::analyze;
use crate::protocol::chars::{LogEncoding, encode_for_log, is_crlf};
use crate::protocol::error::PipelineError;
use crate::protocol::fixed::{HTTP_200, HttpErr, redirect_prefix};
use crate::protocol::header::{HdrCtx, add_tail, capture_headers, find_header, get_path};
use crate::protocol::{Analysers, BUFSIZE, BufferFlags, EditError, Method, ParseState};
use crate::proxy::{
    CLOSE_OPTIONS, ForwardHeader, Proxy, ProxyOptions, REQURI_LEN, RedirectKind, RedirectRule, any_pass, incr,
};
use crate::session::{ErrCode, FinState, Session, SessionFlags, TxnFlags};
use crate::utils::{parse_signed, shift, starts_with_ignore_case};

use super::cookie::{appsession_from_uri, manage_client_cookies};
use super::filter::{apply_request_filters, reparse_request_line};
use super::stats::check_stats_uri;
use super::{Analysis, capture_bad_request, client_reply, has_error_pos, normalize_connection};

/// Analyses the request head received so far.
///
/// # Returns
/// - [`Analysis::Pending`] while the head is incomplete
/// - [`Analysis::Forward`] once the head is processed
/// - [`Analysis::Close`] when the proxy answered the request itself or gave up on it
pub fn process_request(s: &mut Session, now: Instant) -> Analysis {
    if s.req.read_cursor() < s.req.len() {
        analyze(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx);
    }

    if !s.txn.req.is_complete() {
        return wait_for_request(s, now);
    }

    if has_error_pos(s.txn.req.err_pos) {
        capture_bad_request(s);
    }
    s.req.analysers.remove(Analysers::REQ_HTTP_HDR);
    s.req.analyse_exp = None;

    match analyse_request_head(s, now) {
        Ok(analysis) => analysis,
        Err(err) => {
            warn!(proxy = %s.fe.id, session = s.id, error = %err, "rejecting request");
            bad_request(s);
            Analysis::Close
        }
    }
}

/// Handles an incomplete request head: error, event or deadline, or wait for more.
fn wait_for_request(s: &mut Session, now: Instant) -> Analysis {
    let flags = s.req.flags();

    if s.txn.req.is_error() || flags.contains(BufferFlags::FULL) {
        bad_request(s);
        return Analysis::Close;
    }

    if flags.contains(BufferFlags::READ_ERROR) {
        // nothing can be sent back
        abort_request(s, None, ErrCode::ClientClosed);
        return Analysis::Close;
    }
    if flags.contains(BufferFlags::READ_TIMEOUT) || s.req.is_expired(now) {
        abort_request(s, Some(HttpErr::RequestTimeout), ErrCode::ClientTimeout);
        return Analysis::Close;
    }
    if flags.contains(BufferFlags::SHUTR) {
        abort_request(s, Some(HttpErr::BadRequest), ErrCode::ClientClosed);
        return Analysis::Close;
    }

    if s.req.analyse_exp.is_none() {
        s.req.analyse_exp = s.fe.timeouts.http_request.map(|timeout| now + timeout);
    }
    trace!(session = s.id, len = s.req.len(), state = ?s.txn.req.state, "waiting for request head");
    Analysis::Pending
}

/// Gives up on an incomplete request.
fn abort_request(s: &mut Session, err: Option<HttpErr>, code: ErrCode) {
    if has_error_pos(s.txn.req.err_pos) {
        capture_bad_request(s);
    }
    s.txn.req.state = ParseState::Error;
    s.req.analysers = Analysers::empty();
    incr(&s.fe.counters.failed_req);

    match err {
        Some(err) => {
            let msg = s.error_reply(err);
            client_reply(s, err.code(), msg, code, FinState::Request);
        }
        None => s.term.set(code, FinState::Request),
    }
}

/// Answers a 400 and keeps a copy of the request when it failed to parse.
fn bad_request(s: &mut Session) {
    if s.txn.req.is_error() || has_error_pos(s.txn.req.err_pos) {
        capture_bad_request(s);
    }
    s.txn.req.state = ParseState::Error;
    s.req.analysers = Analysers::empty();
    incr(&s.fe.counters.failed_req);

    let msg = s.error_reply(HttpErr::BadRequest);
    client_reply(s, 400, msg, ErrCode::ProxyCond, FinState::Request);
}

fn deny(s: &mut Session, now: Instant) -> Analysis {
    s.tv_request = Some(now);
    let msg = s.error_reply(HttpErr::Forbidden);
    client_reply(s, 403, msg, ErrCode::ProxyCond, FinState::Request);
    Analysis::Close
}

fn analyse_request_head(s: &mut Session, now: Instant) -> Result<Analysis, PipelineError> {
    let som = s.txn.req.som;
    s.txn.req.sol = som;

    let rq = s.txn.req.rq();
    s.txn.meth = Method::classify(rq.method.slice(s.req.as_bytes()));
    if matches!(s.txn.meth, Method::Get | Method::Head) {
        s.flags.insert(SessionFlags::REDIRECTABLE);
    }

    if let Some(monitor) = &s.fe.monitor_uri
        && rq.uri.slice(s.req.as_bytes()) == &monitor[..]
    {
        return Ok(monitor_reply(s));
    }

    if s.fe.options.contains(ProxyOptions::HTTP_LOG) {
        let line = &s.req.as_bytes()[som..som + rq.len.min(REQURI_LEN - 1)];
        s.txn.uri = Some(encode_for_log(line, LogEncoding::Url));
        s.log();
    }

    if rq.version.len == 0 {
        upgrade_http09(s)?;
    }

    if !s.fe.req_captures.is_empty() {
        capture_headers(s.req.as_bytes(), som, &s.txn.hdr_idx, &s.fe.req_captures, &mut s.txn.req_cap);
    }

    // every backend met applies its own rules until the backend stops changing
    loop {
        let cur = s.be.clone();

        if any_pass(&cur.block, s) {
            debug!(proxy = %cur.id, session = s.id, "request blocked");
            return Ok(deny(s, now));
        }

        if !cur.req_exp.is_empty() {
            apply_request_filters(s, &cur.req_exp)?;
        }
        if !triomphe::Arc::ptr_eq(&s.be, &cur) {
            s.assign_backend();
        }

        if s.txn.flags.contains(TxnFlags::CLDENY) {
            debug!(proxy = %cur.id, session = s.id, "request denied by filter");
            return Ok(deny(s, now));
        }

        if s.options().intersects(CLOSE_OPTIONS) && !s.flags.contains(SessionFlags::CONN_CLOSED) {
            normalize_connection(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, &mut s.flags)?;
        }

        for line in &cur.req_add {
            add_tail(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, line)?;
        }

        if matches!(s.txn.meth, Method::Get | Method::Head) && check_stats_uri(s, &cur, now) {
            s.req.analysers = Analysers::empty();
            return Ok(Analysis::Close);
        }

        if let Some(rule) = cur.redirect_rules.iter().find(|rule| rule.cond.as_ref().is_none_or(|cond| cond.pass(s))) {
            send_redirect(s, rule, now)?;
            return Ok(Analysis::Close);
        }

        if !s.flags.contains(SessionFlags::BE_ASSIGNED)
            && let Some(rule) = cur.switching_rules.iter().find(|rule| rule.cond.pass(s))
        {
            s.switch_backend(rule.backend.clone());
            s.assign_backend();
        }

        if !s.flags.contains(SessionFlags::BE_ASSIGNED)
            && let Some(default) = &cur.default_backend
        {
            s.switch_backend(default.clone());
            s.assign_backend();
        }

        if triomphe::Arc::ptr_eq(&s.be, &cur) {
            break;
        }
    }
    s.assign_backend();

    let be = s.be.clone();
    let fe = s.fe.clone();

    if be.options.contains(ProxyOptions::HTTP_PROXY) && !s.flags.contains(SessionFlags::ADDR_SET) {
        let uri = s.txn.req.rq().uri.slice(s.req.as_bytes());
        s.srv_addr = absolute_uri_addr(uri);
    }

    if be.appsession.is_some() {
        appsession_from_uri(s, now);
    }

    if (be.cookie.is_some() || be.appsession.is_some() || fe.capture_cookie.is_some())
        && !s.txn.flags.intersects(TxnFlags::CLDENY | TxnFlags::CLTARPIT)
    {
        manage_client_cookies(s, now)?;
    }

    add_forwarded_for(s, &fe, &be)?;
    add_original_to(s, &fe, &be)?;

    if !s.flags.contains(SessionFlags::CONN_CLOSED) && s.options().intersects(CLOSE_OPTIONS) {
        let bytes = s.req.as_bytes();
        let version = s.txn.req.rq().version;
        if version.len != 8 || bytes[version.off + 7] != b'0' {
            add_tail(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, b"Connection: close")?;
        }
        s.flags.insert(SessionFlags::CONN_CLOSED);
    }

    wait_for_body_hint(s, &be);

    s.req.set_rlim_max();
    s.tv_request = Some(now);

    if s.txn.flags.contains(TxnFlags::CLTARPIT) {
        debug!(proxy = %be.id, session = s.id, "tarpitting request");
        s.req.clear();
        s.req.analysers.insert(Analysers::REQ_HTTP_TARPIT);
        s.req.analyse_exp = Some(now + be.timeouts.tarpit.unwrap_or_default());
    }

    Ok(Analysis::Forward)
}

/// Answers a request for the monitor URI.
fn monitor_reply(s: &mut Session) -> Analysis {
    s.flags.insert(SessionFlags::MONITOR);

    let fe = s.fe.clone();
    if any_pass(&fe.monitor_fail, s) {
        debug!(proxy = %fe.id, session = s.id, "monitor request failed by condition");
        let msg = s.error_reply(HttpErr::Unavailable);
        client_reply(s, 503, msg, ErrCode::ProxyCond, FinState::Request);
    } else {
        client_reply(s, 200, Bytes::from_static(HTTP_200), ErrCode::ProxyCond, FinState::Request);
    }
    Analysis::Close
}

/// Turns an HTTP/0.9 request line into an HTTP/1.0 one, adding `/` for an empty URI.
fn upgrade_http09(s: &mut Session) -> Result<(), PipelineError> {
    let rq = s.txn.req.rq();
    let mut end = s.txn.req.som + rq.len;

    if rq.uri.len == 0 {
        end = shift(end, s.txn.req.replace(&mut s.req, end, end, b" /")?);
    }
    s.txn.req.replace(&mut s.req, end, end, b" HTTP/1.0\r\n")?;
    debug!(session = s.id, "upgraded HTTP/0.9 request");

    reparse_request_line(s)
}

fn send_redirect(s: &mut Session, rule: &RedirectRule, now: Instant) -> Result<(), PipelineError> {
    let code = if matches!(rule.code, 301 | 303) { rule.code } else { 302 };
    let mut rdr = redirect_prefix(code).unwrap_or_default().to_vec();

    match rule.kind {
        RedirectKind::Prefix => {
            let bytes = s.req.as_bytes();
            let uri = s.txn.req.rq().uri;
            let path = match get_path(bytes, uri) {
                Some(start) => {
                    let path = &bytes[start..uri.end()];
                    match path.iter().position(|&c| c == b'?') {
                        Some(qs) if rule.drop_query => &path[..qs],
                        _ => path,
                    }
                }
                None => b"/",
            };

            // a "/" prefix redirects to the same path
            if &rule.target[..] != b"/" {
                rdr.extend_from_slice(&rule.target);
            }
            rdr.extend_from_slice(path);
        }
        RedirectKind::Location => rdr.extend_from_slice(&rule.target),
    }

    if let Some(cookie) = &rule.cookie {
        rdr.extend_from_slice(b"\r\nSet-Cookie: ");
        rdr.extend_from_slice(cookie);
    }
    rdr.extend_from_slice(b"\r\n\r\n");

    if rdr.len() > BUFSIZE {
        return Err(EditError::no_space(rdr.len(), BUFSIZE).into());
    }

    debug!(session = s.id, code, "redirecting request");
    s.tv_request = Some(now);
    client_reply(s, code, Bytes::from(rdr), ErrCode::ProxyCond, FinState::Request);
    Ok(())
}

/// Reads the server address of an absolute `http://a.b.c.d[:port]/` URI.
fn absolute_uri_addr(uri: &[u8]) -> Option<SocketAddr> {
    const SCHEME: &[u8] = b"http://";

    if !starts_with_ignore_case(uri, SCHEME) {
        return None;
    }
    let rest = &uri[SCHEME.len()..];
    let end = rest.iter().position(|&c| c == b'/').unwrap_or(rest.len());
    let authority = std::str::from_utf8(&rest[..end]).ok()?;

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => (authority, 80),
    };
    let ip = host.parse::<Ipv4Addr>().ok()?;
    Some(SocketAddr::from((ip, port)))
}

/// Picks the header settings of the backend, falling back on the frontend's.
fn forward_header<'a>(
    fe: &'a Proxy,
    be: &'a Proxy,
    setting: impl Fn(&Proxy) -> Option<&ForwardHeader>,
) -> Option<&'a ForwardHeader> {
    setting(be).or_else(|| setting(fe))
}

/// Returns `true` when `ip` falls in the exception network of `fe` or `be`.
fn is_excepted(ip: Ipv4Addr, fe: Option<&ForwardHeader>, be: Option<&ForwardHeader>) -> bool {
    [fe, be].into_iter().flatten().filter_map(|hdr| hdr.except).any(|net| net.contains(ip))
}

fn add_forwarded_for(s: &mut Session, fe: &Proxy, be: &Proxy) -> Result<(), PipelineError> {
    let Some(hdr) = forward_header(fe, be, |p| p.fwdfor.as_ref()) else {
        return Ok(());
    };

    let line = match s.cli_addr.ip() {
        IpAddr::V4(ip) if is_excepted(ip, fe.fwdfor.as_ref(), be.fwdfor.as_ref()) => return Ok(()),
        ip => format!("{}: {ip}", hdr.header),
    };
    add_tail(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, line.as_bytes())
}

fn add_original_to(s: &mut Session, fe: &Proxy, be: &Proxy) -> Result<(), PipelineError> {
    let Some(hdr) = forward_header(fe, be, |p| p.orgto.as_ref()) else {
        return Ok(());
    };
    let Some(IpAddr::V4(ip)) = s.frt_addr.map(|addr| addr.ip()) else {
        return Ok(());
    };
    if is_excepted(ip, fe.orgto.as_ref(), be.orgto.as_ref()) {
        return Ok(());
    }

    let line = format!("{}: {ip}", hdr.header);
    add_tail(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, line.as_bytes())
}

/// Offset of the first body byte, after the empty line ending the headers.
fn body_start(bytes: &[u8], eoh: usize) -> usize {
    if bytes.get(eoh) == Some(&b'\r') { eoh + 2 } else { eoh + 1 }
}

/// Returns the first value of header `name` in the request.
fn first_value<'a>(s: &'a Session, name: &[u8]) -> Option<&'a [u8]> {
    let bytes = s.req.as_bytes();
    let mut ctx = HdrCtx::default();
    find_header(name, bytes, s.txn.req.som, &s.txn.hdr_idx, &mut ctx).then(|| ctx.value(bytes))
}

fn is_chunked(s: &Session) -> bool {
    first_value(s, b"Transfer-Encoding").is_some_and(|value| starts_with_ignore_case(value, b"chunked"))
}

/// Enables the body analyser when the balancing parameter may be in a POST body which is
/// not fully received yet.
fn wait_for_body_hint(s: &mut Session, be: &Proxy) {
    let Some(param) = &be.url_param else {
        return;
    };
    if param.post_limit == 0
        || s.txn.meth != Method::Post
        || s.flags.intersects(SessionFlags::ASSIGNED | SessionFlags::DIRECT)
        || s.req.flags().contains(BufferFlags::FULL)
    {
        return;
    }

    let bytes = s.req.as_bytes();
    let rq = s.txn.req.rq();
    if rq.uri.slice(bytes).contains(&b'?') {
        return;
    }

    let received = bytes.len().saturating_sub(body_start(bytes, s.txn.req.eoh));

    if rq.is_http11(bytes) && first_value(s, b"Expect").is_some_and(|v| v.eq_ignore_ascii_case(b"100-continue")) {
        return;
    }

    let limit = param.post_limit as u64;
    if received as u64 > limit {
        return;
    }

    if is_chunked(s) {
        s.req.analysers.insert(Analysers::REQ_HTTP_BODY);
        return;
    }

    let mut hint = 0;
    if let Some(len) = first_value(s, b"Content-Length").and_then(parse_signed)
        && len > 0
    {
        s.txn.req.hdr_content_len = len as u64;
        hint = len as u64;
    }

    if (received as u64) < hint.min(limit) {
        trace!(session = s.id, received, hint, "waiting for request body");
        s.req.analysers.insert(Analysers::REQ_HTTP_BODY);
    }
}

/// Holds a tarpitted request until its deadline or the client leaves, then answers a 500.
pub fn process_tarpit(s: &mut Session, now: Instant) -> Analysis {
    let flags = s.req.flags();
    if !flags.intersects(BufferFlags::SHUTR | BufferFlags::READ_ERROR) && !s.req.is_expired(now) {
        return Analysis::Pending;
    }

    s.txn.status = 500;
    if flags.contains(BufferFlags::READ_ERROR) {
        s.term.set(ErrCode::ProxyCond, FinState::Tarpit);
    } else {
        let msg = s.error_reply(HttpErr::ServerError);
        client_reply(s, 500, msg, ErrCode::ProxyCond, FinState::Tarpit);
    }

    s.req.analysers = Analysers::empty();
    s.req.analyse_exp = None;
    incr(&s.fe.counters.failed_req);
    Analysis::Close
}

/// Waits until enough body bytes are received to look for the balancing parameter.
///
/// The wait ends with the first chunk of a chunked body or the announced length, capped
/// by the post limit, or as soon as no more data can arrive.
pub fn process_request_body(s: &mut Session, now: Instant) -> Analysis {
    let bytes = s.req.as_bytes();
    let len = bytes.len();
    let mut body = body_start(bytes, s.txn.req.eoh);
    let mut limit = s.be.url_param.as_ref().map_or(0, |param| param.post_limit as u64);

    if is_chunked(s) {
        let mut chunk: u64 = 0;
        while body < len && !is_crlf(bytes[body]) {
            let Some(hex) = char::from(bytes[body]).to_digit(16) else {
                break;
            };
            chunk = (chunk << 4) | u64::from(hex);
            body += 1;
        }
        // the size line is only usable with its CRLF
        if body + 2 < len && &bytes[body..body + 2] == b"\r\n" {
            body += 2;
            limit = limit.min(chunk);
        }
    } else {
        limit = limit.min(s.txn.req.hdr_content_len);
    }

    let received = len.saturating_sub(body) as u64;
    let flags = s.req.flags();
    if received >= limit
        || flags.intersects(BufferFlags::FULL | BufferFlags::READ_ERROR | BufferFlags::SHUTR | BufferFlags::READ_TIMEOUT)
        || s.req.is_expired(now)
    {
        s.tv_request = Some(now);
        s.req.analysers.remove(Analysers::REQ_HTTP_BODY);
        s.req.analyse_exp = None;
        return Analysis::Forward;
    }

    if s.req.analyse_exp.is_none() {
        s.req.analyse_exp = s.fe.timeouts.http_request.map(|timeout| now + timeout);
    }
    Analysis::Pending
}
