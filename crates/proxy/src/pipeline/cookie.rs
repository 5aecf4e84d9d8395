//! Cookie based persistence.
//!
//! On requests, the persistence cookie designates the server the client was bound to; it
//! may be stripped of the server id (prefix mode) or hidden from the server altogether
//! (insert and indirect modes). On responses, the persistence cookie set by the server is
//! removed, rewritten or prefixed depending on the mode. Application sessions bind a
//! session id found in a cookie or in the URI to the server which issued it.
//!
//! ```text
//! Cookie: NAME=SRV~VALUE;
//!         |   ||  |     |
//!         p1  p2  delim p4
//!             p3
//! ```

use std::time::Instant;

use bytes::Bytes;
use tracing::debug;
use triomphe::Arc;

use crate::protocol::Method;
use crate::protocol::error::PipelineError;
use crate::protocol::header::{HeaderCursor, header_match};
use crate::proxy::{COOKIE_DELIM, Proxy, ProxyOptions, Server};
use crate::session::{CookieState, Session, SessionFlags, TxnFlags};
use crate::utils::{shift, starts_with_ignore_case};

/// Result of a persistence server lookup.
enum Lookup {
    Usable(Arc<Server>),
    Down,
    Missing,
}

/// Finds the first usable server accepted by `select`.
fn lookup(be: &Proxy, select: impl Fn(&Server) -> bool) -> Lookup {
    let persist = be.options.contains(ProxyOptions::PERSIST);
    let mut found = Lookup::Missing;

    for srv in be.servers.iter().filter(|srv| select(srv)) {
        if srv.is_running() || persist {
            return Lookup::Usable(srv.clone());
        }
        found = Lookup::Down;
    }
    found
}

/// Records a lookup verdict and binds the session to the server found.
fn persist(s: &mut Session, lookup: Lookup) -> bool {
    match lookup {
        Lookup::Usable(srv) => {
            debug!(session = s.id, server = %srv.id, "request bound to server by persistence");
            s.txn.set_cookie_state(CookieState::Valid);
            s.assign_server(srv, true);
            true
        }
        Lookup::Down => {
            s.txn.set_cookie_state(CookieState::Down);
            false
        }
        Lookup::Missing => false,
    }
}

/// Refreshes application session `id` and binds the session to its server, if known.
fn bind_app_session(s: &mut Session, be: &Proxy, id: &[u8], now: Instant) {
    let Some(app) = &be.appsession else {
        return;
    };
    match app.store.touch(id, now) {
        Some(server_id) => {
            persist(s, lookup(be, |srv| srv.id == server_id));
        }
        None => debug!(session = s.id, "application session without server"),
    }
}

#[inline]
fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r')
}

/// What one client cookie asks for, computed before the buffer is edited.
struct ClientCookie {
    capture: Option<Bytes>,
    /// persistence verdict and end of the server id, for the persistence cookie
    persistence: Option<(Lookup, usize)>,
    app_id: Option<Bytes>,
}

/// Scans the `Cookie` headers of the request.
///
/// # Errors
/// Fails when the buffer refuses an edit.
pub(crate) fn manage_client_cookies(s: &mut Session, now: Instant) -> Result<(), PipelineError> {
    let fe = s.fe.clone();
    let be = s.be.clone();
    let mut cursor = HeaderCursor::new(&s.txn.req, &s.txn.hdr_idx);

    while cursor.advance(&s.txn.hdr_idx) {
        let Some(val) = header_match(cursor.line(s.req.as_bytes(), &s.txn.hdr_idx), b"Cookie") else {
            continue;
        };

        let mut eol = cursor.eol(&s.txn.hdr_idx);
        let mut p1 = cursor.sol() + val;
        let mut colon = p1;
        // start of our cookie and of the delimiter before it, while it waits for deletion
        let mut del: Option<(usize, usize)> = None;
        let mut app_cookies = 0;

        while p1 < eol {
            let bytes = s.req.as_bytes();
            while p1 < eol {
                match bytes[p1] {
                    b';' | b',' => colon = p1,
                    c if is_space(c) => {}
                    _ => break,
                }
                p1 += 1;
            }
            if p1 == eol {
                break;
            }

            let Some(p2) = bytes[p1..eol].iter().position(|&c| c == b'=').map(|i| p1 + i) else {
                break;
            };
            let p3 = p2 + 1;
            if p3 == eol {
                break;
            }
            let mut p4 = bytes[p3..eol]
                .iter()
                .position(|&c| is_space(c) || c == b';' || c == b',')
                .map_or(eol, |i| p3 + i);

            if bytes[p1] == b'$' {
                p1 = p4;
                continue;
            }

            let cookie = inspect_client_cookie(&fe, &be, s.txn.cli_cookie.is_none(), bytes, p1, p2, p3, p4);

            if let Some(capture) = cookie.capture {
                s.txn.cli_cookie = Some(capture);
            }

            match cookie.persistence {
                Some((found, delim)) => {
                    if !persist(s, found) && !s.txn.flags.intersects(TxnFlags::CK_DOWN) {
                        s.txn.set_cookie_state(CookieState::Invalid);
                    }

                    if be.options.contains(ProxyOptions::COOK_PFX) && delim != p4 {
                        let delta = cursor.replace(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, p3, delim + 1, &[])?;
                        p4 = shift(p4, delta);
                        eol = shift(eol, delta);
                        del = None;
                        app_cookies += 1;
                    } else if del.is_none() && be.options.contains(ProxyOptions::COOK_INS | ProxyOptions::COOK_IND) {
                        del = Some((p1, colon));
                    }
                }
                None => {
                    app_cookies += 1;
                    if let Some((start, _)) = del.take() {
                        let delta = cursor.replace(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, start, p1, &[])?;
                        p4 = shift(p4, delta);
                        eol = shift(eol, delta);
                    }
                }
            }

            if let Some(id) = &cookie.app_id {
                bind_app_session(s, &be, id, now);
            }
            p1 = p4;
        }

        if let Some((_, del_colon)) = del {
            if app_cookies > 0 {
                cursor.replace(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx, del_colon, eol, &[])?;
            } else {
                debug!(session = s.id, "removing persistence cookie header");
                cursor.remove(&mut s.req, &mut s.txn.req, &mut s.txn.hdr_idx)?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments, reason = "the four cookie boundaries are offsets into the line being walked")]
fn inspect_client_cookie(
    fe: &Proxy,
    be: &Proxy,
    may_capture: bool,
    bytes: &[u8],
    p1: usize,
    p2: usize,
    p3: usize,
    p4: usize,
) -> ClientCookie {
    let name = &bytes[p1..p2];

    let capture = fe
        .capture_cookie
        .as_ref()
        .filter(|capture| may_capture && p4 - p1 >= capture.name.len() && bytes[p1..].starts_with(&capture.name))
        .map(|capture| Bytes::copy_from_slice(&bytes[p1..p1 + (p4 - p1).min(capture.len)]));

    let persistence = be.cookie.as_ref().filter(|ck| name == &ck.name[..]).map(|_| {
        let delim = if be.options.contains(ProxyOptions::COOK_PFX) {
            bytes[p3..p4].iter().position(|&c| c == COOKIE_DELIM).map_or(p4, |i| p3 + i)
        } else {
            p4
        };
        // an empty server id never designates a server
        let found = if delim == p3 {
            Lookup::Missing
        } else {
            let id = &bytes[p3..delim];
            lookup(be, |srv| srv.cookie.as_deref() == Some(id))
        };
        (found, delim)
    });

    let app_id = be
        .appsession
        .as_ref()
        .filter(|app| name == &app.name[..])
        .map(|app| Bytes::copy_from_slice(&bytes[p3..(p3 + app.len).min(p4)]));

    ClientCookie { capture, persistence, app_id }
}

/// Scans the `Set-Cookie` headers of the response. Only the first cookie of each header
/// is looked at.
///
/// # Errors
/// Fails when the buffer refuses an edit.
pub(crate) fn manage_server_cookies(s: &mut Session, now: Instant) -> Result<(), PipelineError> {
    let fe = s.fe.clone();
    let be = s.be.clone();
    let mut cursor = HeaderCursor::new(&s.txn.rsp, &s.txn.hdr_idx);

    while cursor.advance(&s.txn.hdr_idx) {
        let Some(val) = header_match(cursor.line(s.rep.as_bytes(), &s.txn.hdr_idx), b"Set-Cookie") else {
            continue;
        };

        s.txn.flags.insert(TxnFlags::SCK_ANY);
        if be.cookie.is_none() && be.appsession.is_none() && fe.capture_cookie.is_none() {
            return Ok(());
        }

        let bytes = s.rep.as_bytes();
        let eol = cursor.eol(&s.txn.hdr_idx);
        let p1 = cursor.sol() + val;
        if p1 >= eol || bytes[p1] == b';' {
            continue;
        }
        let Some(p2) = bytes[p1..eol].iter().position(|&c| c == b'=' || c == b';').map(|i| p1 + i) else {
            continue;
        };
        let p3 = p2 + 1;
        if bytes[p2] == b';' || p3 == eol {
            continue;
        }
        let p4 = bytes[p3..eol].iter().position(|&c| is_space(c) || c == b';').map_or(eol, |i| p3 + i);

        if let Some(capture) = &fe.capture_cookie
            && s.txn.srv_cookie.is_none()
            && p4 - p1 >= capture.name.len()
            && bytes[p1..].starts_with(&capture.name)
        {
            let len = (p4 - p1).min(capture.len);
            s.txn.srv_cookie = Some(Bytes::copy_from_slice(&bytes[p1..p1 + len]));
        }

        let name = &bytes[p1..p2];
        if be.cookie.as_ref().is_some_and(|ck| name == &ck.name[..]) {
            s.txn.flags.insert(TxnFlags::SCK_SEEN);
            let srv_cookie = s.srv.as_ref().and_then(|srv| srv.cookie.clone());

            if (s.srv.is_some() && be.options.contains(ProxyOptions::COOK_INS))
                || (s.flags.contains(SessionFlags::DIRECT) && be.options.contains(ProxyOptions::COOK_IND))
            {
                cursor.remove(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx)?;
                s.txn.flags.insert(TxnFlags::SCK_DELETED);
            } else if let Some(ck) = &srv_cookie
                && be.options.contains(ProxyOptions::COOK_RW)
            {
                cursor.replace(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, p3, p4, ck)?;
                s.txn.flags.insert(TxnFlags::SCK_INSERTED | TxnFlags::SCK_DELETED);
            } else if let Some(ck) = &srv_cookie
                && be.options.contains(ProxyOptions::COOK_PFX)
            {
                let mut prefix = Vec::with_capacity(ck.len() + 1);
                prefix.extend_from_slice(ck);
                prefix.push(COOKIE_DELIM);
                cursor.replace(&mut s.rep, &mut s.txn.rsp, &mut s.txn.hdr_idx, p3, p3, &prefix)?;
                s.txn.flags.insert(TxnFlags::SCK_INSERTED | TxnFlags::SCK_DELETED);
            }
        } else if let Some(app) = &be.appsession
            && name == &app.name[..]
            && let Some(srv) = &s.srv
        {
            let id = &bytes[p3..(p3 + app.len).min(p4)];
            app.store.learn(id, &srv.id, now);
        }
    }
    Ok(())
}

/// Looks for an application session id in a `;NAME=` segment of the request line.
pub(crate) fn appsession_from_uri(s: &mut Session, now: Instant) {
    let be = s.be.clone();
    let Some(app) = &be.appsession else {
        return;
    };
    if !matches!(s.txn.meth, Method::Get | Method::Post) {
        return;
    }

    let som = s.txn.req.som;
    let line = &s.req.as_bytes()[som..som + s.txn.req.rq().len];
    let Some(semi) = line.iter().position(|&c| c == b';') else {
        return;
    };
    let rest = &line[semi + 1..];
    if rest.len() <= app.name.len() + 1 || !starts_with_ignore_case(rest, &app.name) {
        return;
    }

    // a shorter id ends with the request line
    let start = app.name.len() + 1;
    let end = (start + app.len).min(rest.len());
    let id = Bytes::copy_from_slice(&rest[start..end]);
    bind_app_session(s, &be, &id, now);
}
