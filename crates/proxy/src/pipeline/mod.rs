//! Request and response processing.
//!
//! The analysers in this module run on a [`Session`] each time new data is available. They
//! parse the message head through [`crate::codec::analyze`], then apply the frontend and
//! backend policies to the complete head directly in the buffer: filters, backend
//! selection, persistence cookies, forwarded address headers and connection handling.
//!
//! # Components
//!
//! - [`run_request_analysers`]: drives the request head, tarpit and body analysers
//! - [`process_request`]: the request head analyser
//! - [`process_tarpit`] / [`process_request_body`]: the follow-up request analysers
//! - [`process_response`]: the response head analyser, 1xx responses included
//! - [`produce_content`]: fills the reply of a request answered by the proxy itself
//! - [`perform_server_redirect`] / [`return_server_error`]: replies on behalf of a server
//! - [`acl`]: built-in conditions for rules
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use micro_proxy::pipeline::{Analysis, run_request_analysers};
//! use micro_proxy::proxy::Proxy;
//! use micro_proxy::session::Session;
//! use triomphe::Arc;
//!
//! let fe = Arc::new(Proxy::new("web"));
//! let mut s = Session::new(1, fe, "192.0.2.1:40000".parse().unwrap(), Instant::now());
//!
//! s.req.append(b"GET /index.html HTTP/1.1\r\nHost: ");
//! assert_eq!(run_request_analysers(&mut s, Instant::now()), Analysis::Pending);
//!
//! s.req.append(b"example.com\r\n\r\n");
//! assert_eq!(run_request_analysers(&mut s, Instant::now()), Analysis::Forward);
//! ```

use std::time::{Instant, SystemTime};

use bitflags::bitflags;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::protocol::fixed::{HttpErr, error_message, redirect_prefix};
use crate::protocol::header::{HeaderCursor, get_path, header_match};
use crate::protocol::{Analysers, Buffer, EditError, ErrPos, HeaderIndex, HttpMessage};
use crate::proxy::incr;
use crate::session::{
    ContentProducer, DataSource, ErrCode, ErrorSnapshot, FinState, Session, SessionFlags, SnapshotOrigin,
};
use crate::utils::starts_with_ignore_case;

pub mod acl;
mod cache;
mod cookie;
mod filter;
mod request;
mod response;
mod stats;

pub use request::{process_request, process_request_body, process_tarpit};
pub use response::process_response;

/// Outcome of an analyser run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analysis {
    /// more data, or a deadline, is awaited
    Pending,
    /// the message may be forwarded
    Forward,
    /// the proxy answers by itself, through [`Session::reply`] or the content producer,
    /// then closes
    Close,
}

bitflags! {
    /// Why the connection to a server could not be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamErrors: u32 {
        const QUEUE_ABRT = 0x0001;
        const QUEUE_TO = 0x0002;
        const QUEUE_ERR = 0x0004;
        const CONN_ABRT = 0x0008;
        const CONN_TO = 0x0010;
        const CONN_ERR = 0x0020;
        const CONN_OTHER = 0x0040;
    }
}

/// Runs the request analysers which are still enabled on the session.
///
/// The head analyser runs first. Once it is done, a tarpitted request waits for its
/// deadline and a request with a body to inspect waits for enough body bytes.
pub fn run_request_analysers(s: &mut Session, now: Instant) -> Analysis {
    if s.req.analysers.contains(Analysers::REQ_HTTP_HDR) {
        match process_request(s, now) {
            Analysis::Forward => {}
            other => return other,
        }
    }
    if s.req.analysers.contains(Analysers::REQ_HTTP_TARPIT) {
        return process_tarpit(s, now);
    }
    if s.req.analysers.contains(Analysers::REQ_HTTP_BODY) {
        return process_request_body(s, now);
    }
    Analysis::Forward
}

/// Produces the reply of a request the proxy answers by itself.
///
/// Only statistics requests are produced; any failure answers a 500.
pub fn produce_content(s: &mut Session, producer: &dyn ContentProducer) -> Analysis {
    match s.data_source {
        DataSource::Stats(flags) => match producer.produce(flags, &s.be) {
            Ok(content) => {
                s.reply = Some(content);
                return Analysis::Close;
            }
            Err(err) => warn!(session = s.id, error = %err, "failed to produce statistics"),
        },
        DataSource::None => warn!(session = s.id, "no content to produce"),
    }

    let msg = s.error_reply(HttpErr::ServerError);
    client_reply(s, 500, msg, ErrCode::ProxyCond, FinState::Request);
    Analysis::Close
}

/// Answers a 302 to the assigned server's redirect prefix followed by the request path.
///
/// The request is left untouched when it has no path or no server is assigned.
///
/// # Returns
/// `true` when the redirect was produced.
pub fn perform_server_redirect(s: &mut Session) -> bool {
    let Some(srv) = s.srv.clone() else {
        return false;
    };
    let (Some(prefix), Some(head)) = (&srv.redirect_prefix, redirect_prefix(302)) else {
        return false;
    };

    let bytes = s.req.as_bytes();
    let uri = s.txn.req.rq().uri;
    let Some(path) = get_path(bytes, uri) else {
        return false;
    };

    let mut rdr = Vec::with_capacity(head.len() + prefix.len() + uri.end() - path + 4);
    rdr.extend_from_slice(head);
    rdr.extend_from_slice(prefix);
    rdr.extend_from_slice(&bytes[path..uri.end()]);
    rdr.extend_from_slice(b"\r\n\r\n");

    debug!(session = s.id, server = %srv.id, "redirecting request to server prefix");
    server_reply(s, 302, Some(Bytes::from(rdr)), ErrCode::ProxyCond, FinState::Connect);
    incr(&srv.counters.cum_sess);
    true
}

/// Answers the client after the connection to the server failed.
///
/// Aborts are reported first since nothing else explains an incomplete retry, then
/// timeouts and errors, queue before connection.
pub fn return_server_error(s: &mut Session, errors: StreamErrors) {
    let (err, fin) = if errors.contains(StreamErrors::QUEUE_ABRT) {
        (ErrCode::ClientClosed, FinState::Queue)
    } else if errors.contains(StreamErrors::CONN_ABRT) {
        (ErrCode::ClientClosed, FinState::Connect)
    } else if errors.contains(StreamErrors::QUEUE_TO) {
        (ErrCode::ServerTimeout, FinState::Queue)
    } else if errors.contains(StreamErrors::QUEUE_ERR) {
        (ErrCode::ServerClosed, FinState::Queue)
    } else if errors.contains(StreamErrors::CONN_TO) {
        (ErrCode::ServerTimeout, FinState::Connect)
    } else if errors.contains(StreamErrors::CONN_ERR) {
        (ErrCode::ServerClosed, FinState::Connect)
    } else {
        let msg = s.error_reply(HttpErr::ServerError);
        server_reply(s, 500, Some(msg), ErrCode::Internal, FinState::Connect);
        return;
    };

    let msg = s.error_reply(HttpErr::Unavailable);
    server_reply(s, 503, Some(msg), err, fin);
}

impl Session {
    /// Returns the text of `err` for this session, backend override first.
    pub fn error_reply(&self, err: HttpErr) -> Bytes {
        error_message(&self.be.errors, &self.fe.errors, err)
    }
}

/// Answers the client while the request is being analysed.
pub(crate) fn client_reply(s: &mut Session, status: u16, msg: Bytes, err: ErrCode, fin: FinState) {
    s.txn.status = status;
    s.rep.clear();
    s.reply = Some(msg);
    s.term.set(err, fin);
}

/// Answers the client on behalf of the server side, dropping both buffers.
pub(crate) fn server_reply(s: &mut Session, status: u16, msg: Option<Bytes>, err: ErrCode, fin: FinState) {
    s.req.clear();
    s.rep.clear();
    if let Some(msg) = msg {
        s.txn.status = status;
        s.reply = Some(msg);
    }
    s.term.set(err, fin);
}

/// Keeps a copy of the invalid request on the frontend.
pub(crate) fn capture_bad_request(s: &Session) {
    let snapshot = ErrorSnapshot::capture(
        &s.req,
        &s.txn.req,
        SnapshotOrigin {
            session_id: s.id,
            server: s.srv.as_deref().map(|srv| srv.id.as_str()),
            other_end: &s.be.id,
            src: s.cli_addr,
        },
        SystemTime::now(),
    );
    warn!(proxy = %s.fe.id, session = s.id, offset = snapshot.pos, len = snapshot.len, "invalid request captured");
    s.fe.invalid_req.store(Some(std::sync::Arc::new(snapshot)));
}

/// Keeps a copy of the invalid response on the backend.
pub(crate) fn capture_bad_response(s: &Session) {
    let snapshot = ErrorSnapshot::capture(
        &s.rep,
        &s.txn.rsp,
        SnapshotOrigin {
            session_id: s.id,
            server: s.srv.as_deref().map(|srv| srv.id.as_str()),
            other_end: &s.fe.id,
            src: s.cli_addr,
        },
        SystemTime::now(),
    );
    warn!(proxy = %s.be.id, session = s.id, offset = snapshot.pos, len = snapshot.len, "invalid response captured");
    s.be.invalid_rep.store(Some(std::sync::Arc::new(snapshot)));
}

/// Makes the message carry a single `Connection: close` header, if any.
///
/// The first `Connection` header is rewritten to `close` unless it already says so, the
/// following ones are removed. `CONN_CLOSED` is set once a header carries `close`.
pub(crate) fn normalize_connection(
    buf: &mut Buffer,
    msg: &mut HttpMessage,
    idx: &mut HeaderIndex,
    flags: &mut SessionFlags,
) -> Result<(), EditError> {
    let mut cursor = HeaderCursor::new(msg, idx);
    while cursor.advance(idx) {
        let line = cursor.line(buf.as_bytes(), idx);
        let Some(val) = header_match(line, b"Connection") else {
            continue;
        };

        if flags.contains(SessionFlags::CONN_CLOSED) {
            cursor.remove(buf, msg, idx)?;
            continue;
        }

        let val = val.min(line.len());
        if !starts_with_ignore_case(&line[val..], b"close") {
            let (sol, eol) = (cursor.sol(), cursor.eol(idx));
            cursor.replace(buf, msg, idx, sol + val, eol, b"close")?;
        }
        flags.insert(SessionFlags::CONN_CLOSED);
    }
    Ok(())
}

/// Returns `true` when a tolerated invalid byte was recorded in `err_pos`.
#[inline]
pub(crate) fn has_error_pos(err_pos: ErrPos) -> bool {
    matches!(err_pos, ErrPos::At(_))
}
