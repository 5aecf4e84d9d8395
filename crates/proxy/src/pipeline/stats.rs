//! Statistics page access.

use std::time::Instant;

use tracing::{debug, info};

use crate::protocol::Analysers;
use crate::protocol::BufferFlags;
use crate::protocol::fixed::unauthorized;
use crate::proxy::{Proxy, UriAuth};
use crate::session::{DataSource, ErrCode, FinState, Session, StatsFlags};
use crate::utils::starts_with_ignore_case;

use super::client_reply;

const AUTH_HDR: &[u8] = b"Authorization:";
const BASIC: &[u8] = b" Basic ";

/// Checks whether the request targets the statistics page of `proxy`.
///
/// An authorised request is switched to the statistics producer and its request side is
/// shut. A request without valid credentials is answered with a 401 carrying the realm.
///
/// # Returns
/// `false` when the request is not for the statistics page; it is then processed normally.
pub(crate) fn check_stats_uri(s: &mut Session, proxy: &Proxy, now: Instant) -> bool {
    let Some(auth) = &proxy.uri_auth else {
        return false;
    };

    let bytes = s.req.as_bytes();
    let uri = s.txn.req.rq().uri.slice(bytes);
    let Some(args) = uri.strip_prefix(&auth.prefix[..]) else {
        return false;
    };

    let mut flags = StatsFlags::SHOW_STAT | StatsFlags::SHOW_INFO;
    for (i, &c) in args.iter().enumerate() {
        if c != b';' {
            continue;
        }
        let arg = &args[i..];
        if arg.starts_with(b";up") {
            flags.insert(StatsFlags::HIDE_DOWN);
        } else if arg.starts_with(b";norefresh") {
            if auth.refresh.is_some() {
                flags.insert(StatsFlags::NO_REFRESH);
            }
        } else if arg.starts_with(b";csv") {
            flags.insert(StatsFlags::CSV);
        }
    }

    if !is_authorized(s, auth) {
        info!(session = s.id, proxy = %proxy.id, "statistics access refused");
        client_reply(s, 401, unauthorized(&auth.realm), ErrCode::ProxyCond, FinState::Request);
        s.req.analysers = Analysers::empty();
        return true;
    }

    debug!(session = s.id, proxy = %proxy.id, ?flags, "serving statistics");
    s.req.set_flags(BufferFlags::SHUTW);
    s.tv_request = Some(now);
    s.data_source = DataSource::Stats(flags);
    true
}

/// Only the first `Authorization` header counts.
fn is_authorized(s: &Session, auth: &UriAuth) -> bool {
    if auth.users.is_empty() {
        return true;
    }

    let bytes = s.req.as_bytes();
    let idx = &s.txn.hdr_idx;
    let mut sol = s.txn.req.som + idx.first_pos();

    for handle in idx.iter() {
        let line = &bytes[sol..sol + idx.len(handle)];
        sol += idx.full_len(handle);

        if line.len() <= AUTH_HDR.len() || !starts_with_ignore_case(line, AUTH_HDR) {
            continue;
        }
        if line.len() < AUTH_HDR.len() + BASIC.len() || &line[AUTH_HDR.len()..AUTH_HDR.len() + BASIC.len()] != BASIC {
            return false;
        }
        let credentials = &line[AUTH_HDR.len() + BASIC.len()..];
        return auth.users.iter().any(|user| user.as_bytes() == credentials);
    }
    false
}
