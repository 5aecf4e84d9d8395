//! Runtime proxy definitions.
//!
//! A [`Proxy`] is either a frontend accepting client sessions, a backend forwarding them to
//! servers, or both at once. Proxies are immutable once built and shared between sessions
//! through [`triomphe::Arc`]; only their counters, the application session store and the
//! last error snapshots change at runtime.
//!
//! # Components
//!
//! - [`Proxy`] / [`ProxyOptions`]: the policy applied to the messages a proxy handles
//! - [`Server`]: a backend server with its persistence cookie value
//! - [`rules`]: filters, redirect and switching rules, statistics access
//! - [`Condition`] / [`Conditional`]: verdicts consumed by rules
//! - [`AppSessionStore`]: the application session table
//! - [`Registry`]: builds proxies from a JSON configuration

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bitflags::bitflags;
use bytes::Bytes;
use triomphe::Arc;

use crate::protocol::fixed::ErrorMessages;
use crate::protocol::header::CaptureHeader;
use crate::session::ErrorSnapshot;

mod appsession;
mod condition;
mod config;
mod net;
pub mod rules;

pub use appsession::{AppSession, AppSessionStore};
pub use condition::{CondPolicy, Condition, Conditional};
pub(crate) use condition::any_pass;
#[cfg(test)]
pub(crate) use condition::MockCondition;
pub use config::{AclConfig, CondConfig, FilterConfig, ProxyConfig, RedirectConfig, Registry, ServerConfig};
pub use net::Ipv4Net;
pub use rules::{Action, HdrExp, RedirectKind, RedirectRule, SwitchingRule, UriAuth};

/// Byte separating the server id from the application cookie in prefix mode.
pub const COOKIE_DELIM: u8 = b'~';

/// Maximum length of the request line copied for logs, terminator included.
pub const REQURI_LEN: usize = 1024;

/// Default maximum length of a captured header or cookie.
pub const CAPTURE_LEN: usize = 64;

bitflags! {
    /// Proxy options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProxyOptions: u32 {
        /// add `Connection: close` to requests and responses
        const HTTP_CLOSE = 0x0001;
        /// same as `HTTP_CLOSE`, the connection is also closed after the response
        const FORCE_CLOSE = 0x0002;
        /// rewrite the persistence cookie set by the server
        const COOK_RW = 0x0004;
        /// hide the persistence cookie from the server
        const COOK_IND = 0x0008;
        /// insert the persistence cookie in responses
        const COOK_INS = 0x0010;
        /// prefix the application cookie with the server id
        const COOK_PFX = 0x0020;
        /// the inserted cookie must not be cached
        const COOK_NOC = 0x0040;
        /// insert the cookie only in responses to POST requests
        const COOK_POST = 0x0080;
        /// block cacheable responses carrying cookies
        const CHK_CACHE = 0x0100;
        /// keep using a server designated by a cookie even when it is down
        const PERSIST = 0x0200;
        /// the destination address is read from absolute request URIs
        const HTTP_PROXY = 0x0400;
        const ACCEPT_INVALID_REQ = 0x0800;
        const ACCEPT_INVALID_RESP = 0x1000;
        /// copy the request line for the session log
        const HTTP_LOG = 0x2000;
    }
}

/// Options requiring `Connection: close` on both messages.
pub const CLOSE_OPTIONS: ProxyOptions = ProxyOptions::HTTP_CLOSE.union(ProxyOptions::FORCE_CLOSE);

/// Persistence cookie settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieConfig {
    pub name: Bytes,
    /// domain added to inserted cookies
    pub domain: Option<Bytes>,
}

/// Application session settings: the cookie learnt from responses and looked for in URIs.
#[derive(Debug)]
pub struct AppSessionConfig {
    pub name: Bytes,
    /// number of bytes of the cookie value used as session id
    pub len: usize,
    pub store: AppSessionStore,
}

/// Cookie captured for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieCapture {
    pub name: Bytes,
    pub len: usize,
}

/// Forwarded address header settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardHeader {
    pub header: String,
    /// client (or destination) network for which no header is added
    pub except: Option<Ipv4Net>,
}

/// Balancing on a URL parameter which may be carried in a POST body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParam {
    pub name: Bytes,
    /// number of body bytes to wait for, 0 to never look at the body
    pub post_limit: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// time allowed to receive complete request headers
    pub http_request: Option<Duration>,
    pub tarpit: Option<Duration>,
    pub appsession: Option<Duration>,
}

/// Counters shared by every session of a proxy.
#[derive(Debug, Default)]
pub struct ProxyCounters {
    pub beconn: AtomicU64,
    pub beconn_max: AtomicU64,
    pub cum_beconn: AtomicU64,
    pub failed_req: AtomicU64,
    pub failed_resp: AtomicU64,
    pub denied_req: AtomicU64,
    pub denied_resp: AtomicU64,
}

/// Point-in-time copy of [`ProxyCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub beconn: u64,
    pub beconn_max: u64,
    pub cum_beconn: u64,
    pub failed_req: u64,
    pub failed_resp: u64,
    pub denied_req: u64,
    pub denied_resp: u64,
}

impl ProxyCounters {
    /// Accounts one more session on the backend.
    pub fn count_connection(&self) {
        let current = self.beconn.fetch_add(1, Ordering::Relaxed) + 1;
        self.beconn_max.fetch_max(current, Ordering::Relaxed);
        self.cum_beconn.fetch_add(1, Ordering::Relaxed);
    }

    /// Accounts a session leaving the backend.
    pub fn release_connection(&self) {
        let _ = self.beconn.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            beconn: self.beconn.load(Ordering::Relaxed),
            beconn_max: self.beconn_max.load(Ordering::Relaxed),
            cum_beconn: self.cum_beconn.load(Ordering::Relaxed),
            failed_req: self.failed_req.load(Ordering::Relaxed),
            failed_resp: self.failed_resp.load(Ordering::Relaxed),
            denied_req: self.denied_req.load(Ordering::Relaxed),
            denied_resp: self.denied_resp.load(Ordering::Relaxed),
        }
    }
}

#[inline]
pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct Proxy {
    pub id: String,
    pub options: ProxyOptions,
    pub monitor_uri: Option<Bytes>,
    /// conditions reporting the service as failed on the monitor URI
    pub monitor_fail: Vec<Conditional>,
    /// conditions denying requests with a 403
    pub block: Vec<Conditional>,
    pub req_exp: Vec<HdrExp>,
    pub rsp_exp: Vec<HdrExp>,
    /// lines added to every request
    pub req_add: Vec<Bytes>,
    /// lines added to every final response
    pub rsp_add: Vec<Bytes>,
    pub uri_auth: Option<UriAuth>,
    pub redirect_rules: Vec<RedirectRule>,
    pub switching_rules: Vec<SwitchingRule>,
    pub default_backend: Option<Arc<Proxy>>,
    pub servers: Vec<Arc<Server>>,
    pub cookie: Option<CookieConfig>,
    pub appsession: Option<AppSessionConfig>,
    pub capture_cookie: Option<CookieCapture>,
    pub req_captures: Vec<CaptureHeader>,
    pub rsp_captures: Vec<CaptureHeader>,
    pub fwdfor: Option<ForwardHeader>,
    pub orgto: Option<ForwardHeader>,
    pub url_param: Option<UrlParam>,
    pub timeouts: Timeouts,
    pub errors: ErrorMessages,
    pub counters: ProxyCounters,
    pub invalid_req: ArcSwapOption<ErrorSnapshot>,
    pub invalid_rep: ArcSwapOption<ErrorSnapshot>,
}

impl Proxy {
    /// Creates a proxy named `id` with no option and no rule.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            options: ProxyOptions::empty(),
            monitor_uri: None,
            monitor_fail: Vec::new(),
            block: Vec::new(),
            req_exp: Vec::new(),
            rsp_exp: Vec::new(),
            req_add: Vec::new(),
            rsp_add: Vec::new(),
            uri_auth: None,
            redirect_rules: Vec::new(),
            switching_rules: Vec::new(),
            default_backend: None,
            servers: Vec::new(),
            cookie: None,
            appsession: None,
            capture_cookie: None,
            req_captures: Vec::new(),
            rsp_captures: Vec::new(),
            fwdfor: None,
            orgto: None,
            url_param: None,
            timeouts: Timeouts::default(),
            errors: ErrorMessages::default(),
            counters: ProxyCounters::default(),
            invalid_req: ArcSwapOption::empty(),
            invalid_rep: ArcSwapOption::empty(),
        }
    }

    /// Returns the server whose persistence cookie value is `value`.
    pub fn server_by_cookie(&self, value: &[u8]) -> Option<&Arc<Server>> {
        self.servers.iter().find(|srv| srv.cookie.as_deref() == Some(value))
    }

    /// Returns the server named `id`.
    pub fn server_by_id(&self, id: &str) -> Option<&Arc<Server>> {
        self.servers.iter().find(|srv| srv.id == id)
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("servers", &self.servers.len())
            .finish_non_exhaustive()
    }
}

/// Server counters.
#[derive(Debug, Default)]
pub struct ServerCounters {
    pub failed_resp: AtomicU64,
    /// responses blocked for security reasons
    pub failed_secu: AtomicU64,
    pub cum_sess: AtomicU64,
}

#[derive(Debug)]
pub struct Server {
    pub id: String,
    /// persistence cookie value designating this server
    pub cookie: Option<Bytes>,
    pub addr: Option<SocketAddr>,
    /// redirect requests to this prefix instead of forwarding them
    pub redirect_prefix: Option<Bytes>,
    running: AtomicBool,
    pub counters: ServerCounters,
}

impl Server {
    /// Creates a running server.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cookie: None,
            addr: None,
            redirect_prefix: None,
            running: AtomicBool::new(true),
            counters: ServerCounters::default(),
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<Bytes>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_redirect_prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.redirect_prefix = Some(prefix.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Marks the server up or down, as health checks would.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_options() {
        assert!(CLOSE_OPTIONS.contains(ProxyOptions::HTTP_CLOSE));
        assert!(CLOSE_OPTIONS.contains(ProxyOptions::FORCE_CLOSE));
        assert!(!CLOSE_OPTIONS.intersects(ProxyOptions::COOK_INS | ProxyOptions::HTTP_LOG));
        assert!((ProxyOptions::FORCE_CLOSE | ProxyOptions::PERSIST).intersects(CLOSE_OPTIONS));
        assert_eq!(format!("{CLOSE_OPTIONS:?}"), "ProxyOptions(HTTP_CLOSE | FORCE_CLOSE)");

        let mut options = ProxyOptions::default();
        options.insert(CLOSE_OPTIONS);
        options.remove(ProxyOptions::HTTP_CLOSE);
        assert_eq!(options, ProxyOptions::FORCE_CLOSE);
    }

    #[test]
    fn test_count_connection_tracks_max() {
        let counters = ProxyCounters::default();
        counters.count_connection();
        counters.count_connection();
        counters.release_connection();
        counters.count_connection();
        counters.release_connection();
        counters.release_connection();
        counters.release_connection();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.beconn, 0);
        assert_eq!(snapshot.beconn_max, 2);
        assert_eq!(snapshot.cum_beconn, 3);
    }

    #[test]
    fn test_server_lookup() {
        let mut proxy = Proxy::new("be");
        proxy.servers.push(Arc::new(Server::new("s1").with_cookie("A")));
        proxy.servers.push(Arc::new(Server::new("s2").with_cookie("B")));

        assert_eq!(proxy.server_by_cookie(b"B").map(|s| s.id.as_str()), Some("s2"));
        assert!(proxy.server_by_cookie(b"C").is_none());
        assert_eq!(proxy.server_by_id("s1").and_then(|s| s.cookie.clone()), Some(Bytes::from_static(b"A")));
    }

    #[test]
    fn test_server_state() {
        let srv = Server::new("s1");
        assert!(srv.is_running());
        srv.set_running(false);
        assert!(!srv.is_running());
    }
}
