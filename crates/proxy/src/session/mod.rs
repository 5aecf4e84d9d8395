//! Client sessions.
//!
//! A [`Session`] ties one client connection to the proxies handling it: the frontend that
//! accepted it, the backend selected for the current request, and the server eventually
//! assigned. It owns both buffers and the [`HttpTransaction`] describing the exchange in
//! progress, and records why and when the session ended.
//!
//! # Components
//!
//! - [`Session`]: per-connection state driven by the pipelines
//! - [`HttpTransaction`] / [`TxnFlags`]: one request/response exchange and its verdicts
//! - [`Termination`]: the first error cause and final state observed
//! - [`ErrorSnapshot`]: copy of an invalid message kept on the proxy
//! - [`RequestLogger`] / [`ContentProducer`]: capabilities supplied by the embedding program

use std::net::SocketAddr;
use std::time::Instant;

use bitflags::bitflags;
use bytes::Bytes;
use tracing::debug;
use triomphe::Arc;

use crate::protocol::{Analysers, Buffer, ErrPos, ProxyError};
use crate::proxy::{Proxy, ProxyOptions, Server};

mod snapshot;
mod termination;
mod txn;

pub use snapshot::{ErrorSnapshot, SNAPSHOT_CAPACITY, SnapshotOrigin};
pub use termination::{ErrCode, FinState, Termination};
pub use txn::{CookieState, HttpTransaction, TxnFlags};

bitflags! {
    /// Session-wide state, kept across the pipeline steps.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SessionFlags: u32 {
        /// the server was chosen by a persistence cookie
        const DIRECT = 0x0001;
        /// a server is assigned
        const ASSIGNED = 0x0002;
        /// the destination address is known
        const ADDR_SET = 0x0004;
        /// the backend is selected and counted
        const BE_ASSIGNED = 0x0008;
        /// `Connection: close` is present in the message being processed
        const CONN_CLOSED = 0x0010;
        /// the request hit the monitor URI
        const MONITOR = 0x0020;
        /// the frontend address is known
        const FRT_ADDR_SET = 0x0080;
        /// the request may be answered by a server redirect
        const REDIRECTABLE = 0x0400;
    }
}

bitflags! {
    /// Options of a statistics request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatsFlags: u32 {
        const HIDE_DOWN = 0x0001;
        const NO_REFRESH = 0x0002;
        const CSV = 0x0004;
        const SHOW_STAT = 0x0008;
        const SHOW_INFO = 0x0010;
    }
}

/// Where the response comes from when it is not forwarded from a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSource {
    #[default]
    None,
    Stats(StatsFlags),
}

/// Emits the log line of a session.
#[cfg_attr(test, mockall::automock)]
pub trait RequestLogger: Send + Sync {
    fn log(&self, session: &Session);
}

/// Produces the content of responses generated by the proxy itself.
#[cfg_attr(test, mockall::automock)]
pub trait ContentProducer: Send + Sync {
    /// Renders the statistics page of `proxy`.
    ///
    /// # Returns
    /// The complete response, head included.
    fn produce(&self, flags: StatsFlags, proxy: &Proxy) -> Result<Bytes, ProxyError>;
}

pub struct Session {
    pub id: u64,
    /// the proxy which accepted the connection
    pub fe: Arc<Proxy>,
    /// the proxy handling the request, the frontend until a backend is selected
    pub be: Arc<Proxy>,
    pub srv: Option<Arc<Server>>,
    pub flags: SessionFlags,
    pub term: Termination,
    pub txn: HttpTransaction,
    /// client to server
    pub req: Buffer,
    /// server to client
    pub rep: Buffer,
    pub cli_addr: SocketAddr,
    pub frt_addr: Option<SocketAddr>,
    pub srv_addr: Option<SocketAddr>,
    pub data_source: DataSource,
    /// response produced by the proxy, to send to the client before closing
    pub reply: Option<Bytes>,
    pub logger: Option<Box<dyn RequestLogger>>,
    pub tv_accept: Instant,
    /// when the request was completely received
    pub tv_request: Option<Instant>,
}

impl Session {
    /// Creates the session of a connection accepted by `fe` from `cli_addr`.
    pub fn new(id: u64, fe: Arc<Proxy>, cli_addr: SocketAddr, now: Instant) -> Self {
        let mut txn = HttpTransaction::new(fe.req_captures.len(), fe.rsp_captures.len());
        if fe.options.contains(ProxyOptions::ACCEPT_INVALID_REQ) {
            txn.req.err_pos = ErrPos::Pass;
        }
        if fe.options.contains(ProxyOptions::ACCEPT_INVALID_RESP) {
            txn.rsp.err_pos = ErrPos::Pass;
        }

        let mut req = Buffer::new();
        req.analysers = Analysers::REQ_HTTP_HDR;
        let mut rep = Buffer::new();
        rep.analysers = Analysers::RTR_HTTP_HDR;

        Self {
            id,
            be: fe.clone(),
            fe,
            srv: None,
            flags: SessionFlags::empty(),
            term: Termination::default(),
            txn,
            req,
            rep,
            cli_addr,
            frt_addr: None,
            srv_addr: None,
            data_source: DataSource::None,
            reply: None,
            logger: None,
            tv_accept: now,
            tv_request: None,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn RequestLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Records the local address the client connected to.
    pub fn with_frontend_addr(mut self, addr: SocketAddr) -> Self {
        self.frt_addr = Some(addr);
        self.flags.insert(SessionFlags::FRT_ADDR_SET);
        self
    }

    /// Hands the request over to `be`, without counting it yet.
    pub fn switch_backend(&mut self, be: Arc<Proxy>) {
        debug!(session = self.id, from = %self.be.id, to = %be.id, "switching backend");
        if be.options.contains(ProxyOptions::ACCEPT_INVALID_RESP) {
            self.txn.rsp.err_pos = ErrPos::Pass;
        }
        self.be = be;
    }

    /// Counts the session on the current backend, once per transaction.
    pub fn assign_backend(&mut self) {
        if self.flags.contains(SessionFlags::BE_ASSIGNED) {
            return;
        }
        self.be.counters.count_connection();
        self.flags.insert(SessionFlags::BE_ASSIGNED);
    }

    /// Binds the session to `srv`.
    pub fn assign_server(&mut self, srv: Arc<Server>, direct: bool) {
        self.srv = Some(srv);
        self.flags.insert(SessionFlags::ASSIGNED);
        if direct {
            self.flags.insert(SessionFlags::DIRECT);
        }
    }

    /// Emits the session log through the configured logger, if any.
    pub fn log(&mut self) {
        if let Some(logger) = self.logger.take() {
            logger.log(self);
            self.logger = Some(logger);
        }
    }

    pub fn is_backend_frontend(&self) -> bool {
        Arc::ptr_eq(&self.be, &self.fe)
    }

    /// Returns the options of the frontend and the backend together.
    pub fn options(&self) -> ProxyOptions {
        self.fe.options | self.be.options
    }
}
