use std::net::SocketAddr;
use std::time::SystemTime;

use bytes::Bytes;

use crate::protocol::{BUFSIZE, Buffer, ErrPos, HttpMessage};

/// Number of message bytes kept in a snapshot.
pub const SNAPSHOT_CAPACITY: usize = BUFSIZE;

/// Copy of the last invalid message seen by a proxy, kept for troubleshooting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSnapshot {
    pub when: SystemTime,
    pub session_id: u64,
    /// server involved, if one was assigned
    pub server: Option<String>,
    /// the proxy on the other side: the backend for requests, the frontend for responses
    pub other_end: String,
    pub src: SocketAddr,
    /// message bytes available when the capture happened
    pub len: usize,
    /// offset of the first invalid byte, relative to the start of the message
    pub pos: usize,
    /// the first `min(len, SNAPSHOT_CAPACITY)` message bytes
    pub buf: Bytes,
}

/// Identity of the session a snapshot is taken from.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotOrigin<'a> {
    pub session_id: u64,
    pub server: Option<&'a str>,
    pub other_end: &'a str,
    pub src: SocketAddr,
}

impl ErrorSnapshot {
    /// Captures `msg` as it stands in `buf`.
    ///
    /// Capturing only reads the buffer, so capturing the same message twice gives equal
    /// snapshots.
    pub fn capture(buf: &Buffer, msg: &HttpMessage, origin: SnapshotOrigin<'_>, when: SystemTime) -> Self {
        let bytes = buf.as_bytes();
        let som = msg.som.min(bytes.len());
        let len = bytes.len() - som;
        let kept = len.min(SNAPSHOT_CAPACITY);

        let pos = match msg.err_pos {
            ErrPos::At(pos) => pos.saturating_sub(som),
            ErrPos::Block | ErrPos::Pass => buf.read_cursor().saturating_sub(som),
        };

        Self {
            when,
            session_id: origin.session_id,
            server: origin.server.map(str::to_owned),
            other_end: origin.other_end.to_owned(),
            src: origin.src,
            len,
            pos,
            buf: Bytes::copy_from_slice(&bytes[som..som + kept]),
        }
    }
}
