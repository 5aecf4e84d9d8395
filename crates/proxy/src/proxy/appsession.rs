//! Application session table.
//!
//! Maps application session ids, learnt from the cookies servers set, to the server which
//! created them. Entries expire after the configured idle time; every lookup refreshes the
//! entry it hits, and an expired entry is forgotten before it is used again. Lookup and
//! insertion of one id happen under the map entry lock, so concurrent sessions presenting
//! the same id see a single entry.
//!
//! Expired entries are also dropped from the table by the lookups themselves, at most once
//! per idle time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use tracing::{debug, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSession {
    /// server which issued the session, unknown until a response teaches it
    pub server_id: Option<String>,
    pub expire: Option<Instant>,
    pub request_count: u64,
}

impl AppSession {
    fn is_expired(&self, now: Instant) -> bool {
        self.expire.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug)]
pub struct AppSessionStore {
    sessions: DashMap<Bytes, AppSession>,
    ttl: Option<Duration>,
    origin: Instant,
    /// milliseconds after `origin` before which no purge runs
    next_purge: AtomicU64,
}

impl AppSessionStore {
    /// Creates a store whose entries expire after `ttl` without activity.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self { sessions: DashMap::new(), ttl, origin: Instant::now(), next_purge: AtomicU64::new(0) }
    }

    /// Records a request presenting `id`, creating the entry if needed.
    ///
    /// # Returns
    /// The id of the server owning the session, if known.
    pub fn touch(&self, id: &[u8], now: Instant) -> Option<String> {
        self.maybe_purge(now);
        let mut entry = self.live_entry(id, now);
        entry.expire = self.ttl.map(|ttl| now + ttl);
        entry.request_count += 1;
        trace!(count = entry.request_count, server = ?entry.server_id, "application session touched");
        entry.server_id.clone()
    }

    /// Binds `id` to `server_id`, unless the session already belongs to a server.
    pub fn learn(&self, id: &[u8], server_id: &str, now: Instant) {
        self.maybe_purge(now);
        let mut entry = self.live_entry(id, now);
        if entry.server_id.is_none() {
            debug!(server = server_id, "application session learnt");
            entry.server_id = Some(server_id.to_owned());
        }
        entry.expire = self.ttl.map(|ttl| now + ttl);
        entry.request_count += 1;
    }

    /// Returns the entry of `id`, reset to a fresh one when it expired.
    fn live_entry(&self, id: &[u8], now: Instant) -> RefMut<'_, Bytes, AppSession> {
        let mut entry = self.sessions.entry(Bytes::copy_from_slice(id)).or_default();
        if entry.is_expired(now) {
            trace!(server = ?entry.server_id, "application session expired");
            *entry = AppSession::default();
        }
        entry
    }

    pub fn get(&self, id: &[u8]) -> Option<AppSession> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Drops the sessions expired at `now`.
    ///
    /// # Returns
    /// The number of sessions removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        before - self.sessions.len()
    }

    /// Purges the table when the previous purge is older than the idle time.
    fn maybe_purge(&self, now: Instant) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        let elapsed = millis(now.saturating_duration_since(self.origin));
        let due = self.next_purge.load(Ordering::Relaxed);
        if elapsed < due {
            return;
        }
        let next = elapsed.saturating_add(millis(ttl).max(1));
        if self.next_purge.compare_exchange(due, next, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
            let removed = self.purge_expired(now);
            if removed > 0 {
                debug!(removed, left = self.sessions.len(), "expired application sessions purged");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
