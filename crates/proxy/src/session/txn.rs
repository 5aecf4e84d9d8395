use bitflags::bitflags;
use bytes::Bytes;

use crate::protocol::{HeaderIndex, HttpMessage, Method};

bitflags! {
    /// Per-transaction verdicts, cookie dispositions and cacheability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TxnFlags: u32 {
        /// a client filter denied the request
        const CLDENY = 0x0001;
        /// a client filter allowed the request, later allow/deny filters are skipped
        const CLALLOW = 0x0002;
        /// a server filter denied the response
        const SVDENY = 0x0004;
        /// a server filter allowed the response
        const SVALLOW = 0x0008;
        /// the request must be tarpitted
        const CLTARPIT = 0x0010;

        /// the persistence cookie matched no server
        const CK_INVALID = 0x0040;
        /// the persistence cookie designates a server which is down
        const CK_DOWN = 0x0080;
        /// the persistence cookie designates a usable server
        const CK_VALID = 0x00C0;
        const CK_MASK = 0x00C0;

        const SCK_DELETED = 0x0100;
        const SCK_INSERTED = 0x0200;
        /// the server sent the persistence cookie
        const SCK_SEEN = 0x0400;
        const SCK_MASK = 0x0700;
        /// the response carries at least one `Set-Cookie`
        const SCK_ANY = 0x0800;

        /// the response may be cached
        const CACHEABLE = 0x1000;
        /// the response cookies may be cached
        const CACHE_COOK = 0x2000;
    }
}

/// Client-side persistence outcome, as seen in the `CK_*` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieState {
    None,
    Invalid,
    Down,
    Valid,
}

impl CookieState {
    const fn flags(self) -> TxnFlags {
        match self {
            CookieState::None => TxnFlags::empty(),
            CookieState::Invalid => TxnFlags::CK_INVALID,
            CookieState::Down => TxnFlags::CK_DOWN,
            CookieState::Valid => TxnFlags::CK_VALID,
        }
    }
}

/// One request/response exchange on a session.
///
/// The header index is shared by both messages: it describes the request headers until
/// the response analysis starts, then the response headers.
#[derive(Debug, Clone)]
pub struct HttpTransaction {
    pub req: HttpMessage,
    pub rsp: HttpMessage,
    pub hdr_idx: HeaderIndex,
    pub meth: Method,
    /// status sent to the client, 0 until known
    pub status: u16,
    pub flags: TxnFlags,
    /// escaped copy of the request line, for logs
    pub uri: Option<String>,
    pub req_cap: Vec<Option<Bytes>>,
    pub rsp_cap: Vec<Option<Bytes>>,
    pub cli_cookie: Option<Bytes>,
    pub srv_cookie: Option<Bytes>,
}

impl HttpTransaction {
    /// Creates a transaction with `req_caps` request and `rsp_caps` response capture slots.
    pub fn new(req_caps: usize, rsp_caps: usize) -> Self {
        Self {
            req: HttpMessage::request(),
            rsp: HttpMessage::response(),
            hdr_idx: HeaderIndex::default(),
            meth: Method::None,
            status: 0,
            flags: TxnFlags::empty(),
            uri: None,
            req_cap: vec![None; req_caps],
            rsp_cap: vec![None; rsp_caps],
            cli_cookie: None,
            srv_cookie: None,
        }
    }

    pub fn cookie_state(&self) -> CookieState {
        match self.flags & TxnFlags::CK_MASK {
            f if f == TxnFlags::CK_VALID => CookieState::Valid,
            f if f == TxnFlags::CK_DOWN => CookieState::Down,
            f if f == TxnFlags::CK_INVALID => CookieState::Invalid,
            _ => CookieState::None,
        }
    }

    pub fn set_cookie_state(&mut self, state: CookieState) {
        self.flags.remove(TxnFlags::CK_MASK);
        self.flags.insert(state.flags());
    }

    /// Returns the log characters of the request and response cookie dispositions.
    pub fn cookie_log_chars(&self) -> (char, char) {
        const CLI: [char; 4] = ['N', 'I', 'D', 'V'];
        const SRV: [char; 8] = ['N', '1', 'I', '3', 'P', 'D', '5', 'R'];

        let cli = (self.flags & TxnFlags::CK_MASK).bits() >> 6;
        let srv = (self.flags & TxnFlags::SCK_MASK).bits() >> 8;
        (CLI[cli as usize], SRV[srv as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_state_replaces_previous() {
        let mut txn = HttpTransaction::new(0, 0);
        assert_eq!(txn.cookie_state(), CookieState::None);

        txn.set_cookie_state(CookieState::Down);
        txn.set_cookie_state(CookieState::Invalid);
        assert_eq!(txn.cookie_state(), CookieState::Invalid);

        txn.set_cookie_state(CookieState::Valid);
        assert_eq!(txn.cookie_state(), CookieState::Valid);
        assert!(txn.flags.contains(TxnFlags::CK_DOWN));
    }

    #[test]
    fn test_cookie_log_chars() {
        let mut txn = HttpTransaction::new(2, 1);
        assert_eq!(txn.cookie_log_chars(), ('N', 'N'));
        assert_eq!(txn.req_cap.len(), 2);

        txn.set_cookie_state(CookieState::Valid);
        txn.flags.insert(TxnFlags::SCK_INSERTED);
        assert_eq!(txn.cookie_log_chars(), ('V', 'I'));

        txn.flags.insert(TxnFlags::SCK_SEEN | TxnFlags::SCK_DELETED);
        assert_eq!(txn.cookie_log_chars(), ('V', 'R'));
    }
}
