//! Termination codes recorded for a session.
//!
//! Two independent facts are logged when a session ends: what caused the end and in which
//! phase the session was. Each one is set at most once, the first cause observed being
//! the one that explains the others.

use std::fmt;

/// What ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrCode {
    /// client timeout
    ClientTimeout,
    /// client closed or failed
    ClientClosed,
    /// server or connect timeout
    ServerTimeout,
    /// server closed or failed
    ServerClosed,
    /// the proxy decided to close (deny, redirect, bad message...)
    ProxyCond,
    /// lack of a local resource
    Resource,
    Internal,
}

impl ErrCode {
    pub const fn log_char(self) -> char {
        match self {
            ErrCode::ClientTimeout => 'c',
            ErrCode::ClientClosed => 'C',
            ErrCode::ServerTimeout => 's',
            ErrCode::ServerClosed => 'S',
            ErrCode::ProxyCond => 'P',
            ErrCode::Resource => 'R',
            ErrCode::Internal => 'I',
        }
    }
}

/// Phase the session was in when it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinState {
    Request,
    Connect,
    Headers,
    Data,
    Last,
    Queue,
    Tarpit,
}

impl FinState {
    pub const fn log_char(self) -> char {
        match self {
            FinState::Request => 'R',
            FinState::Connect => 'C',
            FinState::Headers => 'H',
            FinState::Data => 'D',
            FinState::Last => 'L',
            FinState::Queue => 'Q',
            FinState::Tarpit => 'T',
        }
    }
}

/// The termination pair of a session, each half being set only once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Termination {
    pub err: Option<ErrCode>,
    pub fin: Option<FinState>,
}

impl Termination {
    /// Records `err` and `fin`, keeping any value already set.
    pub fn set(&mut self, err: ErrCode, fin: FinState) {
        self.err.get_or_insert(err);
        self.fin.get_or_insert(fin);
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let err = self.err.map_or('-', ErrCode::log_char);
        let fin = self.fin.map_or('-', FinState::log_char);
        write!(f, "{err}{fin}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cause_wins() {
        let mut term = Termination::default();
        assert_eq!(term.to_string(), "--");

        term.set(ErrCode::ClientTimeout, FinState::Request);
        term.set(ErrCode::ProxyCond, FinState::Tarpit);
        assert_eq!(term.err, Some(ErrCode::ClientTimeout));
        assert_eq!(term.to_string(), "cR");
    }

    #[test]
    fn test_halves_are_independent() {
        let mut term = Termination { err: Some(ErrCode::ServerClosed), fin: None };
        term.set(ErrCode::Internal, FinState::Headers);
        assert_eq!(term.to_string(), "SH");
    }
}
