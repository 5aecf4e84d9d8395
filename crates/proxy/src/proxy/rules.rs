//! Rules attached to a proxy.
//!
//! # Components
//!
//! - [`HdrExp`]: a regular expression filter applied to the start line and to each header
//! - [`RedirectRule`]: answers a redirect instead of forwarding the request
//! - [`SwitchingRule`]: hands the request over to another backend
//! - [`UriAuth`]: access to the statistics page

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use regex::bytes::{Captures, Regex};
use triomphe::Arc;

use crate::proxy::{Conditional, Proxy};

/// What a filter does with a matching line.
#[derive(Clone)]
pub enum Action {
    /// accept the message, skipping the remaining allow, deny and tarpit filters
    Allow,
    /// reject the message with a 403 (requests) or a 502 (responses)
    Deny,
    /// hold the request then answer a 500
    Tarpit,
    /// stop examining the current line
    Pass,
    /// replace the whole line with the expanded template
    Replace(Bytes),
    /// remove the line
    Remove,
    /// hand the request over to another backend
    SetBackend(Arc<Proxy>),
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Allow => f.write_str("Allow"),
            Action::Deny => f.write_str("Deny"),
            Action::Tarpit => f.write_str("Tarpit"),
            Action::Pass => f.write_str("Pass"),
            Action::Replace(template) => f.debug_tuple("Replace").field(template).finish(),
            Action::Remove => f.write_str("Remove"),
            Action::SetBackend(be) => f.debug_tuple("SetBackend").field(&be.id).finish(),
        }
    }
}

/// A line filter.
#[derive(Debug, Clone)]
pub struct HdrExp {
    pub regex: Regex,
    pub action: Action,
}

impl HdrExp {
    pub fn new(regex: Regex, action: Action) -> Self {
        Self { regex, action }
    }

    /// Matches the filter against `line`.
    ///
    /// # Returns
    /// `None` when the line does not match. For [`Action::Replace`] the expanded
    /// replacement is returned, otherwise an empty vector.
    pub fn apply(&self, line: &[u8]) -> Option<Vec<u8>> {
        let caps = self.regex.captures(line)?;
        match &self.action {
            Action::Replace(template) => Some(expand(template, &caps)),
            _ => Some(Vec::new()),
        }
    }
}

/// Expands a replacement template.
///
/// `\N` inserts capture group `N` (0 to 9, empty when the group did not participate),
/// `\xHH` inserts the byte of hexadecimal value `HH`, and `\c` inserts `c` for any other
/// character.
pub fn expand(template: &[u8], caps: &Captures<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(template.len());
    let mut i = 0;

    while i < template.len() {
        let c = template[i];
        if c != b'\\' || i + 1 == template.len() {
            out.push(c);
            i += 1;
            continue;
        }

        let next = template[i + 1];
        if next.is_ascii_digit() {
            if let Some(group) = caps.get(usize::from(next - b'0')) {
                out.extend_from_slice(group.as_bytes());
            }
            i += 2;
        } else if next == b'x'
            && let Some(byte) = template.get(i + 2..i + 4).and_then(hex_byte)
        {
            out.push(byte);
            i += 4;
        } else {
            out.push(next);
            i += 2;
        }
    }
    out
}

fn hex_byte(digits: &[u8]) -> Option<u8> {
    let hi = (digits[0] as char).to_digit(16)?;
    let lo = (digits[1] as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// the target replaces the whole location
    Location,
    /// the target is prepended to the request path
    Prefix,
}

pub struct RedirectRule {
    /// `None` applies the rule to every request
    pub cond: Option<Conditional>,
    pub kind: RedirectKind,
    pub target: Bytes,
    /// 301, 302 or 303
    pub code: u16,
    /// `NAME=VALUE` sent in a `Set-Cookie` header
    pub cookie: Option<Bytes>,
    /// the query string is not copied to prefix redirects
    pub drop_query: bool,
}

pub struct SwitchingRule {
    pub cond: Conditional,
    pub backend: Arc<Proxy>,
}

/// Statistics page access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriAuth {
    pub prefix: Bytes,
    pub realm: String,
    /// base64 encoded `user:password` pairs, any user is accepted when empty
    pub users: Vec<String>,
    /// refresh interval of the page
    pub refresh: Option<Duration>,
}

impl UriAuth {
    pub fn new(prefix: impl Into<Bytes>) -> Self {
        Self { prefix: prefix.into(), realm: String::from("Statistics"), users: Vec::new(), refresh: None }
    }

    /// Allows `user` with `password`.
    pub fn add_user(&mut self, user: &str, password: &str) {
        self.users.push(STANDARD.encode(format!("{user}:{password}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_with(pattern: &str, line: &[u8], template: &[u8]) -> Vec<u8> {
        let regex = Regex::new(pattern).unwrap();
        let caps = regex.captures(line).unwrap();
        expand(template, &caps)
    }

    #[test]
    fn test_expand_groups() {
        let out = expand_with(r"^(GET|POST) /old/(.*)", b"GET /old/a.html HTTP/1.0", br"\1 /new/\2");
        assert_eq!(out, b"GET /new/a.html HTTP/1.0");
    }

    #[test]
    fn test_expand_escapes() {
        let out = expand_with(r"^X-(\w+)", b"X-Foo: 1", br"Y-\1\x3a\\ \n");
        assert_eq!(out, b"Y-Foo:\\ n");
        let out = expand_with(r"^a(b)?", b"a", br"[\1]\xZZ\");
        assert_eq!(out, b"[]xZZ\\");
    }

    #[test]
    fn test_apply() {
        let exp = HdrExp::new(Regex::new("(?i)^user-agent:.*bot").unwrap(), Action::Deny);
        assert_eq!(exp.apply(b"User-Agent: somebot/1.0"), Some(Vec::new()));
        assert_eq!(exp.apply(b"User-Agent: curl"), None);

        let exp = HdrExp::new(Regex::new("^Host: (.*)").unwrap(), Action::Replace(Bytes::from_static(br"Host: www.\1")));
        assert_eq!(exp.apply(b"Host: example.com"), Some(b"Host: www.example.com".to_vec()));
    }

    #[test]
    fn test_add_user() {
        let mut auth = UriAuth::new("/stats");
        auth.add_user("admin", "secret");
        assert_eq!(auth.users, vec![String::from("YWRtaW46c2VjcmV0")]);
    }
}
