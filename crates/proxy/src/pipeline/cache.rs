//! Cacheability of responses.
//!
//! A response starts cacheable when its status allows it and the request was not a POST.
//! `Pragma: no-cache` and the restrictive `Cache-Control` directives then clear both
//! cacheability flags, `public` sets them back, and `no-cache="set-cookie"` only marks the
//! cookies as not cacheable. Only the first directive of each `Cache-Control` header is
//! looked at.

use crate::protocol::header::header_match;
use crate::protocol::{Buffer, HeaderIndex, HttpMessage, Method};
use crate::session::TxnFlags;
use crate::utils::starts_with_ignore_case;

/// Returns the initial cacheability of a response.
pub(crate) fn initial_flags(status: u16, meth: Method) -> TxnFlags {
    match status {
        200 | 203 | 206 | 300 | 301 | 410 if meth != Method::Post => TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK,
        _ => TxnFlags::empty(),
    }
}

/// Updates the cacheability flags from the response headers.
pub(crate) fn check_response_cacheability(flags: &mut TxnFlags, buf: &Buffer, msg: &HttpMessage, idx: &HeaderIndex) {
    if !flags.contains(TxnFlags::CACHEABLE) {
        return;
    }

    let bytes = buf.as_bytes();
    let mut sol = msg.som + idx.first_pos();

    for handle in idx.iter() {
        let line = &bytes[sol..sol + idx.len(handle)];
        sol += idx.full_len(handle);

        if let Some(val) = header_match(line, b"Pragma")
            && starts_with_ignore_case(&line[val.min(line.len())..], b"no-cache")
        {
            flags.remove(TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK);
            return;
        }

        let Some(val) = header_match(line, b"Cache-control") else {
            continue;
        };
        if val >= line.len() {
            continue;
        }

        let value = &line[val..];
        let end = value.iter().position(|&c| c == b'=' || c == b',' || c.is_ascii_whitespace()).unwrap_or(value.len());

        if value.get(end) == Some(&b'=') {
            if value.len() >= 21
                && starts_with_ignore_case(value, b"no-cache=\"set-cookie")
                && matches!(value[20], b'"' | b',')
            {
                flags.remove(TxnFlags::CACHE_COOK);
            } else if is_zero_age(value) {
                flags.remove(TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK);
                return;
            }
            continue;
        }

        let directive = &value[..end];
        if directive.eq_ignore_ascii_case(b"private") || directive.eq_ignore_ascii_case(b"no-store") {
            flags.remove(TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK);
            return;
        }
        if directive.eq_ignore_ascii_case(b"public") {
            flags.insert(TxnFlags::CACHEABLE | TxnFlags::CACHE_COOK);
        }
    }
}

/// Returns `true` for a `max-age=0` or `s-maxage=0` directive.
fn is_zero_age(value: &[u8]) -> bool {
    let end = value.iter().position(|&c| c == b',' || c.is_ascii_whitespace()).unwrap_or(value.len());
    let directive = &value[..end];
    directive.eq_ignore_ascii_case(b"max-age=0") || directive.eq_ignore_ascii_case(b"s-maxage=0")
}
