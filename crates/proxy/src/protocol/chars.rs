//! Byte classification tables used by the HTTP analyzer.
//!
//! Every byte read by the parser is classified with a single lookup in a 256-entry table
//! computed at compile time. Each entry carries one bit per class:
//!
//! - `CTL`: 0 to 31 and 127
//! - `SEP`: `( ) < > @ , ; : \ " / [ ] ? = { }`, SP and HT
//! - `LWS`: SP, HT, CR and LF
//! - `SPHT`: SP and HT
//! - `CRLF`: CR and LF
//! - `TOKEN`: any byte which is neither `CTL` nor `SEP` (including bytes above 127)
//! - `VER_TOKEN`: digits, `.`, `/`, `H`, `P` and `T`
//!
//! The module also provides the log encoding maps used when raw request bytes are copied
//! into log lines.

const CTL: u8 = 0x01;
const SEP: u8 = 0x02;
const LWS: u8 = 0x04;
const SPHT: u8 = 0x08;
const CRLF: u8 = 0x10;
const TOKEN: u8 = 0x20;
const VER_TOKEN: u8 = 0x40;

static CHAR_CLASSES: [u8; 256] = build_classes();

const fn build_classes() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let c = i as u8;
        let mut bits = 0;

        if c < 32 || c == 127 {
            bits |= CTL;
        }

        if matches!(
            c,
            b'(' | b')'
                | b'<'
                | b'>'
                | b'@'
                | b','
                | b';'
                | b':'
                | b'\\'
                | b'"'
                | b'/'
                | b'['
                | b']'
                | b'?'
                | b'='
                | b'{'
                | b'}'
                | b' '
                | b'\t'
        ) {
            bits |= SEP;
        }

        if matches!(c, b' ' | b'\t' | b'\r' | b'\n') {
            bits |= LWS;
        }

        if matches!(c, b' ' | b'\t') {
            bits |= SPHT;
        }

        if matches!(c, b'\r' | b'\n') {
            bits |= CRLF;
        }

        if bits & (CTL | SEP) == 0 {
            bits |= TOKEN;
        }

        if c.is_ascii_digit() || matches!(c, b'.' | b'/' | b'H' | b'P' | b'T') {
            bits |= VER_TOKEN;
        }

        table[i] = bits;
        i += 1;
    }
    table
}

#[inline]
fn has(c: u8, class: u8) -> bool {
    CHAR_CLASSES[c as usize] & class != 0
}

#[inline]
pub fn is_ctl(c: u8) -> bool {
    has(c, CTL)
}

#[inline]
pub fn is_sep(c: u8) -> bool {
    has(c, SEP)
}

#[inline]
pub fn is_lws(c: u8) -> bool {
    has(c, LWS)
}

#[inline]
pub fn is_spht(c: u8) -> bool {
    has(c, SPHT)
}

#[inline]
pub fn is_crlf(c: u8) -> bool {
    has(c, CRLF)
}

#[inline]
pub fn is_token(c: u8) -> bool {
    has(c, TOKEN)
}

#[inline]
pub fn is_ver_token(c: u8) -> bool {
    has(c, VER_TOKEN)
}

/// Selects which bytes are escaped when copied into a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEncoding {
    /// Header values: controls, bytes above 126 and `" # { | }`.
    Header,
    /// Request URIs: same as [`LogEncoding::Header`] plus SP.
    Url,
}

impl LogEncoding {
    fn must_escape(self, c: u8) -> bool {
        let base = !(32..127).contains(&c) || matches!(c, b'"' | b'#' | b'{' | b'|' | b'}');
        match self {
            LogEncoding::Header => base,
            LogEncoding::Url => base || c == b' ',
        }
    }
}

/// Copies `bytes` into a printable string, escaping unsafe bytes as `#XX`.
pub fn encode_for_log(bytes: &[u8], encoding: LogEncoding) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = String::with_capacity(bytes.len());
    for &c in bytes {
        if encoding.must_escape(c) {
            out.push('#');
            out.push(char::from(HEX[usize::from(c >> 4)]));
            out.push(char::from(HEX[usize::from(c & 0x0f)]));
        } else {
            out.push(char::from(c));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctl_class() {
        for c in 0u8..32 {
            assert!(is_ctl(c), "byte {c} should be CTL");
        }
        assert!(is_ctl(127));
        assert!(!is_ctl(b'a'));
        assert!(!is_ctl(200));
    }

    #[test]
    fn test_separators() {
        for &c in b"()<>@,;:\\\"/[]?={} \t" {
            assert!(is_sep(c), "byte {c} should be SEP");
            assert!(!is_token(c));
        }
        assert!(!is_sep(b'-'));
    }

    #[test]
    fn test_token_includes_high_bytes() {
        assert!(is_token(b'G'));
        assert!(is_token(b'-'));
        assert!(is_token(0xE9));
        assert!(!is_token(b'\r'));
        assert!(!is_token(127));
    }

    #[test]
    fn test_whitespace_classes() {
        assert!(is_lws(b' ') && is_lws(b'\t') && is_lws(b'\r') && is_lws(b'\n'));
        assert!(is_spht(b' ') && is_spht(b'\t'));
        assert!(!is_spht(b'\r'));
        assert!(is_crlf(b'\r') && is_crlf(b'\n'));
        assert!(!is_crlf(b' '));
    }

    #[test]
    fn test_version_token() {
        for &c in b"HTTP/1.0123456789" {
            assert!(is_ver_token(c));
        }
        assert!(!is_ver_token(b'h'));
        assert!(!is_ver_token(b'X'));
    }

    #[test]
    fn test_encode_for_log() {
        assert_eq!(encode_for_log(b"GET /a b", LogEncoding::Url), "GET#20/a#20b");
        assert_eq!(encode_for_log(b"a\"b{c}\x01", LogEncoding::Header), "a#22b#7Bc#7D#01");
        assert_eq!(encode_for_log(b"x y", LogEncoding::Header), "x y");
    }
}
