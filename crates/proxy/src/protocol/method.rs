//! Request method classification.
//!
//! Methods are recognized through a per-first-letter table of known methods, so a
//! classification costs one bucket lookup plus one exact comparison per candidate.

use std::fmt;

/// The classified request method.
///
/// Methods outside the fixed table are reported as [`Method::Other`]; the raw bytes stay
/// available through the request line's method span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// The request line does not start with an upper-case letter.
    None,
    Options,
    Get,
    Head,
    Post,
    Put,
    Delete,
    Trace,
    Connect,
    /// A token-shaped method missing from the table.
    Other,
}

/// Known methods, bucketed by first letter `A..=Z`.
static METHODS: [&[(Method, &[u8])]; 26] = [
    &[],                                                                         // A
    &[],                                                                         // B
    &[(Method::Connect, b"CONNECT".as_slice())],                                 // C
    &[(Method::Delete, b"DELETE".as_slice())],                                   // D
    &[],                                                                         // E
    &[],                                                                         // F
    &[(Method::Get, b"GET".as_slice())],                                         // G
    &[(Method::Head, b"HEAD".as_slice())],                                       // H
    &[],                                                                         // I
    &[],                                                                         // J
    &[],                                                                         // K
    &[],                                                                         // L
    &[],                                                                         // M
    &[],                                                                         // N
    &[],                                                                         // O
    &[(Method::Post, b"POST".as_slice()), (Method::Put, b"PUT".as_slice())],     // P
    &[],                                                                         // Q
    &[],                                                                         // R
    &[],                                                                         // S
    &[(Method::Trace, b"TRACE".as_slice())],                                     // T
    &[],                                                                         // U
    &[],                                                                         // V
    &[],                                                                         // W
    &[],                                                                         // X
    &[],                                                                         // Y
    &[],                                                                         // Z
];

impl Method {
    /// Classifies the method token found at the start of a request line.
    ///
    /// # Arguments
    /// * `token` - the method bytes, exactly as delimited by the request line parser
    ///
    /// # Returns
    /// The matching known method, [`Method::Other`] for any other token starting with an
    /// upper-case letter, or [`Method::None`] otherwise.
    pub fn classify(token: &[u8]) -> Method {
        let Some(&first) = token.first() else {
            return Method::None;
        };

        if !first.is_ascii_uppercase() {
            return Method::None;
        }

        METHODS[usize::from(first - b'A')]
            .iter()
            .find(|(_, text)| *text == token)
            .map_or(Method::Other, |(method, _)| *method)
    }

    /// Returns the canonical text of a known method.
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            Method::Options => Some("OPTIONS"),
            Method::Get => Some("GET"),
            Method::Head => Some("HEAD"),
            Method::Post => Some("POST"),
            Method::Put => Some("PUT"),
            Method::Delete => Some("DELETE"),
            Method::Trace => Some("TRACE"),
            Method::Connect => Some("CONNECT"),
            Method::None | Method::Other => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => f.write_str(text),
            None if *self == Method::Other => f.write_str("OTHER"),
            None => f.write_str("NONE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_methods() {
        assert_eq!(Method::classify(b"GET"), Method::Get);
        assert_eq!(Method::classify(b"HEAD"), Method::Head);
        assert_eq!(Method::classify(b"POST"), Method::Post);
        assert_eq!(Method::classify(b"PUT"), Method::Put);
        assert_eq!(Method::classify(b"DELETE"), Method::Delete);
        assert_eq!(Method::classify(b"TRACE"), Method::Trace);
        assert_eq!(Method::classify(b"CONNECT"), Method::Connect);
    }

    #[test]
    fn test_exact_length_required() {
        assert_eq!(Method::classify(b"GETX"), Method::Other);
        assert_eq!(Method::classify(b"PU"), Method::Other);
    }

    #[test]
    fn test_options_is_not_tabled() {
        assert_eq!(Method::classify(b"OPTIONS"), Method::Other);
    }

    #[test]
    fn test_non_token_start() {
        assert_eq!(Method::classify(b"get"), Method::None);
        assert_eq!(Method::classify(b"1GET"), Method::None);
        assert_eq!(Method::classify(b""), Method::None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Method::Post.to_string(), "POST");
        assert_eq!(Method::Other.to_string(), "OTHER");
    }
}
