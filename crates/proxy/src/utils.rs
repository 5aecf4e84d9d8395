//! Utility macros and functions for the proxy crate.
//!
//! This module provides helper macros and small byte-level helpers that are used internally
//! by the analyzer and the rewrite pipelines.

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(end <= self.len(), EditError::out_of_range(start, end, self.len()));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Returns `true` if `hay` starts with `prefix`, ignoring ASCII case.
#[inline]
pub(crate) fn starts_with_ignore_case(hay: &[u8], prefix: &[u8]) -> bool {
    hay.len() >= prefix.len() && hay[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Parses the leading decimal digits of `bytes`, stopping at the first non-digit.
///
/// An empty or non-numeric input yields 0, oversized values saturate.
pub(crate) fn parse_leading_uint(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u32, |acc, b| acc.saturating_mul(10).saturating_add(u32::from(b - b'0')))
}

/// Parses a whole signed decimal integer, rejecting any trailing byte.
pub(crate) fn parse_signed(bytes: &[u8]) -> Option<i64> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, bytes),
    };

    if digits.is_empty() {
        return None;
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }

    Some(if negative { -value } else { value })
}

/// Applies a signed delta to an offset.
#[inline]
pub(crate) fn shift(offset: usize, delta: isize) -> usize {
    offset.saturating_add_signed(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_leading_uint() {
        assert_eq!(parse_leading_uint(b"200"), 200);
        assert_eq!(parse_leading_uint(b"30x"), 30);
        assert_eq!(parse_leading_uint(b""), 0);
        assert_eq!(parse_leading_uint(b"99999999999"), u32::MAX);
    }

    #[test]
    fn test_parse_signed() {
        assert_eq!(parse_signed(b"1234"), Some(1234));
        assert_eq!(parse_signed(b"-5"), Some(-5));
        assert_eq!(parse_signed(b"12a"), None);
        assert_eq!(parse_signed(b""), None);
        assert_eq!(parse_signed(b"-"), None);
    }

    #[test]
    fn test_starts_with_ignore_case() {
        assert!(starts_with_ignore_case(b"No-Cache, private", b"no-cache"));
        assert!(!starts_with_ignore_case(b"no", b"no-cache"));
    }
}
