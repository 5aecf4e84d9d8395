//! Header lookup and in-place header editing.
//!
//! Headers are never copied out of the buffer: they are located by walking the
//! [`HeaderIndex`] from the start of the message, each line starting right after the
//! terminator of the previous one.
//!
//! # Components
//!
//! - [`header_match`]: checks a header line against a name
//! - [`find_header`]: iterates comma-separated values of a named header
//! - [`HeaderCursor`]: walks header lines while replacing or removing them
//! - [`add_tail`]: appends a header line at the end of the headers
//! - [`capture_headers`]: copies configured header values into capture slots
//! - [`get_path`]: locates the path part of the request URI

use bytes::Bytes;

use crate::protocol::{Buffer, EditError, HeaderIndex, HttpMessage, Span, chars};
use crate::protocol::error::PipelineError;

/// Checks whether `line` is a header named `name` (ASCII case-insensitive).
///
/// # Returns
/// The offset in `line` of the first value byte after the colon and any SP/HT. For an
/// empty value, `name.len() + 2` is returned when the line is long enough, so that a
/// replacement can start after a single space.
pub fn header_match(line: &[u8], name: &[u8]) -> Option<usize> {
    let len = name.len();
    if len >= line.len() || line[len] != b':' || !line[..len].eq_ignore_ascii_case(name) {
        return None;
    }

    let mut val = len + 1;
    while val < line.len() && chars::is_spht(line[val]) {
        val += 1;
    }

    if val >= line.len() && len + 2 <= line.len() {
        return Some(len + 2);
    }
    Some(val)
}

/// Returns the length of the first comma-separated element of a header value, commas
/// inside quoted strings excluded.
pub fn find_hdr_value_end(value: &[u8]) -> usize {
    let mut quoted = false;
    let mut qdpair = false;

    for (i, &c) in value.iter().enumerate() {
        if qdpair {
            qdpair = false;
        } else if quoted && c == b'\\' {
            qdpair = true;
        } else if quoted && c == b'"' {
            quoted = false;
        } else if c == b'"' {
            quoted = true;
        } else if !quoted && c == b',' {
            return i;
        }
    }
    value.len()
}

/// Iteration state of [`find_header`].
///
/// A fresh context starts the search at the first header. After a successful lookup it
/// designates one value: `line + val .. line + val + vlen`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdrCtx {
    /// start of the header line
    pub line: usize,
    /// header handle, 0 before the first lookup
    pub idx: usize,
    /// value start, relative to `line`
    pub val: usize,
    /// value length
    pub vlen: usize,
}

impl HdrCtx {
    pub fn value<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        let start = self.line + self.val;
        &bytes[start..start + self.vlen]
    }
}

/// Finds the next value of header `name` in a parsed message starting at `som`.
///
/// Values of a multi-valued header are returned one at a time, then the search continues
/// with the following headers. An empty `name` matches every header.
///
/// # Returns
/// `true` when a value was found and stored in `ctx`.
pub fn find_header(name: &[u8], bytes: &[u8], som: usize, idx: &HeaderIndex, ctx: &mut HdrCtx) -> bool {
    let (mut sol, mut cur) = if ctx.idx != 0 {
        let sol = ctx.line;
        let eol = sol + idx.len(ctx.idx);
        let mut sov = sol + ctx.val + ctx.vlen;

        if sov < eol {
            // skip the comma and the spaces before the next value
            sov += 1;
            while sov < eol && chars::is_lws(bytes[sov]) {
                sov += 1;
            }
            ctx.val = sov - sol;
            ctx.vlen = find_hdr_value_end(&bytes[sov..eol]);
            return true;
        }

        (eol + idx.eol_len(ctx.idx), idx.next_of(ctx.idx))
    } else {
        (som + idx.first_pos(), idx.first())
    };

    while let Some(handle) = cur {
        let eol = sol + idx.len(handle);
        let line = &bytes[sol..eol];

        let len = if name.is_empty() { line.iter().position(|&c| c == b':').unwrap_or(line.len()) } else { name.len() };

        if len < line.len() && line[len] == b':' && (name.is_empty() || line[..len].eq_ignore_ascii_case(name)) {
            let mut sov = sol + len + 1;
            while sov < eol && chars::is_lws(bytes[sov]) {
                sov += 1;
            }

            ctx.line = sol;
            ctx.idx = handle;
            ctx.val = sov - sol;
            ctx.vlen = find_hdr_value_end(&bytes[sov..eol]);
            return true;
        }

        sol = eol + idx.eol_len(handle);
        cur = idx.next_of(handle);
    }
    false
}

/// A walker over header lines that supports editing the line it stands on.
///
/// ```ignore
/// let mut cursor = HeaderCursor::new(&msg, &idx);
/// while cursor.advance(&idx) {
///     if header_match(cursor.line(buf.as_bytes(), &idx), b"Connection").is_some() {
///         cursor.remove(&mut buf, &mut msg, &mut idx)?;
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HeaderCursor {
    prev: usize,
    /// 0 before the first line and right after a removal
    cur: usize,
    sol: usize,
}

impl HeaderCursor {
    pub fn new(msg: &HttpMessage, idx: &HeaderIndex) -> Self {
        Self { prev: 0, cur: 0, sol: msg.som + idx.first_pos() }
    }

    /// Moves to the next header line.
    ///
    /// # Returns
    /// `false` once every line was visited.
    pub fn advance(&mut self, idx: &HeaderIndex) -> bool {
        if self.cur != 0 {
            self.prev = self.cur;
            self.sol += idx.full_len(self.cur);
        }
        match idx.next_of(self.prev) {
            Some(next) => {
                self.cur = next;
                true
            }
            None => {
                self.cur = 0;
                false
            }
        }
    }

    #[inline]
    pub fn handle(&self) -> usize {
        self.cur
    }

    #[inline]
    pub fn sol(&self) -> usize {
        self.sol
    }

    #[inline]
    pub fn eol(&self, idx: &HeaderIndex) -> usize {
        self.sol + idx.len(self.cur)
    }

    pub fn line<'a>(&self, bytes: &'a [u8], idx: &HeaderIndex) -> &'a [u8] {
        &bytes[self.sol..self.eol(idx)]
    }

    /// Replaces `start..end`, which must lie within the current line.
    pub fn replace(
        &mut self,
        buf: &mut Buffer,
        msg: &mut HttpMessage,
        idx: &mut HeaderIndex,
        start: usize,
        end: usize,
        text: &[u8],
    ) -> Result<isize, EditError> {
        let delta = msg.replace(buf, start, end, text)?;
        idx.adjust_len(self.cur, delta);
        Ok(delta)
    }

    /// Removes the current line. The next call to [`HeaderCursor::advance`] visits the line
    /// that followed it.
    pub fn remove(&mut self, buf: &mut Buffer, msg: &mut HttpMessage, idx: &mut HeaderIndex) -> Result<isize, EditError> {
        let end = self.sol + idx.full_len(self.cur);
        let delta = msg.replace(buf, self.sol, end, &[])?;
        idx.unlink_after(self.prev);
        self.cur = 0;
        Ok(delta)
    }
}

/// Appends `text` CRLF as the last header line.
pub(crate) fn add_tail(buf: &mut Buffer, msg: &mut HttpMessage, idx: &mut HeaderIndex, text: &[u8]) -> Result<(), PipelineError> {
    msg.insert_line(buf, msg.eoh, text)?;
    idx.append(text.len(), true)?;
    Ok(())
}

/// A configured header capture slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHeader {
    pub name: String,
    /// maximum number of value bytes kept
    pub len: usize,
}

/// Copies values of the configured headers into `slots`, one slot per capture.
///
/// The value starts after the colon and any LWS, and is truncated to the capture length.
/// A later occurrence of a header overwrites an earlier one.
pub fn capture_headers(bytes: &[u8], som: usize, idx: &HeaderIndex, captures: &[CaptureHeader], slots: &mut [Option<Bytes>]) {
    let mut sol = som + idx.first_pos();

    for handle in idx.iter() {
        let eol = sol + idx.len(handle);
        let line = &bytes[sol..eol];

        let col = line.iter().position(|&c| c == b':').unwrap_or(line.len());
        let mut sov = (col + 1).min(line.len());
        while sov < line.len() && chars::is_lws(line[sov]) {
            sov += 1;
        }

        for (capture, slot) in captures.iter().zip(slots.iter_mut()) {
            if capture.name.len() == col && line[..col].eq_ignore_ascii_case(capture.name.as_bytes()) {
                let len = (line.len() - sov).min(capture.len);
                *slot = Some(Bytes::copy_from_slice(&line[sov..sov + len]));
            }
        }

        sol = eol + idx.eol_len(handle);
    }
}

/// Locates the path in a request URI.
///
/// # Returns
/// The absolute offset of the `/` starting the path, or `None` for `*`, an authority-only
/// URI or an URI without any path.
pub fn get_path(bytes: &[u8], uri: Span) -> Option<usize> {
    let end = uri.end();
    let mut ptr = uri.off;

    if ptr >= end || bytes[ptr] == b'*' {
        return None;
    }

    if bytes[ptr].is_ascii_alphabetic() {
        // scheme "://"
        ptr += 1;
        while ptr < end && (bytes[ptr].is_ascii_alphanumeric() || matches!(bytes[ptr], b'+' | b'-' | b'.')) {
            ptr += 1;
        }
        for expected in b"://" {
            if ptr == end || bytes[ptr] != *expected {
                return None;
            }
            ptr += 1;
        }
    }

    // [user[:passwd]@]host[:[port]]
    while ptr < end && bytes[ptr] != b'/' {
        ptr += 1;
    }

    (ptr < end).then_some(ptr)
}
