//! Edit-in-place byte buffer shared by the analyzer and the rewrite pipelines.
//!
//! A [`Buffer`] holds the bytes received for one direction of a session. The analyzer reads
//! it through a read cursor (the first byte not examined yet), and the pipelines rewrite it
//! in place through three edit operations:
//!
//! - [`Buffer::replace`]: substitute a byte range with new text
//! - [`Buffer::insert_line`]: insert a line followed by CRLF
//! - [`Buffer::erase`]: remove a byte range
//!
//! Each edit returns the signed number of bytes by which everything after the edit moved.
//! The buffer keeps its own read cursor coherent; callers shift every other cached offset
//! (see [`HttpMessage::shift`](crate::protocol::HttpMessage::shift)).
//!
//! While headers are being analysed only part of the capacity is open to reads, the rest
//! is kept for rewrites. The read limit is lifted once the headers are processed.

use std::time::Instant;

use bitflags::bitflags;
use bytes::BytesMut;
use tracing::trace;

use crate::protocol::EditError;
use crate::utils::ensure;

/// Default buffer capacity.
pub const BUFSIZE: usize = 16384;

/// Room kept free for header rewrites while the headers are being analysed.
pub const MAXREWRITE: usize = BUFSIZE / 2;

bitflags! {
    /// Events observed on a buffer by the I/O layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// A read error occurred on the producer side.
        const READ_ERROR = 0x0001;
        /// The producer did not send anything before the read deadline.
        const READ_TIMEOUT = 0x0002;
        /// The producer shut its side down, no more bytes will arrive.
        const SHUTR = 0x0004;
        /// The consumer side is shut down.
        const SHUTW = 0x0008;
        /// Writing to the consumer failed.
        const WRITE_ERROR = 0x0010;
        /// No more bytes can be read until some are consumed.
        const FULL = 0x0020;
    }
}

bitflags! {
    /// Analysers still to run on a buffer, lowest bit first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Analysers: u32 {
        const REQ_HTTP_HDR = 0x0001;
        const REQ_HTTP_TARPIT = 0x0002;
        const REQ_HTTP_BODY = 0x0004;
        const RTR_HTTP_HDR = 0x0008;
    }
}

#[derive(Debug)]
pub struct Buffer {
    data: BytesMut,
    /// first unexamined byte
    lr: usize,
    /// bytes released for output
    send_max: usize,
    /// bytes of the released output already written
    sent: usize,
    capacity: usize,
    rlim: usize,
    flags: BufferFlags,
    pub analysers: Analysers,
    pub analyse_exp: Option<Instant>,
}

impl Buffer {
    /// Creates a buffer of [`BUFSIZE`] bytes, [`MAXREWRITE`] of them kept for rewrites.
    pub fn new() -> Self {
        Self::with_limits(BUFSIZE, MAXREWRITE)
    }

    /// Creates a buffer of `capacity` bytes keeping `reserve` bytes for rewrites.
    pub fn with_limits(capacity: usize, reserve: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            lr: 0,
            send_max: 0,
            sent: 0,
            capacity,
            rlim: capacity.saturating_sub(reserve),
            flags: BufferFlags::empty(),
            analysers: Analysers::empty(),
            analyse_exp: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Returns the offset of the first byte not examined by the analyzer.
    #[inline]
    pub fn read_cursor(&self) -> usize {
        self.lr
    }

    #[inline]
    pub fn set_read_cursor(&mut self, lr: usize) {
        self.lr = lr.min(self.data.len());
    }

    /// Returns how many more bytes may be read into the buffer.
    pub fn room(&self) -> usize {
        self.rlim.saturating_sub(self.data.len())
    }

    /// Appends received bytes, as many as the read limit allows.
    ///
    /// # Returns
    /// The number of bytes accepted.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.room());
        self.data.extend_from_slice(&bytes[..accepted]);
        trace!(accepted, len = self.data.len(), "appended bytes to buffer");
        accepted
    }

    /// Returns the buffer flags, `FULL` being derived from the read limit.
    pub fn flags(&self) -> BufferFlags {
        if self.data.len() >= self.rlim { self.flags | BufferFlags::FULL } else { self.flags }
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags.insert(flags);
    }

    /// Lifts the read limit once no more header rewrite is expected.
    pub fn set_rlim_max(&mut self) {
        self.rlim = self.capacity;
    }

    /// Returns `true` once the analysis deadline, if any, has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.analyse_exp.is_some_and(|exp| exp <= now)
    }

    /// Replaces bytes `start..end` with `text`.
    ///
    /// # Returns
    /// The signed number of bytes by which data located at or after `end` moved.
    ///
    /// # Errors
    /// Returns [`EditError::OutOfRange`] for an invalid range, and [`EditError::NoSpace`] if
    /// the result would not fit the buffer capacity. The buffer is left untouched on error.
    pub fn replace(&mut self, start: usize, end: usize, text: &[u8]) -> Result<isize, EditError> {
        let len = self.data.len();
        ensure!(start <= end && end <= len, EditError::out_of_range(start, end, len));

        let removed = end - start;
        let new_len = len - removed + text.len();
        ensure!(new_len <= len || new_len < self.capacity, EditError::no_space(new_len, self.capacity));

        if text.len() > removed {
            self.data.resize(new_len, 0);
            self.data.copy_within(end..len, start + text.len());
        } else if text.len() < removed {
            self.data.copy_within(end..len, start + text.len());
            self.data.truncate(new_len);
        }
        self.data[start..start + text.len()].copy_from_slice(text);

        let delta = text.len() as isize - removed as isize;
        if self.lr >= end {
            self.lr = crate::utils::shift(self.lr, delta);
        } else if self.lr > start {
            self.lr = start + text.len();
        }

        trace!(start, end, delta, "replaced buffer bytes");
        Ok(delta)
    }

    /// Inserts `text` followed by CRLF at `pos`.
    ///
    /// # Returns
    /// The number of bytes inserted.
    ///
    /// # Errors
    /// Same as [`Buffer::replace`].
    pub fn insert_line(&mut self, pos: usize, text: &[u8]) -> Result<isize, EditError> {
        let mut line = Vec::with_capacity(text.len() + 2);
        line.extend_from_slice(text);
        line.extend_from_slice(b"\r\n");
        self.replace(pos, pos, &line)
    }

    /// Removes bytes `start..end`.
    ///
    /// # Returns
    /// The (negative) number of bytes by which data located after `end` moved.
    pub fn erase(&mut self, start: usize, end: usize) -> Result<isize, EditError> {
        self.replace(start, end, &[])
    }

    /// Drops every byte, including those released for output.
    pub fn clear(&mut self) {
        self.data.clear();
        self.lr = 0;
        self.send_max = 0;
        self.sent = 0;
    }

    /// Releases the next `n` bytes for output.
    pub fn forward(&mut self, n: usize) {
        self.send_max = (self.send_max + n).min(self.data.len());
    }

    /// Returns the released bytes not written yet.
    pub fn pending_output(&self) -> &[u8] {
        &self.data[self.sent..self.send_max]
    }

    /// Records that `n` released bytes were written out.
    pub fn mark_sent(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.send_max);
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        let mut buffer = Buffer::new();
        buffer.append(bytes);
        buffer
    }
}

impl From<&str> for Buffer {
    fn from(text: &str) -> Self {
        Buffer::from(text.as_bytes())
    }
}
