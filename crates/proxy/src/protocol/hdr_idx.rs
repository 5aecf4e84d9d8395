//! Header index: a fixed-capacity arena of header line descriptors.
//!
//! Slot 0 always describes the start line. Each following slot describes one header line
//! and links to the next one by handle, so traversing from slot 0 visits the header lines in
//! the order they appear in the buffer. A record stores the line length without its
//! terminator and whether that terminator is CRLF or a bare LF, which is all that is needed
//! to recover every line offset from the start of the message:
//!
//! ```text
//! offset(next) = offset(cur) + len(cur) + (cr(cur) ? 2 : 1)
//! ```
//!
//! Slots are handed out sequentially and never reused until the index is reset, so a handle
//! held by a pipeline stays valid across removals of other lines.

use crate::protocol::ParseError;
use crate::utils::ensure;

/// Default number of records, the start line included.
pub const MAX_HTTP_HDR: usize = 101;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Record {
    len: usize,
    cr: bool,
    /// 0 ends the list, slot 0 never follows another record
    next: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderIndex {
    records: Vec<Record>,
    /// live header records
    used: usize,
    /// slots handed out since the last reset
    allocated: usize,
    tail: usize,
}

impl HeaderIndex {
    /// Creates an index able to hold `capacity - 1` header lines plus the start line.
    pub fn new(capacity: usize) -> Self {
        Self { records: vec![Record::default(); capacity.max(1)], used: 0, allocated: 0, tail: 0 }
    }

    /// Forgets every record, keeping the storage.
    pub fn reset(&mut self) {
        self.records[0] = Record::default();
        self.used = 0;
        self.allocated = 0;
        self.tail = 0;
    }

    /// Describes the start line.
    pub fn set_start(&mut self, len: usize, cr: bool) {
        self.records[0].len = len;
        self.records[0].cr = cr;
    }

    /// Registers a new header line after the current tail.
    ///
    /// # Arguments
    /// * `len` - line length without the terminator
    /// * `cr` - whether the line ends with CRLF
    ///
    /// # Returns
    /// The handle of the new record.
    ///
    /// # Errors
    /// Returns [`ParseError::TooManyHeaders`] when every slot is taken.
    pub fn append(&mut self, len: usize, cr: bool) -> Result<usize, ParseError> {
        ensure!(self.allocated + 1 < self.records.len(), ParseError::too_many_headers(self.records.len() - 1));

        self.allocated += 1;
        let handle = self.allocated;
        self.records[handle] = Record { len, cr, next: 0 };
        self.records[self.tail].next = handle;
        self.tail = handle;
        self.used += 1;
        Ok(handle)
    }

    /// Unlinks the record following `prev`.
    ///
    /// # Returns
    /// The handle of the unlinked record, or `None` when `prev` was the last one.
    pub fn unlink_after(&mut self, prev: usize) -> Option<usize> {
        let cur = self.next_of(prev)?;
        self.records[prev].next = self.records[cur].next;
        if self.tail == cur {
            self.tail = prev;
        }
        self.used -= 1;
        Some(cur)
    }

    /// Returns the handle following `handle`, slot 0 being the start line.
    #[inline]
    pub fn next_of(&self, handle: usize) -> Option<usize> {
        match self.records[handle].next {
            0 => None,
            next => Some(next),
        }
    }

    /// Returns the first header handle.
    #[inline]
    pub fn first(&self) -> Option<usize> {
        self.next_of(0)
    }

    /// Returns the line length of `handle`, terminator excluded.
    #[inline]
    pub fn len(&self, handle: usize) -> usize {
        self.records[handle].len
    }

    /// Returns the length of the terminator of `handle`.
    #[inline]
    pub fn eol_len(&self, handle: usize) -> usize {
        if self.records[handle].cr { 2 } else { 1 }
    }

    /// Returns the line length of `handle`, terminator included.
    #[inline]
    pub fn full_len(&self, handle: usize) -> usize {
        self.len(handle) + self.eol_len(handle)
    }

    /// Applies an edit delta to the length of `handle`.
    pub fn adjust_len(&mut self, handle: usize, delta: isize) {
        let record = &mut self.records[handle];
        record.len = crate::utils::shift(record.len, delta);
    }

    /// Returns the offset of the first header line relative to the start of the message.
    #[inline]
    pub fn first_pos(&self) -> usize {
        self.full_len(0)
    }

    /// Returns the number of live header records.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    #[inline]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Returns the number of header lines the index can hold.
    pub fn capacity(&self) -> usize {
        self.records.len() - 1
    }

    /// Iterates the header handles in line order.
    pub fn iter(&self) -> Iter<'_> {
        Iter { index: self, cur: 0 }
    }
}

impl Default for HeaderIndex {
    fn default() -> Self {
        Self::new(MAX_HTTP_HDR)
    }
}

pub struct Iter<'a> {
    index: &'a HeaderIndex,
    cur: usize,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let next = self.index.next_of(self.cur)?;
        self.cur = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order() {
        let mut idx = HeaderIndex::new(8);
        idx.set_start(14, true);
        let a = idx.append(7, true).unwrap();
        let b = idx.append(10, false).unwrap();
        let c = idx.append(3, true).unwrap();

        assert_eq!(idx.iter().collect::<Vec<_>>(), vec![a, b, c]);
        assert_eq!(idx.used(), 3);
        assert_eq!(idx.first_pos(), 16);
        assert_eq!(idx.full_len(b), 11);
        assert_eq!(idx.tail(), c);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut idx = HeaderIndex::new(3);
        idx.append(1, true).unwrap();
        idx.append(1, true).unwrap();
        assert_eq!(idx.append(1, true), Err(ParseError::too_many_headers(2)));
    }

    #[test]
    fn test_unlink_middle() {
        let mut idx = HeaderIndex::default();
        let a = idx.append(1, true).unwrap();
        let b = idx.append(2, true).unwrap();
        let c = idx.append(3, true).unwrap();

        assert_eq!(idx.unlink_after(a), Some(b));
        assert_eq!(idx.iter().collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(idx.used(), 2);
    }

    #[test]
    fn test_unlink_tail_then_append() {
        let mut idx = HeaderIndex::default();
        let a = idx.append(1, true).unwrap();
        let b = idx.append(2, true).unwrap();

        assert_eq!(idx.unlink_after(a), Some(b));
        assert_eq!(idx.tail(), a);
        assert_eq!(idx.unlink_after(a), None);

        let d = idx.append(4, false).unwrap();
        assert_ne!(d, b);
        assert_eq!(idx.iter().collect::<Vec<_>>(), vec![a, d]);
    }

    #[test]
    fn test_reset() {
        let mut idx = HeaderIndex::default();
        idx.set_start(10, true);
        idx.append(5, true).unwrap();
        idx.reset();

        assert!(idx.is_empty());
        assert_eq!(idx.first(), None);
        assert_eq!(idx.first_pos(), 1);
        assert_eq!(idx.capacity(), MAX_HTTP_HDR - 1);
    }
}
