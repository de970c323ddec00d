//! Table Iterator
//!
//! Positioned iteration over a table's point records. The iterator holds a
//! position into the in-memory index and materializes records as zero-copy
//! slices; an optional key window restricts every primitive.

use std::sync::Arc;

use super::{TableEntry, TableReader};

/// Iterator over a table's point records, in internal-key order.
///
/// Each iterator is independent; any number may be open over one reader.
pub struct TableIter {
    reader: Arc<TableReader>,
    /// First index position within the window
    lo: usize,
    /// First index position past the window
    hi: usize,
    /// Current position, `None` when unpositioned or exhausted
    pos: Option<usize>,
}

impl TableIter {
    pub(super) fn new(
        reader: Arc<TableReader>,
        lower: Option<Vec<u8>>,
        upper: Option<(Vec<u8>, bool)>,
    ) -> Self {
        let lo = lower.as_deref().map_or(0, |l| reader.lower_bound(l));
        let hi = upper
            .as_ref()
            .map_or(reader.index_len(), |(u, incl)| reader.upper_bound(u, *incl));
        Self {
            reader,
            lo,
            hi: hi.max(lo),
            pos: None,
        }
    }

    /// Clear the position; subsequent `next`/`prev` report exhaustion.
    pub(crate) fn invalidate(&mut self) {
        self.pos = None;
    }

    fn at(&mut self, pos: usize) -> Option<TableEntry> {
        if pos < self.lo || pos >= self.hi {
            self.pos = None;
            return None;
        }
        self.pos = Some(pos);
        Some(self.reader.entry_at(pos))
    }

    /// Position at the first record in the window.
    pub fn first(&mut self) -> Option<TableEntry> {
        self.at(self.lo)
    }

    /// Position at the last record in the window.
    pub fn last(&mut self) -> Option<TableEntry> {
        if self.hi == self.lo {
            self.pos = None;
            return None;
        }
        self.at(self.hi - 1)
    }

    /// Advance to the next record.
    pub fn next(&mut self) -> Option<TableEntry> {
        match self.pos {
            Some(p) => self.at(p + 1),
            None => None,
        }
    }

    /// Step back to the previous record.
    pub fn prev(&mut self) -> Option<TableEntry> {
        match self.pos {
            Some(p) if p > self.lo => self.at(p - 1),
            _ => {
                self.pos = None;
                None
            }
        }
    }

    /// Position at the first record with user key >= `key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> Option<TableEntry> {
        let target = self.reader.lower_bound(key).max(self.lo);
        self.at(target)
    }

    /// Position at the last record with user key < `key`.
    pub fn seek_lt(&mut self, key: &[u8]) -> Option<TableEntry> {
        let target = self.reader.lower_bound(key).min(self.hi);
        if target <= self.lo {
            self.pos = None;
            return None;
        }
        self.at(target - 1)
    }

    /// Position at the first record with user key >= `key`, provided it
    /// shares the seek key's comparator-defined prefix. Returns `None`
    /// otherwise.
    pub fn seek_prefix_ge(&mut self, key: &[u8]) -> Option<TableEntry> {
        let entry = self.seek_ge(key)?;
        let cmp = self.reader.comparator();
        if cmp.equal(cmp.prefix(&entry.user_key), cmp.prefix(key)) {
            Some(entry)
        } else {
            self.pos = None;
            None
        }
    }
}
