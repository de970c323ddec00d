//! Internal keys and records
//!
//! Every stored unit is an internal key (user key + sequence number + kind)
//! with an optional value. Internal keys sort by user key ascending, then
//! sequence number descending, then kind descending, so the newest version
//! of a key always comes first during iteration and merging.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

use crate::comparator::Comparator;
use crate::error::{Result, StrataError};
use crate::span::Span;

/// Raw encoding of the reserved range-boundary sentinel: 2^56 - 1.
///
/// Committed sequence numbers must stay strictly below this value.
pub const RANGE_BOUNDARY_RAW: u64 = (1 << 56) - 1;

// =============================================================================
// Sequence Numbers
// =============================================================================

/// A sequence number, tagged to keep the reserved boundary sentinel out of
/// the committed number space.
///
/// `Committed(0)` is the ingestion sentinel: every record of an ingested
/// table carries it so the whole table sorts after previously committed
/// writes at an equal user key. `RangeBoundary` is reserved for the
/// exclusive end boundary of a range annotation and is never assigned to a
/// real write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqNum {
    /// A real, committed sequence number.
    Committed(u64),
    /// Reserved exclusive end-of-range sentinel.
    RangeBoundary,
}

impl SeqNum {
    /// The ingestion sentinel: sorts after any committed write at the same key.
    pub const ZERO: SeqNum = SeqNum::Committed(0);

    /// Encode for storage. The sentinel maps to the reserved raw value.
    pub fn to_raw(self) -> u64 {
        match self {
            SeqNum::Committed(n) => n,
            SeqNum::RangeBoundary => RANGE_BOUNDARY_RAW,
        }
    }

    /// Decode from storage.
    pub fn from_raw(raw: u64) -> SeqNum {
        if raw == RANGE_BOUNDARY_RAW {
            SeqNum::RangeBoundary
        } else {
            SeqNum::Committed(raw)
        }
    }
}

impl Ord for SeqNum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SeqNum::RangeBoundary, SeqNum::RangeBoundary) => Ordering::Equal,
            (SeqNum::RangeBoundary, SeqNum::Committed(_)) => Ordering::Greater,
            (SeqNum::Committed(_), SeqNum::RangeBoundary) => Ordering::Less,
            (SeqNum::Committed(a), SeqNum::Committed(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqNum::Committed(n) => write!(f, "{}", n),
            SeqNum::RangeBoundary => write!(f, "BOUNDARY"),
        }
    }
}

// =============================================================================
// Record Kinds
// =============================================================================

/// Operation kind of an internal record.
///
/// The numeric value is both the on-disk encoding and the ordering
/// tie-break: at equal user key and sequence number, the higher kind sorts
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// A point tombstone.
    Delete = 0,
    /// A normal put.
    Set = 1,
    /// A merge operand, combined at read time by the merge operator.
    Merge = 2,
    /// A tombstone that deletes at most one older version.
    SingleDelete = 3,
    /// A tombstone carrying the approximate size of the value it deletes.
    DeleteSized = 4,
    /// A range deletion covering `[start, end)`.
    RangeDelete = 5,
    /// Removes all range keys within `[start, end)`.
    RangeKeyDelete = 6,
    /// Unsets the range key at one suffix within `[start, end)`.
    RangeKeyUnset = 7,
    /// Sets the range key at one suffix within `[start, end)`.
    RangeKeySet = 8,
}

impl RecordKind {
    pub fn from_u8(v: u8) -> Result<RecordKind> {
        match v {
            0 => Ok(RecordKind::Delete),
            1 => Ok(RecordKind::Set),
            2 => Ok(RecordKind::Merge),
            3 => Ok(RecordKind::SingleDelete),
            4 => Ok(RecordKind::DeleteSized),
            5 => Ok(RecordKind::RangeDelete),
            6 => Ok(RecordKind::RangeKeyDelete),
            7 => Ok(RecordKind::RangeKeyUnset),
            8 => Ok(RecordKind::RangeKeySet),
            other => Err(StrataError::Corruption(format!(
                "invalid record kind: {}",
                other
            ))),
        }
    }

    /// True for kinds stored as point records.
    pub fn is_point(self) -> bool {
        matches!(
            self,
            RecordKind::Delete
                | RecordKind::Set
                | RecordKind::Merge
                | RecordKind::SingleDelete
                | RecordKind::DeleteSized
        )
    }

    /// True for the range-key family of kinds.
    pub fn is_range_key(self) -> bool {
        matches!(
            self,
            RecordKind::RangeKeySet | RecordKind::RangeKeyUnset | RecordKind::RangeKeyDelete
        )
    }

    /// True for point tombstone kinds.
    pub fn is_point_tombstone(self) -> bool {
        matches!(
            self,
            RecordKind::Delete | RecordKind::SingleDelete | RecordKind::DeleteSized
        )
    }
}

// =============================================================================
// Internal Keys and Records
// =============================================================================

/// One internal key: user key + sequence number + kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Vec<u8>,
    pub seq: SeqNum,
    pub kind: RecordKind,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Vec<u8>>, seq: SeqNum, kind: RecordKind) -> Self {
        Self {
            user_key: user_key.into(),
            seq,
            kind,
        }
    }
}

/// Total order over internal keys: user key ascending per the comparator,
/// then sequence descending, then kind descending.
pub fn compare_internal(cmp: &dyn Comparator, a: &InternalKey, b: &InternalKey) -> Ordering {
    cmp.compare(&a.user_key, &b.user_key)
        .then_with(|| b.seq.cmp(&a.seq))
        .then_with(|| (b.kind as u8).cmp(&(a.kind as u8)))
}

/// An internal record: key plus optional value bytes.
///
/// Tombstone kinds normally carry no value; `DeleteSized` carries its
/// size hint as the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: InternalKey,
    pub value: Option<Bytes>,
}

impl Record {
    pub fn new(key: InternalKey, value: Option<Bytes>) -> Self {
        Self { key, value }
    }
}

// =============================================================================
// Stream Contracts
// =============================================================================

/// A stream of point records in ascending internal-key order, newest first
/// per user key. Positioning may block on storage I/O; `close` must be
/// called on every exit path.
pub trait RecordStream {
    fn next(&mut self) -> Result<Option<Record>>;
    fn close(&mut self) -> Result<()>;
}

/// A stream of non-overlapping range-annotation spans in start-key order.
pub trait SpanStream {
    fn next(&mut self) -> Result<Option<Span>>;
    fn close(&mut self) -> Result<()>;
}

impl<T: RecordStream + ?Sized> RecordStream for &mut T {
    fn next(&mut self) -> Result<Option<Record>> {
        (**self).next()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    #[test]
    fn seq_ordering_puts_boundary_sentinel_first() {
        assert!(SeqNum::RangeBoundary > SeqNum::Committed(u64::MAX));
        assert!(SeqNum::Committed(7) > SeqNum::Committed(3));
        assert_eq!(SeqNum::from_raw(RANGE_BOUNDARY_RAW), SeqNum::RangeBoundary);
        assert_eq!(SeqNum::from_raw(42), SeqNum::Committed(42));
    }

    #[test]
    fn internal_key_orders_newest_first() {
        let cmp = BytewiseComparator;
        let newer = InternalKey::new(b"k".to_vec(), SeqNum::Committed(9), RecordKind::Set);
        let older = InternalKey::new(b"k".to_vec(), SeqNum::Committed(3), RecordKind::Set);
        assert_eq!(compare_internal(&cmp, &newer, &older), Ordering::Less);

        // The boundary sentinel sorts before all committed writes at a key.
        let sentinel = InternalKey::new(b"k".to_vec(), SeqNum::RangeBoundary, RecordKind::Set);
        assert_eq!(compare_internal(&cmp, &sentinel, &newer), Ordering::Less);
    }

    #[test]
    fn kind_breaks_ties_descending() {
        let cmp = BytewiseComparator;
        let set = InternalKey::new(b"k".to_vec(), SeqNum::ZERO, RecordKind::Set);
        let del = InternalKey::new(b"k".to_vec(), SeqNum::ZERO, RecordKind::Delete);
        assert_eq!(compare_internal(&cmp, &set, &del), Ordering::Less);
    }
}
