//! Range-annotation spans
//!
//! A [`Span`] covers the half-open key interval `[start, end)` and carries
//! the operations applying over it: a range deletion, or range-key
//! sets/unsets/deletes distinguished by suffix. Within one table, stored
//! spans of a category are non-overlapping and sorted by start key.
//!
//! Coalescing collapses the operations of a span destined to commit at a
//! single sequence number into a canonical, conflict-free list: at one
//! sequence number, a set and an unset of the same suffix cannot coexist.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::bounds::Bounds;
use crate::comparator::Comparator;
use crate::key::{RecordKind, SeqNum};

/// One operation of a range-annotation span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanKey {
    pub seq: SeqNum,
    pub kind: RecordKind,
    /// Suffix the operation applies to; empty for range deletions and
    /// suffix-less range keys.
    pub suffix: Vec<u8>,
    /// Operation payload (the value of a range-key set).
    pub value: Bytes,
}

impl SpanKey {
    pub fn new(seq: SeqNum, kind: RecordKind, suffix: impl Into<Vec<u8>>, value: Bytes) -> Self {
        Self {
            seq,
            kind,
            suffix: suffix.into(),
            value,
        }
    }

    /// A bare range deletion operation.
    pub fn range_deletion(seq: SeqNum) -> Self {
        Self::new(seq, RecordKind::RangeDelete, Vec::new(), Bytes::new())
    }
}

/// A range annotation over `[start, end)` with its operation list, kept in
/// descending trailer order (sequence, then kind): newest intent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub keys: Vec<SpanKey>,
}

impl Span {
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>, keys: Vec<SpanKey>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            keys,
        }
    }

    /// A span with no operations, or a degenerate interval, covers nothing.
    pub fn is_empty(&self, cmp: &dyn Comparator) -> bool {
        self.keys.is_empty() || cmp.compare(&self.start, &self.end) != Ordering::Less
    }
}

/// Descending trailer order: sequence number first, kind as tie-break.
pub fn sort_keys_by_trailer(keys: &mut [SpanKey]) {
    keys.sort_by(|a, b| {
        b.seq
            .cmp(&a.seq)
            .then_with(|| (b.kind as u8).cmp(&(a.kind as u8)))
    });
}

/// Coalesce the operations of one span that must commit at a single
/// sequence number.
///
/// Input keys are in descending trailer order (newest intent first). The
/// newest set or unset per suffix wins; a range-key delete shadows every
/// older operation across all suffixes and is itself retained. The output
/// contains at most one operation per (kind, suffix) pair and preserves
/// newest-first order. Conflicts resolve deterministically; they are never
/// an error.
pub fn coalesce(cmp: &dyn Comparator, keys: &[SpanKey]) -> Vec<SpanKey> {
    let mut out: Vec<SpanKey> = Vec::with_capacity(keys.len());
    let mut decided: Vec<&[u8]> = Vec::new();

    for key in keys {
        match key.kind {
            RecordKind::RangeKeySet | RecordKind::RangeKeyUnset => {
                if decided
                    .iter()
                    .any(|s| cmp.compare(s, &key.suffix) == Ordering::Equal)
                {
                    continue;
                }
                decided.push(&key.suffix);
                out.push(key.clone());
            }
            RecordKind::RangeKeyDelete => {
                out.push(key.clone());
                // Everything older is shadowed.
                break;
            }
            // Point kinds never appear inside spans; RangeDelete spans
            // carry a single operation and need no coalescing.
            _ => out.push(key.clone()),
        }
    }
    out
}

/// Re-stamp every operation with the target sequence number.
pub fn set_sequence(keys: &mut [SpanKey], seq: SeqNum) {
    for key in keys {
        key.seq = seq;
    }
}

/// Clip a span to the given bounds, truncating in place any span crossing a
/// boundary. Returns `None` when nothing of the span remains in bounds.
pub fn truncate(cmp: &dyn Comparator, span: &Span, bounds: &Bounds) -> Option<Span> {
    let upper = bounds.exclusive_end();
    let start = if cmp.compare(&span.start, &bounds.start) == Ordering::Less {
        bounds.start.clone()
    } else {
        span.start.clone()
    };
    let end = if cmp.compare(&span.end, &upper) == Ordering::Greater {
        upper
    } else {
        span.end.clone()
    };
    if cmp.compare(&start, &end) != Ordering::Less {
        return None;
    }
    Some(Span {
        start,
        end,
        keys: span.keys.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    const CMP: BytewiseComparator = BytewiseComparator;

    fn set(seq: u64, suffix: &[u8], value: &[u8]) -> SpanKey {
        SpanKey::new(
            SeqNum::Committed(seq),
            RecordKind::RangeKeySet,
            suffix.to_vec(),
            Bytes::copy_from_slice(value),
        )
    }

    fn unset(seq: u64, suffix: &[u8]) -> SpanKey {
        SpanKey::new(
            SeqNum::Committed(seq),
            RecordKind::RangeKeyUnset,
            suffix.to_vec(),
            Bytes::new(),
        )
    }

    fn del(seq: u64) -> SpanKey {
        SpanKey::new(
            SeqNum::Committed(seq),
            RecordKind::RangeKeyDelete,
            Vec::new(),
            Bytes::new(),
        )
    }

    #[test]
    fn coalesce_newest_set_wins_per_suffix() {
        let keys = vec![set(9, b"@a", b"new"), set(5, b"@a", b"old"), set(7, b"@b", b"b")];
        let out = coalesce(&CMP, &keys);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value, Bytes::from_static(b"new"));
        assert_eq!(out[1].suffix, b"@b");
    }

    #[test]
    fn coalesce_unset_shadows_older_set() {
        let keys = vec![unset(9, b"@a"), set(5, b"@a", b"old")];
        let out = coalesce(&CMP, &keys);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, RecordKind::RangeKeyUnset);
    }

    #[test]
    fn coalesce_delete_shadows_everything_older() {
        let keys = vec![set(9, b"@a", b"keep"), del(7), set(5, b"@b", b"drop")];
        let out = coalesce(&CMP, &keys);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, RecordKind::RangeKeySet);
        assert_eq!(out[1].kind, RecordKind::RangeKeyDelete);
    }

    #[test]
    fn coalesce_is_unique_per_kind_suffix() {
        let keys = vec![
            set(9, b"@a", b"x"),
            unset(8, b"@b"),
            set(7, b"@a", b"y"),
            unset(6, b"@b"),
        ];
        let out = coalesce(&CMP, &keys);
        let mut pairs: Vec<(u8, &[u8])> =
            out.iter().map(|k| (k.kind as u8, k.suffix.as_slice())).collect();
        let before = pairs.len();
        pairs.dedup();
        assert_eq!(before, pairs.len());
    }

    #[test]
    fn restamp_and_trailer_sort() {
        let mut keys = vec![unset(3, b"@b"), set(9, b"@a", b"v")];
        set_sequence(&mut keys, SeqNum::ZERO);
        sort_keys_by_trailer(&mut keys);
        assert!(keys.iter().all(|k| k.seq == SeqNum::ZERO));
        // At equal sequence, set sorts before unset.
        assert_eq!(keys[0].kind, RecordKind::RangeKeySet);
        assert_eq!(keys[1].kind, RecordKind::RangeKeyUnset);
    }

    #[test]
    fn truncate_clips_to_bounds() {
        let span = Span::new(b"a".to_vec(), b"z".to_vec(), vec![del(1)]);
        let bounds = Bounds::new(b"d".to_vec(), b"g".to_vec(), false);
        let t = truncate(&CMP, &span, &bounds).unwrap();
        assert_eq!(t.start, b"d");
        assert_eq!(t.end, b"g");
    }

    #[test]
    fn truncate_inclusive_end_keeps_boundary_key_covered() {
        let span = Span::new(b"a".to_vec(), b"z".to_vec(), vec![del(1)]);
        let bounds = Bounds::inclusive(b"d".to_vec(), b"g".to_vec());
        let t = truncate(&CMP, &span, &bounds).unwrap();
        // Clip point is the inclusive end's immediate successor.
        assert_eq!(t.end, b"g\x00");
    }

    #[test]
    fn truncate_disjoint_span_is_dropped() {
        let span = Span::new(b"a".to_vec(), b"c".to_vec(), vec![del(1)]);
        let bounds = Bounds::inclusive(b"x".to_vec(), b"z".to_vec());
        assert!(truncate(&CMP, &span, &bounds).is_none());
    }
}
