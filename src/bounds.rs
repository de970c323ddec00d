//! Key bounds
//!
//! A [`Bounds`] pair restricts reads to a keyspace sub-range. The start is
//! always inclusive; the end carries an inclusivity flag. An end-exclusive
//! bounds pair marks a virtual table whose upper boundary comes from a
//! range annotation's exclusive end (the boundary sentinel case).
//!
//! `constrain` intersects caller-requested read bounds with a virtual
//! table's fixed bounds. It is a pure key computation and performs no I/O.

use std::cmp::Ordering;

use crate::comparator::Comparator;
use crate::error::{Result, StrataError};

/// An inclusive-start key range with an end-inclusivity flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounds {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub end_inclusive: bool,
}

impl Bounds {
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>, end_inclusive: bool) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            end_inclusive,
        }
    }

    /// Inclusive bounds over `[start, end]`, the canonical case where `end`
    /// is a table's own largest key.
    pub fn inclusive(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self::new(start, end, true)
    }

    /// Reject reversed bounds before any table is built or any view opened.
    pub fn validate(&self, cmp: &dyn Comparator) -> Result<()> {
        if cmp.compare(&self.start, &self.end) == Ordering::Greater {
            return Err(StrataError::ReversedBounds);
        }
        Ok(())
    }

    /// Whether the range denotes no keys. Callers treat an empty range as
    /// "no keys", never as an error.
    pub fn is_empty(&self, cmp: &dyn Comparator) -> bool {
        match cmp.compare(&self.start, &self.end) {
            Ordering::Greater => true,
            Ordering::Equal => !self.end_inclusive,
            Ordering::Less => false,
        }
    }

    /// Whether `key` falls within the bounds.
    pub fn contains(&self, cmp: &dyn Comparator, key: &[u8]) -> bool {
        if cmp.compare(key, &self.start) == Ordering::Less {
            return false;
        }
        match cmp.compare(key, &self.end) {
            Ordering::Less => true,
            Ordering::Equal => self.end_inclusive,
            Ordering::Greater => false,
        }
    }

    /// Smallest key sorting strictly after every key in bounds, used to clip
    /// half-open spans. For an inclusive end this is the end key's immediate
    /// bytewise successor.
    pub fn exclusive_end(&self) -> Vec<u8> {
        if self.end_inclusive {
            let mut succ = self.end.clone();
            succ.push(0);
            succ
        } else {
            self.end.clone()
        }
    }

    /// Whether the half-open span `[start, end)` overlaps these bounds.
    pub fn overlaps_span(&self, cmp: &dyn Comparator, start: &[u8], end: &[u8]) -> bool {
        cmp.compare(start, &self.exclusive_end()) == Ordering::Less
            && cmp.compare(end, &self.start) == Ordering::Greater
    }

    /// Intersect caller query bounds with these fixed bounds, producing the
    /// effective bounds pair.
    ///
    /// The start is the larger of the two starts. The query end is kept when
    /// it lies within the fixed range; an end beyond it is clamped to the
    /// fixed end with inclusivity forced to true, since the boundary key
    /// itself belongs to the fixed range's content when the query reaches
    /// past it. The result may be empty; it is never an error.
    pub fn constrain(&self, cmp: &dyn Comparator, query: &Bounds) -> Bounds {
        let start = if cmp.compare(&query.start, &self.start) == Ordering::Greater {
            query.start.clone()
        } else {
            self.start.clone()
        };

        let (end, end_inclusive) = match cmp.compare(&query.end, &self.end) {
            Ordering::Less => (query.end.clone(), query.end_inclusive),
            Ordering::Equal if query.end_inclusive == self.end_inclusive => {
                (query.end.clone(), query.end_inclusive)
            }
            _ => (self.end.clone(), true),
        };

        Bounds {
            start,
            end,
            end_inclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    const CMP: BytewiseComparator = BytewiseComparator;

    #[test]
    fn validate_rejects_reversed_bounds() {
        let b = Bounds::inclusive(b"m".to_vec(), b"a".to_vec());
        assert!(matches!(b.validate(&CMP), Err(StrataError::ReversedBounds)));
        assert!(Bounds::inclusive(b"a".to_vec(), b"a".to_vec())
            .validate(&CMP)
            .is_ok());
    }

    #[test]
    fn constrain_keeps_query_within_fixed_range() {
        let fixed = Bounds::inclusive(b"b".to_vec(), b"m".to_vec());
        let query = Bounds::new(b"c".to_vec(), b"f".to_vec(), false);
        let eff = fixed.constrain(&CMP, &query);
        assert_eq!(eff, Bounds::new(b"c".to_vec(), b"f".to_vec(), false));
    }

    #[test]
    fn constrain_clamps_and_forces_inclusive() {
        let fixed = Bounds::inclusive(b"b".to_vec(), b"m".to_vec());
        let query = Bounds::new(b"a".to_vec(), b"z".to_vec(), false);
        let eff = fixed.constrain(&CMP, &query);
        // Start raised to the fixed start; end clamped, inclusivity forced.
        assert_eq!(eff, Bounds::new(b"b".to_vec(), b"m".to_vec(), true));
    }

    #[test]
    fn constrain_equal_end_matching_inclusivity_is_kept() {
        let fixed = Bounds::new(b"b".to_vec(), b"m".to_vec(), false);
        let query = Bounds::new(b"c".to_vec(), b"m".to_vec(), false);
        let eff = fixed.constrain(&CMP, &query);
        assert_eq!(eff, Bounds::new(b"c".to_vec(), b"m".to_vec(), false));
    }

    #[test]
    fn constrain_no_overlap_yields_empty_range() {
        let fixed = Bounds::inclusive(b"b".to_vec(), b"c".to_vec());
        let query = Bounds::inclusive(b"x".to_vec(), b"z".to_vec());
        let eff = fixed.constrain(&CMP, &query);
        assert!(eff.is_empty(&CMP));
    }

    #[test]
    fn constrain_result_is_subset_of_fixed() {
        let fixed = Bounds::inclusive(b"d".to_vec(), b"p".to_vec());
        let queries = [
            Bounds::inclusive(b"a".to_vec(), b"z".to_vec()),
            Bounds::new(b"e".to_vec(), b"f".to_vec(), false),
            Bounds::inclusive(b"p".to_vec(), b"q".to_vec()),
        ];
        for q in &queries {
            let eff = fixed.constrain(&CMP, q);
            assert!(CMP.compare(&eff.start, &fixed.start) != Ordering::Less);
            assert!(CMP.compare(&eff.end, &fixed.end) != Ordering::Greater);
        }
    }

    #[test]
    fn contains_honors_end_inclusivity() {
        let incl = Bounds::inclusive(b"b".to_vec(), b"d".to_vec());
        assert!(incl.contains(&CMP, b"d"));
        let excl = Bounds::new(b"b".to_vec(), b"d".to_vec(), false);
        assert!(!excl.contains(&CMP, b"d"));
        assert!(excl.contains(&CMP, b"c"));
        assert!(!excl.contains(&CMP, b"a"));
    }

    #[test]
    fn overlaps_span_checks_half_open_intervals() {
        let b = Bounds::inclusive(b"d".to_vec(), b"f".to_vec());
        assert!(b.overlaps_span(&CMP, b"a", b"e"));
        assert!(b.overlaps_span(&CMP, b"f", b"g")); // touches inclusive end
        assert!(!b.overlaps_span(&CMP, b"a", b"d")); // ends exactly at start
        assert!(!b.overlaps_span(&CMP, b"g", b"h"));
    }
}
