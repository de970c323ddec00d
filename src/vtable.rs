//! Virtual tables
//!
//! A [`VirtualTable`] is a zero-copy logical view restricting a physical
//! table to a keyspace sub-range, optionally through a key transform. It
//! never copies backing bytes: point iteration wraps a backing iterator
//! bounded to the effective range, and span iterators serve spans truncated
//! to the view's bounds at creation time.
//!
//! Caller-supplied read bounds are intersected with the view's fixed bounds
//! before any read; seek keys are translated into backing space through the
//! transform's prefix inversion. A record at the view's end boundary that
//! carries the reserved range-boundary sentinel exists only to let spans
//! end exactly at the boundary: it never surfaces from point iteration,
//! but remains visible through the span iterators.
//!
//! Many views may share one backing table; the reader is reference-counted
//! and must outlive every view, which the shared `Arc` guarantees.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::bounds::Bounds;
use crate::comparator::Comparator;
use crate::config::FormatVersion;
use crate::error::{Result, StrataError};
use crate::ingest::validate_unsuffixed_bounds;
use crate::key::{RecordKind, SeqNum};
use crate::span::{truncate, Span};
use crate::table::{TableEntry, TableIter, TableProperties, TableReader};
use crate::transform::KeyTransform;

/// A bounds-restricted view over a physical table.
pub struct VirtualTable {
    backing: Arc<TableReader>,
    /// Fixed bounds, in the view's (transformed) keyspace
    bounds: Bounds,
    /// Fixed bounds translated into backing keyspace
    backing_bounds: Bounds,
    transform: KeyTransform,
    /// Range-deletion spans truncated to the bounds, in view keyspace
    range_dels: Vec<Span>,
    /// Range-key spans truncated to the bounds, in view keyspace
    range_keys: Vec<Span>,
    /// Projected properties, computed once at creation
    props: TableProperties,
}

impl VirtualTable {
    /// Create a view of `backing` restricted to `bounds`.
    ///
    /// Validation happens before anything is materialized: reversed bounds,
    /// bounds carrying a suffix alongside a suffix-replacing transform, and
    /// transforms against a format version predating them are all rejected
    /// and leave no state behind.
    pub fn new(
        backing: Arc<TableReader>,
        bounds: Bounds,
        transform: KeyTransform,
    ) -> Result<VirtualTable> {
        let cmp = Arc::clone(backing.comparator());
        bounds.validate(cmp.as_ref())?;
        validate_unsuffixed_bounds(cmp.as_ref(), &bounds, &transform)?;
        if !transform.is_none() && !backing.format_version().supports_transforms() {
            return Err(StrataError::TransformUnsupported {
                required: FormatVersion::V2.as_u16(),
                actual: backing.format_version().as_u16(),
            });
        }

        let backing_bounds = Bounds {
            start: transform.invert_prefix(&bounds.start)?,
            end: transform.invert_prefix(&bounds.end)?,
            end_inclusive: bounds.end_inclusive,
        };

        // Spans are truncated to the bounds once, at open time; a span
        // crossing a boundary is clipped, never left overlapping it.
        let range_dels =
            truncate_to_view(cmp.as_ref(), backing.range_deletions(), &backing_bounds, &transform)?;
        let range_keys =
            truncate_to_view(cmp.as_ref(), backing.range_keys(), &backing_bounds, &transform)?;

        let props = project_properties(&backing, &backing_bounds, &range_dels, &range_keys);

        debug!(
            table = %backing.meta().path.display(),
            entries = props.num_entries,
            "created virtual table"
        );

        Ok(VirtualTable {
            backing,
            bounds,
            backing_bounds,
            transform,
            range_dels,
            range_keys,
            props,
        })
    }

    /// The view's fixed bounds.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The shared backing reader.
    pub fn backing(&self) -> &Arc<TableReader> {
        &self.backing
    }

    /// Projected aggregate properties.
    ///
    /// Counts are exact over the sub-range. Byte sizes are scaled by the
    /// sub-range's disk footprint and are known to be inaccurate for very
    /// small sub-ranges; callers must not rely on them for exact
    /// accounting.
    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    /// True when no point record and no span falls within the bounds.
    pub fn is_empty(&self) -> bool {
        self.backing.is_empty_in_bounds(&self.backing_bounds)
    }

    /// Open a point iterator over an optional caller key window.
    ///
    /// The window is intersected with the view's fixed bounds; a window
    /// with no overlap yields an iterator that reports no keys, never an
    /// error.
    pub fn iter(
        &self,
        lower: Option<&[u8]>,
        upper: Option<(&[u8], bool)>,
    ) -> Result<VirtualTableIter> {
        let cmp = Arc::clone(self.backing.comparator());
        let query = Bounds {
            start: lower.unwrap_or(&self.bounds.start).to_vec(),
            end: upper.map_or(self.bounds.end.clone(), |(u, _)| u.to_vec()),
            end_inclusive: upper.map_or(self.bounds.end_inclusive, |(_, incl)| incl),
        };
        let effective = self.bounds.constrain(cmp.as_ref(), &query);
        let empty = effective.is_empty(cmp.as_ref());

        let inner = if empty {
            // Degenerate window; the backing iterator never gets used.
            self.backing.iter(None, Some((Vec::new(), false)))
        } else {
            let lower = self.transform.invert_prefix(&effective.start)?;
            let upper = self.transform.invert_prefix(&effective.end)?;
            self.backing
                .iter(Some(lower), Some((upper, effective.end_inclusive)))
        };

        Ok(VirtualTableIter {
            inner,
            cmp,
            transform: self.transform.clone(),
            backing_end: self.backing_bounds.end.clone(),
            eff_start: effective.start,
            eff_end: effective.end,
            eff_end_inclusive: effective.end_inclusive,
            empty,
        })
    }

    /// Iterate the view's range-deletion spans. Spans ending exactly at an
    /// exclusive boundary remain visible here even though the boundary key
    /// never surfaces from point iteration.
    pub fn range_deletion_iter(&self) -> std::slice::Iter<'_, Span> {
        self.range_dels.iter()
    }

    /// Iterate the view's range-key spans.
    pub fn range_key_iter(&self) -> std::slice::Iter<'_, Span> {
        self.range_keys.iter()
    }
}

/// Truncate backing spans to the view bounds and express their boundaries
/// in view keyspace.
fn truncate_to_view(
    cmp: &dyn Comparator,
    spans: &[Span],
    backing_bounds: &Bounds,
    transform: &KeyTransform,
) -> Result<Vec<Span>> {
    let mut out = Vec::new();
    for span in spans {
        if let Some(mut clipped) = truncate(cmp, span, backing_bounds) {
            clipped.start = transform.apply(cmp, &clipped.start)?;
            clipped.end = transform.apply(cmp, &clipped.end)?;
            out.push(clipped);
        }
    }
    Ok(out)
}

/// Derive a virtual table's properties from the backing table's, without a
/// full scan.
///
/// Per-kind record counts are exact over the sub-range (the index is in
/// memory); span counts are exact over the truncated spans. Byte sizes are
/// scaled by the ratio of the sub-range's disk footprint to the whole
/// table's, an approximation that degrades for sub-ranges spanning only a
/// few records.
fn project_properties(
    backing: &TableReader,
    backing_bounds: &Bounds,
    range_dels: &[Span],
    range_keys: &[Span],
) -> TableProperties {
    let base = backing.properties();
    let counts = backing.count_kinds_in(backing_bounds);
    let footprint = backing.disk_usage(backing_bounds);
    let ratio = footprint as f64 / base.data_bytes.max(1) as f64;
    let scale = |bytes: u64| (bytes as f64 * ratio) as u64;

    let mut props = TableProperties {
        num_entries: counts.entries,
        num_deletions: counts.deletions,
        num_sized_deletions: counts.sized_deletions,
        num_merge_operands: counts.merge_operands,
        raw_key_bytes: scale(base.raw_key_bytes),
        raw_value_bytes: scale(base.raw_value_bytes),
        data_bytes: footprint,
        ..TableProperties::default()
    };
    for span in range_dels {
        props.num_range_deletions += span.keys.len() as u64;
    }
    for span in range_keys {
        for key in &span.keys {
            match key.kind {
                RecordKind::RangeKeySet => props.num_range_key_sets += 1,
                RecordKind::RangeKeyUnset => props.num_range_key_unsets += 1,
                RecordKind::RangeKeyDelete => props.num_range_key_deletes += 1,
                _ => {}
            }
        }
    }
    props
}

// =============================================================================
// Virtual Iterator
// =============================================================================

/// Point iterator over a virtual table.
///
/// Every positioning primitive behaves like the backing iterator restricted
/// to the effective bounds, with keys expressed in the view's keyspace.
pub struct VirtualTableIter {
    inner: TableIter,
    cmp: Arc<dyn Comparator>,
    transform: KeyTransform,
    /// End boundary in backing keyspace, for sentinel suppression
    backing_end: Vec<u8>,
    /// Effective bounds in view keyspace, for seek clamping
    eff_start: Vec<u8>,
    eff_end: Vec<u8>,
    eff_end_inclusive: bool,
    /// Whether the effective window denotes no keys
    empty: bool,
}

impl VirtualTableIter {
    /// Position at the first record.
    pub fn first(&mut self) -> Result<Option<TableEntry>> {
        if self.empty {
            return Ok(None);
        }
        let entry = self.inner.first();
        self.surface_forward(entry)
    }

    /// Position at the last record.
    pub fn last(&mut self) -> Result<Option<TableEntry>> {
        if self.empty {
            return Ok(None);
        }
        let entry = self.inner.last();
        self.surface_backward(entry)
    }

    /// Advance to the next record.
    pub fn next(&mut self) -> Result<Option<TableEntry>> {
        if self.empty {
            return Ok(None);
        }
        let entry = self.inner.next();
        self.surface_forward(entry)
    }

    /// Step back to the previous record.
    pub fn prev(&mut self) -> Result<Option<TableEntry>> {
        if self.empty {
            return Ok(None);
        }
        let entry = self.inner.prev();
        self.surface_backward(entry)
    }

    /// Position at the first record with user key >= `key` (view keyspace).
    pub fn seek_ge(&mut self, key: &[u8]) -> Result<Option<TableEntry>> {
        if self.empty {
            return Ok(None);
        }
        let key = self.clamp_low(key);
        if self.past_end(key) {
            self.inner.invalidate();
            return Ok(None);
        }
        let backing_key = self.transform.invert_prefix(key)?;
        let entry = self.inner.seek_ge(&backing_key);
        self.surface_forward(entry)
    }

    /// Position at the last record with user key < `key` (view keyspace).
    pub fn seek_lt(&mut self, key: &[u8]) -> Result<Option<TableEntry>> {
        if self.empty {
            return Ok(None);
        }
        if self.cmp.compare(key, &self.eff_end) == Ordering::Greater {
            return self.last();
        }
        if self.cmp.compare(key, &self.eff_start) != Ordering::Greater {
            self.inner.invalidate();
            return Ok(None);
        }
        let backing_key = self.transform.invert_prefix(key)?;
        let entry = self.inner.seek_lt(&backing_key);
        self.surface_backward(entry)
    }

    /// Position at the first record with user key >= `key` sharing the seek
    /// key's comparator prefix.
    pub fn seek_prefix_ge(&mut self, key: &[u8]) -> Result<Option<TableEntry>> {
        if self.empty {
            return Ok(None);
        }
        let key = self.clamp_low(key);
        if self.past_end(key) {
            self.inner.invalidate();
            return Ok(None);
        }
        let backing_key = self.transform.invert_prefix(key)?;
        let entry = self.inner.seek_prefix_ge(&backing_key);
        self.surface_forward(entry)
    }

    fn clamp_low<'a>(&'a self, key: &'a [u8]) -> &'a [u8] {
        if self.cmp.compare(key, &self.eff_start) == Ordering::Less {
            &self.eff_start
        } else {
            key
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match self.cmp.compare(key, &self.eff_end) {
            Ordering::Greater => true,
            Ordering::Equal => !self.eff_end_inclusive,
            Ordering::Less => false,
        }
    }

    /// A record at the end boundary carrying the range-boundary sentinel
    /// exists only for spans ending at the boundary; point iteration
    /// suppresses it.
    fn suppressed(&self, entry: &TableEntry) -> bool {
        matches!(entry.seq, SeqNum::RangeBoundary)
            && self.cmp.equal(&entry.user_key, &self.backing_end)
    }

    fn surface_forward(&mut self, mut entry: Option<TableEntry>) -> Result<Option<TableEntry>> {
        loop {
            match entry {
                None => return Ok(None),
                Some(e) if self.suppressed(&e) => entry = self.inner.next(),
                Some(e) => return self.present(e).map(Some),
            }
        }
    }

    fn surface_backward(&mut self, mut entry: Option<TableEntry>) -> Result<Option<TableEntry>> {
        loop {
            match entry {
                None => return Ok(None),
                Some(e) if self.suppressed(&e) => entry = self.inner.prev(),
                Some(e) => return self.present(e).map(Some),
            }
        }
    }

    /// Express a backing record in the view's keyspace.
    fn present(&self, entry: TableEntry) -> Result<TableEntry> {
        if self.transform.is_none() {
            return Ok(entry);
        }
        let user_key = self.transform.apply(self.cmp.as_ref(), &entry.user_key)?;
        Ok(TableEntry {
            user_key: Bytes::from(user_key),
            ..entry
        })
    }
}
