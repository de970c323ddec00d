//! Table Reader
//!
//! Opens table files and serves iteration over points and spans. The file
//! is loaded into one shared immutable buffer at open; every key and value
//! surfaced afterwards is a zero-copy slice of that buffer, so a reader is
//! safe for unbounded concurrent readers and any number of views.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::bounds::Bounds;
use crate::config::{FormatVersion, TableConfig};
use crate::error::{Result, StrataError};
use crate::key::{RecordKind, SeqNum};
use crate::span::{Span, SpanKey};

use super::iterator::TableIter;
use super::{
    TableEntry, TableMeta, TableProperties, FOOTER_SIZE, HEADER_SIZE, MAGIC, NO_VALUE_MARKER,
    RECORD_HEADER_SIZE,
};

/// One parsed index entry: key plus the record's file offset.
pub(super) struct IndexEntry {
    pub(super) user_key: Bytes,
    pub(super) seq: SeqNum,
    pub(super) kind: RecordKind,
    pub(super) offset: u64,
}

/// Exact per-kind counts over a key range, derived from the index.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct KindCounts {
    pub(crate) entries: u64,
    pub(crate) deletions: u64,
    pub(crate) sized_deletions: u64,
    pub(crate) merge_operands: u64,
}

/// Reader for immutable table files
pub struct TableReader {
    /// Whole file contents; all reads are slices of this buffer
    data: Bytes,
    /// Reader configuration (comparator)
    config: TableConfig,
    /// Format version read from the file header
    format_version: FormatVersion,
    /// One entry per point record, in internal-key order
    index: Vec<IndexEntry>,
    /// End of the point block (start of the range-deletion block)
    points_end: u64,
    /// Range-deletion spans, start-ordered and non-overlapping
    range_dels: Vec<Span>,
    /// Range-key spans, start-ordered and non-overlapping
    range_keys: Vec<Span>,
    /// Aggregate properties stored at build time
    props: TableProperties,
    /// Metadata derived at open
    meta: TableMeta,
}

impl TableReader {
    /// Open a table for reading.
    ///
    /// Validates the magic, version, section offsets and data checksum
    /// before any record is served.
    pub fn open(path: &Path, config: TableConfig) -> Result<Self> {
        let data = Bytes::from(std::fs::read(path)?);
        let file_size = data.len() as u64;

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(StrataError::Corruption(format!(
                "table file too small: {} bytes",
                file_size
            )));
        }

        if &data[0..4] != MAGIC {
            return Err(StrataError::Corruption(format!(
                "invalid table magic: expected STKV, got {:?}",
                &data[0..4]
            )));
        }
        let version = u16::from_le_bytes(data[4..6].try_into().unwrap());
        let format_version = FormatVersion::from_u16(version)?;
        let entry_count = u64::from_le_bytes(data[6..14].try_into().unwrap());

        // Footer: four section offsets, CRC, padding
        let footer = &data[(file_size - FOOTER_SIZE) as usize..];
        let rangedel_off = u64::from_le_bytes(footer[0..8].try_into().unwrap());
        let rangekey_off = u64::from_le_bytes(footer[8..16].try_into().unwrap());
        let props_off = u64::from_le_bytes(footer[16..24].try_into().unwrap());
        let index_off = u64::from_le_bytes(footer[24..32].try_into().unwrap());
        let data_crc = u32::from_le_bytes(footer[32..36].try_into().unwrap());

        let ordered = HEADER_SIZE <= rangedel_off
            && rangedel_off <= rangekey_off
            && rangekey_off <= props_off
            && props_off <= index_off
            && index_off <= file_size - FOOTER_SIZE;
        if !ordered {
            return Err(StrataError::Corruption(
                "table footer offsets out of order".into(),
            ));
        }

        // Verify the record-bearing sections against the stored CRC
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[HEADER_SIZE as usize..props_off as usize]);
        if hasher.finalize() != data_crc {
            return Err(StrataError::Corruption("data checksum mismatch".into()));
        }

        let index = parse_index(&data, index_off as usize, (file_size - FOOTER_SIZE) as usize)?;
        if index.len() as u64 != entry_count {
            return Err(StrataError::Corruption(format!(
                "index holds {} entries, header claims {}",
                index.len(),
                entry_count
            )));
        }
        if index.iter().any(|e| e.offset < HEADER_SIZE || e.offset >= rangedel_off) {
            return Err(StrataError::Corruption("index offset out of range".into()));
        }
        let range_dels = parse_spans(&data, rangedel_off as usize, rangekey_off as usize)?;
        let range_keys = parse_spans(&data, rangekey_off as usize, props_off as usize)?;

        let props: TableProperties =
            bincode::deserialize(&data[props_off as usize..index_off as usize])
                .map_err(|e| StrataError::Serialization(e.to_string()))?;

        let meta = derive_meta(
            path,
            file_size,
            entry_count,
            config.comparator.as_ref(),
            &index,
            &range_dels,
            &range_keys,
        );

        Ok(Self {
            data,
            config,
            format_version,
            index,
            points_end: rangedel_off,
            range_dels,
            range_keys,
            props,
            meta,
        })
    }

    /// Format version stored in the file header
    pub fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    /// Aggregate properties computed at build time
    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    /// Table metadata derived at open
    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    /// The reader's comparator
    pub fn comparator(&self) -> &Arc<dyn crate::comparator::Comparator> {
        &self.config.comparator
    }

    /// Number of point records
    pub fn entry_count(&self) -> u64 {
        self.index.len() as u64
    }

    /// Open a point iterator over an optional key window. The lower bound
    /// is inclusive; the upper bound carries its own inclusivity flag.
    pub fn iter(
        self: &Arc<Self>,
        lower: Option<Vec<u8>>,
        upper: Option<(Vec<u8>, bool)>,
    ) -> TableIter {
        TableIter::new(Arc::clone(self), lower, upper)
    }

    /// Range-deletion spans, in start order
    pub fn range_deletions(&self) -> &[Span] {
        &self.range_dels
    }

    /// Range-key spans, in start order
    pub fn range_keys(&self) -> &[Span] {
        &self.range_keys
    }

    /// Iterate range-deletion spans
    pub fn range_deletion_iter(&self) -> std::slice::Iter<'_, Span> {
        self.range_dels.iter()
    }

    /// Iterate range-key spans
    pub fn range_key_iter(&self) -> std::slice::Iter<'_, Span> {
        self.range_keys.iter()
    }

    /// Estimate the on-disk footprint of the point records within `bounds`.
    ///
    /// Computed from record offsets; spans and per-table framing are not
    /// attributed to any range.
    pub fn disk_usage(&self, bounds: &Bounds) -> u64 {
        let lo = self.lower_bound(&bounds.start);
        let hi = self.upper_bound(&bounds.end, bounds.end_inclusive);
        if lo >= hi {
            return 0;
        }
        let start_off = self.index[lo].offset;
        let end_off = match self.index.get(hi) {
            Some(e) => e.offset,
            None => self.points_end,
        };
        end_off - start_off
    }

    /// True when no point record and no span overlaps `bounds`.
    pub fn is_empty_in_bounds(&self, bounds: &Bounds) -> bool {
        let cmp = self.config.comparator.as_ref();
        let lo = self.lower_bound(&bounds.start);
        let hi = self.upper_bound(&bounds.end, bounds.end_inclusive);
        if lo < hi {
            return false;
        }
        !self
            .range_dels
            .iter()
            .chain(self.range_keys.iter())
            .any(|s| bounds.overlaps_span(cmp, &s.start, &s.end))
    }

    // =========================================================================
    // Crate-Internal Access (iterator, views)
    // =========================================================================

    /// First index position with user key >= `key`.
    pub(crate) fn lower_bound(&self, key: &[u8]) -> usize {
        let cmp = self.config.comparator.as_ref();
        self.index
            .partition_point(|e| cmp.compare(&e.user_key, key) == Ordering::Less)
    }

    /// First index position past the upper bound.
    pub(crate) fn upper_bound(&self, key: &[u8], inclusive: bool) -> usize {
        let cmp = self.config.comparator.as_ref();
        if inclusive {
            self.index
                .partition_point(|e| cmp.compare(&e.user_key, key) != Ordering::Greater)
        } else {
            self.index
                .partition_point(|e| cmp.compare(&e.user_key, key) == Ordering::Less)
        }
    }

    pub(super) fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Materialize the record at index position `pos` as zero-copy slices.
    pub(super) fn entry_at(&self, pos: usize) -> TableEntry {
        let ie = &self.index[pos];
        let off = ie.offset as usize;
        let val_len = u32::from_le_bytes(self.data[off + 4..off + 8].try_into().unwrap());
        let key_len = u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap()) as usize;
        let value = if val_len == NO_VALUE_MARKER {
            None
        } else {
            let val_start = off + RECORD_HEADER_SIZE as usize + key_len;
            Some(self.data.slice(val_start..val_start + val_len as usize))
        };
        TableEntry {
            user_key: ie.user_key.clone(),
            seq: ie.seq,
            kind: ie.kind,
            value,
        }
    }

    /// Exact per-kind counts over the index entries within `bounds`.
    pub(crate) fn count_kinds_in(&self, bounds: &Bounds) -> KindCounts {
        let lo = self.lower_bound(&bounds.start);
        let hi = self.upper_bound(&bounds.end, bounds.end_inclusive);
        let mut counts = KindCounts::default();
        for ie in &self.index[lo..hi.max(lo)] {
            counts.entries += 1;
            if ie.kind.is_point_tombstone() {
                counts.deletions += 1;
            }
            match ie.kind {
                RecordKind::DeleteSized => counts.sized_deletions += 1,
                RecordKind::Merge => counts.merge_operands += 1,
                _ => {}
            }
        }
        counts
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

fn parse_index(data: &Bytes, start: usize, end: usize) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    let mut pos = start;
    while pos < end {
        if pos + 21 > end {
            return Err(StrataError::Corruption("truncated index entry".into()));
        }
        let key_len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let offset = u64::from_le_bytes(data[pos + 4..pos + 12].try_into().unwrap());
        let seq = SeqNum::from_raw(u64::from_le_bytes(data[pos + 12..pos + 20].try_into().unwrap()));
        let kind = RecordKind::from_u8(data[pos + 20])?;
        pos += 21;
        if pos + key_len > end {
            return Err(StrataError::Corruption("truncated index key".into()));
        }
        entries.push(IndexEntry {
            user_key: data.slice(pos..pos + key_len),
            seq,
            kind,
            offset,
        });
        pos += key_len;
    }
    Ok(entries)
}

fn parse_spans(data: &Bytes, start: usize, end: usize) -> Result<Vec<Span>> {
    let mut spans = Vec::new();
    let mut pos = start;
    while pos < end {
        if pos + 12 > end {
            return Err(StrataError::Corruption("truncated span header".into()));
        }
        let start_len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let end_len = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let key_count = u32::from_le_bytes(data[pos + 8..pos + 12].try_into().unwrap()) as usize;
        pos += 12;
        if pos + start_len + end_len > end {
            return Err(StrataError::Corruption("truncated span bounds".into()));
        }
        let span_start = data[pos..pos + start_len].to_vec();
        pos += start_len;
        let span_end = data[pos..pos + end_len].to_vec();
        pos += end_len;

        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            if pos + 13 > end {
                return Err(StrataError::Corruption("truncated span key".into()));
            }
            let seq = SeqNum::from_raw(u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap()));
            let kind = RecordKind::from_u8(data[pos + 8])?;
            let suffix_len =
                u32::from_le_bytes(data[pos + 9..pos + 13].try_into().unwrap()) as usize;
            pos += 13;
            if pos + suffix_len + 4 > end {
                return Err(StrataError::Corruption("truncated span suffix".into()));
            }
            let suffix = data[pos..pos + suffix_len].to_vec();
            pos += suffix_len;
            let val_len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + val_len > end {
                return Err(StrataError::Corruption("truncated span value".into()));
            }
            let value = data.slice(pos..pos + val_len);
            pos += val_len;
            keys.push(SpanKey {
                seq,
                kind,
                suffix,
                value,
            });
        }
        spans.push(Span {
            start: span_start,
            end: span_end,
            keys,
        });
    }
    Ok(spans)
}

fn derive_meta(
    path: &Path,
    file_size: u64,
    entry_count: u64,
    cmp: &dyn crate::comparator::Comparator,
    index: &[IndexEntry],
    range_dels: &[Span],
    range_keys: &[Span],
) -> TableMeta {
    let mut smallest: Option<&[u8]> = index.first().map(|e| e.user_key.as_ref());
    for span in range_dels.iter().chain(range_keys.iter()) {
        smallest = Some(match smallest {
            Some(s) if cmp.compare(s, &span.start) != Ordering::Greater => s,
            _ => &span.start,
        });
    }

    let mut largest: Option<(&[u8], bool)> = index.last().map(|e| (e.user_key.as_ref(), false));
    for span in range_dels.iter().chain(range_keys.iter()) {
        largest = Some(match largest {
            Some((l, excl)) if cmp.compare(l, &span.end) != Ordering::Less => (l, excl),
            _ => (&span.end, true),
        });
    }

    TableMeta {
        path: path.to_path_buf(),
        file_size,
        entry_count,
        smallest: smallest.unwrap_or_default().to_vec(),
        largest: largest.map(|(l, _)| l.to_vec()).unwrap_or_default(),
        largest_exclusive: largest.map(|(_, e)| e).unwrap_or(false),
    }
}
