//! Table Builder
//!
//! Writes sorted internal records and range-annotation spans to a new
//! immutable table file. Point records stream to disk incrementally; spans
//! and the index are buffered and written at finish, which is also the only
//! point where aggregate properties are computed.

use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::comparator::Comparator;
use crate::config::TableConfig;
use crate::error::{Result, StrataError};
use crate::key::{compare_internal, InternalKey, RecordKind, SeqNum};
use crate::span::{Span, SpanKey};

use super::{TableMeta, TableProperties, HEADER_SIZE, MAGIC, NO_VALUE_MARKER};

/// One index entry per point record.
struct IndexEntry {
    key: Vec<u8>,
    seq: SeqNum,
    kind: RecordKind,
    offset: u64,
}

/// Builder for creating new tables from sorted records.
///
/// Single-writer: one builder is driven sequentially by its caller.
/// Independent builders run fully in parallel with no shared state.
pub struct TableBuilder {
    /// Output file path
    path: std::path::PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Builder configuration (comparator, format version)
    config: TableConfig,
    /// Number of point records written
    entry_count: u64,
    /// Current write position (point block grows from the header)
    current_offset: u64,
    /// Index: one entry per point record
    index: Vec<IndexEntry>,
    /// Last point key added, for order enforcement
    last_key: Option<InternalKey>,
    /// Buffered range-deletion spans, start-ordered and non-overlapping
    range_dels: Vec<Span>,
    /// Buffered range-key spans, start-ordered and non-overlapping
    range_keys: Vec<Span>,
    /// Running CRC hasher over the record-bearing sections
    data_hasher: crc32fast::Hasher,
    /// Aggregate properties, finalized in `finish`
    props: TableProperties,
}

impl TableBuilder {
    /// Create a new table builder
    ///
    /// Writes the header immediately; call the add methods in sorted order,
    /// then `finish()` to write spans, properties, index and footer.
    pub fn new(path: &Path, config: TableConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);

        // Write header (entry_count placeholder, updated in finish)
        writer.write_all(MAGIC)?;
        writer.write_all(&config.format_version.as_u16().to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            config,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            last_key: None,
            range_dels: Vec::new(),
            range_keys: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
            props: TableProperties::default(),
        })
    }

    /// Add a point record. Must be called in strictly increasing
    /// internal-key order.
    pub fn add(&mut self, key: InternalKey, value: Option<&[u8]>) -> Result<()> {
        if !key.kind.is_point() {
            return Err(StrataError::InvalidRecord(format!(
                "kind {:?} is not a point kind",
                key.kind
            )));
        }
        if let Some(last) = &self.last_key {
            if compare_internal(self.config.comparator.as_ref(), last, &key) != Ordering::Less {
                return Err(StrataError::OutOfOrder(format!(
                    "{:?}@{} after {:?}@{}",
                    key.user_key, key.seq, last.user_key, last.seq
                )));
            }
        }

        self.index.push(IndexEntry {
            key: key.user_key.clone(),
            seq: key.seq,
            kind: key.kind,
            offset: self.current_offset,
        });

        // Record header: [key_len(4)][val_len(4)][seq(8)][kind(1)]
        let key_len = key.user_key.len() as u32;
        let val_len = match value {
            Some(v) => v.len() as u32,
            None => NO_VALUE_MARKER,
        };

        let mut header = [0u8; 17];
        header[0..4].copy_from_slice(&key_len.to_le_bytes());
        header[4..8].copy_from_slice(&val_len.to_le_bytes());
        header[8..16].copy_from_slice(&key.seq.to_raw().to_le_bytes());
        header[16] = key.kind as u8;

        self.writer.write_all(&header)?;
        self.writer.write_all(&key.user_key)?;
        self.data_hasher.update(&header);
        self.data_hasher.update(&key.user_key);

        let mut entry_size = 17 + key.user_key.len() as u64;
        if let Some(v) = value {
            self.writer.write_all(v)?;
            self.data_hasher.update(v);
            entry_size += v.len() as u64;
        }

        self.current_offset += entry_size;
        self.entry_count += 1;

        // Aggregate properties
        self.props.num_entries += 1;
        self.props.raw_key_bytes += key.user_key.len() as u64;
        self.props.raw_value_bytes += value.map_or(0, |v| v.len() as u64);
        if key.kind.is_point_tombstone() {
            self.props.num_deletions += 1;
        }
        match key.kind {
            RecordKind::DeleteSized => self.props.num_sized_deletions += 1,
            RecordKind::Merge => self.props.num_merge_operands += 1,
            _ => {}
        }

        self.last_key = Some(key);
        Ok(())
    }

    /// Add a range deletion over `[start, end)` at the given sequence
    /// number. Spans must arrive in start order and must not overlap.
    pub fn add_range_deletion(&mut self, start: &[u8], end: &[u8], seq: SeqNum) -> Result<()> {
        let span = Span::new(start.to_vec(), end.to_vec(), vec![SpanKey::range_deletion(seq)]);
        Self::check_span_order(self.config.comparator.as_ref(), &self.range_dels, &span)?;
        self.props.num_range_deletions += 1;
        self.range_dels.push(span);
        Ok(())
    }

    /// Add a range-key span. Its operations must all be range-key kinds;
    /// spans must arrive in start order and must not overlap.
    pub fn add_range_key(&mut self, span: Span) -> Result<()> {
        if span.keys.is_empty() {
            return Err(StrataError::InvalidSpan(
                "range-key span with no operations".into(),
            ));
        }
        if let Some(bad) = span.keys.iter().find(|k| !k.kind.is_range_key()) {
            return Err(StrataError::InvalidSpan(format!(
                "kind {:?} is not a range-key kind",
                bad.kind
            )));
        }
        Self::check_span_order(self.config.comparator.as_ref(), &self.range_keys, &span)?;
        for key in &span.keys {
            match key.kind {
                RecordKind::RangeKeySet => self.props.num_range_key_sets += 1,
                RecordKind::RangeKeyUnset => self.props.num_range_key_unsets += 1,
                RecordKind::RangeKeyDelete => self.props.num_range_key_deletes += 1,
                _ => unreachable!(),
            }
        }
        self.range_keys.push(span);
        Ok(())
    }

    fn check_span_order(cmp: &dyn Comparator, existing: &[Span], span: &Span) -> Result<()> {
        if cmp.compare(&span.start, &span.end) != Ordering::Less {
            return Err(StrataError::ReversedBounds);
        }
        if let Some(prev) = existing.last() {
            if cmp.compare(&span.start, &prev.end) == Ordering::Less {
                return Err(StrataError::OverlappingSpans(format!(
                    "span starting at {:?} overlaps previous span ending at {:?}",
                    span.start, prev.end
                )));
            }
        }
        Ok(())
    }

    /// Finish building: write span blocks, properties, index and footer,
    /// then return the table metadata and aggregate properties.
    pub fn finish(mut self) -> Result<(TableMeta, TableProperties)> {
        self.props.data_bytes = self.current_offset - HEADER_SIZE;

        // Range-deletion block
        let rangedel_offset = self.current_offset;
        let mut span_buf = Vec::new();
        for span in &self.range_dels {
            encode_span(&mut span_buf, span);
        }
        self.writer.write_all(&span_buf)?;
        self.data_hasher.update(&span_buf);
        self.current_offset += span_buf.len() as u64;

        // Range-key block
        let rangekey_offset = self.current_offset;
        span_buf.clear();
        for span in &self.range_keys {
            encode_span(&mut span_buf, span);
        }
        self.writer.write_all(&span_buf)?;
        self.data_hasher.update(&span_buf);
        self.current_offset += span_buf.len() as u64;

        // Properties block
        let props_offset = self.current_offset;
        let props_bytes = bincode::serialize(&self.props)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;
        self.writer.write_all(&props_bytes)?;
        self.current_offset += props_bytes.len() as u64;

        // Index block: [key_len(4)][offset(8)][seq(8)][kind(1)][key]
        let index_offset = self.current_offset;
        for entry in &self.index {
            let key_len = entry.key.len() as u32;
            self.writer.write_all(&key_len.to_le_bytes())?;
            self.writer.write_all(&entry.offset.to_le_bytes())?;
            self.writer.write_all(&entry.seq.to_raw().to_le_bytes())?;
            self.writer.write_all(&[entry.kind as u8])?;
            self.writer.write_all(&entry.key)?;
        }

        // Footer
        let (smallest, largest, largest_exclusive) = self.key_bounds();
        let data_crc = self.data_hasher.finalize();
        self.writer.write_all(&rangedel_offset.to_le_bytes())?;
        self.writer.write_all(&rangekey_offset.to_le_bytes())?;
        self.writer.write_all(&props_offset.to_le_bytes())?;
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;

        self.writer.flush()?;

        // Seek back and update entry count in header
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| StrataError::Corruption(format!("failed to flush table: {}", e)))?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        debug!(
            path = %self.path.display(),
            entries = self.entry_count,
            range_dels = self.range_dels.len(),
            range_keys = self.range_keys.len(),
            file_size,
            "finished table"
        );

        let meta = TableMeta {
            path: self.path,
            file_size,
            entry_count: self.entry_count,
            smallest,
            largest,
            largest_exclusive,
        };
        Ok((meta, self.props))
    }

    /// Smallest and largest user keys covered by points and spans. The
    /// largest is exclusive when it comes from a span end with no point
    /// record at that key.
    fn key_bounds(&self) -> (Vec<u8>, Vec<u8>, bool) {
        let cmp = self.config.comparator.as_ref();

        let mut smallest: Option<&[u8]> = self.index.first().map(|e| e.key.as_slice());
        for span in self.range_dels.iter().chain(self.range_keys.iter()) {
            smallest = Some(match smallest {
                Some(s) if cmp.compare(s, &span.start) != Ordering::Greater => s,
                _ => &span.start,
            });
        }

        let mut largest: Option<(&[u8], bool)> =
            self.index.last().map(|e| (e.key.as_slice(), false));
        for span in self.range_dels.iter().chain(self.range_keys.iter()) {
            largest = Some(match largest {
                // A point key equal to a span end is inclusive and wins.
                Some((l, excl)) if cmp.compare(l, &span.end) != Ordering::Less => (l, excl),
                _ => (&span.end, true),
            });
        }

        (
            smallest.unwrap_or_default().to_vec(),
            largest.map(|(l, _)| l.to_vec()).unwrap_or_default(),
            largest.map(|(_, excl)| excl).unwrap_or(false),
        )
    }
}

/// Span encoding shared by the range-deletion and range-key blocks.
fn encode_span(buf: &mut Vec<u8>, span: &Span) {
    buf.extend_from_slice(&(span.start.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(span.end.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(span.keys.len() as u32).to_le_bytes());
    buf.extend_from_slice(&span.start);
    buf.extend_from_slice(&span.end);
    for key in &span.keys {
        buf.extend_from_slice(&key.seq.to_raw().to_le_bytes());
        buf.push(key.kind as u8);
        buf.extend_from_slice(&(key.suffix.len() as u32).to_le_bytes());
        buf.extend_from_slice(&key.suffix);
        buf.extend_from_slice(&(key.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&key.value);
    }
}
