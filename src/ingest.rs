//! Ingestion pipeline
//!
//! Materializes a new table to be ingested, either from an in-memory batch
//! or from a bounded slice of an existing table. The pipeline normalizes
//! the record stream on its way into the builder:
//!
//! 1. duplicates are dropped (full-key or unique-prefixes identity),
//! 2. every surviving record's sequence number is reset to the ingestion
//!    sentinel, so the whole table commits at one sequence number,
//! 3. sized deletes are downgraded to plain deletes when the target format
//!    predates them,
//! 4. the key transform is applied to every emitted key and span boundary,
//! 5. range-key spans are coalesced into a conflict-free operation list.
//!
//! All source iterators are closed on every exit path, in a fixed order
//! (point, then range-deletion, then range-key). The first error
//! encountered wins; later close errors are observed but never override
//! an already-reported one. On any failure the partially written file is
//! removed: ingestion fails atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bounds::Bounds;
use crate::comparator::Comparator;
use crate::config::{FormatVersion, TableConfig};
use crate::dedup::Deduplicator;
use crate::error::{Result, StrataError};
use crate::key::{compare_internal, InternalKey, Record, RecordKind, RecordStream, SeqNum, SpanStream};
use crate::span::{coalesce, set_sequence, sort_keys_by_trailer, truncate, Span};
use crate::table::{TableBuilder, TableIter, TableMeta, TableProperties, TableReader};
use crate::transform::KeyTransform;

// =============================================================================
// Options and Sources
// =============================================================================

/// Options controlling one ingestion build.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Deduplicate by comparator prefix instead of full user key
    pub unique_prefixes: bool,
    /// Key rewrite applied to every emitted key and span boundary
    pub transform: KeyTransform,
    /// Format version of the produced table
    pub target_version: FormatVersion,
}

/// The three record streams feeding one ingestion build.
///
/// Point records arrive in ascending order, newest first per user key;
/// span streams arrive in start order.
pub struct IngestSource {
    pub points: Box<dyn RecordStream + Send>,
    pub range_deletions: Option<Box<dyn SpanStream + Send>>,
    pub range_keys: Option<Box<dyn SpanStream + Send>>,
}

impl IngestSource {
    /// Source over an in-memory batch. Records and spans are sorted here;
    /// callers hand over batch contents in any order.
    pub fn from_batch(
        comparator: &Arc<dyn Comparator>,
        records: Vec<Record>,
        range_deletions: Vec<Span>,
        range_keys: Vec<Span>,
    ) -> Self {
        Self {
            points: Box::new(BatchStream::new(comparator, records)),
            range_deletions: Some(Box::new(BatchSpanStream::new(comparator, range_deletions))),
            range_keys: Some(Box::new(BatchSpanStream::new(comparator, range_keys))),
        }
    }
}

/// In-memory point-record stream, sorted on construction.
pub struct BatchStream {
    records: std::vec::IntoIter<Record>,
}

impl BatchStream {
    pub fn new(comparator: &Arc<dyn Comparator>, mut records: Vec<Record>) -> Self {
        records.sort_by(|a, b| compare_internal(comparator.as_ref(), &a.key, &b.key));
        Self {
            records: records.into_iter(),
        }
    }
}

impl RecordStream for BatchStream {
    fn next(&mut self) -> Result<Option<Record>> {
        Ok(self.records.next())
    }
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory span stream, sorted by start key on construction.
pub struct BatchSpanStream {
    spans: std::vec::IntoIter<Span>,
}

impl BatchSpanStream {
    pub fn new(comparator: &Arc<dyn Comparator>, mut spans: Vec<Span>) -> Self {
        spans.sort_by(|a, b| comparator.compare(&a.start, &b.start));
        Self {
            spans: spans.into_iter(),
        }
    }

    fn from_sorted(spans: Vec<Span>) -> Self {
        Self {
            spans: spans.into_iter(),
        }
    }
}

impl SpanStream for BatchSpanStream {
    fn next(&mut self) -> Result<Option<Span>> {
        Ok(self.spans.next())
    }
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Point stream over an open table iterator, used when rebuilding a table
/// from a bounded slice of another.
struct SliceRecordStream {
    iter: TableIter,
    started: bool,
}

impl RecordStream for SliceRecordStream {
    fn next(&mut self) -> Result<Option<Record>> {
        let entry = if self.started {
            self.iter.next()
        } else {
            self.started = true;
            self.iter.first()
        };
        Ok(entry.map(|e| {
            Record::new(
                InternalKey::new(e.user_key.to_vec(), e.seq, e.kind),
                e.value,
            )
        }))
    }
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Single-Table Build
// =============================================================================

/// Build one table for ingestion from the given source.
///
/// Closes all source iterators on every exit path; on failure the partial
/// output file is removed and no table is produced.
pub fn build_ingest_table(
    config: &TableConfig,
    path: &Path,
    mut source: IngestSource,
    options: &IngestOptions,
) -> Result<(TableMeta, TableProperties)> {
    let build_result = write_table_for_ingest(config, path, &mut source, options);

    // Fixed close order: point, range-deletion, range-key. First error wins.
    let mut output = None;
    let mut first_err = match build_result {
        Ok(v) => {
            output = Some(v);
            None
        }
        Err(e) => Some(e),
    };
    let closes = [
        ("point", source.points.close()),
        (
            "range-deletion",
            source.range_deletions.as_mut().map_or(Ok(()), |s| s.close()),
        ),
        (
            "range-key",
            source.range_keys.as_mut().map_or(Ok(()), |s| s.close()),
        ),
    ];
    for (stream, res) in closes {
        if let Err(e) = res {
            if first_err.is_none() {
                first_err = Some(e);
            } else {
                warn!(stream, error = %e, "close error after earlier failure");
            }
        }
    }

    match (output, first_err) {
        (Some(out), None) => Ok(out),
        (_, Some(err)) => {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove partial table");
                }
            }
            Err(err)
        }
        (None, None) => Err(StrataError::WorkerFailed(
            "ingestion build produced no result".into(),
        )),
    }
}

fn write_table_for_ingest(
    config: &TableConfig,
    path: &Path,
    source: &mut IngestSource,
    options: &IngestOptions,
) -> Result<(TableMeta, TableProperties)> {
    if !options.transform.is_none() && !options.target_version.supports_transforms() {
        return Err(StrataError::TransformUnsupported {
            required: FormatVersion::V2.as_u16(),
            actual: options.target_version.as_u16(),
        });
    }

    let cmp = Arc::clone(&config.comparator);
    let build_config = TableConfig {
        comparator: Arc::clone(&cmp),
        format_version: options.target_version,
    };
    let mut builder = TableBuilder::new(path, build_config)?;

    // Point records: dedup, reset sequence, downgrade sized deletes on old
    // formats, transform.
    let mut points = Deduplicator::new(
        source.points.as_mut(),
        Arc::clone(&cmp),
        options.unique_prefixes,
    );
    while let Some(mut record) = points.next()? {
        record.key.seq = SeqNum::ZERO;
        if record.key.kind == RecordKind::DeleteSized
            && !options.target_version.supports_delete_sized()
        {
            record.key.kind = RecordKind::Delete;
            record.value = None;
        }
        let out_key = options.transform.apply(cmp.as_ref(), &record.key.user_key)?;
        builder.add(
            InternalKey::new(out_key, record.key.seq, record.key.kind),
            record.value.as_deref(),
        )?;
    }

    // Range deletions pass through with transformed bounds.
    if let Some(range_dels) = source.range_deletions.as_mut() {
        while let Some(span) = range_dels.next()? {
            let start = options.transform.apply(cmp.as_ref(), &span.start)?;
            let end = options.transform.apply(cmp.as_ref(), &span.end)?;
            builder.add_range_deletion(&start, &end, SeqNum::ZERO)?;
        }
    }

    // Range-key spans: coalesce into a conflict-free list committing at the
    // ingestion sequence number, re-sort by trailer, transform.
    if let Some(range_keys) = source.range_keys.as_mut() {
        while let Some(span) = range_keys.next()? {
            let mut keys = coalesce(cmp.as_ref(), &span.keys);
            if keys.is_empty() {
                continue;
            }
            set_sequence(&mut keys, SeqNum::ZERO);
            sort_keys_by_trailer(&mut keys);
            let start = options.transform.apply(cmp.as_ref(), &span.start)?;
            let end = options.transform.apply(cmp.as_ref(), &span.end)?;
            builder.add_range_key(Span::new(start, end, keys))?;
        }
    }

    builder.finish()
}

// =============================================================================
// Slice Rebuild
// =============================================================================

/// Rebuild a physical table from a bounded, transformed slice of another.
///
/// `bounds` are expressed in transformed space and are translated back into
/// backing space through the transform's prefix inversion before any read.
/// Spans crossing a boundary are truncated, never left overlapping it.
pub fn build_from_slice(
    config: &TableConfig,
    reader: &Arc<TableReader>,
    path: &Path,
    bounds: &Bounds,
    transform: &KeyTransform,
    target_version: FormatVersion,
) -> Result<(TableMeta, TableProperties)> {
    let cmp = config.comparator.as_ref();
    bounds.validate(cmp)?;
    validate_unsuffixed_bounds(cmp, bounds, transform)?;

    let backing_bounds = Bounds {
        start: transform.invert_prefix(&bounds.start)?,
        end: transform.invert_prefix(&bounds.end)?,
        end_inclusive: bounds.end_inclusive,
    };

    let iter = reader.iter(
        Some(backing_bounds.start.clone()),
        Some((backing_bounds.end.clone(), backing_bounds.end_inclusive)),
    );
    let range_dels: Vec<Span> = reader
        .range_deletions()
        .iter()
        .filter_map(|s| truncate(cmp, s, &backing_bounds))
        .collect();
    let range_keys: Vec<Span> = reader
        .range_keys()
        .iter()
        .filter_map(|s| truncate(cmp, s, &backing_bounds))
        .collect();

    let source = IngestSource {
        points: Box::new(SliceRecordStream {
            iter,
            started: false,
        }),
        range_deletions: Some(Box::new(BatchSpanStream::from_sorted(range_dels))),
        range_keys: Some(Box::new(BatchSpanStream::from_sorted(range_keys))),
    };

    // The slice keeps whatever duplicate prefixes the backing table has.
    let options = IngestOptions {
        unique_prefixes: false,
        transform: transform.clone(),
        target_version,
    };
    build_ingest_table(config, path, source, &options)
}

/// Bounds used with a suffix-replacing transform must be split at the
/// user-key/suffix boundary already.
pub(crate) fn validate_unsuffixed_bounds(
    cmp: &dyn Comparator,
    bounds: &Bounds,
    transform: &KeyTransform,
) -> Result<()> {
    if transform.replaces_suffix()
        && (cmp.split(&bounds.start) != bounds.start.len()
            || cmp.split(&bounds.end) != bounds.end.len())
    {
        return Err(StrataError::SuffixedBounds);
    }
    Ok(())
}

// =============================================================================
// Batch Ingestion
// =============================================================================

/// One table build within a batch.
pub struct IngestJob {
    pub path: PathBuf,
    pub source: IngestSource,
    pub options: IngestOptions,
}

/// Build a batch of ingestion tables, one builder per job, across scoped
/// worker threads. The jobs share no mutable state.
///
/// The batch fails atomically: on any build error, or when the finished
/// tables' key ranges overlap each other, every produced file is removed
/// and the error is surfaced.
pub fn ingest_batch(
    config: &TableConfig,
    jobs: Vec<IngestJob>,
) -> Result<Vec<(TableMeta, TableProperties)>> {
    let paths: Vec<PathBuf> = jobs.iter().map(|j| j.path.clone()).collect();
    info!(jobs = jobs.len(), "building ingestion batch");

    let results: Vec<Result<(TableMeta, TableProperties)>> =
        crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .into_iter()
                .map(|job| {
                    scope.spawn(move |_| {
                        build_ingest_table(config, &job.path, job.source, &job.options)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(StrataError::WorkerFailed("ingestion worker panicked".into()))
                    })
                })
                .collect()
        })
        .map_err(|_| StrataError::WorkerFailed("ingestion scope panicked".into()))?;

    let mut outputs = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(out) => outputs.push(out),
            Err(e) => {
                remove_batch_files(&paths);
                return Err(e);
            }
        }
    }

    let metas: Vec<&TableMeta> = outputs.iter().map(|(m, _)| m).collect();
    if let Err(e) = validate_ingest_ranges(config.comparator.as_ref(), &metas) {
        remove_batch_files(&paths);
        return Err(e);
    }

    Ok(outputs)
}

/// Reject a batch whose tables' key ranges overlap one another.
pub fn validate_ingest_ranges(cmp: &dyn Comparator, metas: &[&TableMeta]) -> Result<()> {
    let mut ordered: Vec<&TableMeta> = metas.to_vec();
    ordered.sort_by(|a, b| cmp.compare(&a.smallest, &b.smallest));
    for pair in ordered.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let overlaps = match cmp.compare(&next.smallest, &prev.largest) {
            std::cmp::Ordering::Less => true,
            // Touching an exclusive end is not an overlap.
            std::cmp::Ordering::Equal => !prev.largest_exclusive,
            std::cmp::Ordering::Greater => false,
        };
        if overlaps {
            return Err(StrataError::OverlappingIngestRanges(format!(
                "{:?} overlaps {:?}",
                next.path, prev.path
            )));
        }
    }
    Ok(())
}

fn remove_batch_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove batch file");
            }
        }
    }
}
