//! Tests for table iteration
//!
//! These tests verify:
//! - Forward and backward iteration in internal-key order
//! - Seek primitives (SeekGE, SeekLT, prefix seek)
//! - Key-window restriction
//! - Newest-first ordering at an equal user key
//! - Span iterators

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use stratakv::{
    Bounds, InternalKey, RecordKind, SeparatorSuffixComparator, SeqNum, Span, SpanKey,
    TableBuilder, TableConfig, TableReader,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_table() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.stt");
    (temp_dir, path)
}

fn set_key(user_key: &[u8], seq: u64) -> InternalKey {
    InternalKey::new(user_key.to_vec(), SeqNum::Committed(seq), RecordKind::Set)
}

fn open_with_entries(path: &PathBuf, keys: &[(&[u8], u64, &[u8])]) -> Arc<TableReader> {
    let mut builder = TableBuilder::new(path, TableConfig::default()).unwrap();
    for (user_key, seq, value) in keys {
        builder.add(set_key(user_key, *seq), Some(value)).unwrap();
    }
    builder.finish().unwrap();
    Arc::new(TableReader::open(path, TableConfig::default()).unwrap())
}

// =============================================================================
// Forward / Backward Iteration
// =============================================================================

#[test]
fn test_forward_iteration_in_order() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"a", 1, b"1"), (b"b", 1, b"2"), (b"c", 1, b"3")],
    );

    let mut iter = reader.iter(None, None);
    let mut seen = Vec::new();
    let mut entry = iter.first();
    while let Some(e) = entry {
        seen.push(e.user_key.to_vec());
        entry = iter.next();
    }
    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_backward_iteration_in_order() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"a", 1, b"1"), (b"b", 1, b"2"), (b"c", 1, b"3")],
    );

    let mut iter = reader.iter(None, None);
    let mut seen = Vec::new();
    let mut entry = iter.last();
    while let Some(e) = entry {
        seen.push(e.user_key.to_vec());
        entry = iter.prev();
    }
    assert_eq!(seen, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn test_newest_version_comes_first() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(&path, &[(b"k", 9, b"new"), (b"k", 3, b"old")]);

    let mut iter = reader.iter(None, None);
    let first = iter.first().unwrap();
    assert_eq!(first.seq, SeqNum::Committed(9));
    assert_eq!(first.value, Some(Bytes::from_static(b"new")));
    let second = iter.next().unwrap();
    assert_eq!(second.seq, SeqNum::Committed(3));
}

#[test]
fn test_empty_table_iteration() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(&path, &[]);

    let mut iter = reader.iter(None, None);
    assert!(iter.first().is_none());
    assert!(iter.last().is_none());
    assert!(iter.next().is_none());
}

// =============================================================================
// Seek Primitives
// =============================================================================

#[test]
fn test_seek_ge() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"b", 1, b"1"), (b"d", 1, b"2"), (b"f", 1, b"3")],
    );

    let mut iter = reader.iter(None, None);
    assert_eq!(iter.seek_ge(b"c").unwrap().user_key, &b"d"[..]);
    assert_eq!(iter.seek_ge(b"d").unwrap().user_key, &b"d"[..]);
    assert_eq!(iter.seek_ge(b"a").unwrap().user_key, &b"b"[..]);
    assert!(iter.seek_ge(b"g").is_none());
}

#[test]
fn test_seek_ge_lands_on_newest_version() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(&path, &[(b"k", 9, b"new"), (b"k", 3, b"old")]);

    let mut iter = reader.iter(None, None);
    let entry = iter.seek_ge(b"k").unwrap();
    assert_eq!(entry.seq, SeqNum::Committed(9));
}

#[test]
fn test_seek_lt() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"b", 1, b"1"), (b"d", 1, b"2"), (b"f", 1, b"3")],
    );

    let mut iter = reader.iter(None, None);
    assert_eq!(iter.seek_lt(b"c").unwrap().user_key, &b"b"[..]);
    assert_eq!(iter.seek_lt(b"d").unwrap().user_key, &b"b"[..]);
    assert_eq!(iter.seek_lt(b"z").unwrap().user_key, &b"f"[..]);
    assert!(iter.seek_lt(b"b").is_none());
}

#[test]
fn test_seek_then_step() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"b", 1, b"1"), (b"d", 1, b"2"), (b"f", 1, b"3")],
    );

    let mut iter = reader.iter(None, None);
    iter.seek_ge(b"d");
    assert_eq!(iter.next().unwrap().user_key, &b"f"[..]);
    iter.seek_ge(b"d");
    assert_eq!(iter.prev().unwrap().user_key, &b"b"[..]);
}

#[test]
fn test_seek_prefix_ge() {
    let (_temp, path) = setup_temp_table();
    let config = TableConfig::builder()
        .comparator(Arc::new(SeparatorSuffixComparator::default()))
        .build();

    let mut builder = TableBuilder::new(&path, config.clone()).unwrap();
    builder.add(set_key(b"a@v1", 1), Some(b"1")).unwrap();
    builder.add(set_key(b"c@v1", 1), Some(b"2")).unwrap();
    builder.finish().unwrap();
    let reader = Arc::new(TableReader::open(&path, config).unwrap());

    let mut iter = reader.iter(None, None);
    assert_eq!(iter.seek_prefix_ge(b"c@v0").unwrap().user_key, &b"c@v1"[..]);
    // The next key past the prefix is not surfaced.
    assert!(iter.seek_prefix_ge(b"b@v0").is_none());
}

// =============================================================================
// Key Windows
// =============================================================================

#[test]
fn test_window_restricts_iteration() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"a", 1, b"1"), (b"b", 1, b"2"), (b"c", 1, b"3"), (b"d", 1, b"4")],
    );

    let mut iter = reader.iter(Some(b"b".to_vec()), Some((b"c".to_vec(), true)));
    assert_eq!(iter.first().unwrap().user_key, &b"b"[..]);
    assert_eq!(iter.next().unwrap().user_key, &b"c"[..]);
    assert!(iter.next().is_none());
}

#[test]
fn test_window_exclusive_upper() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"a", 1, b"1"), (b"b", 1, b"2"), (b"c", 1, b"3")],
    );

    let mut iter = reader.iter(None, Some((b"c".to_vec(), false)));
    assert_eq!(iter.last().unwrap().user_key, &b"b"[..]);
}

#[test]
fn test_window_seek_is_clamped() {
    let (_temp, path) = setup_temp_table();
    let reader = open_with_entries(
        &path,
        &[(b"a", 1, b"1"), (b"b", 1, b"2"), (b"c", 1, b"3"), (b"d", 1, b"4")],
    );

    let mut iter = reader.iter(Some(b"b".to_vec()), Some((b"c".to_vec(), true)));
    // Seeks below the window land on its first key; above it, exhaust.
    assert_eq!(iter.seek_ge(b"a").unwrap().user_key, &b"b"[..]);
    assert!(iter.seek_ge(b"d").is_none());
    assert_eq!(iter.seek_lt(b"z").unwrap().user_key, &b"c"[..]);
}

// =============================================================================
// Span Iterators
// =============================================================================

#[test]
fn test_span_iterators_report_stored_spans() {
    let (_temp, path) = setup_temp_table();

    let mut builder = TableBuilder::new(&path, TableConfig::default()).unwrap();
    builder
        .add_range_deletion(b"d", b"e", SeqNum::Committed(7))
        .unwrap();
    builder
        .add_range_key(Span::new(
            b"a".to_vec(),
            b"d".to_vec(),
            vec![SpanKey::new(
                SeqNum::Committed(7),
                RecordKind::RangeKeySet,
                b"".to_vec(),
                Bytes::from_static(b"rv"),
            )],
        ))
        .unwrap();
    builder.finish().unwrap();

    let reader = TableReader::open(&path, TableConfig::default()).unwrap();

    let dels: Vec<_> = reader.range_deletion_iter().collect();
    assert_eq!(dels.len(), 1);
    assert_eq!(dels[0].start, b"d");
    assert_eq!(dels[0].end, b"e");
    assert_eq!(dels[0].keys[0].kind, RecordKind::RangeDelete);

    let range_keys: Vec<_> = reader.range_key_iter().collect();
    assert_eq!(range_keys.len(), 1);
    assert_eq!(range_keys[0].keys[0].value, Bytes::from_static(b"rv"));
}

#[test]
fn test_is_empty_in_bounds() {
    let (_temp, path) = setup_temp_table();

    let mut builder = TableBuilder::new(&path, TableConfig::default()).unwrap();
    builder.add(set_key(b"b", 1), Some(b"1")).unwrap();
    builder
        .add_range_deletion(b"m", b"p", SeqNum::Committed(1))
        .unwrap();
    builder.finish().unwrap();

    let reader = TableReader::open(&path, TableConfig::default()).unwrap();
    // Point record inside bounds
    assert!(!reader.is_empty_in_bounds(&Bounds::inclusive(b"a".to_vec(), b"c".to_vec())));
    // Only the span overlaps
    assert!(!reader.is_empty_in_bounds(&Bounds::inclusive(b"n".to_vec(), b"o".to_vec())));
    // Nothing overlaps
    assert!(reader.is_empty_in_bounds(&Bounds::inclusive(b"e".to_vec(), b"f".to_vec())));
    assert!(reader.is_empty_in_bounds(&Bounds::inclusive(b"x".to_vec(), b"z".to_vec())));
}
