//! Table Module
//!
//! Immutable on-disk sorted tables of internal records.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                            │
//! │   Magic: "STKV" (4) | Version: u16 (2) | Count: u64 (8)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Point Block (variable)                                       │
//! │   [KeyLen: u32][ValLen: u32][Seq: u64][Kind: u8][Key][Value] │
//! │   ... repeated for each record ...                           │
//! │   (ValLen = u32::MAX means no value bytes follow)            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Range-Deletion Block (variable, span-encoded)                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Range-Key Block (variable, span-encoded)                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Properties Block (bincode)                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                       │
//! │   [KeyLen: u32][Offset: u64][Seq: u64][Kind: u8][Key]        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (40 bytes)                                            │
//! │   RangeDelOff | RangeKeyOff | PropsOff | IndexOff (u64 each) │
//! │   DataCRC: u32 | Padding: u32                                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Span encoding:
//! ```text
//! [StartLen: u32][EndLen: u32][KeyCount: u32][Start][End]
//! then per key: [Seq: u64][Kind: u8][SuffixLen: u32][Suffix]
//!               [ValLen: u32][Value]
//! ```

mod builder;
mod iterator;
mod reader;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use builder::TableBuilder;
pub use iterator::TableIter;
pub use reader::TableReader;

use bytes::Bytes;

use crate::key::{RecordKind, SeqNum};

// =============================================================================
// Shared Constants (used by builder and reader)
// =============================================================================

/// Magic bytes identifying a stratakv table file
pub(crate) const MAGIC: &[u8; 4] = b"STKV";

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: 4 section offsets (8 each) + DataCRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: u64 = 40;

/// Sentinel value-length indicating a record with no value bytes
pub(crate) const NO_VALUE_MARKER: u32 = u32::MAX;

/// Fixed per-record header: KeyLen (4) + ValLen (4) + Seq (8) + Kind (1)
pub(crate) const RECORD_HEADER_SIZE: u64 = 17;

// =============================================================================
// Aggregate Properties
// =============================================================================

/// Aggregate properties of a table, computed once at finish.
///
/// For a virtual table these are projected, not authoritative: counts are
/// exact over the sub-range, byte sizes are scaled by the sub-range's disk
/// footprint and are known to be inaccurate for very small sub-ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProperties {
    /// Total point records
    pub num_entries: u64,
    /// Point tombstones of any kind (delete, single delete, sized delete)
    pub num_deletions: u64,
    /// Sized deletes among `num_deletions`
    pub num_sized_deletions: u64,
    /// Merge operands
    pub num_merge_operands: u64,
    /// Range-deletion operations
    pub num_range_deletions: u64,
    /// Range-key set operations
    pub num_range_key_sets: u64,
    /// Range-key unset operations
    pub num_range_key_unsets: u64,
    /// Range-key delete operations
    pub num_range_key_deletes: u64,
    /// Total user-key bytes across point records
    pub raw_key_bytes: u64,
    /// Total value bytes across point records
    pub raw_value_bytes: u64,
    /// Size of the point block on disk
    pub data_bytes: u64,
}

// =============================================================================
// Table Metadata
// =============================================================================

/// Table metadata — lightweight handle for a finished table.
#[derive(Debug, Clone)]
pub struct TableMeta {
    /// Path to the table file
    pub path: PathBuf,
    /// File size in bytes
    pub file_size: u64,
    /// Number of point records
    pub entry_count: u64,
    /// Smallest user key covered (point or span boundary)
    pub smallest: Vec<u8>,
    /// Largest user key covered
    pub largest: Vec<u8>,
    /// True when `largest` comes from a span's exclusive end and the key
    /// itself holds no point content
    pub largest_exclusive: bool,
}

// =============================================================================
// Read-Path Records
// =============================================================================

/// One record surfaced by table iteration. Keys and values are zero-copy
/// slices of the table's backing buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub user_key: Bytes,
    pub seq: SeqNum,
    pub kind: RecordKind,
    pub value: Option<Bytes>,
}
