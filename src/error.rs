//! Error types for stratakv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for stratakv operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Table Format Errors
    // -------------------------------------------------------------------------
    #[error("Table corruption detected: {0}")]
    Corruption(String),

    #[error("Unsupported table format version: {0}")]
    UnsupportedVersion(u16),

    // -------------------------------------------------------------------------
    // Build Errors
    // -------------------------------------------------------------------------
    #[error("Keys added out of order: {0}")]
    OutOfOrder(String),

    #[error("Range spans overlap: {0}")]
    OverlappingSpans(String),

    #[error("Invalid range span: {0}")]
    InvalidSpan(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // -------------------------------------------------------------------------
    // Validation Errors (detected before any bytes are written)
    // -------------------------------------------------------------------------
    #[error("Invalid bounds: start key sorts after end key")]
    ReversedBounds,

    #[error("Invalid bounds: key carries a suffix where an unsuffixed key is required")]
    SuffixedBounds,

    #[error("Overlapping key ranges across ingested tables: {0}")]
    OverlappingIngestRanges(String),

    #[error("Key transform requires table format v{required}, table is v{actual}")]
    TransformUnsupported { required: u16, actual: u16 },

    #[error("Key does not carry the prefix the transform expects")]
    PrefixMismatch,

    // -------------------------------------------------------------------------
    // Ingestion Errors
    // -------------------------------------------------------------------------
    #[error("Ingestion worker failed: {0}")]
    WorkerFailed(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}
