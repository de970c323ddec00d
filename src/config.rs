//! Configuration for stratakv
//!
//! Centralized configuration with sensible defaults.

use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::error::{Result, StrataError};

/// On-disk table format version.
///
/// V1 predates sized deletes and key transforms; ingestion targeting V1
/// downgrades `DeleteSized` records and rejects transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FormatVersion {
    V1,
    #[default]
    V2,
}

impl FormatVersion {
    pub fn as_u16(self) -> u16 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }

    pub fn from_u16(v: u16) -> Result<FormatVersion> {
        match v {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            other => Err(StrataError::UnsupportedVersion(other)),
        }
    }

    /// Whether this format can store `DeleteSized` records.
    pub fn supports_delete_sized(self) -> bool {
        self >= FormatVersion::V2
    }

    /// Whether tables of this format may be read through a key transform.
    pub fn supports_transforms(self) -> bool {
        self >= FormatVersion::V2
    }
}

/// Configuration shared by table builders and readers
#[derive(Clone)]
pub struct TableConfig {
    // -------------------------------------------------------------------------
    // Key Ordering
    // -------------------------------------------------------------------------
    /// User-key comparator; also locates the suffix boundary within keys
    pub comparator: Arc<dyn Comparator>,

    // -------------------------------------------------------------------------
    // Format
    // -------------------------------------------------------------------------
    /// Format version written by builders created from this config
    pub format_version: FormatVersion,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            format_version: FormatVersion::V2,
        }
    }
}

impl TableConfig {
    /// Create a new config builder
    pub fn builder() -> TableConfigBuilder {
        TableConfigBuilder::default()
    }
}

impl std::fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableConfig")
            .field("format_version", &self.format_version)
            .finish()
    }
}

/// Builder for TableConfig
#[derive(Default)]
pub struct TableConfigBuilder {
    config: TableConfig,
}

impl TableConfigBuilder {
    /// Set the user-key comparator
    pub fn comparator(mut self, cmp: Arc<dyn Comparator>) -> Self {
        self.config.comparator = cmp;
        self
    }

    /// Set the format version for newly built tables
    pub fn format_version(mut self, version: FormatVersion) -> Self {
        self.config.format_version = version;
        self
    }

    pub fn build(self) -> TableConfig {
        self.config
    }
}
