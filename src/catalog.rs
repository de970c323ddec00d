//! Table Catalog
//!
//! Tracks the open table readers of one store directory and registers
//! newly ingested batches atomically.
//!
//! ## Responsibilities
//! - Open readers for ingested table files
//! - Validate a batch's key ranges before anything is registered
//! - Hand out shared reader references for views and iteration
//!
//! ## Concurrency:
//! - `tables`: Protected by RwLock (many concurrent readers, exclusive writer)
//! - `next_table_id`: Atomic counter (lock-free)
//! - All methods use `&self` (no exclusive access needed)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::TableConfig;
use crate::error::Result;
use crate::ingest::validate_ingest_ranges;
use crate::table::TableReader;

/// Registry of open, immutable table readers
pub struct TableCatalog {
    /// Shared builder/reader configuration
    config: TableConfig,

    /// Directory where table files live
    data_dir: PathBuf,

    /// Open readers, newest registration first
    tables: RwLock<Vec<Arc<TableReader>>>,

    /// Next ID for naming newly ingested tables (atomic, lock-free)
    next_table_id: AtomicU64,
}

impl TableCatalog {
    /// Create a catalog over the given directory
    pub fn new(data_dir: &Path, config: TableConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            tables: RwLock::new(Vec::new()),
            next_table_id: AtomicU64::new(1),
        })
    }

    /// Reserve a path for the next table file
    pub fn next_table_path(&self) -> PathBuf {
        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        self.data_dir.join(format!("table_{:06}.stt", id))
    }

    /// Register a batch of finished table files atomically.
    ///
    /// Every file is opened and the batch's key ranges are validated
    /// against each other before any reader becomes visible. On any error
    /// nothing is registered.
    pub fn register_batch(&self, paths: &[PathBuf]) -> Result<Vec<Arc<TableReader>>> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            readers.push(Arc::new(TableReader::open(path, self.config.clone())?));
        }

        let metas: Vec<_> = readers.iter().map(|r| r.meta()).collect();
        validate_ingest_ranges(self.config.comparator.as_ref(), &metas)?;

        let mut tables = self.tables.write();
        for reader in &readers {
            tables.insert(0, Arc::clone(reader));
        }
        info!(count = readers.len(), total = tables.len(), "registered table batch");
        Ok(readers)
    }

    /// Drop a table from the catalog. Outstanding readers and views keep
    /// the backing bytes alive until the last reference goes away.
    pub fn remove(&self, path: &Path) -> bool {
        let mut tables = self.tables.write();
        let before = tables.len();
        tables.retain(|r| r.meta().path != path);
        tables.len() != before
    }

    /// Snapshot of the registered readers, newest first
    pub fn tables(&self) -> Vec<Arc<TableReader>> {
        self.tables.read().clone()
    }

    /// Number of registered tables
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}
