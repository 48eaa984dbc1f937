//! Table and sink contracts consumed by the fan-out write path.

use std::any::Any;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};

use crate::context::QueryContext;
use crate::error::{CascadeError, Result};
use crate::types::Schema;

use super::TableRef;

/// What a table is, from the write path's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// A base table with stored data
    Base,
    /// A materialized view (writes pass through its stored SELECT into a target table)
    Materialized,
    /// A live view (refreshed by push, written to rather than written through)
    Live,
}

/// A point-in-time snapshot of a table's declared columns.
///
/// The writer takes one snapshot per table at construction and works against
/// it for the whole insert, so concurrent DDL on unrelated columns cannot
/// shift headers mid-flight.
#[derive(Debug, Clone)]
pub struct TableMeta {
    columns: Schema,
}

impl TableMeta {
    /// Snapshot the given column layout.
    pub fn new(columns: Schema) -> Self {
        Self { columns }
    }

    /// The declared columns.
    pub fn columns(&self) -> &Schema {
        &self.columns
    }

    /// Whether the storage physically holds a column with this name.
    /// Alias and computed columns are not physical.
    pub fn has_physical(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// The header callers must provide when writing directly.
    pub fn sample_header(&self) -> Schema {
        self.columns.clone()
    }

    /// The header extended with engine-provided virtual columns.
    pub fn sample_header_with_virtuals(&self, virtuals: &Schema) -> Schema {
        self.columns.merge(virtuals)
    }

    /// Verify that a sink's header matches this snapshot.
    pub fn ensure_header_matches(&self, header: &Schema) -> Result<()> {
        if !self.columns.same_layout(header) {
            return Err(CascadeError::schema(format!(
                "Sink header [{}] does not match table columns [{}]",
                header.field_names().collect::<Vec<_>>().join(", "),
                self.columns.field_names().collect::<Vec<_>>().join(", "),
            )));
        }
        Ok(())
    }
}

/// A share-lock token on a table.
///
/// Holding it allows concurrent readers and writers but blocks exclusive
/// (DDL) acquisition for its lifetime. Acquired with a timeout at writer
/// construction and released when the writer is destroyed.
pub struct ShareLock {
    _guard: ArcRwLockReadGuard<RawRwLock, ()>,
}

impl ShareLock {
    /// Acquire a share token on `lock`, failing with `LockTimeout` if an
    /// exclusive holder does not release within `timeout`.
    pub fn acquire(lock: &Arc<RwLock<()>>, table: &TableRef, timeout: Duration) -> Result<Self> {
        match lock.try_read_arc_for(timeout) {
            Some(guard) => Ok(Self { _guard: guard }),
            None => Err(CascadeError::LockTimeout {
                table: table.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl fmt::Debug for ShareLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShareLock")
    }
}

/// Trait for table storage objects.
///
/// This is the whole contract the write path needs from a storage engine;
/// scanning is only used by view queries reading their attached source.
pub trait Table: Debug + Send + Sync {
    /// Return this table as `Any` for classification downcasts.
    fn as_any(&self) -> &dyn Any;

    /// The table's identifier in the catalog.
    fn storage_id(&self) -> &TableRef;

    /// What kind of table this is.
    fn kind(&self) -> TableKind {
        TableKind::Base
    }

    /// Snapshot the declared columns.
    fn meta(&self) -> TableMeta;

    /// Engine-provided synthetic columns (partition id, block number, ...).
    fn virtuals(&self) -> Schema {
        Schema::empty()
    }

    /// Whether the engine collapses duplicate blocks server-side.
    fn supports_deduplication(&self) -> bool {
        false
    }

    /// Acquire a share lock for the duration of an insert.
    fn lock_for_share(&self, query_id: &str, timeout: Duration) -> Result<ShareLock>;

    /// Open a sink writing into this table.
    fn write(&self, ctx: &QueryContext) -> Result<Box<dyn Sink>>;

    /// Read the table's current contents.
    fn scan(&self) -> Result<Vec<RecordBatch>> {
        Err(CascadeError::not_implemented(format!(
            "Scan on table '{}'",
            self.storage_id()
        )))
    }
}

/// A destination for row batches: prefix, any number of writes, suffix.
pub trait Sink: Debug + Send {
    /// The column layout this sink expects.
    fn header(&self) -> &Schema;

    /// Called once before the first batch.
    fn prefix(&mut self) -> Result<()> {
        Ok(())
    }

    /// Write one batch.
    fn write(&mut self, batch: &RecordBatch) -> Result<()>;

    /// Called once after the last batch.
    fn suffix(&mut self) -> Result<()> {
        Ok(())
    }

    /// Push buffered data down to storage.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// The replicated face of this sink, when the engine deduplicates.
    fn as_replicated(&self) -> Option<&dyn ReplicatedSink> {
        None
    }
}

/// Extra surface of sinks whose engine collapses duplicate blocks.
pub trait ReplicatedSink {
    /// Whether the most recently written block was dropped as a duplicate.
    fn last_block_was_duplicate(&self) -> bool;
}
