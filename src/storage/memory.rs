//! In-memory table engines.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use parking_lot::{Mutex, RwLock};

use crate::accounting;
use crate::batch::{batch_bytes, block_fingerprint};
use crate::catalog::{ReplicatedSink, ShareLock, Sink, Table, TableMeta, TableRef};
use crate::context::QueryContext;
use crate::error::Result;
use crate::types::Schema;

/// An in-memory table backed by Arrow record batches.
#[derive(Debug)]
pub struct MemoryTable {
    id: TableRef,
    schema: Schema,
    virtuals: Schema,
    batches: Arc<RwLock<Vec<RecordBatch>>>,
    ddl_lock: Arc<RwLock<()>>,
}

impl MemoryTable {
    /// Create an empty table.
    pub fn new(id: TableRef, schema: Schema) -> Self {
        Self {
            id,
            schema,
            virtuals: Schema::empty(),
            batches: Arc::new(RwLock::new(Vec::new())),
            ddl_lock: Arc::new(RwLock::new(())),
        }
    }

    /// Declare engine-provided virtual columns.
    pub fn with_virtuals(mut self, virtuals: Schema) -> Self {
        self.virtuals = virtuals;
        self
    }

    /// Get the number of rows in the table.
    pub fn num_rows(&self) -> usize {
        self.batches.read().iter().map(|b| b.num_rows()).sum()
    }

    /// Get the number of stored batches.
    pub fn num_batches(&self) -> usize {
        self.batches.read().len()
    }

    /// Snapshot the table contents.
    pub fn batches(&self) -> Vec<RecordBatch> {
        self.batches.read().clone()
    }

    /// Clear all data from the table.
    pub fn clear(&self) {
        self.batches.write().clear();
    }
}

impl Table for MemoryTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_id(&self) -> &TableRef {
        &self.id
    }

    fn meta(&self) -> TableMeta {
        TableMeta::new(self.schema.clone())
    }

    fn virtuals(&self) -> Schema {
        self.virtuals.clone()
    }

    fn lock_for_share(&self, _query_id: &str, timeout: Duration) -> Result<ShareLock> {
        ShareLock::acquire(&self.ddl_lock, &self.id, timeout)
    }

    fn write(&self, _ctx: &QueryContext) -> Result<Box<dyn Sink>> {
        Ok(Box::new(MemorySink {
            header: self.schema.clone(),
            batches: self.batches.clone(),
        }))
    }

    fn scan(&self) -> Result<Vec<RecordBatch>> {
        Ok(self.batches())
    }
}

#[derive(Debug)]
struct MemorySink {
    header: Schema,
    batches: Arc<RwLock<Vec<RecordBatch>>>,
}

impl Sink for MemorySink {
    fn header(&self) -> &Schema {
        &self.header
    }

    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        accounting::add_written(batch.num_rows() as u64, batch_bytes(batch) as u64);
        self.batches.write().push(batch.clone());
        Ok(())
    }
}

/// An in-memory table that collapses duplicate blocks server-side, the way
/// replicated engines do.
///
/// Each written block is fingerprinted; a block whose fingerprint was seen
/// before is dropped and reported through [`ReplicatedSink`].
#[derive(Debug)]
pub struct DedupMemoryTable {
    id: TableRef,
    schema: Schema,
    batches: Arc<RwLock<Vec<RecordBatch>>>,
    seen: Arc<Mutex<HashSet<u64>>>,
    ddl_lock: Arc<RwLock<()>>,
}

impl DedupMemoryTable {
    /// Create an empty deduplicating table.
    pub fn new(id: TableRef, schema: Schema) -> Self {
        Self {
            id,
            schema,
            batches: Arc::new(RwLock::new(Vec::new())),
            seen: Arc::new(Mutex::new(HashSet::new())),
            ddl_lock: Arc::new(RwLock::new(())),
        }
    }

    /// Get the number of rows in the table.
    pub fn num_rows(&self) -> usize {
        self.batches.read().iter().map(|b| b.num_rows()).sum()
    }

    /// Snapshot the table contents.
    pub fn batches(&self) -> Vec<RecordBatch> {
        self.batches.read().clone()
    }
}

impl Table for DedupMemoryTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_id(&self) -> &TableRef {
        &self.id
    }

    fn meta(&self) -> TableMeta {
        TableMeta::new(self.schema.clone())
    }

    fn supports_deduplication(&self) -> bool {
        true
    }

    fn lock_for_share(&self, _query_id: &str, timeout: Duration) -> Result<ShareLock> {
        ShareLock::acquire(&self.ddl_lock, &self.id, timeout)
    }

    fn write(&self, ctx: &QueryContext) -> Result<Box<dyn Sink>> {
        Ok(Box::new(DedupSink {
            header: self.schema.clone(),
            batches: self.batches.clone(),
            seen: self.seen.clone(),
            deduplicate: ctx.settings().insert_deduplicate,
            last_duplicate: false,
        }))
    }

    fn scan(&self) -> Result<Vec<RecordBatch>> {
        Ok(self.batches())
    }
}

#[derive(Debug)]
struct DedupSink {
    header: Schema,
    batches: Arc<RwLock<Vec<RecordBatch>>>,
    seen: Arc<Mutex<HashSet<u64>>>,
    deduplicate: bool,
    last_duplicate: bool,
}

impl Sink for DedupSink {
    fn header(&self) -> &Schema {
        &self.header
    }

    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        if self.deduplicate {
            let fingerprint = block_fingerprint(batch);
            if !self.seen.lock().insert(fingerprint) {
                self.last_duplicate = true;
                return Ok(());
            }
        }
        self.last_duplicate = false;
        accounting::add_written(batch.num_rows() as u64, batch_bytes(batch) as u64);
        self.batches.write().push(batch.clone());
        Ok(())
    }

    fn as_replicated(&self) -> Option<&dyn ReplicatedSink> {
        Some(self)
    }
}

impl ReplicatedSink for DedupSink {
    fn last_block_was_duplicate(&self) -> bool {
        self.last_duplicate
    }
}
