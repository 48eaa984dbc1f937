//! Single-block virtual source tables.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;

use crate::catalog::{ShareLock, Sink, Table, TableMeta, TableRef};
use crate::context::QueryContext;
use crate::error::{CascadeError, Result};
use crate::types::Schema;

/// A read-only table wrapping exactly one batch.
///
/// During view processing the inbound batch is wrapped in one of these,
/// carrying the origin table's storage id, column layout and virtuals, and
/// attached to a forked select context so the view's SELECT reads the batch
/// as if it were the base table.
#[derive(Debug)]
pub struct SingleBlockTable {
    origin: TableRef,
    columns: Schema,
    virtuals: Schema,
    block: RecordBatch,
    ddl_lock: Arc<RwLock<()>>,
}

impl SingleBlockTable {
    /// Wrap `block` under the identity of the origin table.
    pub fn new(origin: TableRef, columns: Schema, block: RecordBatch, virtuals: Schema) -> Self {
        Self {
            origin,
            columns,
            virtuals,
            block,
            ddl_lock: Arc::new(RwLock::new(())),
        }
    }

    /// The wrapped batch.
    pub fn block(&self) -> &RecordBatch {
        &self.block
    }
}

impl Table for SingleBlockTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_id(&self) -> &TableRef {
        &self.origin
    }

    fn meta(&self) -> TableMeta {
        TableMeta::new(self.columns.clone())
    }

    fn virtuals(&self) -> Schema {
        self.virtuals.clone()
    }

    fn lock_for_share(&self, _query_id: &str, timeout: Duration) -> Result<ShareLock> {
        ShareLock::acquire(&self.ddl_lock, &self.origin, timeout)
    }

    fn write(&self, _ctx: &QueryContext) -> Result<Box<dyn Sink>> {
        Err(CascadeError::not_implemented(
            "Write into a single-block source",
        ))
    }

    fn scan(&self) -> Result<Vec<RecordBatch>> {
        Ok(vec![self.block.clone()])
    }
}
