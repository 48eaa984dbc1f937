//! Live view storage.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;
use tracing::trace;

use crate::catalog::{ShareLock, Sink, Table, TableKind, TableMeta, TableRef};
use crate::context::QueryContext;
use crate::error::{CascadeError, Result};
use crate::types::Schema;

/// Notification callback invoked after a push refreshes a live view.
pub type RefreshCallback = Box<dyn Fn(&TableRef, &RecordBatch) + Send + Sync>;

/// A view refreshed by push.
///
/// Batches inserted into its base table are handed to [`write_into`]
/// (`LiveViewTable::write_into`); the view appends them, bumps its version
/// and notifies subscribers. The inner query text is kept only so the view
/// log can name what the view computes.
pub struct LiveViewTable {
    id: TableRef,
    schema: Schema,
    inner_query: String,
    batches: Arc<RwLock<Vec<RecordBatch>>>,
    version: AtomicU64,
    callbacks: RwLock<Vec<RefreshCallback>>,
    ddl_lock: Arc<RwLock<()>>,
}

impl LiveViewTable {
    /// Create an empty live view.
    pub fn new(id: TableRef, schema: Schema, inner_query: impl Into<String>) -> Self {
        Self {
            id,
            schema,
            inner_query: inner_query.into(),
            batches: Arc::new(RwLock::new(Vec::new())),
            version: AtomicU64::new(0),
            callbacks: RwLock::new(Vec::new()),
            ddl_lock: Arc::new(RwLock::new(())),
        }
    }

    /// The stored inner query text, used only for logging.
    pub fn inner_query(&self) -> &str {
        &self.inner_query
    }

    /// Register a refresh callback.
    pub fn on_refresh(&self, callback: RefreshCallback) {
        self.callbacks.write().push(callback);
    }

    /// Current refresh version.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Get the number of rows currently held.
    pub fn num_rows(&self) -> usize {
        self.batches.read().iter().map(|b| b.num_rows()).sum()
    }

    /// Snapshot the view contents.
    pub fn batches(&self) -> Vec<RecordBatch> {
        self.batches.read().clone()
    }

    /// Push one batch into the live view: append, bump the version, notify.
    pub fn write_into(view: &LiveViewTable, batch: RecordBatch, ctx: &QueryContext) -> Result<()> {
        view.batches.write().push(batch.clone());
        let version = view.version.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(
            view = %view.id,
            query_id = ctx.query_id(),
            version,
            rows = batch.num_rows(),
            "live view refreshed"
        );
        for callback in view.callbacks.read().iter() {
            callback(&view.id, &batch);
        }
        Ok(())
    }
}

impl std::fmt::Debug for LiveViewTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveViewTable")
            .field("id", &self.id)
            .field("inner_query", &self.inner_query)
            .field("version", &self.version())
            .finish()
    }
}

impl Table for LiveViewTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_id(&self) -> &TableRef {
        &self.id
    }

    fn kind(&self) -> TableKind {
        TableKind::Live
    }

    fn meta(&self) -> TableMeta {
        TableMeta::new(self.schema.clone())
    }

    fn lock_for_share(&self, _query_id: &str, timeout: Duration) -> Result<ShareLock> {
        ShareLock::acquire(&self.ddl_lock, &self.id, timeout)
    }

    fn write(&self, _ctx: &QueryContext) -> Result<Box<dyn Sink>> {
        // Live views are refreshed through write_into, not through a sink.
        Err(CascadeError::not_implemented(format!(
            "Direct sink on live view '{}'",
            self.id
        )))
    }

    fn scan(&self) -> Result<Vec<RecordBatch>> {
        Ok(self.batches())
    }
}
