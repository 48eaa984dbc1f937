//! Cascade - Materialized-View Fan-Out for Embedded Columnar Engines
//!
//! Cascade implements the write path that makes materialized views work:
//! every row batch inserted into a base table is also transformed and
//! persisted into every dependent materialized view and live view, in
//! parallel, under a consistent locking and deduplication regime, with
//! per-view accounting and precise error propagation.
//!
//! # Features
//!
//! - **Fan-out pipeline**: one inserted batch becomes N derived batches,
//!   one per dependent view, squashed and converted to each target's header
//! - **Recursive cascades**: dependents-of-dependents become nested writers,
//!   guarded against cycles and unbounded depth
//! - **Bounded parallelism**: view stages run sequentially or in a scoped
//!   thread pool, each under its own accounting context
//! - **Deterministic failures**: per-view errors are captured, annotated
//!   with the view's name, and the first (in catalog order) is rethrown
//!   after telemetry is flushed
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cascade::{Cascade, DataType, Field, ProjectionQuery, Result, Schema};
//!
//! fn main() -> Result<()> {
//!     let db = Cascade::new();
//!
//!     // A base table and a target for the view's output.
//!     db.register_table("events", Schema::new(vec![
//!         Field::new("id", DataType::Int64, false),
//!         Field::new("payload", DataType::Utf8, true),
//!     ]));
//!     db.register_table("event_ids", Schema::new(vec![
//!         Field::new("id", DataType::Int64, false),
//!     ]));
//!
//!     // Every insert into `events` also lands, projected, in `event_ids`.
//!     db.create_materialized_view(
//!         "events_to_ids",
//!         "events",
//!         Arc::new(ProjectionQuery::new(["id"])),
//!         "event_ids",
//!     )?;
//!
//!     // db.insert("events", batches)?;
//!     Ok(())
//! }
//! ```

pub mod accounting;
pub mod batch;
pub mod catalog;
pub mod context;
pub mod error;
pub mod parallel;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod types;
pub mod views;

// Re-export commonly used types
pub use catalog::{Catalog, Sink, Table, TableKind, TableMeta, TableRef};
pub use context::{QueryContext, Settings};
pub use error::{CascadeError, Result};
pub use query::{PassthroughQuery, ProjectionQuery, ViewQuery};
pub use storage::{DedupMemoryTable, LiveViewTable, MaterializedViewTable, MemoryTable};
pub use types::{DataType, Field, Schema};
pub use views::{CascadeWriter, QueryViewsLog, ViewStatus, ViewType};

use std::sync::Arc;

use arrow::record_batch::RecordBatch;

/// An embedded cascade engine instance.
///
/// Owns a catalog and a query-views log, and drives the fan-out writer for
/// each insert. This is the main entry point; the lower-level pieces are
/// all public for callers that bring their own storage or planner.
pub struct Cascade {
    catalog: Arc<Catalog>,
    settings: Settings,
    views_log: Arc<QueryViewsLog>,
}

impl Cascade {
    /// Create an engine with default settings.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Create an engine with the given settings.
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            catalog: Arc::new(Catalog::new()),
            settings,
            views_log: Arc::new(QueryViewsLog::new()),
        }
    }

    /// The engine's catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The engine's query-views log.
    pub fn views_log(&self) -> &Arc<QueryViewsLog> {
        &self.views_log
    }

    /// The engine's insert settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Register an in-memory table and return it.
    pub fn register_table(&self, name: &str, schema: Schema) -> Arc<MemoryTable> {
        let table = Arc::new(MemoryTable::new(TableRef::parse(name), schema));
        self.catalog.register_table(table.clone());
        table
    }

    /// Register a caller-provided storage object.
    pub fn register(&self, table: Arc<dyn Table>) {
        self.catalog.register_table(table);
    }

    /// Define a materialized view over `source`, writing into `target`.
    ///
    /// Both tables must already be registered. The view's declared schema
    /// is whatever the SELECT produces over the source's header.
    pub fn create_materialized_view(
        &self,
        name: &str,
        source: &str,
        select: Arc<dyn ViewQuery>,
        target: &str,
    ) -> Result<()> {
        let source_id = TableRef::parse(source);
        let target_id = TableRef::parse(target);
        let source_table = self.catalog.get_or_suggest(&source_id)?;
        self.catalog.get_or_suggest(&target_id)?;

        let view_schema = select.sample_header(
            &source_table
                .meta()
                .sample_header_with_virtuals(&source_table.virtuals()),
        )?;

        let view_id = TableRef::parse(name);
        self.catalog.register_table(Arc::new(MaterializedViewTable::new(
            view_id.clone(),
            view_schema,
            select,
            target_id,
        )));
        self.catalog.add_dependency(&source_id, &view_id);
        Ok(())
    }

    /// Define a live view refreshed by pushes from `source`.
    pub fn create_live_view(
        &self,
        name: &str,
        source: &str,
        inner_query: impl Into<String>,
    ) -> Result<Arc<LiveViewTable>> {
        let source_id = TableRef::parse(source);
        let source_table = self.catalog.get_or_suggest(&source_id)?;

        let view_id = TableRef::parse(name);
        let view = Arc::new(LiveViewTable::new(
            view_id.clone(),
            source_table.meta().sample_header(),
            inner_query,
        ));
        self.catalog.register_table(view.clone());
        self.catalog.add_dependency(&source_id, &view_id);
        Ok(view)
    }

    /// A fresh query context bound to this engine.
    pub fn context(&self) -> QueryContext {
        QueryContext::new(self.catalog.clone(), self.settings.clone())
            .with_views_log(self.views_log.clone())
    }

    /// Insert batches into a table, fanning out to all dependent views.
    ///
    /// Returns the number of rows accepted by the base table path.
    pub fn insert(&self, table: &str, batches: Vec<RecordBatch>) -> Result<usize> {
        let table_id = TableRef::parse(table);
        let storage = self.catalog.get_or_suggest(&table_id)?;

        let ctx = self.context();
        let mut writer = CascadeWriter::new(
            storage,
            &ctx,
            Some(format!("INSERT INTO {}", table_id)),
            false,
        )?;

        writer.prefix()?;
        let mut rows = 0;
        for batch in &batches {
            rows += batch.num_rows();
            writer.write(batch)?;
        }
        writer.suffix()?;
        writer.flush()?;
        Ok(rows)
    }
}

impl Default for Cascade {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema};

    fn batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(ArrowSchema::new(vec![ArrowField::new(
            "id",
            ArrowDataType::Int64,
            false,
        )]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    fn id_schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::Int64, false)])
    }

    #[test]
    fn test_plain_insert() {
        let db = Cascade::new();
        let table = db.register_table("events", id_schema());

        let rows = db.insert("events", vec![batch(vec![1, 2, 3])]).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(table.num_rows(), 3);
    }

    #[test]
    fn test_insert_unknown_table() {
        let db = Cascade::new();
        db.register_table("events", id_schema());

        let err = db.insert("event", vec![batch(vec![1])]).unwrap_err();
        assert!(err.to_string().contains("Did you mean"));
    }

    #[test]
    fn test_materialized_view_passthrough() {
        let db = Cascade::new();
        db.register_table("events", id_schema());
        let target = db.register_table("event_copy", id_schema());

        db.create_materialized_view(
            "copy_view",
            "events",
            Arc::new(PassthroughQuery::new()),
            "event_copy",
        )
        .unwrap();

        db.insert("events", vec![batch(vec![1, 2, 3, 4, 5])]).unwrap();
        assert_eq!(target.num_rows(), 5);

        // One telemetry record for the one view.
        assert_eq!(db.views_log().len(), 1);
        let entry = &db.views_log().entries()[0];
        assert_eq!(entry.status, ViewStatus::SuffixWritten);
    }

    #[test]
    fn test_create_view_on_missing_source() {
        let db = Cascade::new();
        db.register_table("target", id_schema());
        let err = db
            .create_materialized_view(
                "v",
                "missing",
                Arc::new(PassthroughQuery::new()),
                "target",
            )
            .unwrap_err();
        assert!(matches!(err, CascadeError::Catalog { .. }));
    }
}
