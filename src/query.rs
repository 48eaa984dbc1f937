//! The planner contract consumed by the write path.
//!
//! The engine does not plan view queries itself: whatever object represents
//! a view's stored SELECT only has to say what header it produces and to run
//! over the single-block source attached to the context. Two trivially
//! executable implementations ship with the crate; a real planner plugs in
//! the same way.

use std::fmt::Debug;

use arrow::record_batch::RecordBatch;

use crate::context::QueryContext;
use crate::error::{CascadeError, Result};
use crate::types::Schema;

/// An executable view query.
pub trait ViewQuery: Debug + Send + Sync {
    /// The header this query produces over the given source layout,
    /// without executing.
    fn sample_header(&self, source: &Schema) -> Result<Schema>;

    /// Run over the single-block source attached to `ctx`, producing any
    /// number of output batches.
    fn execute(&self, ctx: &QueryContext) -> Result<Vec<RecordBatch>>;

    /// Display form for the view log.
    fn describe(&self) -> String;
}

/// Read the single-block source attached to the context.
pub fn scan_view_source(ctx: &QueryContext) -> Result<Vec<RecordBatch>> {
    let source = ctx.view_source().ok_or_else(|| {
        CascadeError::internal("View query executed without an attached source")
    })?;
    source.scan()
}

/// `SELECT *`: every source batch unchanged.
#[derive(Debug, Clone, Default)]
pub struct PassthroughQuery;

impl PassthroughQuery {
    pub fn new() -> Self {
        Self
    }
}

impl ViewQuery for PassthroughQuery {
    fn sample_header(&self, source: &Schema) -> Result<Schema> {
        Ok(source.clone())
    }

    fn execute(&self, ctx: &QueryContext) -> Result<Vec<RecordBatch>> {
        scan_view_source(ctx)
    }

    fn describe(&self) -> String {
        "SELECT *".to_string()
    }
}

/// A named-column projection of the source.
#[derive(Debug, Clone)]
pub struct ProjectionQuery {
    columns: Vec<String>,
}

impl ProjectionQuery {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl ViewQuery for ProjectionQuery {
    fn sample_header(&self, source: &Schema) -> Result<Schema> {
        source.project_names(self.columns.iter().map(String::as_str))
    }

    fn execute(&self, ctx: &QueryContext) -> Result<Vec<RecordBatch>> {
        scan_view_source(ctx)?
            .into_iter()
            .map(|batch| project_by_name(&batch, &self.columns))
            .collect()
    }

    fn describe(&self) -> String {
        format!("SELECT {}", self.columns.join(", "))
    }
}

/// Project a batch to the named columns, in the given order.
pub fn project_by_name(batch: &RecordBatch, names: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut indices = Vec::with_capacity(names.len());
    for name in names {
        let index = schema.index_of(name).map_err(|_| {
            let available: Vec<String> =
                schema.fields().iter().map(|f| f.name().clone()).collect();
            CascadeError::schema_with_suggestions(name, &available, "Column")
        })?;
        indices.push(index);
    }
    Ok(batch.project(&indices)?)
}
