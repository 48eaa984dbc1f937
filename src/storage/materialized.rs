//! Materialized view storage objects.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::catalog::{ShareLock, Sink, Table, TableKind, TableMeta, TableRef};
use crate::context::QueryContext;
use crate::error::{CascadeError, Result};
use crate::query::ViewQuery;
use crate::types::Schema;

/// A derived table produced by running a stored SELECT against every batch
/// inserted into its base table.
///
/// The view itself stores nothing: writes pass through the SELECT into the
/// target table. The declared schema is the SELECT's output layout.
#[derive(Debug)]
pub struct MaterializedViewTable {
    id: TableRef,
    schema: Schema,
    select: Arc<dyn ViewQuery>,
    target: TableRef,
    ddl_lock: Arc<RwLock<()>>,
}

impl MaterializedViewTable {
    /// Define a materialized view writing into `target`.
    pub fn new(id: TableRef, schema: Schema, select: Arc<dyn ViewQuery>, target: TableRef) -> Self {
        Self {
            id,
            schema,
            select,
            target,
            ddl_lock: Arc::new(RwLock::new(())),
        }
    }

    /// The stored SELECT.
    pub fn select_query(&self) -> &Arc<dyn ViewQuery> {
        &self.select
    }

    /// The table this view's output lands in.
    pub fn target_table(&self) -> &TableRef {
        &self.target
    }
}

impl Table for MaterializedViewTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_id(&self) -> &TableRef {
        &self.id
    }

    fn kind(&self) -> TableKind {
        TableKind::Materialized
    }

    fn meta(&self) -> TableMeta {
        TableMeta::new(self.schema.clone())
    }

    fn lock_for_share(&self, _query_id: &str, timeout: Duration) -> Result<ShareLock> {
        ShareLock::acquire(&self.ddl_lock, &self.id, timeout)
    }

    fn write(&self, _ctx: &QueryContext) -> Result<Box<dyn Sink>> {
        // Writes reach the target through the fan-out writer, never the
        // view object itself.
        Err(CascadeError::not_implemented(format!(
            "Direct sink on materialized view '{}'",
            self.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::PassthroughQuery;
    use crate::types::{DataType, Field};

    #[test]
    fn test_materialized_view_shape() {
        let view = MaterializedViewTable::new(
            TableRef::bare("mv"),
            Schema::new(vec![Field::new("v", DataType::Int64, false)]),
            Arc::new(PassthroughQuery::new()),
            TableRef::bare("mv_target"),
        );

        assert_eq!(view.kind(), TableKind::Materialized);
        assert_eq!(view.target_table(), &TableRef::bare("mv_target"));
        assert!(view
            .write(&QueryContext::new(
                Arc::new(crate::catalog::Catalog::new()),
                crate::context::Settings::default(),
            ))
            .is_err());
    }
}
