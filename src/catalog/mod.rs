//! Catalog management for cascade.
//!
//! The catalog maintains the registered tables and the dependency edges
//! between base tables and the views that consume their inserts.

mod table;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use table::{ReplicatedSink, ShareLock, Sink, Table, TableKind, TableMeta};

use crate::error::{CascadeError, Result};

/// Database used when a table name carries no qualifier.
pub const DEFAULT_DATABASE: &str = "default";

/// A table identifier: database plus table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
}

impl TableRef {
    /// Create a table reference.
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Create a reference in the default database.
    pub fn bare(table: impl Into<String>) -> Self {
        Self::new(DEFAULT_DATABASE, table)
    }

    /// Parse `"db.table"` or `"table"` (default database).
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((database, table)) => Self::new(database, table),
            None => Self::bare(name),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// The catalog: registered tables plus view dependency edges.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableRef, Arc<dyn Table>>>,
    /// source table -> dependents, in registration order
    dependents: RwLock<HashMap<TableRef, Vec<TableRef>>>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table under its own storage id, returning any table it
    /// replaced.
    pub fn register_table(&self, table: Arc<dyn Table>) -> Option<Arc<dyn Table>> {
        let id = table.storage_id().clone();
        self.tables.write().insert(id, table)
    }

    /// Deregister a table. Dependency edges pointing at it are kept; a
    /// subsequent `resolve` reports the table as disappeared.
    pub fn deregister_table(&self, id: &TableRef) -> Option<Arc<dyn Table>> {
        self.tables.write().remove(id)
    }

    /// Get a table by id.
    pub fn get(&self, id: &TableRef) -> Option<Arc<dyn Table>> {
        self.tables.read().get(id).cloned()
    }

    /// Get a table by id, with name suggestions on a miss.
    pub fn get_or_suggest(&self, id: &TableRef) -> Result<Arc<dyn Table>> {
        self.get(id)
            .ok_or_else(|| CascadeError::catalog_with_suggestions(&id.to_string(), &self.table_names()))
    }

    /// Resolve a table that the write path expects to exist. A miss means
    /// the table was dropped out from under a running insert.
    pub fn resolve(&self, id: &TableRef) -> Result<Arc<dyn Table>> {
        self.get(id).ok_or_else(|| CascadeError::TableDisappeared {
            table: id.to_string(),
        })
    }

    /// Check if a table exists.
    pub fn table_exists(&self, id: &TableRef) -> bool {
        self.tables.read().contains_key(id)
    }

    /// List all registered table ids, as display names.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().map(|id| id.to_string()).collect()
    }

    /// Record that `dependent` consumes inserts into `source`.
    pub fn add_dependency(&self, source: &TableRef, dependent: &TableRef) {
        let mut edges = self.dependents.write();
        let list = edges.entry(source.clone()).or_default();
        if !list.contains(dependent) {
            list.push(dependent.clone());
        }
    }

    /// Remove a dependency edge.
    pub fn remove_dependency(&self, source: &TableRef, dependent: &TableRef) {
        if let Some(list) = self.dependents.write().get_mut(source) {
            list.retain(|d| d != dependent);
        }
    }

    /// The tables consuming inserts into `source`, in registration order.
    ///
    /// The order is stable across calls, which the write path relies on for
    /// deterministic error propagation.
    pub fn dependents_of(&self, source: &TableRef) -> Vec<TableRef> {
        self.dependents
            .read()
            .get(source)
            .cloned()
            .unwrap_or_default()
    }
}
