//! Per-view runtime stats and the query-views log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::accounting::ThreadAccounting;
use crate::error::{CascadeError, Result};

/// Classification of a dependent view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewType {
    /// An ordinary dependent written through recursively
    Default,
    /// A materialized view
    Materialized,
    /// A live view
    Live,
}

/// Progress of one view through an insert.
///
/// Monotonic: Init -> PrefixWritten -> BlockWritten (repeatable) ->
/// SuffixWritten; any state may move to Failed, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStatus {
    Init,
    PrefixWritten,
    BlockWritten,
    SuffixWritten,
    Failed,
}

/// Runtime record kept for one view across one insert.
#[derive(Debug, Clone)]
pub struct ViewRuntimeStats {
    /// Display name of the table this view's output lands in.
    pub target_name: String,
    /// View classification.
    pub view_type: ViewType,
    /// Accounting context installed while the view's stages run.
    pub accounting: Arc<ThreadAccounting>,
    /// Display form of the view's query, when it has one.
    pub query: Option<String>,
    /// Milliseconds spent in this view's stages so far.
    pub elapsed_ms: u64,
    /// When the record was created.
    pub event_time: DateTime<Utc>,
    status: ViewStatus,
    /// Text of the captured failure, if any.
    pub error_text: Option<String>,
}

impl ViewRuntimeStats {
    pub fn new(
        target_name: impl Into<String>,
        view_type: ViewType,
        accounting: Arc<ThreadAccounting>,
        query: Option<String>,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            view_type,
            accounting,
            query,
            elapsed_ms: 0,
            event_time: Utc::now(),
            status: ViewStatus::Init,
            error_text: None,
        }
    }

    pub fn status(&self) -> ViewStatus {
        self.status
    }

    /// Advance the status. Failed is terminal: once there, the record
    /// never leaves it.
    pub fn set_status(&mut self, status: ViewStatus) {
        if self.status != ViewStatus::Failed {
            self.status = status;
        }
    }

    /// Capture a stage failure: remember its text and mark the view Failed.
    pub fn record_error(&mut self, error: &CascadeError) {
        self.error_text = Some(error.to_string());
        self.set_status(ViewStatus::Failed);
    }

    /// Materialize a log entry from the current state.
    pub fn to_log_entry(&self) -> ViewLogEntry {
        ViewLogEntry {
            view_name: self.target_name.clone(),
            view_type: self.view_type,
            status: self.status,
            elapsed_ms: self.elapsed_ms,
            event_time: self.event_time,
            query: self.query.clone(),
            error: self.error_text.clone(),
            rows_written: self.accounting.rows_written(),
            bytes_written: self.accounting.bytes_written(),
        }
    }
}

/// One record in the query-views log: one view, one insert.
#[derive(Debug, Clone)]
pub struct ViewLogEntry {
    pub view_name: String,
    pub view_type: ViewType,
    pub status: ViewStatus,
    pub elapsed_ms: u64,
    pub event_time: DateTime<Utc>,
    pub query: Option<String>,
    pub error: Option<String>,
    pub rows_written: u64,
    pub bytes_written: u64,
}

/// Collector for view log entries.
///
/// Entries are also emitted as structured log events; the collector keeps
/// them queryable in-process.
#[derive(Debug, Default)]
pub struct QueryViewsLog {
    entries: RwLock<Vec<ViewLogEntry>>,
}

impl QueryViewsLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one entry.
    pub fn log(&self, entry: ViewLogEntry) -> Result<()> {
        info!(
            view = %entry.view_name,
            view_type = ?entry.view_type,
            status = ?entry.status,
            elapsed_ms = entry.elapsed_ms,
            rows_written = entry.rows_written,
            error = entry.error.as_deref().unwrap_or(""),
            "query views log"
        );
        self.entries.write().push(entry);
        Ok(())
    }

    /// Snapshot all recorded entries.
    pub fn entries(&self) -> Vec<ViewLogEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
