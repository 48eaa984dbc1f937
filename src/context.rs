//! Insert settings and the per-query execution context.
//!
//! A [`QueryContext`] is plain data plus shared handles: cloning one yields
//! an independent context whose setting mutations never leak back to the
//! caller. The fan-out writer derives its select/insert context pair this
//! way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Table, TableRef};
use crate::views::QueryViewsLog;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

fn next_query_id() -> String {
    format!("query-{}", NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
}

/// Settings governing an insert and its fan-out into dependent views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long to wait for a share lock at writer construction, in ms.
    pub lock_acquire_timeout_ms: u64,
    /// Whether deduplicating engines should drop repeated blocks.
    pub insert_deduplicate: bool,
    /// Deduplicate blocks written to dependent materialized views even when
    /// the root table already deduplicates.
    pub deduplicate_blocks_in_dependent_materialized_views: bool,
    /// Squash view output below this row count into larger blocks.
    pub min_insert_block_size_rows: usize,
    /// Squash view output below this byte size into larger blocks.
    pub min_insert_block_size_bytes: usize,
    /// Override of `min_insert_block_size_rows` for materialized-view
    /// inserts; 0 inherits.
    pub min_insert_block_size_rows_for_materialized_views: usize,
    /// Override of `min_insert_block_size_bytes` for materialized-view
    /// inserts; 0 inherits.
    pub min_insert_block_size_bytes_for_materialized_views: usize,
    /// Process dependent views in a thread pool instead of sequentially.
    pub parallel_view_processing: bool,
    /// Pool ceiling when parallel view processing is on.
    pub max_threads: usize,
    /// How deep dependent views may nest before the insert is refused.
    pub max_cascade_depth: usize,
    /// Master switch for query logging.
    pub log_queries: bool,
    /// Emit one log record per view per insert.
    pub log_query_views: bool,
    /// Suppress view log records for views faster than this, in ms.
    pub log_queries_min_query_duration_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_acquire_timeout_ms: 120_000,
            insert_deduplicate: true,
            deduplicate_blocks_in_dependent_materialized_views: false,
            min_insert_block_size_rows: 1_048_576,
            min_insert_block_size_bytes: 256 * 1024 * 1024,
            min_insert_block_size_rows_for_materialized_views: 0,
            min_insert_block_size_bytes_for_materialized_views: 0,
            parallel_view_processing: false,
            max_threads: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            max_cascade_depth: 32,
            log_queries: true,
            log_query_views: true,
            log_queries_min_query_duration_ms: 0,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel_view_processing(mut self, enabled: bool) -> Self {
        self.parallel_view_processing = enabled;
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        assert!(max_threads > 0, "max_threads must be at least 1");
        self.max_threads = max_threads;
        self
    }

    pub fn with_min_insert_block_size(mut self, rows: usize, bytes: usize) -> Self {
        self.min_insert_block_size_rows = rows;
        self.min_insert_block_size_bytes = bytes;
        self
    }

    pub fn with_lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Share-lock acquisition timeout as a `Duration`.
    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }
}

/// Execution context carried through an insert and its view cascade.
#[derive(Clone)]
pub struct QueryContext {
    settings: Settings,
    query_id: String,
    catalog: Arc<Catalog>,
    /// Tables currently being descended through, outermost first.
    cascade_path: Vec<TableRef>,
    /// Single-block source a view SELECT reads from, attached per stage.
    view_source: Option<Arc<dyn Table>>,
    views_log: Arc<QueryViewsLog>,
}

impl QueryContext {
    /// Create a context with a fresh query id.
    pub fn new(catalog: Arc<Catalog>, settings: Settings) -> Self {
        Self {
            settings,
            query_id: next_query_id(),
            catalog,
            cascade_path: Vec::new(),
            view_source: None,
            views_log: Arc::new(QueryViewsLog::new()),
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn with_views_log(mut self, views_log: Arc<QueryViewsLog>) -> Self {
        self.views_log = views_log;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutable settings access; changes stay within this clone.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn views_log(&self) -> &Arc<QueryViewsLog> {
        &self.views_log
    }

    /// An independent copy of this context.
    pub fn fork(&self) -> QueryContext {
        self.clone()
    }

    /// A copy one cascade level deeper, with `id` appended to the path.
    pub fn descend(&self, id: &TableRef) -> QueryContext {
        let mut child = self.clone();
        child.cascade_path.push(id.clone());
        child
    }

    /// Current cascade depth.
    pub fn cascade_depth(&self) -> usize {
        self.cascade_path.len()
    }

    /// Whether `id` is already being descended through (a cycle).
    pub fn path_contains(&self, id: &TableRef) -> bool {
        self.cascade_path.contains(id)
    }

    /// Attach the single-block source a view SELECT will read from.
    pub fn attach_view_source(&mut self, source: Arc<dyn Table>) {
        self.view_source = Some(source);
    }

    pub fn view_source(&self) -> Option<&Arc<dyn Table>> {
        self.view_source.as_ref()
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("query_id", &self.query_id)
            .field("cascade_depth", &self.cascade_path.len())
            .finish()
    }
}
