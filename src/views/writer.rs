//! The fan-out writer.
//!
//! Every insert into a table goes through a [`CascadeWriter`]: the batch is
//! written to the table itself, then transformed and pushed into every
//! dependent materialized view, live view and plain dependent, recursively.
//! Dependents-of-dependents become nested writers, so one writer tree
//! mirrors the whole view cascade under the insert's root table.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use tracing::{debug, warn};

use crate::accounting::{self, ThreadAccounting};
use crate::batch::validate_array_sizes;
use crate::catalog::{ReplicatedSink, ShareLock, Sink, Table, TableMeta, TableRef};
use crate::context::{QueryContext, Settings};
use crate::error::{CascadeError, Result};
use crate::parallel::WorkerPool;
use crate::pipeline::pad_to_header;
use crate::query::ViewQuery;
use crate::storage::{LiveViewTable, MaterializedViewTable};
use crate::types::Schema;

use super::runner::{self, BlockStageEnv};
use super::telemetry::{ViewRuntimeStats, ViewType};

/// One dependent view bound to a writer.
#[derive(Debug)]
pub(crate) struct ViewRecord {
    /// The view's stored SELECT; absent for live views and plain dependents.
    pub query: Option<Arc<dyn ViewQuery>>,
    /// The view's own identifier (not its target).
    pub table_id: TableRef,
    /// Where this view's batches go.
    pub downstream: Box<dyn Sink>,
    /// Failure captured by the most recent stage, if any.
    pub error: Option<CascadeError>,
    /// Telemetry for the query-views log.
    pub stats: ViewRuntimeStats,
}

/// Writer that fans one stream of batches out to a table and all of its
/// dependent views.
///
/// Stage order per view is prefix, writes in submission order, suffix;
/// across views within one call the order is unspecified. The base-table
/// write always precedes view processing, so a view failure leaves the base
/// commit standing (at-least-once for the base, best-effort for views).
pub struct CascadeWriter {
    storage: Arc<dyn Table>,
    meta: TableMeta,
    header: Schema,
    /// Original insert query text, carried for logging only.
    query_text: Option<String>,
    context: QueryContext,
    /// Share locks on the base table and every bound materialized view,
    /// held until the writer is destroyed.
    locks: Vec<ShareLock>,
    direct: Option<Box<dyn Sink>>,
    direct_is_replicated: bool,
    select_context: Option<QueryContext>,
    insert_context: Option<QueryContext>,
    views: Vec<ViewRecord>,
    started: Instant,
}

impl CascadeWriter {
    /// Bind a writer to `storage` under the caller's context.
    ///
    /// Resolves dependents, derives the select/insert context pair, acquires
    /// share locks and recursively constructs downstream writers. With
    /// `no_destination` the base table itself is not written, only its views.
    pub fn new(
        storage: Arc<dyn Table>,
        ctx: &QueryContext,
        query_text: Option<String>,
        no_destination: bool,
    ) -> Result<Self> {
        let table_id = storage.storage_id().clone();

        if ctx.path_contains(&table_id) {
            return Err(CascadeError::CycleDetected {
                table: table_id.to_string(),
            });
        }
        if ctx.cascade_depth() >= ctx.settings().max_cascade_depth {
            return Err(CascadeError::RecursionTooDeep {
                depth: ctx.cascade_depth(),
            });
        }

        let context = ctx.descend(&table_id);
        let settings = context.settings().clone();
        let meta = storage.meta();

        // Some stream in the insert must own the table lock for as long as
        // batches are in flight; this writer is that stream.
        let mut locks = vec![storage.lock_for_share(context.query_id(), settings.lock_acquire_timeout())?];

        // If the root table deduplicates blocks there is no need to
        // deduplicate in children; their smaller derived blocks could even
        // false-positive against each other.
        let disable_dedup_for_children = !settings.deduplicate_blocks_in_dependent_materialized_views
            && !no_destination
            && storage.supports_deduplication();

        let dependencies = context.catalog().dependents_of(&table_id);

        let mut views = Vec::with_capacity(dependencies.len());
        let (select_context, insert_context) = if dependencies.is_empty() {
            (None, None)
        } else {
            let select_context = context.fork();
            let mut insert_context = context.fork();

            if disable_dedup_for_children {
                insert_context.settings_mut().insert_deduplicate = false;
            }
            if settings.min_insert_block_size_rows_for_materialized_views > 0 {
                insert_context.settings_mut().min_insert_block_size_rows =
                    settings.min_insert_block_size_rows_for_materialized_views;
            }
            if settings.min_insert_block_size_bytes_for_materialized_views > 0 {
                insert_context.settings_mut().min_insert_block_size_bytes =
                    settings.min_insert_block_size_bytes_for_materialized_views;
            }

            for dependent_id in &dependencies {
                views.push(bind_view(
                    &context,
                    &insert_context,
                    &storage,
                    &meta,
                    dependent_id,
                    &mut locks,
                )?);
            }

            (Some(select_context), Some(insert_context))
        };

        let (direct, direct_is_replicated) = if no_destination {
            (None, false)
        } else {
            let sink = storage.write(&context)?;
            meta.ensure_header_matches(sink.header())?;
            let replicated = sink.as_replicated().is_some();
            (Some(sink), replicated)
        };

        let header = if direct.is_some() {
            meta.sample_header()
        } else {
            // Without a direct destination the caller is expected to insert
            // with precalculated virtual columns.
            meta.sample_header_with_virtuals(&storage.virtuals())
        };

        Ok(Self {
            storage,
            meta,
            header,
            query_text,
            context,
            locks,
            direct,
            direct_is_replicated,
            select_context,
            insert_context,
            views,
            started: Instant::now(),
        })
    }

    /// The column layout callers must provide to `write`.
    pub fn header(&self) -> &Schema {
        &self.header
    }

    /// Number of bound dependent views.
    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Snapshot of every view's runtime stats, in binding order.
    pub fn view_stats(&self) -> Vec<ViewRuntimeStats> {
        self.views.iter().map(|view| view.stats.clone()).collect()
    }

    /// Run the prefix stage: direct sink first, then every view,
    /// sequentially.
    ///
    /// Prefixes allocate and check schemas; running them serially keeps
    /// failures deterministic and avoids lock interleaving during setup.
    pub fn prefix(&mut self) -> Result<()> {
        if let Some(direct) = self.direct.as_mut() {
            direct.prefix()?;
        }
        for view in self.views.iter_mut() {
            runner::process_prefix(view);
        }
        self.rethrow_first_view_error()
    }

    /// Write one batch to the base table and through every view.
    pub fn write(&mut self, block: &RecordBatch) -> Result<()> {
        // Storage engines assume sibling nested arrays agree on sizes;
        // check before any sink sees the batch.
        validate_array_sizes(block)?;

        // A live view at the root is a push target, not a fan-out source.
        if let Some(live) = self.storage.as_any().downcast_ref::<LiveViewTable>() {
            return LiveViewTable::write_into(live, block.clone(), &self.context);
        }

        if let Some(direct) = self.direct.as_mut() {
            direct.write(block)?;
        }

        if self.views.is_empty() {
            return Ok(());
        }

        // A block the root collapsed as a duplicate was already pushed to
        // the views by whichever insert wrote it first.
        if !self.context.settings().deduplicate_blocks_in_dependent_materialized_views
            && self.direct_is_replicated
            && self
                .direct
                .as_deref()
                .and_then(Sink::as_replicated)
                .map_or(false, ReplicatedSink::last_block_was_duplicate)
        {
            return Ok(());
        }

        let Some(select_context) = self.select_context.as_ref() else {
            return Ok(());
        };
        let insert_settings = match self.insert_context.as_ref() {
            Some(insert_context) => insert_context.settings(),
            None => self.context.settings(),
        };

        let virtuals = self.storage.virtuals();
        let env = BlockStageEnv {
            base_id: self.storage.storage_id(),
            base_columns: self.meta.columns(),
            base_virtuals: &virtuals,
            select_context,
            min_rows: insert_settings.min_insert_block_size_rows,
            min_bytes: insert_settings.min_insert_block_size_bytes,
        };

        let max_threads = pool_size(self.context.settings(), self.views.len());
        let exception_happened = if max_threads > 1 {
            let exception_count = AtomicU8::new(0);
            let pool = WorkerPool::new(max_threads);
            pool.run_all(self.views.iter_mut().collect(), |view| {
                // Once one view failed the remaining queued work is moot.
                if exception_count.load(Ordering::Relaxed) != 0 {
                    return;
                }
                runner::process_block(&env, view, block);
                if view.error.is_some() {
                    exception_count.fetch_add(1, Ordering::Relaxed);
                }
            });
            exception_count.load(Ordering::Relaxed) != 0
        } else {
            let mut failed = false;
            for view in self.views.iter_mut() {
                runner::process_block(&env, view, block);
                if view.error.is_some() {
                    failed = true;
                    break;
                }
            }
            failed
        };

        if exception_happened {
            self.rethrow_first_view_error()?;
        }
        Ok(())
    }

    /// Run the suffix stage: direct sink first, then every view, in the
    /// same pool the write phase uses.
    ///
    /// Suffixes commonly trigger flushes whose latency is worth
    /// overlapping, so this phase may run in parallel.
    pub fn suffix(&mut self) -> Result<()> {
        if let Some(direct) = self.direct.as_mut() {
            direct.suffix()?;
        }
        if self.views.is_empty() {
            return Ok(());
        }

        let base_id = self.storage.storage_id().clone();
        let max_threads = pool_size(self.context.settings(), self.views.len());
        let exception_happened = if max_threads > 1 {
            let exception_count = AtomicU8::new(0);
            let pool = WorkerPool::new(max_threads);
            pool.run_all(self.views.iter_mut().collect(), |view| {
                if exception_count.load(Ordering::Relaxed) != 0 {
                    return;
                }
                runner::process_suffix(&base_id, view);
                if view.error.is_some() {
                    exception_count.fetch_add(1, Ordering::Relaxed);
                }
            });
            exception_count.load(Ordering::Relaxed) != 0
        } else {
            let mut failed = false;
            for view in self.views.iter_mut() {
                runner::process_suffix(&base_id, view);
                if view.error.is_some() {
                    failed = true;
                    break;
                }
            }
            failed
        };

        if exception_happened {
            self.rethrow_first_view_error()?;
        }

        if self.views.len() > 1 {
            debug!(
                source = %base_id,
                views = self.views.len(),
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                query = self.query_text.as_deref().unwrap_or(""),
                "pushed to views"
            );
        }
        self.log_query_views();
        Ok(())
    }

    /// Flush the direct sink and every view's downstream, sequentially.
    ///
    /// Best-effort: every sink is attempted, the first error is returned
    /// after all attempts.
    pub fn flush(&mut self) -> Result<()> {
        let mut first_error: Option<CascadeError> = None;

        if let Some(direct) = self.direct.as_mut() {
            if let Err(error) = direct.flush() {
                first_error.get_or_insert(error);
            }
        }
        for view in self.views.iter_mut() {
            if let Err(error) = view.downstream.flush() {
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Flush the view log and return the first captured view error, in view
    /// binding order. Later failures stay recorded in the stats only.
    fn rethrow_first_view_error(&mut self) -> Result<()> {
        let Some(index) = self.views.iter().position(|view| view.error.is_some()) else {
            return Ok(());
        };
        self.log_query_views();
        Err(self.views[index]
            .error
            .take()
            .unwrap_or_else(|| CascadeError::internal("view error vanished before rethrow")))
    }

    fn log_query_views(&self) {
        let settings = self.context.settings();
        if self.views.is_empty() || !settings.log_queries || !settings.log_query_views {
            return;
        }
        let min_ms = settings.log_queries_min_query_duration_ms;
        for view in &self.views {
            if min_ms > 0 && view.stats.elapsed_ms <= min_ms {
                continue;
            }
            if let Err(error) = self.context.views_log().log(view.stats.to_log_entry()) {
                warn!(error = %error, view = %view.table_id, "could not record view log entry");
            }
        }
    }
}

/// Pool size for the write and suffix phases.
fn pool_size(settings: &Settings, num_views: usize) -> usize {
    let ceiling = if settings.parallel_view_processing {
        settings.max_threads
    } else {
        1
    };
    num_views.min(ceiling.max(1))
}

impl Drop for CascadeWriter {
    fn drop(&mut self) {
        // Dropping view records tears down nested writers, which may swap
        // accounting contexts on the way; the caller's slot must survive.
        let running = accounting::current();
        self.views.clear();
        self.locks.clear();
        accounting::set_current(running);
    }
}

impl fmt::Debug for CascadeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadeWriter")
            .field("storage", self.storage.storage_id())
            .field("views", &self.views.len())
            .field("direct", &self.direct.is_some())
            .field("query", &self.query_text)
            .finish()
    }
}

impl Sink for CascadeWriter {
    fn header(&self) -> &Schema {
        &self.header
    }

    fn prefix(&mut self) -> Result<()> {
        CascadeWriter::prefix(self)
    }

    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        CascadeWriter::write(self, batch)
    }

    fn suffix(&mut self) -> Result<()> {
        CascadeWriter::suffix(self)
    }

    fn flush(&mut self) -> Result<()> {
        CascadeWriter::flush(self)
    }
}

/// Classify one dependent and construct its view record.
fn bind_view(
    context: &QueryContext,
    insert_context: &QueryContext,
    storage: &Arc<dyn Table>,
    meta: &TableMeta,
    dependent_id: &TableRef,
    locks: &mut Vec<ShareLock>,
) -> Result<ViewRecord> {
    let settings = context.settings();
    let dependent = context.catalog().resolve(dependent_id)?;

    let accounting = Arc::new(ThreadAccounting::new());
    accounting.attach_query(context.query_id());

    if let Some(materialized) = dependent.as_any().downcast_ref::<MaterializedViewTable>() {
        // Lock the view before opening its downstream sink; the lock
        // outlives the writer that owns this record.
        locks.push(dependent.lock_for_share(context.query_id(), settings.lock_acquire_timeout())?);

        let target = context.catalog().resolve(materialized.target_table())?;
        let target_meta = target.meta();
        let select = materialized.select_query().clone();

        // The synthesized insert covers the columns the SELECT produces,
        // minus whatever the target does not physically store (alias and
        // computed columns are elided).
        let select_header =
            select.sample_header(&meta.sample_header_with_virtuals(&storage.virtuals()))?;
        let insert_columns: Vec<&str> = select_header
            .field_names()
            .filter(|name| target_meta.has_physical(name))
            .collect();
        let insert_header = target_meta.columns().project_names(insert_columns.iter().copied())?;
        let synthesized = format!(
            "INSERT INTO {} ({})",
            target.storage_id(),
            insert_columns.join(", ")
        );

        let inner = CascadeWriter::new(target.clone(), insert_context, Some(synthesized), false)?;
        let stats = ViewRuntimeStats::new(
            target.storage_id().to_string(),
            ViewType::Materialized,
            accounting,
            Some(select.describe()),
        );
        return Ok(ViewRecord {
            query: Some(select),
            table_id: dependent_id.clone(),
            downstream: Box::new(InsertSink::new(insert_header, inner)),
            error: None,
            stats,
        });
    }

    if let Some(live) = dependent.as_any().downcast_ref::<LiveViewTable>() {
        // The inner query is kept for the view log only; the live view is
        // pushed the raw block through a destination-less writer.
        let inner = CascadeWriter::new(dependent.clone(), insert_context, None, true)?;
        let stats = ViewRuntimeStats::new(
            dependent_id.to_string(),
            ViewType::Live,
            accounting,
            Some(live.inner_query().to_string()),
        );
        return Ok(ViewRecord {
            query: None,
            table_id: dependent_id.clone(),
            downstream: Box::new(inner),
            error: None,
            stats,
        });
    }

    let inner = CascadeWriter::new(dependent.clone(), insert_context, None, false)?;
    let stats = ViewRuntimeStats::new(dependent_id.to_string(), ViewType::Default, accounting, None);
    Ok(ViewRecord {
        query: None,
        table_id: dependent_id.clone(),
        downstream: Box::new(inner),
        error: None,
        stats,
    })
}

/// Sink for a materialized view's synthesized insert: narrows batches to
/// the insert column list, completes the target's remaining columns with
/// nulls, and hands the result to the recursive writer for the target.
#[derive(Debug)]
struct InsertSink {
    header: Schema,
    inner: CascadeWriter,
}

impl InsertSink {
    fn new(header: Schema, inner: CascadeWriter) -> Self {
        Self { header, inner }
    }
}

impl Sink for InsertSink {
    fn header(&self) -> &Schema {
        &self.header
    }

    fn prefix(&mut self) -> Result<()> {
        self.inner.prefix()
    }

    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let padded = pad_to_header(batch, &self.inner.header)?;
        self.inner.write(&padded)
    }

    fn suffix(&mut self) -> Result<()> {
        self.inner.suffix()
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}
