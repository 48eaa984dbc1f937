//! Execution of a single stage (prefix, one block, suffix) for one view.
//!
//! Every stage runs under the view's accounting context and captures its
//! failure into the view record instead of propagating; rethrowing is the
//! writer's job. A view that has already failed is skipped for all
//! remaining stages of the insert.

use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use tracing::trace;

use crate::accounting::AccountingScope;
use crate::batch::validate_array_sizes;
use crate::catalog::TableRef;
use crate::context::QueryContext;
use crate::error::{CascadeError, Result};
use crate::pipeline::{convert_by_name, Squasher};
use crate::storage::SingleBlockTable;
use crate::types::Schema;

use super::telemetry::ViewStatus;
use super::writer::ViewRecord;

/// Everything a block stage needs from the writer.
pub(crate) struct BlockStageEnv<'a> {
    pub base_id: &'a TableRef,
    pub base_columns: &'a Schema,
    pub base_virtuals: &'a Schema,
    pub select_context: &'a QueryContext,
    pub min_rows: usize,
    pub min_bytes: usize,
}

pub(crate) fn process_prefix(view: &mut ViewRecord) {
    if view.stats.status() == ViewStatus::Failed {
        return;
    }
    let watch = Instant::now();
    let scope = AccountingScope::enter(view.stats.accounting.clone());
    let result = view.downstream.prefix();
    drop(scope);

    match result {
        Ok(()) => view.stats.set_status(ViewStatus::PrefixWritten),
        Err(error) => capture(view, "while writing prefix to view", error),
    }
    view.stats.elapsed_ms += watch.elapsed().as_millis() as u64;
}

pub(crate) fn process_block(env: &BlockStageEnv<'_>, view: &mut ViewRecord, block: &RecordBatch) {
    if view.stats.status() == ViewStatus::Failed {
        return;
    }
    let watch = Instant::now();
    let scope = AccountingScope::enter(view.stats.accounting.clone());
    let result = block_stage(env, view, block);
    drop(scope);

    match result {
        Ok(()) => view.stats.set_status(ViewStatus::BlockWritten),
        Err(error) => capture(view, "while pushing to view", error),
    }
    view.stats.elapsed_ms += watch.elapsed().as_millis() as u64;
}

pub(crate) fn process_suffix(base_id: &TableRef, view: &mut ViewRecord) {
    if view.stats.status() == ViewStatus::Failed {
        return;
    }
    let watch = Instant::now();
    let scope = AccountingScope::enter(view.stats.accounting.clone());
    let result = view.downstream.suffix();
    drop(scope);

    match result {
        Ok(()) => view.stats.set_status(ViewStatus::SuffixWritten),
        Err(error) => capture(view, "while writing suffix to view", error),
    }
    view.stats.elapsed_ms += watch.elapsed().as_millis() as u64;

    if view.error.is_none() {
        trace!(
            source = %base_id,
            view = %view.table_id,
            elapsed_ms = view.stats.elapsed_ms,
            "pushed to view"
        );
    }
}

fn capture(view: &mut ViewRecord, context: &str, error: CascadeError) {
    let annotated = CascadeError::view_stage(context, view.table_id.to_string(), error);
    view.stats.record_error(&annotated);
    view.error = Some(annotated);
}

fn block_stage(env: &BlockStageEnv<'_>, view: &mut ViewRecord, block: &RecordBatch) -> Result<()> {
    let Some(query) = view.query.clone() else {
        // Plain dependents get the inbound block unchanged.
        return view.downstream.write(block);
    };

    // The view's SELECT reads the inbound block as if it were the base
    // table: wrap it in a single-block source under the base table's
    // identity and attach it to a local copy of the select context.
    let mut local = env.select_context.fork();
    local.attach_view_source(Arc::new(SingleBlockTable::new(
        env.base_id.clone(),
        env.base_columns.clone(),
        block.clone(),
        env.base_virtuals.clone(),
    )));

    let produced = query.execute(&local)?;

    let header = view.downstream.header().clone();
    let mut squasher = Squasher::new(env.min_rows, env.min_bytes);
    for batch in produced {
        if let Some(squashed) = squasher.add(batch)? {
            write_converted(view, &header, &squashed)?;
        }
    }
    if let Some(tail) = squasher.finish()? {
        write_converted(view, &header, &tail)?;
    }
    Ok(())
}

fn write_converted(view: &mut ViewRecord, header: &Schema, block: &RecordBatch) -> Result<()> {
    let converted = convert_by_name(block, header)?;
    validate_array_sizes(&converted)?;
    view.downstream.write(&converted)
}
