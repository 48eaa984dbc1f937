//! Integration tests for the cascade fan-out write path.
//!
//! These drive the writer end to end: direct inserts, materialized and live
//! view fan-out, duplicate suppression, parallel processing and failure
//! semantics.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;

use cascade::accounting::{self, AccountingScope, ThreadAccounting};
use cascade::catalog::{ShareLock, Sink, Table, TableMeta, TableRef};
use cascade::query::scan_view_source;
use cascade::{
    Cascade, CascadeError, CascadeWriter, DataType, DedupMemoryTable, Field, PassthroughQuery,
    ProjectionQuery, QueryContext, Result, Schema, Settings, ViewQuery, ViewStatus, ViewType,
};

// ============================================================================
// Fixtures
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn id_schema() -> Schema {
    Schema::new(vec![Field::new("id", DataType::Int64, false)])
}

fn id_name_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ])
}

fn id_batch(values: Vec<i64>) -> RecordBatch {
    let schema = Arc::new(ArrowSchema::new(vec![ArrowField::new(
        "id",
        ArrowDataType::Int64,
        false,
    )]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
}

fn id_name_batch(values: Vec<(i64, &str)>) -> RecordBatch {
    let schema = Arc::new(ArrowSchema::new(vec![
        ArrowField::new("id", ArrowDataType::Int64, false),
        ArrowField::new("name", ArrowDataType::Utf8, true),
    ]));
    let ids: Vec<i64> = values.iter().map(|(id, _)| *id).collect();
    let names: Vec<&str> = values.iter().map(|(_, name)| *name).collect();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(names)),
        ],
    )
    .unwrap()
}

/// A view query that sleeps before passing the source through, to make
/// elapsed times observable and parallelism measurable.
#[derive(Debug)]
struct SleepQuery {
    delay: Duration,
}

impl ViewQuery for SleepQuery {
    fn sample_header(&self, source: &Schema) -> Result<Schema> {
        Ok(source.clone())
    }

    fn execute(&self, ctx: &QueryContext) -> Result<Vec<RecordBatch>> {
        thread::sleep(self.delay);
        scan_view_source(ctx)
    }

    fn describe(&self) -> String {
        "SELECT * /* slow */".to_string()
    }
}

/// A table whose sink rejects every write with "boom".
#[derive(Debug)]
struct FailingTable {
    id: TableRef,
    schema: Schema,
    ddl_lock: Arc<RwLock<()>>,
}

impl FailingTable {
    fn new(name: &str, schema: Schema) -> Self {
        Self {
            id: TableRef::bare(name),
            schema,
            ddl_lock: Arc::new(RwLock::new(())),
        }
    }
}

impl Table for FailingTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_id(&self) -> &TableRef {
        &self.id
    }

    fn meta(&self) -> TableMeta {
        TableMeta::new(self.schema.clone())
    }

    fn lock_for_share(&self, _query_id: &str, timeout: Duration) -> Result<ShareLock> {
        ShareLock::acquire(&self.ddl_lock, &self.id, timeout)
    }

    fn write(&self, _ctx: &QueryContext) -> Result<Box<dyn Sink>> {
        Ok(Box::new(FailingSink {
            header: self.schema.clone(),
        }))
    }
}

#[derive(Debug)]
struct FailingSink {
    header: Schema,
}

impl Sink for FailingSink {
    fn header(&self) -> &Schema {
        &self.header
    }

    fn write(&mut self, _batch: &RecordBatch) -> Result<()> {
        Err(CascadeError::execution("boom"))
    }
}

/// A table whose sink records the order of calls it receives.
#[derive(Debug)]
struct RecordingTable {
    id: TableRef,
    schema: Schema,
    events: Arc<Mutex<Vec<String>>>,
    ddl_lock: Arc<RwLock<()>>,
}

impl RecordingTable {
    fn new(name: &str, schema: Schema, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: TableRef::bare(name),
            schema,
            events,
            ddl_lock: Arc::new(RwLock::new(())),
        }
    }
}

impl Table for RecordingTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn storage_id(&self) -> &TableRef {
        &self.id
    }

    fn meta(&self) -> TableMeta {
        TableMeta::new(self.schema.clone())
    }

    fn lock_for_share(&self, _query_id: &str, timeout: Duration) -> Result<ShareLock> {
        ShareLock::acquire(&self.ddl_lock, &self.id, timeout)
    }

    fn write(&self, _ctx: &QueryContext) -> Result<Box<dyn Sink>> {
        Ok(Box::new(RecordingSink {
            header: self.schema.clone(),
            name: self.id.table.clone(),
            events: self.events.clone(),
        }))
    }
}

#[derive(Debug)]
struct RecordingSink {
    header: Schema,
    name: String,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(format!("{}:{}", self.name, event));
    }
}

impl Sink for RecordingSink {
    fn header(&self) -> &Schema {
        &self.header
    }

    fn prefix(&mut self) -> Result<()> {
        self.record("prefix");
        Ok(())
    }

    fn write(&mut self, _batch: &RecordBatch) -> Result<()> {
        self.record("write");
        Ok(())
    }

    fn suffix(&mut self) -> Result<()> {
        self.record("suffix");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.record("flush");
        Ok(())
    }
}

fn nested_batch(a_lengths: &[usize], b_lengths: &[usize]) -> RecordBatch {
    use arrow::array::ListArray;
    use arrow::datatypes::Int64Type;

    let column = |lengths: &[usize]| -> ListArray {
        let mut next = 0i64;
        let data: Vec<Option<Vec<Option<i64>>>> = lengths
            .iter()
            .map(|len| {
                Some(
                    (0..*len)
                        .map(|_| {
                            next += 1;
                            Some(next)
                        })
                        .collect(),
                )
            })
            .collect();
        ListArray::from_iter_primitive::<Int64Type, _, _>(data)
    };

    let a = column(a_lengths);
    let b = column(b_lengths);
    let schema = Arc::new(ArrowSchema::new(vec![
        ArrowField::new("n.a", arrow::array::Array::data_type(&a).clone(), true),
        ArrowField::new("n.b", arrow::array::Array::data_type(&b).clone(), true),
    ]));
    RecordBatch::try_new(schema, vec![Arc::new(a), Arc::new(b)]).unwrap()
}

// ============================================================================
// Scenario 1: direct insert, no dependents
// ============================================================================

#[test]
fn test_direct_insert_no_dependents() {
    let db = Cascade::new();
    let table = db.register_table("t", id_schema());

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    writer.write(&id_batch(vec![1, 2, 3])).unwrap();
    writer.suffix().unwrap();

    assert_eq!(table.num_rows(), 3);
    assert_eq!(writer.num_views(), 0);
    assert!(db.views_log().is_empty());
}

// ============================================================================
// Scenario 2: one materialized view, straight passthrough
// ============================================================================

#[test]
fn test_single_view_passthrough() {
    init_tracing();
    let db = Cascade::new();
    let base = db.register_table("t", id_schema());
    let target = db.register_table("tm", id_schema());

    db.create_materialized_view(
        "m",
        "t",
        Arc::new(SleepQuery {
            delay: Duration::from_millis(5),
        }),
        "tm",
    )
    .unwrap();

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    writer.write(&id_batch(vec![1, 2, 3, 4, 5])).unwrap();
    writer.suffix().unwrap();

    assert_eq!(base.num_rows(), 5);
    assert_eq!(target.num_rows(), 5);

    let stats = writer.view_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].status(), ViewStatus::SuffixWritten);
    assert_eq!(stats[0].view_type, ViewType::Materialized);
    assert_eq!(stats[0].target_name, "default.tm");
    assert!(stats[0].elapsed_ms > 0);
    assert_eq!(stats[0].accounting.rows_written(), 5);
}

// ============================================================================
// Scenario 3: a view that throws on write
// ============================================================================

#[test]
fn test_view_failure_keeps_base_commit() {
    let db = Cascade::new();
    let base = db.register_table("t", id_schema());
    db.register(Arc::new(FailingTable::new("tf", id_schema())));

    db.create_materialized_view("m", "t", Arc::new(PassthroughQuery::new()), "tf")
        .unwrap();

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    let err = writer.write(&id_batch(vec![1, 2, 3])).unwrap_err();
    let msg = err.to_string();

    assert!(msg.contains("while pushing to view default.m"), "{}", msg);
    assert!(msg.contains("boom"), "{}", msg);

    // The direct sink ran first: the base commit stands even though the
    // overall write reported failure.
    assert_eq!(base.num_rows(), 3);

    let stats = writer.view_stats();
    assert_eq!(stats[0].status(), ViewStatus::Failed);
    assert!(stats[0].error_text.as_deref().unwrap().contains("boom"));

    // Telemetry was flushed on the failure path.
    assert_eq!(db.views_log().len(), 1);
    assert_eq!(db.views_log().entries()[0].status, ViewStatus::Failed);
}

// ============================================================================
// Scenario 4: duplicate suppression on a deduplicating root
// ============================================================================

#[test]
fn test_duplicate_block_suppresses_view_processing() {
    let db = Cascade::new();
    let base = Arc::new(DedupMemoryTable::new(TableRef::bare("t"), id_schema()));
    db.register(base.clone());
    let target = db.register_table("tm", id_schema());

    db.create_materialized_view("m", "t", Arc::new(PassthroughQuery::new()), "tm")
        .unwrap();

    let ctx = db.context();
    assert!(
        !ctx.settings().deduplicate_blocks_in_dependent_materialized_views,
        "dedup-for-views must be off for suppression to apply"
    );
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    writer.write(&id_batch(vec![1, 2, 3])).unwrap();
    assert_eq!(target.num_rows(), 3);

    // The same block again: the root collapses it and the views must not
    // run for it.
    writer.write(&id_batch(vec![1, 2, 3])).unwrap();
    assert_eq!(base.num_rows(), 3);
    assert_eq!(target.num_rows(), 3);

    writer.suffix().unwrap();
}

// ============================================================================
// Scenario 5: parallel fan-out
// ============================================================================

#[test]
fn test_parallel_view_processing() {
    let settings = Settings::default()
        .with_parallel_view_processing(true)
        .with_max_threads(4);
    let db = Cascade::with_settings(settings);
    db.register_table("t", id_schema());

    for i in 0..4 {
        db.register_table(&format!("tm{}", i), id_schema());
        db.create_materialized_view(
            &format!("m{}", i),
            "t",
            Arc::new(SleepQuery {
                delay: Duration::from_millis(50),
            }),
            &format!("tm{}", i),
        )
        .unwrap();
    }

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    let started = Instant::now();
    writer.write(&id_batch(vec![1])).unwrap();
    let elapsed = started.elapsed();
    writer.suffix().unwrap();

    // Four 50 ms views overlapped across four threads.
    assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);

    let stats = writer.view_stats();
    assert_eq!(stats.len(), 4);
    for view in &stats {
        assert_eq!(view.status(), ViewStatus::SuffixWritten);
    }
}

// ============================================================================
// Scenario 6: partial failure with parallel fan-out
// ============================================================================

#[test]
fn test_partial_failure_parallel() {
    init_tracing();
    let settings = Settings::default()
        .with_parallel_view_processing(true)
        .with_max_threads(4);
    let db = Cascade::with_settings(settings);
    db.register_table("t", id_schema());

    for i in 0..4 {
        if i == 1 {
            db.register(Arc::new(FailingTable::new("tm1", id_schema())));
        } else {
            db.register_table(&format!("tm{}", i), id_schema());
        }
        db.create_materialized_view(
            &format!("m{}", i),
            "t",
            Arc::new(PassthroughQuery::new()),
            &format!("tm{}", i),
        )
        .unwrap();
    }

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    let err = writer.write(&id_batch(vec![1, 2])).unwrap_err();
    assert!(err.to_string().contains("default.m1"), "{}", err);

    // Every view ends in a defined state: written, failed, or skipped
    // after its prefix when the short-circuit fired first.
    for view in writer.view_stats() {
        assert!(
            matches!(
                view.status(),
                ViewStatus::BlockWritten | ViewStatus::Failed | ViewStatus::PrefixWritten
            ),
            "unexpected status {:?}",
            view.status()
        );
    }

    // Telemetry was emitted for all views.
    assert_eq!(db.views_log().len(), 4);
}

// ============================================================================
// Property P1: accounting restoration on every exit path
// ============================================================================

#[test]
fn test_accounting_slot_restored() {
    let db = Cascade::new();
    db.register_table("t", id_schema());
    db.register(Arc::new(FailingTable::new("tf", id_schema())));
    db.register_table("tm", id_schema());
    db.create_materialized_view("ok_view", "t", Arc::new(PassthroughQuery::new()), "tm")
        .unwrap();
    db.create_materialized_view("bad_view", "t", Arc::new(PassthroughQuery::new()), "tf")
        .unwrap();

    let sentinel = Arc::new(ThreadAccounting::new());
    let _scope = AccountingScope::enter(sentinel.clone());

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();
    assert!(Arc::ptr_eq(&accounting::current().unwrap(), &sentinel));

    writer.prefix().unwrap();
    assert!(Arc::ptr_eq(&accounting::current().unwrap(), &sentinel));

    // Thrown path: one view fails.
    let _ = writer.write(&id_batch(vec![1])).unwrap_err();
    assert!(Arc::ptr_eq(&accounting::current().unwrap(), &sentinel));

    let _ = writer.suffix();
    assert!(Arc::ptr_eq(&accounting::current().unwrap(), &sentinel));

    // Destruction must also preserve the slot.
    drop(writer);
    assert!(Arc::ptr_eq(&accounting::current().unwrap(), &sentinel));
}

// ============================================================================
// Property P4: per-view stage ordering
// ============================================================================

#[test]
fn test_stage_order_per_view() {
    let db = Cascade::new();
    db.register_table("t", id_schema());
    let events = Arc::new(Mutex::new(Vec::new()));
    db.register(Arc::new(RecordingTable::new(
        "sink",
        id_schema(),
        events.clone(),
    )));
    // A plain dependent: batches are written through unchanged.
    db.catalog()
        .add_dependency(&TableRef::bare("t"), &TableRef::bare("sink"));

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    writer.write(&id_batch(vec![1])).unwrap();
    writer.write(&id_batch(vec![2])).unwrap();
    writer.suffix().unwrap();
    writer.flush().unwrap();

    let recorded = events.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec![
            "sink:prefix",
            "sink:write",
            "sink:write",
            "sink:suffix",
            "sink:flush"
        ]
    );

    let stats = writer.view_stats();
    assert_eq!(stats[0].view_type, ViewType::Default);
    assert_eq!(stats[0].status(), ViewStatus::SuffixWritten);
}

// ============================================================================
// Property P6: shape validation happens before any sink
// ============================================================================

#[test]
fn test_shape_mismatch_rejected_before_sinks() {
    let db = Cascade::new();
    let nested_schema = Schema::new(vec![
        Field::new("n.a", DataType::List(Box::new(DataType::Int64)), true),
        Field::new("n.b", DataType::List(Box::new(DataType::Int64)), true),
    ]);
    let table = db.register_table("t", nested_schema);

    let ctx = db.context();
    let mut writer = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap();

    writer.prefix().unwrap();
    let err = writer.write(&nested_batch(&[2, 1], &[2, 2])).unwrap_err();
    assert!(matches!(err, CascadeError::ShapeMismatch { .. }));
    assert_eq!(table.num_rows(), 0);
}

// ============================================================================
// Column intersection: alias/computed columns are elided
// ============================================================================

#[test]
fn test_insert_covers_select_target_intersection() {
    let db = Cascade::new();
    db.register_table("t", id_name_schema());
    // The target stores only `id`; the SELECT's `name` column is elided.
    let target = db.register_table("ids_only", id_schema());

    db.create_materialized_view(
        "m",
        "t",
        Arc::new(ProjectionQuery::new(["id", "name"])),
        "ids_only",
    )
    .unwrap();

    db.insert("t", vec![id_name_batch(vec![(1, "a"), (2, "b")])])
        .unwrap();

    assert_eq!(target.num_rows(), 2);
    let stored = target.batches();
    assert_eq!(stored[0].num_columns(), 1);
    assert_eq!(stored[0].schema().field(0).name(), "id");
}

// ============================================================================
// Live views
// ============================================================================

#[test]
fn test_live_view_receives_pushes() {
    let db = Cascade::new();
    db.register_table("t", id_schema());
    let live = db.create_live_view("lv", "t", "SELECT id FROM t").unwrap();

    db.insert("t", vec![id_batch(vec![1, 2, 3])]).unwrap();

    assert_eq!(live.num_rows(), 3);
    assert_eq!(live.version(), 1);

    // The live view's log entry carries its inner query text.
    let entries = db.views_log().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].view_type, ViewType::Live);
    assert_eq!(entries[0].query.as_deref(), Some("SELECT id FROM t"));
}

// ============================================================================
// Recursion and cycle guards
// ============================================================================

#[test]
fn test_recursion_guard() {
    let mut settings = Settings::default();
    settings.max_cascade_depth = 3;
    let db = Cascade::with_settings(settings);

    // A chain of plain dependents: t0 <- t1 <- t2 <- t3.
    for i in 0..4 {
        db.register_table(&format!("t{}", i), id_schema());
    }
    for i in 0..3 {
        db.catalog().add_dependency(
            &TableRef::bare(format!("t{}", i)),
            &TableRef::bare(format!("t{}", i + 1)),
        );
    }

    let ctx = db.context();
    let err = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("t0")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap_err();
    assert!(matches!(err, CascadeError::RecursionTooDeep { .. }));
}

#[test]
fn test_cycle_detection() {
    let db = Cascade::new();
    db.register_table("a", id_schema());
    db.register_table("b", id_schema());
    db.catalog()
        .add_dependency(&TableRef::bare("a"), &TableRef::bare("b"));
    db.catalog()
        .add_dependency(&TableRef::bare("b"), &TableRef::bare("a"));

    let ctx = db.context();
    let err = CascadeWriter::new(
        db.catalog().get(&TableRef::bare("a")).unwrap(),
        &ctx,
        None,
        false,
    )
    .unwrap_err();
    assert!(matches!(err, CascadeError::CycleDetected { .. }));
}

// ============================================================================
// Dropped dependents
// ============================================================================

#[test]
fn test_dependent_disappeared() {
    let db = Cascade::new();
    db.register_table("t", id_schema());
    db.register_table("tm", id_schema());
    db.create_materialized_view("m", "t", Arc::new(PassthroughQuery::new()), "tm")
        .unwrap();

    // Drop the view between registration and insert.
    db.catalog().deregister_table(&TableRef::bare("m"));

    let err = db.insert("t", vec![id_batch(vec![1])]).unwrap_err();
    assert!(matches!(err, CascadeError::TableDisappeared { .. }));
}
