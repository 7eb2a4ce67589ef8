//! End-to-end update and fill scenarios against the in-memory source.
//!
//! Run with: `cargo test --test update_scenarios`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sync_adapter::{
    AdapterConfig, AdapterError, BlockingSyncAdapter, ColumnDef, Command, CommandBuilder, CommandExecutor,
    CommandFailure, CommandSlots, CommandTemplate, Connection, DataSet, DataType, HandlerError, InMemorySource,
    MemoryCommandBuilder, Row, RowError, RowState, RowStatus, RowStream, RowUpdateHandler, RowUpdatingEvent,
    SlotChange, SlotObserver, SourceError, StatementKind, SyncAdapter, Table, TableSchema, Transaction,
};

// =============================================================================
// Fixtures
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(false)
        .compact()
        .try_init();
}

fn schema() -> TableSchema {
    TableSchema::new(vec![
        ColumnDef::new("pk", DataType::Integer).primary_key(),
        ColumnDef::new("qty", DataType::Integer),
    ])
}

fn seeded_source(keys: impl IntoIterator<Item = i64>) -> InMemorySource {
    let rows = keys
        .into_iter()
        .map(|pk| Row::loaded([("pk", json!(pk)), ("qty", json!(0))]))
        .collect();
    InMemorySource::new().with_table("items", schema(), rows)
}

fn config(batch_size: usize, continue_on_error: bool) -> AdapterConfig {
    AdapterConfig {
        update_batch_size: batch_size,
        continue_update_on_error: continue_on_error,
        ..Default::default()
    }
}

fn adapter(source: Arc<dyn sync_adapter::DataSource>, config: AdapterConfig) -> SyncAdapter {
    SyncAdapter::new(source, config).with_command_builder(Arc::new(MemoryCommandBuilder))
}

/// [{pk:1, Modified}, {pk:2, Modified}, {pk:3, Deleted}]
fn scenario_table() -> Table {
    let mut table = Table::new("items", schema());
    for pk in 1..=3 {
        table.push(Row::loaded([("pk", json!(pk)), ("qty", json!(0))]));
    }
    table.rows_mut()[0].set("qty", json!(5));
    table.rows_mut()[1].set("qty", json!(6));
    table.rows_mut()[2].delete();
    table
}

fn scenario_source() -> Arc<InMemorySource> {
    let source = Arc::new(seeded_source(1..=3));
    source.fail_command(
        "items",
        StatementKind::Update,
        json!(2),
        CommandFailure::new("check constraint violated").with_code("23514"),
    );
    source
}

// =============================================================================
// Concrete scenario
// =============================================================================

#[tokio::test]
async fn scenario_fail_fast_stops_at_row_two() {
    init_tracing();
    let source = scenario_source();
    let mut adapter = adapter(source.clone(), config(2, false));
    let mut table = scenario_table();

    let err = adapter
        .update_table(&mut table, &CancellationToken::new())
        .await
        .unwrap_err();

    let AdapterError::Update { row, cause, report } = err else {
        panic!("expected an update failure");
    };
    assert_eq!(row, 1);
    assert!(matches!(cause, RowError::Command(ref f) if f.code.as_deref() == Some("23514")));
    assert_eq!(report.status_of(0), Some(&RowStatus::Committed { rows_affected: 1 }));
    assert!(matches!(report.status_of(1), Some(RowStatus::Failed(_))));
    assert_eq!(report.status_of(2), Some(&RowStatus::Pending));

    // row 3 was never sent
    assert!(source.find("items", &json!(3)).is_some());
    assert_eq!(source.find("items", &json!(1)).unwrap()["qty"], json!(5));
    assert_eq!(table.rows()[2].state(), RowState::Deleted);
}

#[tokio::test]
async fn scenario_continue_on_error_commits_rows_one_and_three() {
    init_tracing();
    let source = scenario_source();
    let mut adapter = adapter(source.clone(), config(2, true));
    let mut table = scenario_table();

    let report = adapter
        .update_table(&mut table, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rows_affected(), 2);
    assert_eq!(report.committed(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.errors().next().map(|(i, _)| i), Some(1));
    assert!(source.find("items", &json!(3)).is_none());

    // the deleted row is gone, the failed one keeps its change and an error
    assert_eq!(table.len(), 2);
    assert_eq!(table.rows()[1].state(), RowState::Modified);
    assert!(table.rows()[1].row_error().is_some());
    assert_eq!(source.batch_calls(), 2);
}

#[tokio::test]
async fn failed_row_succeeds_on_a_later_update() {
    let source = scenario_source();
    let mut adapter = adapter(source.clone(), config(2, true));
    let mut table = scenario_table();
    adapter.update_table(&mut table, &CancellationToken::new()).await.unwrap();

    source.clear_faults();
    let report = adapter.update_table(&mut table, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.committed(), 1);
    assert!(!table.rows()[1].has_error());
    assert_eq!(source.find("items", &json!(2)).unwrap()["qty"], json!(6));
}

#[test]
fn blocking_api_matches_async_outcome() {
    let source = scenario_source();
    let mut blocking = BlockingSyncAdapter::from_adapter(adapter(source, config(2, true))).unwrap();
    let mut blocking_table = scenario_table();
    let blocking_report = blocking.update_table(&mut blocking_table).unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let mut async_table = scenario_table();
    let async_report = runtime.block_on(async {
        let mut adapter = adapter(scenario_source(), config(2, true));
        adapter.update_table(&mut async_table, &CancellationToken::new()).await.unwrap()
    });

    assert_eq!(blocking_report, async_report);
    assert_eq!(blocking_table, async_table);
}

// =============================================================================
// Cancellation and timeouts
// =============================================================================

/// Delegates to an in-memory source and cancels the token once the first
/// batch has been applied.
struct CancelAfterFirstBatch {
    inner: InMemorySource,
    cancel: CancellationToken,
    batches: AtomicUsize,
}

#[async_trait]
impl Connection for CancelAfterFirstBatch {
    async fn open(&self) -> Result<(), SourceError> {
        self.inner.open().await
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, SourceError> {
        self.inner.begin_transaction().await
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    fn timeout(&self) -> Option<Duration> {
        self.inner.timeout()
    }
}

#[async_trait]
impl CommandExecutor for CancelAfterFirstBatch {
    async fn execute_non_query(&self, command: &Command) -> Result<u64, SourceError> {
        self.inner.execute_non_query(command).await
    }

    async fn execute_reader(&self, command: &Command) -> Result<Box<dyn RowStream>, SourceError> {
        self.inner.execute_reader(command).await
    }

    async fn execute_batch(&self, commands: &[Command]) -> Result<Vec<Result<u64, CommandFailure>>, SourceError> {
        let results = self.inner.execute_batch(commands).await;
        if self.batches.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel.cancel();
        }
        results
    }
}

#[tokio::test]
async fn cancellation_between_batches_keeps_first_batch() {
    init_tracing();
    let cancel = CancellationToken::new();
    let source = Arc::new(CancelAfterFirstBatch {
        inner: seeded_source(1..=4),
        cancel: cancel.clone(),
        batches: AtomicUsize::new(0),
    });
    let mut adapter = adapter(source.clone(), config(2, false));

    let mut table = Table::new("items", schema());
    for pk in 1..=4 {
        let mut row = Row::loaded([("pk", json!(pk)), ("qty", json!(0))]);
        row.set("qty", json!(pk * 10));
        table.push(row);
    }

    let err = adapter.update_table(&mut table, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    let report = err.report().unwrap();
    assert_eq!(report.status_of(0), Some(&RowStatus::Committed { rows_affected: 1 }));
    assert_eq!(report.status_of(1), Some(&RowStatus::Committed { rows_affected: 1 }));
    assert_eq!(report.status_of(2), Some(&RowStatus::Cancelled));
    assert_eq!(report.status_of(3), Some(&RowStatus::Cancelled));

    assert_eq!(source.inner.find("items", &json!(2)).unwrap()["qty"], json!(20));
    assert_eq!(source.inner.find("items", &json!(3)).unwrap()["qty"], json!(0));
    assert_eq!(table.rows()[0].state(), RowState::Unchanged);
    assert_eq!(table.rows()[3].state(), RowState::Modified);
    assert_eq!(source.batches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_dispatch() {
    init_tracing();
    let source = Arc::new(seeded_source(1..=2));
    source.set_latency(Some(Duration::from_secs(5)));
    let mut adapter = adapter(source.clone(), config(2, false));
    let mut table = scenario_table();
    table.rows_mut()[2].reject_changes();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = adapter.update_table(&mut table, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(err.report().unwrap().rows.iter().all(|r| r.status == RowStatus::Cancelled));
    assert_eq!(source.find("items", &json!(1)).unwrap()["qty"], json!(0));
}

#[tokio::test]
async fn slow_dispatch_times_out_as_transport_error() {
    let source = Arc::new(seeded_source(1..=3));
    source.set_latency(Some(Duration::from_millis(500)));
    let mut adapter = adapter(source.clone(), config(1, true));
    adapter.set_command_timeout_ms(20);

    let err = adapter
        .update_table(&mut scenario_table(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::Transport(SourceError::Timeout(_))));
}

// =============================================================================
// Events and slots
// =============================================================================

/// Doubles every quantity on its way out.
struct DoubleQuantity;

impl RowUpdateHandler for DoubleQuantity {
    fn row_updating(&self, event: &mut RowUpdatingEvent<'_>) -> Result<(), HandlerError> {
        if let Some(qty) = event.row.get("qty").and_then(|v| v.as_i64()) {
            event.command.set_parameter("@qty", json!(qty * 2));
        }
        Ok(())
    }
}

#[tokio::test]
async fn updating_handler_can_rewrite_parameters() {
    let source = Arc::new(seeded_source(1..=3));
    let mut adapter = adapter(source.clone(), config(3, false));
    adapter.add_handler(Arc::new(DoubleQuantity));

    adapter
        .update_table(&mut scenario_table(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(source.find("items", &json!(1)).unwrap()["qty"], json!(10));
    assert_eq!(source.find("items", &json!(2)).unwrap()["qty"], json!(12));
}

#[tokio::test]
async fn vanished_row_is_a_concurrency_violation() {
    let source = Arc::new(seeded_source([1]));
    let mut adapter = adapter(source, config(1, false));
    let mut table = Table::new("items", schema());
    let mut row = Row::loaded([("pk", json!(42)), ("qty", json!(0))]);
    row.set("qty", json!(1));
    table.push(row);

    let err = adapter
        .update_table(&mut table, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AdapterError::Update {
            row: 0,
            cause: RowError::Concurrency {
                kind: StatementKind::Update,
                expected: 1,
                actual: 0
            },
            ..
        }
    ));
}

/// On every change of a role, re-applies the current template through
/// get, clear, restore.
struct Rebinder {
    calls: AtomicUsize,
}

impl SlotObserver for Rebinder {
    fn slot_changed(&self, slots: &CommandSlots, change: &SlotChange) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let original = slots.get(change.role);
        slots.set(change.role, None);
        slots.set(change.role, original);
    }
}

#[tokio::test]
async fn slot_rebinding_from_observer_terminates() {
    let source = Arc::new(seeded_source(1..=3));
    let mut adapter = adapter(source.clone(), config(2, false));
    let rebinder = Arc::new(Rebinder {
        calls: AtomicUsize::new(0),
    });
    adapter.subscribe_slots(rebinder.clone());

    let delete = Arc::new(
        MemoryCommandBuilder
            .build("items", &schema(), StatementKind::Delete)
            .unwrap(),
    );
    adapter.set_command(StatementKind::Delete, Some(delete.clone()));

    assert_eq!(rebinder.calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&adapter.command(StatementKind::Delete).unwrap(), &delete));
    assert!(adapter.slots().is_consistent());
    assert_eq!(delete.attachment_count(), 1);

    // the slot template is used for the delete
    let report = adapter
        .update_table(&mut scenario_table(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.committed(), 3);
}

// =============================================================================
// Fill
// =============================================================================

#[tokio::test]
async fn fill_counts_only_the_first_result_set() {
    let source = Arc::new(
        seeded_source(1..=2).with_table(
            "audit",
            TableSchema::new(vec![ColumnDef::new("entry", DataType::Text)]),
            (0..5).map(|i| Row::loaded([("entry", json!(format!("e{i}")))])).collect(),
        ),
    );
    let mut adapter = adapter(source, AdapterConfig::default());
    adapter.set_command(
        StatementKind::Select,
        Some(Arc::new(CommandTemplate::new(StatementKind::Select, "items", "items;audit"))),
    );

    let mut data = DataSet::new();
    let count = adapter.fill(&mut data, &CancellationToken::new()).await.unwrap();

    assert_eq!(count, 2);
    assert_eq!(data.table("items1").unwrap().len(), 5);
}

#[tokio::test]
async fn fill_then_update_round_trip() {
    let source = Arc::new(seeded_source(1..=3));
    let mut adapter = adapter(source.clone(), config(10, false));
    adapter.set_command(
        StatementKind::Select,
        Some(Arc::new(CommandTemplate::new(StatementKind::Select, "items", "items"))),
    );

    let mut table = Table::new("items", schema());
    adapter.fill_table(&mut table, &CancellationToken::new()).await.unwrap();
    assert_eq!(table.len(), 3);

    let position = table.find_by_key(&json!(3)).unwrap();
    table.rows_mut()[position].set("qty", json!(7));
    table.push(Row::new([("pk", json!(4)), ("qty", json!(1))]));

    let report = adapter.update_table(&mut table, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.rows_affected(), 2);
    assert_eq!(source.row_count("items"), 4);
    assert_eq!(source.find("items", &json!(3)).unwrap()["qty"], json!(7));
    assert_eq!(adapter.dispatch_count(), 1);
}
