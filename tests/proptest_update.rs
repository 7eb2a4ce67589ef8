//! Property-based tests for the update pipeline.
//!
//! Random change sets with randomly failing rows are pushed through the
//! blocking adapter at different batch sizes. Outcomes must not depend on
//! the batch size, only the number of round-trips may.
//!
//! Run with: `cargo test --test proptest_update`

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use sync_adapter::{
    AdapterConfig, AdapterError, BlockingSyncAdapter, ColumnDef, CommandFailure, DataType, InMemorySource,
    MemoryCommandBuilder, Row, RowStatus, StatementKind, SyncAdapter, Table, TableSchema, UpdateReport,
};

// =============================================================================
// Strategies for generating change sets
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Change {
    kind: StatementKind,
    fails: bool,
}

fn change_strategy() -> impl Strategy<Value = Change> {
    (
        prop_oneof![
            Just(StatementKind::Insert),
            Just(StatementKind::Update),
            Just(StatementKind::Delete),
        ],
        prop::bool::weighted(0.2),
    )
        .prop_map(|(kind, fails)| Change { kind, fails })
}

fn changes_strategy() -> impl Strategy<Value = Vec<Change>> {
    prop::collection::vec(change_strategy(), 1..24)
}

// =============================================================================
// Harness
// =============================================================================

fn schema() -> TableSchema {
    TableSchema::new(vec![
        ColumnDef::new("pk", DataType::Integer).primary_key(),
        ColumnDef::new("qty", DataType::Integer),
    ])
}

/// Row `i` works on key `i + 1`; inserts use keys from 1000 up.
fn key_of(index: usize, change: Change) -> i64 {
    match change.kind {
        StatementKind::Insert => 1000 + index as i64,
        _ => index as i64 + 1,
    }
}

struct Run {
    result: Result<UpdateReport, AdapterError>,
    batch_calls: usize,
    non_query_calls: usize,
    stored: Vec<Map<String, Value>>,
}

fn run(changes: &[Change], batch_size: usize, continue_on_error: bool) -> Run {
    let seeded = (1..=changes.len() as i64)
        .map(|pk| Row::loaded([("pk", json!(pk)), ("qty", json!(0))]))
        .collect();
    let source = Arc::new(InMemorySource::new().with_table("items", schema(), seeded));

    let mut table = Table::new("items", schema());
    for (index, change) in changes.iter().enumerate() {
        let pk = key_of(index, *change);
        let row = match change.kind {
            StatementKind::Insert => Row::new([("pk", json!(pk)), ("qty", json!(1))]),
            StatementKind::Update => {
                let mut row = Row::loaded([("pk", json!(pk)), ("qty", json!(0))]);
                row.set("qty", json!(pk * 10));
                row
            }
            _ => {
                let mut row = Row::loaded([("pk", json!(pk)), ("qty", json!(0))]);
                row.delete();
                row
            }
        };
        table.push(row);
        if change.fails {
            source.fail_command("items", change.kind, json!(pk), CommandFailure::new("rejected"));
        }
    }

    let config = AdapterConfig {
        update_batch_size: batch_size,
        continue_update_on_error: continue_on_error,
        ..Default::default()
    };
    let adapter = SyncAdapter::new(source.clone(), config).with_command_builder(Arc::new(MemoryCommandBuilder));
    let mut adapter = BlockingSyncAdapter::from_adapter(adapter).unwrap();
    let result = adapter.update_table(&mut table);

    Run {
        result,
        batch_calls: source.batch_calls(),
        non_query_calls: source.non_query_calls(),
        stored: source.rows("items"),
    }
}

fn statuses(report: &UpdateReport) -> Vec<RowStatus> {
    report.rows.iter().map(|r| r.status.clone()).collect()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// With continue-on-error, per-row outcomes and the final source state
    /// are the same whatever the batch size; round-trips are ceil(M/B).
    #[test]
    fn batch_size_does_not_change_outcomes(changes in changes_strategy(), batch_size in 1usize..8) {
        let baseline = run(&changes, 1, true);
        let batched = run(&changes, batch_size, true);

        let baseline_report = baseline.result.unwrap();
        let batched_report = batched.result.unwrap();
        prop_assert_eq!(statuses(&baseline_report), statuses(&batched_report));
        prop_assert_eq!(&baseline.stored, &batched.stored);

        let m = changes.len();
        prop_assert_eq!(baseline.non_query_calls, m);
        prop_assert_eq!(baseline.batch_calls, 0);
        if batch_size > 1 {
            prop_assert_eq!(batched.batch_calls, m.div_ceil(batch_size));
            prop_assert_eq!(batched.non_query_calls, 0);
        }
    }

    /// Rows affected add up over committed rows, and every failing row is
    /// reported as failed.
    #[test]
    fn continue_on_error_accounts_for_every_row(changes in changes_strategy(), batch_size in 1usize..8) {
        let report = run(&changes, batch_size, true).result.unwrap();

        prop_assert_eq!(report.rows.len(), changes.len());
        prop_assert_eq!(report.rows_affected(), report.committed() as u64);
        for (entry, change) in report.rows.iter().zip(&changes) {
            prop_assert_eq!(entry.kind, change.kind);
            if change.fails {
                prop_assert!(matches!(entry.status, RowStatus::Failed(_)));
            } else {
                prop_assert_eq!(&entry.status, &RowStatus::Committed { rows_affected: 1 });
            }
        }
    }

    /// Without continue-on-error, everything before the first failure is
    /// committed and nothing after it is reported as processed.
    #[test]
    fn fail_fast_commits_a_prefix(changes in changes_strategy(), batch_size in 1usize..8) {
        let outcome = run(&changes, batch_size, false).result;

        match changes.iter().position(|c| c.fails) {
            None => {
                let report = outcome.unwrap();
                prop_assert_eq!(report.committed(), changes.len());
            }
            Some(first) => {
                let Err(AdapterError::Update { row, report, .. }) = outcome else {
                    panic!("expected an update failure at row {first}");
                };
                prop_assert_eq!(row, first);
                for (index, entry) in report.rows.iter().enumerate() {
                    if index < first {
                        prop_assert_eq!(&entry.status, &RowStatus::Committed { rows_affected: 1 });
                    } else if index == first {
                        prop_assert!(matches!(entry.status, RowStatus::Failed(_)));
                    } else {
                        prop_assert_eq!(&entry.status, &RowStatus::Pending);
                    }
                }
            }
        }
    }
}
