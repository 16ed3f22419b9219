#[path = "../src/test_support.rs"]
mod test_support;

use test_support::{generate_usage_rows, raw_allocation, ScriptedSource};
use worksync_rs::config::SyncConfig;
use worksync_rs::engine::{JobRequest, SyncEngine};
use worksync_rs::model::StreamKind;
use worksync_rs::temporal::Interval;
use worksync_rs::{RunOutcome, TargetRecord, TargetStore};

fn sorted_rows(engine: &SyncEngine, table: &str) -> Vec<TargetRecord> {
    let mut rows = engine.store().records(table);
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    rows
}

#[test]
fn applying_the_same_batch_twice_changes_nothing() -> anyhow::Result<()> {
    let window = Interval::new(100, 200)?;
    let rows = vec![
        raw_allocation("E1", "A1", "development", 30, 150),
        raw_allocation("E1", "A2", "development", 60, 150),
        raw_allocation("E2", "A1", "review", 45, 160),
    ];
    let request = JobRequest::incremental("allocations", StreamKind::Allocation)
        .with_window(window);

    let mut engine = SyncEngine::new(SyncConfig::default());

    let mut source = ScriptedSource::serving(rows.clone());
    let first = engine.run(&mut source, &request)?;
    assert_eq!(first.outcome, RunOutcome::Completed);
    let after_first = sorted_rows(&engine, "allocations");

    let mut source = ScriptedSource::serving(rows);
    let second = engine.run(&mut source, &request)?;
    assert_eq!(second.outcome, RunOutcome::Completed);
    let after_second = sorted_rows(&engine, "allocations");

    assert_eq!(after_first, after_second);
    assert_eq!(second.merge.unchanged, 3, "second run rewrote nothing");
    Ok(())
}

#[test]
fn reextracted_allocation_is_one_row_not_two() -> anyhow::Result<()> {
    // The same logical allocation, key (E1, A1, C1), amount 30, extracted
    // on day 1 and again on day 2.
    let window = Interval::new(0, 1_000_000)?;
    let day1 = Interval::new(0, 86_400)?;
    let day2 = Interval::new(86_400, 172_800)?;

    let mut engine = SyncEngine::new(SyncConfig::default());

    let mut source = ScriptedSource::serving(vec![raw_allocation("E1", "A1", "C1", 30, 1000)]);
    engine.run(
        &mut source,
        &JobRequest::incremental("allocations", StreamKind::Allocation).with_window(day1),
    )?;

    // Day 2 re-sends the same allocation (its occurred_at is unchanged;
    // the extraction window has moved on)
    let mut source = ScriptedSource::serving(vec![raw_allocation("E1", "A1", "C1", 30, 1000)]);
    engine.run(
        &mut source,
        &JobRequest::incremental("allocations", StreamKind::Allocation).with_window(day2),
    )?;

    let rows = engine.store().records_in_window("allocations", window);
    assert_eq!(rows.len(), 1, "one row for one logical allocation");
    assert_eq!(rows[0].minutes, 30, "amount is 30, not 60");
    Ok(())
}

#[test]
fn distinct_categories_for_one_actor_both_survive() -> anyhow::Result<()> {
    let window = Interval::new(100, 200)?;
    let mut engine = SyncEngine::new(SyncConfig::default());

    let mut source = ScriptedSource::serving(vec![
        raw_allocation("E1", "A1", "development", 30, 150),
        raw_allocation("E1", "A1", "review", 15, 150),
    ]);
    engine.run(
        &mut source,
        &JobRequest::incremental("allocations", StreamKind::Allocation).with_window(window),
    )?;

    assert_eq!(engine.store().row_count("allocations"), 2);
    Ok(())
}

#[test]
fn malformed_rows_are_dropped_not_fatal() -> anyhow::Result<()> {
    let window = Interval::new(100, 200)?;
    let mut rows = vec![raw_allocation("E1", "A1", "development", 30, 150)];
    rows.push(serde_json::json!({ "actor_id": "A9", "occurred_at": 150 }));

    let mut engine = SyncEngine::new(SyncConfig::default());
    let mut source = ScriptedSource::serving(rows);
    let report = engine.run(
        &mut source,
        &JobRequest::incremental("allocations", StreamKind::Allocation).with_window(window),
    )?;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.dropped_malformed, 1);
    assert_eq!(engine.store().row_count("allocations"), 1);
    Ok(())
}

#[test]
fn bulk_reruns_converge_on_identical_state() -> anyhow::Result<()> {
    let window = Interval::new(0, 1_000_000)?;
    let rows = generate_usage_rows(500, window, 7);
    let request = JobRequest::incremental("usage", StreamKind::Usage).with_window(window);

    let mut config = SyncConfig::default();
    config.source.page_size = 64;
    let mut engine = SyncEngine::new(config);

    let mut source = ScriptedSource::serving(rows.clone());
    engine.run(&mut source, &request)?;
    let after_first = sorted_rows(&engine, "usage");

    let mut source = ScriptedSource::serving(rows);
    let second = engine.run(&mut source, &request)?;
    let after_second = sorted_rows(&engine, "usage");

    assert_eq!(after_first, after_second);
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.merge.inserted, 0);
    assert_eq!(second.merge.updated, 0);
    Ok(())
}

#[test]
fn pagination_merges_across_pages() -> anyhow::Result<()> {
    let window = Interval::new(100, 200)?;
    let mut config = SyncConfig::default();
    config.source.page_size = 2;
    let mut engine = SyncEngine::new(config);

    let mut source = ScriptedSource::serving(vec![
        raw_allocation("E1", "A1", "development", 30, 150),
        raw_allocation("E1", "A2", "development", 60, 150),
        raw_allocation("E2", "A1", "development", 45, 160),
        raw_allocation("E2", "A2", "development", 15, 160),
        raw_allocation("E3", "A1", "development", 90, 170),
    ]);
    let report = engine.run(
        &mut source,
        &JobRequest::incremental("allocations", StreamKind::Allocation).with_window(window),
    )?;

    assert_eq!(report.merge.batches, 3);
    assert_eq!(engine.store().row_count("allocations"), 5);
    Ok(())
}
