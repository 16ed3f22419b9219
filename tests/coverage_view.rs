#[path = "../src/test_support.rs"]
mod test_support;

use test_support::{raw_allocation, raw_entity, raw_usage, ScriptedSource};
use worksync_rs::config::SyncConfig;
use worksync_rs::engine::{JobRequest, SyncEngine};
use worksync_rs::model::{ActorId, EntityId, StreamKind};
use worksync_rs::temporal::Interval;
use worksync_rs::view::{AllocationStatus, BudgetSource};

fn run(engine: &mut SyncEngine, table: &str, stream: StreamKind, rows: Vec<serde_json::Value>) {
    let window = Interval::new(0, 1_000_000).unwrap();
    let mut source = ScriptedSource::serving(rows);
    let request = match stream {
        StreamKind::Reference => JobRequest::full(table, stream).with_window(window),
        _ => JobRequest::incremental(table, stream).with_window(window),
    };
    engine.run(&mut source, &request).unwrap();
}

#[test]
fn every_actor_appears_exactly_once() {
    // A1 has an explicit allocation for E1 and no usage; A2 has usage for
    // E1 and no allocation. The view must contain exactly two rows for E1.
    let mut engine = SyncEngine::new(SyncConfig::default());
    run(
        &mut engine,
        "allocations",
        StreamKind::Allocation,
        vec![raw_allocation("E1", "A1", "development", 120, 150)],
    );
    run(
        &mut engine,
        "usage",
        StreamKind::Usage,
        vec![raw_usage("E1", "A2", "w-1", 45, 160)],
    );

    let report = engine.coverage();
    let rows = report.rows_for_entity(&EntityId("E1".to_string()));
    assert_eq!(rows.len(), 2, "never zero or one");

    let a1 = rows.iter().find(|r| r.actor_id == ActorId("A1".to_string())).unwrap();
    assert_eq!(a1.allocated_minutes, 120);
    assert_eq!(a1.used_minutes, 0);

    let a2 = rows.iter().find(|r| r.actor_id == ActorId("A2".to_string())).unwrap();
    assert_eq!(a2.allocated_minutes, 0);
    assert_eq!(a2.used_minutes, 45);
}

#[test]
fn fallback_distributes_proportionally_and_conserves_total() {
    // E2: declared total 100 minutes, no actor-level allocations, two
    // actors with usage 30 and 10. Shares must be 75 and 25.
    let mut engine = SyncEngine::new(SyncConfig::default());
    run(
        &mut engine,
        "entities",
        StreamKind::Reference,
        vec![raw_entity("E2", 100)],
    );
    run(
        &mut engine,
        "usage",
        StreamKind::Usage,
        vec![
            raw_usage("E2", "A1", "w-1", 30, 150),
            raw_usage("E2", "A2", "w-2", 10, 160),
        ],
    );

    let report = engine.coverage();
    let rows = report.rows_for_entity(&EntityId("E2".to_string()));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].allocated_minutes, 75);
    assert_eq!(rows[1].allocated_minutes, 25);
    assert!(rows.iter().all(|r| r.budget_source == BudgetSource::Fallback));

    let total: i64 = rows.iter().map(|r| r.allocated_minutes).sum();
    assert_eq!(total, 100);
}

#[test]
fn fallback_never_runs_where_explicit_allocations_exist() {
    // This combination once caused several-hundred-hour over-counting:
    // an entity with explicit actor-level allocations must not also have
    // its declared total distributed.
    let mut engine = SyncEngine::new(SyncConfig::default());
    run(
        &mut engine,
        "entities",
        StreamKind::Reference,
        vec![raw_entity("E1", 600)],
    );
    run(
        &mut engine,
        "allocations",
        StreamKind::Allocation,
        vec![raw_allocation("E1", "A1", "development", 60, 150)],
    );
    run(
        &mut engine,
        "usage",
        StreamKind::Usage,
        vec![
            raw_usage("E1", "A1", "w-1", 30, 150),
            raw_usage("E1", "A2", "w-2", 90, 160),
        ],
    );

    let report = engine.coverage();
    let rows = report.rows_for_entity(&EntityId("E1".to_string()));

    let total_allocated: i64 = rows.iter().map(|r| r.allocated_minutes).sum();
    assert_eq!(total_allocated, 60, "only the explicit allocation counts");
    assert!(rows.iter().all(|r| r.budget_source != BudgetSource::Fallback));
}

#[test]
fn duplicate_snapshots_across_runs_count_once_in_the_view() {
    let mut engine = SyncEngine::new(SyncConfig::default());
    let day1 = Interval::new(0, 86_400).unwrap();
    let day2 = Interval::new(86_400, 172_800).unwrap();

    let mut source = ScriptedSource::serving(vec![raw_allocation("E1", "A1", "C1", 30, 1000)]);
    engine
        .run(
            &mut source,
            &JobRequest::incremental("allocations", StreamKind::Allocation).with_window(day1),
        )
        .unwrap();
    let mut source = ScriptedSource::serving(vec![raw_allocation("E1", "A1", "C1", 30, 1000)]);
    engine
        .run(
            &mut source,
            &JobRequest::incremental("allocations", StreamKind::Allocation).with_window(day2),
        )
        .unwrap();

    let report = engine.coverage();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].allocated_minutes, 30);
}

#[test]
fn status_and_utilization_classification() {
    let mut engine = SyncEngine::new(SyncConfig::default());
    run(
        &mut engine,
        "allocations",
        StreamKind::Allocation,
        vec![
            raw_allocation("E1", "A1", "development", 100, 150),
            raw_allocation("E2", "A2", "development", 100, 150),
            raw_allocation("E3", "A3", "development", 100, 150),
        ],
    );
    run(
        &mut engine,
        "usage",
        StreamKind::Usage,
        vec![
            raw_usage("E1", "A1", "w-1", 130, 150),
            raw_usage("E2", "A2", "w-2", 80, 150),
            raw_usage("E3", "A3", "w-3", 20, 150),
            raw_usage("E4", "A4", "w-4", 50, 150),
        ],
    );

    let report = engine.coverage();
    let status_of = |entity: &str| {
        report.rows_for_entity(&EntityId(entity.to_string()))[0].status
    };

    assert_eq!(status_of("E1"), AllocationStatus::OverAllocated);
    assert_eq!(status_of("E2"), AllocationStatus::ApproachingLimit);
    assert_eq!(status_of("E3"), AllocationStatus::WithinAllocation);
    assert_eq!(status_of("E4"), AllocationStatus::NoAllocationSet);

    let e4 = report.rows_for_entity(&EntityId("E4".to_string()))[0];
    assert_eq!(e4.utilization, None, "zero allocation has no utilization");

    let e1 = report.rows_for_entity(&EntityId("E1".to_string()))[0];
    assert_eq!(e1.variance_minutes, -30);
}

#[test]
fn inconsistency_finding_is_reported_not_blocking() {
    let mut engine = SyncEngine::new(SyncConfig::default());
    run(
        &mut engine,
        "entities",
        StreamKind::Reference,
        vec![raw_entity("E1", 600)],
    );
    run(
        &mut engine,
        "allocations",
        StreamKind::Allocation,
        vec![raw_allocation("E1", "A1", "development", 120, 150)],
    );

    let report = engine.coverage();
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].divergence_minutes, 480);
    assert_eq!(report.rows.len(), 1, "rows still produced");
}
