#[path = "../src/test_support.rs"]
mod test_support;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use test_support::{raw_usage, ScriptedSource};
use worksync_rs::config::SyncConfig;
use worksync_rs::engine::{JobRequest, SyncEngine};
use worksync_rs::model::StreamKind;
use worksync_rs::persistence::PersistentStore;
use worksync_rs::temporal::Interval;
use worksync_rs::watermark::WatermarkFlag;
use worksync_rs::{RunOutcome, TargetStore};

fn temp_db_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("worksync_{prefix}_{nanos}"));
    path
}

#[test]
fn run_state_survives_reopen() -> anyhow::Result<()> {
    let path = temp_db_path("run_state");
    let window = Interval::new(100, 200)?;
    let request = JobRequest::incremental("usage", StreamKind::Usage).with_window(window);

    {
        let store = PersistentStore::open(&path)?;
        let mut engine = SyncEngine::with_store(SyncConfig::default(), store);
        let mut source = ScriptedSource::serving(vec![
            raw_usage("E1", "A1", "w-1", 30, 150),
            raw_usage("E2", "A1", "w-2", 45, 160),
        ]);
        let report = engine.run(&mut source, &request)?;
        assert_eq!(report.outcome, RunOutcome::Completed);
    }

    // A fresh process picks up rows and watermark from disk
    let store = PersistentStore::open(&path)?;
    assert_eq!(store.row_count("usage"), 2);
    let mark = store.watermark("usage").expect("watermark persisted");
    assert_eq!(mark.window, window);
    assert_eq!(mark.flag, WatermarkFlag::RowsExtracted(2));
    assert_eq!(mark.resume_start(), 200);

    let _ = std::fs::remove_dir_all(&path);
    Ok(())
}

#[test]
fn reconciliation_against_persistent_store() -> anyhow::Result<()> {
    let path = temp_db_path("reconcile");
    let window = Interval::new(100, 200)?;
    let request = JobRequest::incremental("usage", StreamKind::Usage).with_window(window);

    let store = PersistentStore::open(&path)?;
    let mut engine = SyncEngine::with_store(SyncConfig::default(), store);

    let mut source = ScriptedSource::serving(vec![
        raw_usage("E1", "A1", "w-1", 30, 150),
        raw_usage("E2", "A1", "w-2", 45, 160),
    ]);
    engine.run(&mut source, &request)?;

    // w-2 was deleted upstream
    let mut source = ScriptedSource::serving(vec![raw_usage("E1", "A1", "w-1", 30, 150)]);
    let report = engine.run(&mut source, &request)?;
    assert_eq!(report.rows_after, 1);

    // An unreachable source afterwards must not shrink the table
    let mut down = ScriptedSource::unreachable();
    let report = engine.run(&mut down, &request)?;
    assert_eq!(report.outcome, RunOutcome::SkippedUnreachable);
    assert_eq!(engine.store().row_count("usage"), 1);

    let _ = std::fs::remove_dir_all(&path);
    Ok(())
}

#[test]
fn failed_run_leaves_resumable_watermark() -> anyhow::Result<()> {
    let path = temp_db_path("resume");
    let window = Interval::new(100, 200)?;
    let request = JobRequest::incremental("usage", StreamKind::Usage).with_window(window);

    {
        let store = PersistentStore::open(&path)?;
        let mut engine = SyncEngine::with_store(SyncConfig::default(), store);
        let mut down = ScriptedSource::unreachable();
        let report = engine.run(&mut down, &request)?;
        assert_eq!(report.outcome, RunOutcome::SkippedUnreachable);
    }

    // The next scheduled run re-pulls the failed window from its start
    let store = PersistentStore::open(&path)?;
    let mark = store.watermark("usage").expect("failure watermark persisted");
    assert_eq!(mark.flag, WatermarkFlag::FetchFailed);
    assert_eq!(mark.resume_start(), window.start);

    let _ = std::fs::remove_dir_all(&path);
    Ok(())
}

#[test]
fn full_reload_roundtrip_on_disk() -> anyhow::Result<()> {
    let path = temp_db_path("full_reload");
    let request = JobRequest::full("entities", StreamKind::Reference);

    {
        let store = PersistentStore::open(&path)?;
        let mut engine = SyncEngine::with_store(SyncConfig::default(), store);
        let mut source = ScriptedSource::serving(vec![
            serde_json::json!({ "entity_id": "E1", "minutes": 600, "occurred_at": 0 }),
            serde_json::json!({ "entity_id": "E2", "minutes": 300, "occurred_at": 0 }),
        ]);
        engine.run(&mut source, &request)?;
    }
    {
        let store = PersistentStore::open(&path)?;
        let mut engine = SyncEngine::with_store(SyncConfig::default(), store);
        assert_eq!(engine.store().row_count("entities"), 2);

        let mut source = ScriptedSource::serving(vec![serde_json::json!({
            "entity_id": "E3", "minutes": 120, "occurred_at": 0,
        })]);
        engine.run(&mut source, &request)?;
        assert_eq!(engine.store().row_count("entities"), 1, "table fully replaced");
    }

    let _ = std::fs::remove_dir_all(&path);
    Ok(())
}
