//! Read-only coverage report printer. Consumes only the read side of the
//! store; it cannot trigger merges or deletes.

use worksync_rs::config::{ConfigOverrides, StorageOverrides, SyncConfig};
use worksync_rs::engine::SyncEngine;
use worksync_rs::persistence::PersistentStore;
use worksync_rs::view::{AllocationStatus, BudgetSource};

use std::path::PathBuf;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn status_label(status: AllocationStatus) -> &'static str {
    match status {
        AllocationStatus::OverAllocated => "OVER_ALLOCATED",
        AllocationStatus::ApproachingLimit => "APPROACHING_LIMIT",
        AllocationStatus::WithinAllocation => "WITHIN_ALLOCATION",
        AllocationStatus::NoAllocationSet => "NO_ALLOCATION_SET",
    }
}

fn source_label(source: BudgetSource) -> &'static str {
    match source {
        BudgetSource::Explicit => "explicit",
        BudgetSource::Fallback => "fallback",
        BudgetSource::None => "-",
    }
}

/// Durations are stored in minutes; hours are a presentation concern only
fn hours(minutes: i64) -> f64 {
    minutes as f64 / 60.0
}

fn main() -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        storage: parse_arg("--data-dir").map(|dir| StorageOverrides {
            data_dir: Some(PathBuf::from(dir)),
        }),
        ..ConfigOverrides::default()
    };
    let config = SyncConfig::load(parse_arg("--config").as_deref(), overrides)?;

    let data_dir = config
        .storage
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./worksync_data"));
    let store = PersistentStore::open_with_config(&data_dir, &config.storage)?;
    let engine = SyncEngine::with_store(config, store);

    let metrics = engine.metrics();
    println!("Synced tables");
    println!("=============");
    for table in &metrics.tables {
        match &table.watermark {
            Some(mark) => println!("  {:<14} {:>8} rows   last run: {}", table.table, table.rows, mark),
            None => println!("  {:<14} {:>8} rows   never synced", table.table, table.rows),
        }
    }

    let report = engine.coverage();
    println!();
    println!("Coverage ({} entries)", report.rows.len());
    println!("========");
    println!(
        "  {:<10} {:<10} {:>9} {:>9} {:>9} {:>7}  {:<18} {}",
        "entity", "actor", "alloc h", "used h", "var h", "util", "status", "budget"
    );
    for row in &report.rows {
        let utilization = row
            .utilization
            .map(|u| format!("{:.0}%", u * 100.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<10} {:<10} {:>9.1} {:>9.1} {:>9.1} {:>7}  {:<18} {}",
            row.entity_id,
            row.actor_id,
            hours(row.allocated_minutes),
            hours(row.used_minutes),
            hours(row.variance_minutes),
            utilization,
            status_label(row.status),
            source_label(row.budget_source),
        );
    }

    if !report.findings.is_empty() {
        println!();
        println!("Data-quality findings");
        println!("=====================");
        for finding in &report.findings {
            println!(
                "  {}: actor-level sum {:.1}h diverges from declared total {:.1}h by {:.1}h",
                finding.entity_id,
                hours(finding.actor_sum_minutes),
                hours(finding.declared_total_minutes),
                hours(finding.divergence_minutes),
            );
        }
    }

    Ok(())
}
