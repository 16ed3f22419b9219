//! Scheduler-invoked job runner: one invocation runs one sync job and
//! prints its run report as JSON on stdout.

use worksync_rs::config::{ConfigOverrides, StorageOverrides, SyncConfig};
use worksync_rs::engine::{JobMode, JobRequest, SyncEngine};
use worksync_rs::model::StreamKind;
use worksync_rs::persistence::PersistentStore;
use worksync_rs::source_http::HttpSource;
use worksync_rs::temporal::Interval;
use worksync_rs::RunOutcome;

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

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn parse_stream(value: Option<String>) -> anyhow::Result<StreamKind> {
    match value.as_deref() {
        Some("allocation") => Ok(StreamKind::Allocation),
        Some("usage") => Ok(StreamKind::Usage),
        Some("reference") => Ok(StreamKind::Reference),
        Some(other) => anyhow::bail!("unknown stream {other:?} (allocation|usage|reference)"),
        None => anyhow::bail!("--stream is required (allocation|usage|reference)"),
    }
}

fn parse_mode(value: Option<String>) -> anyhow::Result<JobMode> {
    match value.as_deref() {
        Some("full") => Ok(JobMode::Full),
        Some("incremental") | None => Ok(JobMode::Incremental),
        Some(other) => anyhow::bail!("unknown mode {other:?} (full|incremental)"),
    }
}

fn parse_window() -> anyhow::Result<Option<Interval>> {
    match (parse_arg("--window-start"), parse_arg("--window-end")) {
        (Some(start), Some(end)) => {
            let window = Interval::new(start.parse()?, end.parse()?)?;
            Ok(Some(window))
        }
        (None, None) => Ok(None),
        _ => anyhow::bail!("--window-start and --window-end must be given together"),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let table = parse_arg("--table")
        .ok_or_else(|| anyhow::anyhow!("--table is required"))?;
    let stream = parse_stream(parse_arg("--stream"))?;
    let mode = parse_mode(parse_arg("--mode"))?;
    let window_override = parse_window()?;

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
    let mut source = HttpSource::new(&config.source)?;

    let request = JobRequest {
        table,
        stream,
        window_override,
        dry_run: has_flag("--dry-run"),
        mode,
    };

    let mut engine = SyncEngine::with_store(config, store);
    let report = engine.run(&mut source, &request)?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.outcome == RunOutcome::Failed {
        std::process::exit(1);
    }
    Ok(())
}
