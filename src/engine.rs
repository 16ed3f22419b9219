//! # Sync Engine
//!
//! One scheduler invocation runs one job: a single-threaded
//! Extract → Merge → Reconcile pipeline for one table and stream. Merge
//! always completes fully before reconciliation begins for the same window;
//! across runs there is no ordering guarantee, so both sides are idempotent
//! under arbitrary re-runs and tolerate overlapping windows.

use crate::config::SyncConfig;
use crate::extract::{Extraction, FetchOutcome, RecordSource};
use crate::keys::KeyPolicy;
use crate::merge::{MergeStats, Merger};
use crate::model::{EntityId, StreamKind, TargetRecord};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::store::{MemoryStore, StoreMetrics, TargetStore};
use crate::temporal::{Instant, Interval};
use crate::view::{build_coverage, CoverageReport};
use crate::watermark::{ExtractionWatermark, WatermarkFlag};
use anyhow::Result;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a job treats its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobMode {
    /// Re-extract and fully replace the table; used for small reference
    /// dimension tables with no reconciliation complexity
    Full,
    /// The full Extract → Merge → Reconcile pipeline
    Incremental,
}

/// A trigger-boundary request, as the external scheduler sends it
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub table: String,
    pub stream: StreamKind,
    pub window_override: Option<Interval>,
    pub dry_run: bool,
    pub mode: JobMode,
}

impl JobRequest {
    pub fn incremental(table: impl Into<String>, stream: StreamKind) -> Self {
        Self {
            table: table.into(),
            stream,
            window_override: None,
            dry_run: false,
            mode: JobMode::Incremental,
        }
    }

    pub fn full(table: impl Into<String>, stream: StreamKind) -> Self {
        Self {
            mode: JobMode::Full,
            ..Self::incremental(table, stream)
        }
    }

    pub fn with_window(mut self, window: Interval) -> Self {
        self.window_override = Some(window);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Exit classification of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    CompletedEmptyVerified,
    SkippedUnreachable,
    SkippedTimeBudget,
    Failed,
}

impl RunOutcome {
    /// Only these outcomes permit reconciliation to have run
    pub fn reconciliation_permitted(&self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::CompletedEmptyVerified)
    }
}

/// Read-only summary of one run for the operational surface
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub table: String,
    pub stream: StreamKind,
    pub mode: JobMode,
    pub outcome: RunOutcome,
    pub window: Option<Interval>,
    pub rows_before: u64,
    pub rows_after: u64,
    pub merge: MergeStats,
    pub reconcile: Option<ReconcileOutcome>,
    /// For dry runs: rows the reconciler would have deleted
    pub stale_candidates: Option<u64>,
    pub dropped_malformed: u64,
    pub dry_run: bool,
    pub elapsed_ms: u64,
}

/// Main API: owns the target store and runs scheduler-triggered jobs
pub struct SyncEngine {
    store: Box<dyn TargetStore>,
    config: SyncConfig,
    /// Clock supplying "now" in epoch seconds; swapped out in tests
    clock: fn() -> Instant,
}

fn system_now() -> Instant {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as Instant)
        .unwrap_or(0)
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Create an engine over a custom store implementation.
    pub fn with_store<S>(config: SyncConfig, store: S) -> Self
    where
        S: TargetStore + 'static,
    {
        Self {
            store: Box::new(store),
            config,
            clock: system_now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> Instant) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn TargetStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn TargetStore {
        self.store.as_mut()
    }

    /// The key policy a stream deduplicates under
    pub fn policy_for(stream: StreamKind) -> KeyPolicy {
        match stream {
            StreamKind::Allocation => KeyPolicy::allocation(),
            StreamKind::Usage => KeyPolicy::usage(),
            StreamKind::Reference => KeyPolicy::reference(),
        }
    }

    /// Run one job against a source. The source is borrowed for the run
    /// only; the engine holds no connection state between runs.
    pub fn run(
        &mut self,
        source: &mut dyn RecordSource,
        request: &JobRequest,
    ) -> Result<RunReport> {
        match request.mode {
            JobMode::Full => self.run_full(source, request),
            JobMode::Incremental => self.run_incremental(source, request),
        }
    }

    /// Resolve the extraction window: an explicit override wins; otherwise
    /// resume from the persisted watermark, falling back to the configured
    /// lookback for a first run. Returns None when the table is already
    /// caught up to now.
    fn resolve_window(&self, request: &JobRequest) -> Option<Interval> {
        if let Some(window) = request.window_override {
            return Some(window);
        }
        let now = (self.clock)();
        let start = match self.store.watermark(&request.table) {
            Some(mark) => mark.resume_start(),
            None => now - self.config.run.lookback_secs,
        };
        if start >= now {
            return None;
        }
        Interval::new(start, now)
            .ok()
            .map(|w| w.clamp_span(self.config.run.max_window_secs))
    }

    fn run_incremental(
        &mut self,
        source: &mut dyn RecordSource,
        request: &JobRequest,
    ) -> Result<RunReport> {
        let started = std::time::Instant::now();
        let budget = Duration::from_secs(self.config.run.time_budget_secs);
        let now = (self.clock)();
        let rows_before = self.store.row_count(&request.table);

        let Some(window) = self.resolve_window(request) else {
            debug!(table = %request.table, "table already caught up, nothing to extract");
            return Ok(RunReport {
                table: request.table.clone(),
                stream: request.stream,
                mode: request.mode,
                outcome: RunOutcome::Completed,
                window: None,
                rows_before,
                rows_after: rows_before,
                merge: MergeStats::default(),
                reconcile: None,
                stale_candidates: None,
                dropped_malformed: 0,
                dry_run: request.dry_run,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        };

        let policy = Self::policy_for(request.stream);
        let merger = Merger::new(request.table.clone(), policy.clone());
        let mut stats = MergeStats::default();
        let mut budget_exceeded = false;

        let mut extraction = Extraction::begin(
            &mut *source,
            &policy,
            window,
            self.config.source.page_size,
            now,
        );
        while let Some(batch) = extraction.next_batch() {
            if request.dry_run {
                stats.batches += 1;
                stats.incoming += batch.len() as u64;
                let (_, collapsed) = merger.collapse_count(&batch);
                stats.collapsed += collapsed;
            } else {
                merger.apply_batch(self.store.as_mut(), batch, &mut stats)?;
            }
            // The in-flight batch is always finished; the budget gates
            // starting the next one and the delete phase.
            if started.elapsed() >= budget {
                budget_exceeded = true;
                warn!(table = %request.table, window = %window,
                    "time budget exhausted, exiting before the delete phase");
                break;
            }
        }
        let extract = extraction.finish();

        let mut stale_candidates = None;
        let reconcile = if request.dry_run {
            if extract.outcome.is_success() {
                let stale = self
                    .store
                    .records_in_window(&request.table, window)
                    .into_iter()
                    .filter(|record| !extract.keys.contains(&record.key))
                    .count() as u64;
                stale_candidates = Some(stale);
            }
            None
        } else if budget_exceeded {
            None
        } else {
            Some(Reconciler::new(request.table.clone()).reconcile(
                self.store.as_mut(),
                source,
                window,
                &extract.keys,
                &extract.outcome,
            )?)
        };

        let outcome = if budget_exceeded {
            RunOutcome::SkippedTimeBudget
        } else {
            match (&extract.outcome, &reconcile) {
                // No page was ever fetched: the source is down, nothing to keep
                (FetchOutcome::Failed(_), _) if stats.batches == 0 => {
                    RunOutcome::SkippedUnreachable
                }
                (FetchOutcome::Failed(_), _) => RunOutcome::Failed,
                (FetchOutcome::Empty, Some(ReconcileOutcome::EmptyVerified { .. })) => {
                    RunOutcome::CompletedEmptyVerified
                }
                (FetchOutcome::Empty, Some(ReconcileOutcome::SkippedUnverifiedEmpty)) => {
                    RunOutcome::SkippedUnreachable
                }
                _ => RunOutcome::Completed,
            }
        };

        if !request.dry_run {
            let flag = match outcome {
                RunOutcome::Completed => WatermarkFlag::RowsExtracted(extract.rows),
                RunOutcome::CompletedEmptyVerified => WatermarkFlag::VerifiedEmpty,
                RunOutcome::SkippedUnreachable => WatermarkFlag::FetchFailed,
                RunOutcome::SkippedTimeBudget | RunOutcome::Failed => {
                    WatermarkFlag::Partial(extract.rows)
                }
            };
            self.store.set_watermark(
                &request.table,
                ExtractionWatermark::new(window, (self.clock)(), flag),
            )?;
            self.store.flush()?;
        }

        let report = RunReport {
            table: request.table.clone(),
            stream: request.stream,
            mode: request.mode,
            outcome,
            window: Some(window),
            rows_before,
            rows_after: self.store.row_count(&request.table),
            merge: stats,
            reconcile,
            stale_candidates,
            dropped_malformed: extract.dropped_malformed,
            dry_run: request.dry_run,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(table = %report.table, outcome = ?report.outcome,
            rows_before = report.rows_before, rows_after = report.rows_after,
            "run finished");
        Ok(report)
    }

    /// Full-reload mode: extract everything for the window and replace the
    /// table wholesale. The empty-window guard still applies; a reload that
    /// saw zero rows replaces nothing unless the source confirms emptiness.
    fn run_full(
        &mut self,
        source: &mut dyn RecordSource,
        request: &JobRequest,
    ) -> Result<RunReport> {
        let started = std::time::Instant::now();
        let now = (self.clock)();
        let window = request.window_override.unwrap_or_else(Interval::all_time);
        let rows_before = self.store.row_count(&request.table);

        let policy = Self::policy_for(request.stream);
        let merger = Merger::new(request.table.clone(), policy.clone());
        let mut incoming = Vec::new();
        let mut stats = MergeStats::default();

        let mut extraction = Extraction::begin(
            &mut *source,
            &policy,
            window,
            self.config.source.page_size,
            now,
        );
        while let Some(batch) = extraction.next_batch() {
            stats.batches += 1;
            stats.incoming += batch.len() as u64;
            incoming.extend(batch);
        }
        let extract = extraction.finish();

        let outcome = match &extract.outcome {
            FetchOutcome::Failed(err) => {
                warn!(table = %request.table, error = %err,
                    "full reload aborted, table left untouched");
                RunOutcome::SkippedUnreachable
            }
            FetchOutcome::Empty => match source.probe(window) {
                Ok(probe) if probe.row_count == 0 => RunOutcome::CompletedEmptyVerified,
                _ => {
                    warn!(table = %request.table,
                        "empty full reload could not be verified, table preserved");
                    RunOutcome::SkippedUnreachable
                }
            },
            FetchOutcome::Rows(_) => RunOutcome::Completed,
        };

        if outcome.reconciliation_permitted() && !request.dry_run {
            let collapsed = merger.collapse_batch(incoming);
            stats.collapsed = stats.incoming - collapsed.len() as u64;
            stats.inserted = collapsed.len() as u64;
            let rows: Vec<TargetRecord> = collapsed
                .into_iter()
                .map(|record| {
                    let key = policy.key_for(&record);
                    TargetRecord::from_source(record, key)
                })
                .collect();
            self.store.replace_table(&request.table, rows)?;

            let flag = match outcome {
                RunOutcome::CompletedEmptyVerified => WatermarkFlag::VerifiedEmpty,
                _ => WatermarkFlag::RowsExtracted(extract.rows),
            };
            self.store.set_watermark(
                &request.table,
                ExtractionWatermark::new(window, (self.clock)(), flag),
            )?;
            self.store.flush()?;
        }

        Ok(RunReport {
            table: request.table.clone(),
            stream: request.stream,
            mode: request.mode,
            outcome,
            window: Some(window),
            rows_before,
            rows_after: self.store.row_count(&request.table),
            merge: stats,
            reconcile: None,
            stale_candidates: None,
            dropped_malformed: extract.dropped_malformed,
            dry_run: request.dry_run,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Build the reconciled coverage view over the configured streams.
    /// Read-only; performs no mutation and holds no locks.
    pub fn coverage(&self) -> CoverageReport {
        let allocations = self.store.records(&self.config.tables.allocations);
        let usage = self.store.records(&self.config.tables.usage);

        // Entity-level declared totals come from the reference dimension
        let mut declared_totals: FxHashMap<EntityId, i64> = FxHashMap::default();
        for record in self.store.records(&self.config.tables.entities) {
            if record.minutes > 0 {
                declared_totals.insert(record.entity_id.clone(), record.minutes);
            }
        }

        build_coverage(
            &allocations,
            &usage,
            &declared_totals,
            &self.config.view.to_options(),
        )
    }

    /// Read-only store summary for dashboards and notifications
    pub fn metrics(&self) -> StoreMetrics {
        self.store.metrics()
    }
}
