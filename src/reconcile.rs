//! # Stale Record Reconciler
//!
//! After a merge, removes target rows that genuinely no longer exist
//! upstream: rows inside the just-extracted window whose key is absent from
//! the extraction's key set. Every delete is gated by guards that keep
//! "source temporarily unreachable" from ever being read as "source is
//! empty". A naive delete-on-empty policy once destroyed months of
//! historical snapshots during a transient outage; this module is the
//! direct mitigation.
//!
//! State machine:
//! `IDLE → FETCHED(ok|empty|failed) → {SKIP_RECONCILE | VERIFY_EMPTY →
//! {SKIP_RECONCILE | RECONCILE} | RECONCILE} → IDLE`

use crate::extract::{FetchOutcome, RecordSource};
use crate::keys::ReconciliationKey;
use crate::store::TargetStore;
use crate::temporal::Interval;
use anyhow::Result;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{debug, warn};

/// How the reconciliation pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum ReconcileOutcome {
    /// Rows were fetched; stale rows inside the window were deleted
    Reconciled { deleted: u64 },
    /// Zero rows were fetched and the source confirmed the window is
    /// genuinely empty; the window's target rows were deleted
    EmptyVerified { deleted: u64 },
    /// The fetch failed; nothing was deleted
    SkippedSourceFailed,
    /// Zero rows were fetched but the source could not confirm an empty
    /// window; nothing was deleted, rows preserved for safety
    SkippedUnverifiedEmpty,
}

impl ReconcileOutcome {
    /// Whether the pass was permitted to delete anything
    pub fn ran(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Reconciled { .. } | ReconcileOutcome::EmptyVerified { .. }
        )
    }

    pub fn deleted(&self) -> u64 {
        match self {
            ReconcileOutcome::Reconciled { deleted }
            | ReconcileOutcome::EmptyVerified { deleted } => *deleted,
            _ => 0,
        }
    }
}

/// Reconciles one target table against the latest extraction of a window
pub struct Reconciler {
    table: String,
}

impl Reconciler {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run the guarded delete pass for one window.
    ///
    /// `seen_keys` is the complete key set of the extraction that was just
    /// merged, and `outcome` is how that extraction ended. The source is
    /// consulted only for the empty-window verification probe.
    pub fn reconcile(
        &self,
        store: &mut dyn TargetStore,
        source: &mut dyn RecordSource,
        window: Interval,
        seen_keys: &FxHashSet<ReconciliationKey>,
        outcome: &FetchOutcome,
    ) -> Result<ReconcileOutcome> {
        match outcome {
            FetchOutcome::Failed(err) => {
                warn!(table = %self.table, window = %window, error = %err,
                    "fetch failed, reconciliation skipped, target rows untouched");
                Ok(ReconcileOutcome::SkippedSourceFailed)
            }
            FetchOutcome::Empty => self.verify_empty_then_delete(store, source, window),
            FetchOutcome::Rows(_) => {
                let deleted = store.delete_stale_in_window(&self.table, window, seen_keys)?;
                debug!(table = %self.table, window = %window, deleted,
                    "stale rows reconciled");
                Ok(ReconcileOutcome::Reconciled { deleted })
            }
        }
    }

    /// The extraction returned zero rows. Before deleting the window's
    /// target rows, ask the source to confirm it really holds nothing for
    /// this window; an unreachable or disagreeing source aborts the pass.
    fn verify_empty_then_delete(
        &self,
        store: &mut dyn TargetStore,
        source: &mut dyn RecordSource,
        window: Interval,
    ) -> Result<ReconcileOutcome> {
        match source.probe(window) {
            Ok(probe) if probe.row_count == 0 => {
                let deleted =
                    store.delete_stale_in_window(&self.table, window, &FxHashSet::default())?;
                debug!(table = %self.table, window = %window, deleted,
                    "window verified empty upstream, target rows removed");
                Ok(ReconcileOutcome::EmptyVerified { deleted })
            }
            Ok(probe) => {
                warn!(table = %self.table, window = %window, upstream_rows = probe.row_count,
                    "extraction returned no rows but the source reports rows for the window; \
                     rows preserved for safety");
                Ok(ReconcileOutcome::SkippedUnverifiedEmpty)
            }
            Err(err) => {
                warn!(table = %self.table, window = %window, error = %err,
                    "empty window could not be verified, rows preserved for safety");
                Ok(ReconcileOutcome::SkippedUnverifiedEmpty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Page, SourceError, SourceProbe};
    use crate::keys::KeyPolicy;
    use crate::model::{EntityId, SourceRecord, TargetRecord};
    use crate::store::MemoryStore;

    /// Source stub whose probe is scripted; fetch_page is never called here
    struct ProbeOnly {
        probe: Result<SourceProbe, SourceError>,
    }

    impl RecordSource for ProbeOnly {
        fn fetch_page(
            &mut self,
            _window: Interval,
            _offset: u64,
            _limit: u64,
        ) -> Result<Page, SourceError> {
            unreachable!("reconciler never fetches pages")
        }

        fn probe(&mut self, _window: Interval) -> Result<SourceProbe, SourceError> {
            self.probe.clone()
        }
    }

    fn target_row(entity: &str, occurred_at: i64) -> TargetRecord {
        let source =
            SourceRecord::new(EntityId(entity.to_string()), occurred_at, 1000).with_minutes(30);
        let key = KeyPolicy::reference().key_for(&source);
        TargetRecord::from_source(source, key)
    }

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.upsert("t", target_row("E1", 150)).unwrap();
        store.upsert("t", target_row("E2", 160)).unwrap();
        store.upsert("t", target_row("E3", 900)).unwrap(); // outside window
        store
    }

    fn window() -> Interval {
        Interval::new(100, 200).unwrap()
    }

    #[test]
    fn test_fetch_failure_skips_reconcile() {
        let mut store = seeded_store();
        let before = store.row_count("t");
        let mut source = ProbeOnly {
            probe: Ok(SourceProbe { row_count: 0 }),
        };

        let outcome = Reconciler::new("t")
            .reconcile(
                &mut store,
                &mut source,
                window(),
                &FxHashSet::default(),
                &FetchOutcome::Failed(SourceError::Unreachable("refused".to_string())),
            )
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::SkippedSourceFailed);
        assert_eq!(store.row_count("t"), before, "row count preserved exactly");
    }

    #[test]
    fn test_unverified_empty_preserves_rows() {
        // Zero rows extracted because the source was flapping: the probe
        // also fails, so nothing may be deleted.
        let mut store = seeded_store();
        let before = store.row_count("t");
        let mut source = ProbeOnly {
            probe: Err(SourceError::Timeout("probe timed out".to_string())),
        };

        let outcome = Reconciler::new("t")
            .reconcile(
                &mut store,
                &mut source,
                window(),
                &FxHashSet::default(),
                &FetchOutcome::Empty,
            )
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::SkippedUnverifiedEmpty);
        assert_eq!(store.row_count("t"), before);
    }

    #[test]
    fn test_probe_disagreement_preserves_rows() {
        // The source is reachable and says the window holds rows, yet the
        // extraction saw none: something is wrong, do not delete.
        let mut store = seeded_store();
        let mut source = ProbeOnly {
            probe: Ok(SourceProbe { row_count: 42 }),
        };

        let outcome = Reconciler::new("t")
            .reconcile(
                &mut store,
                &mut source,
                window(),
                &FxHashSet::default(),
                &FetchOutcome::Empty,
            )
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::SkippedUnverifiedEmpty);
        assert_eq!(store.row_count("t"), 3);
    }

    #[test]
    fn test_verified_empty_deletes_window_only() {
        let mut store = seeded_store();
        let mut source = ProbeOnly {
            probe: Ok(SourceProbe { row_count: 0 }),
        };

        let outcome = Reconciler::new("t")
            .reconcile(
                &mut store,
                &mut source,
                window(),
                &FxHashSet::default(),
                &FetchOutcome::Empty,
            )
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::EmptyVerified { deleted: 2 });
        // The historical row outside the window is untouched
        assert_eq!(store.row_count("t"), 1);
        assert_eq!(store.records("t")[0].entity_id, EntityId("E3".to_string()));
    }

    #[test]
    fn test_stale_delete_scoped_to_window_and_keyset() {
        let mut store = seeded_store();
        let mut source = ProbeOnly {
            probe: Ok(SourceProbe { row_count: 0 }),
        };

        // The latest extraction saw E1 but not E2
        let mut seen = FxHashSet::default();
        seen.insert(target_row("E1", 150).key);

        let outcome = Reconciler::new("t")
            .reconcile(
                &mut store,
                &mut source,
                window(),
                &seen,
                &FetchOutcome::Rows(1),
            )
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Reconciled { deleted: 1 });
        let mut remaining: Vec<String> = store
            .records("t")
            .into_iter()
            .map(|r| r.entity_id.0)
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["E1", "E3"]);
    }
}
