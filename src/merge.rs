//! # Deduplicating Merger
//!
//! Upserts an extraction batch into the target store keyed by
//! reconciliation identity. Repeated extractions of the same logical record
//! collapse to one row: within a key group the most recently extracted
//! snapshot wins. Rows that differ in a field that is part of the key
//! (a second category for the same actor) form distinct keys and all
//! survive; that distinction is the whole job of the key policy.

use crate::keys::{KeyPolicy, ReconciliationKey};
use crate::model::{SourceRecord, TargetRecord};
use crate::store::{TargetStore, UpsertOutcome};
use anyhow::Result;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

/// Counters accumulated across the batches of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Batches applied
    pub batches: u64,
    /// Rows that arrived in those batches
    pub incoming: u64,
    /// Rows written as new target rows
    pub inserted: u64,
    /// Rows that replaced an existing target row's content
    pub updated: u64,
    /// Rows identical to the stored row; nothing written
    pub unchanged: u64,
    /// Rows collapsed inside a batch because a newer snapshot of the same
    /// key was present
    pub collapsed: u64,
}

impl MergeStats {
    /// Rows that ended up represented in the store (one per distinct key)
    pub fn merged(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }
}

/// Merges extraction batches into one target table under one key policy
pub struct Merger {
    table: String,
    policy: KeyPolicy,
}

impl Merger {
    pub fn new(table: impl Into<String>, policy: KeyPolicy) -> Self {
        Self {
            table: table.into(),
            policy,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Apply one batch. Safe to re-apply: the same batch merged twice
    /// leaves the store content identical to merging it once.
    pub fn apply_batch(
        &self,
        store: &mut dyn TargetStore,
        batch: Vec<SourceRecord>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        stats.batches += 1;
        stats.incoming += batch.len() as u64;

        let incoming = batch.len();
        let collapsed = self.collapse_batch(batch);
        stats.collapsed += (incoming - collapsed.len()) as u64;

        for record in collapsed {
            let key = self.policy.key_for(&record);
            let row = TargetRecord::from_source(record, key);
            match store.upsert(&self.table, row)? {
                UpsertOutcome::Inserted => stats.inserted += 1,
                UpsertOutcome::Updated => stats.updated += 1,
                UpsertOutcome::Unchanged => stats.unchanged += 1,
            }
        }

        debug!(table = %self.table, batches = stats.batches, merged = stats.merged(),
            collapsed = stats.collapsed, "batch merged");
        Ok(())
    }

    /// Collapse a batch to one record per key, ranking by extraction
    /// recency; the most recently extracted snapshot is rank 1 and wins.
    pub fn collapse_batch(&self, batch: Vec<SourceRecord>) -> Vec<SourceRecord> {
        let mut latest: FxHashMap<ReconciliationKey, SourceRecord> =
            FxHashMap::with_capacity_and_hasher(batch.len(), Default::default());
        for record in batch {
            let key = self.policy.key_for(&record);
            match latest.get(&key) {
                // Later arrival at equal recency wins: re-sent batches carry
                // the same stamp and the last copy is the freshest.
                Some(existing) if existing.extracted_at > record.extracted_at => {}
                _ => {
                    latest.insert(key, record);
                }
            }
        }
        latest.into_values().collect()
    }

    /// Statically count, without writing, how a batch would collapse.
    /// Used by dry runs.
    pub fn collapse_count(&self, batch: &[SourceRecord]) -> (u64, u64) {
        let mut keys = FxHashMap::default();
        for record in batch {
            *keys.entry(self.policy.key_for(record)).or_insert(0u64) += 1;
        }
        let distinct = keys.len() as u64;
        let collapsed = batch.len() as u64 - distinct;
        (distinct, collapsed)
    }
}
