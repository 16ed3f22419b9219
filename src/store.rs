//! # Store Module
//!
//! The target-store boundary: upsert-by-key into per-table row maps, scoped
//! deletes, and read-only access for the view builder. The in-memory store
//! here is the reference implementation; [`crate::persistence::PersistentStore`]
//! layers RocksDB underneath it.

use crate::keys::ReconciliationKey;
use crate::model::TargetRecord;
use crate::temporal::Interval;
use crate::watermark::ExtractionWatermark;
use anyhow::Result;
use hashbrown::HashMap;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::path::Path;

/// What an upsert did to the target row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for the key
    Inserted,
    /// A row existed and its content changed
    Updated,
    /// A row existed with identical content; nothing was written
    Unchanged,
}

/// Read-only per-table summary for the operational surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMetrics {
    pub table: String,
    pub rows: u64,
    pub watermark: Option<ExtractionWatermark>,
}

/// Read-only store summary; dashboards and notifications consume this and
/// nothing else, so they can never trigger a delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreMetrics {
    pub tables: Vec<TableMetrics>,
}

/// Target store boundary used by the merger, the reconciler, and the view
pub trait TargetStore {
    /// Upsert one row keyed by its reconciliation key
    fn upsert(&mut self, table: &str, record: TargetRecord) -> Result<UpsertOutcome>;

    /// Fetch one row by key
    fn get(&self, table: &str, key: &ReconciliationKey) -> Option<TargetRecord>;

    /// All rows of a table, unordered
    fn records(&self, table: &str) -> Vec<TargetRecord>;

    /// Rows whose event time falls inside the window
    fn records_in_window(&self, table: &str, window: Interval) -> Vec<TargetRecord>;

    /// Delete rows inside the window whose key is not in `keep`; rows
    /// outside the window are never touched. Returns the number deleted.
    fn delete_stale_in_window(
        &mut self,
        table: &str,
        window: Interval,
        keep: &FxHashSet<ReconciliationKey>,
    ) -> Result<u64>;

    /// Replace a table wholesale (full-reload mode for reference tables).
    /// Returns the number of rows now in the table.
    fn replace_table(&mut self, table: &str, records: Vec<TargetRecord>) -> Result<u64>;

    fn row_count(&self, table: &str) -> u64;

    /// The persisted extraction watermark for a table, if any run completed
    fn watermark(&self, table: &str) -> Option<ExtractionWatermark>;

    fn set_watermark(&mut self, table: &str, watermark: ExtractionWatermark) -> Result<()>;

    /// Read-only summary across all tables
    fn metrics(&self) -> StoreMetrics;

    /// Flush buffered writes, if the implementation buffers
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Write a consistent checkpoint of the store, if supported
    fn checkpoint(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

type TableRows = HashMap<ReconciliationKey, TargetRecord>;

/// In-memory target store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<String, TableRows>,
    watermarks: HashMap<String, ExtractionWatermark>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of tables that currently hold rows or a watermark
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .keys()
            .chain(self.watermarks.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl TargetStore for MemoryStore {
    fn upsert(&mut self, table: &str, record: TargetRecord) -> Result<UpsertOutcome> {
        let rows = self.tables.entry(table.to_string()).or_default();
        match rows.get(&record.key) {
            None => {
                rows.insert(record.key.clone(), record);
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing) if existing.same_content(&record) => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                rows.insert(record.key.clone(), record);
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    fn get(&self, table: &str, key: &ReconciliationKey) -> Option<TargetRecord> {
        self.tables.get(table).and_then(|rows| rows.get(key)).cloned()
    }

    fn records(&self, table: &str) -> Vec<TargetRecord> {
        self.tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn records_in_window(&self, table: &str, window: Interval) -> Vec<TargetRecord> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|record| window.contains(record.occurred_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn delete_stale_in_window(
        &mut self,
        table: &str,
        window: Interval,
        keep: &FxHashSet<ReconciliationKey>,
    ) -> Result<u64> {
        let Some(rows) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|key, record| !window.contains(record.occurred_at) || keep.contains(key));
        Ok((before - rows.len()) as u64)
    }

    fn replace_table(&mut self, table: &str, records: Vec<TargetRecord>) -> Result<u64> {
        let rows: TableRows = records
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();
        let count = rows.len() as u64;
        self.tables.insert(table.to_string(), rows);
        Ok(count)
    }

    fn row_count(&self, table: &str) -> u64 {
        self.tables.get(table).map(|rows| rows.len() as u64).unwrap_or(0)
    }

    fn watermark(&self, table: &str) -> Option<ExtractionWatermark> {
        self.watermarks.get(table).copied()
    }

    fn set_watermark(&mut self, table: &str, watermark: ExtractionWatermark) -> Result<()> {
        self.watermarks.insert(table.to_string(), watermark);
        Ok(())
    }

    fn metrics(&self) -> StoreMetrics {
        let tables = self
            .table_names()
            .into_iter()
            .map(|table| TableMetrics {
                rows: self.row_count(&table),
                watermark: self.watermark(&table),
                table,
            })
            .collect();
        StoreMetrics { tables }
    }
}
