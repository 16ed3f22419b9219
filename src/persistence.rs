//! # Persistent Store
//!
//! RocksDB-backed implementation of the target-store boundary. Rows are
//! bincode-encoded under table-prefixed keys; watermarks and the storage
//! manifest live in their own column families. A small LRU cache fronts the
//! point lookups the merger performs on every upsert.

use crate::config::{StorageConfig, DEFAULT_ROW_CACHE_CAPACITY};
use crate::keys::ReconciliationKey;
use crate::model::TargetRecord;
use crate::store::{StoreMetrics, TableMetrics, TargetStore, UpsertOutcome};
use crate::temporal::Interval;
use crate::watermark::ExtractionWatermark;
use anyhow::{anyhow, Result};
use hashbrown::HashMap;
use lru::LruCache;
use rocksdb::{
    checkpoint::Checkpoint, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    DB,
};
use rustc_hash::FxHashSet;
use std::path::Path;
use std::sync::Mutex;

const CF_RECORDS: &str = "records";
const CF_WATERMARKS: &str = "watermarks";
const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;

/// Separator between the table name and the encoded row key. Table names
/// must not contain NUL.
const TABLE_SEPARATOR: u8 = 0;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

pub struct PersistentStore {
    db: DB,
    /// Per-table row counts, maintained incrementally after the opening scan
    counts: HashMap<String, u64>,
    watermarks: HashMap<String, ExtractionWatermark>,
    cache: Mutex<LruCache<Vec<u8>, TargetRecord>>,
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, &StorageConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        let db = open_db(path, config)?;
        validate_or_init_manifest(&db)?;

        let mut store = Self {
            db,
            counts: HashMap::new(),
            watermarks: HashMap::new(),
            cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(DEFAULT_ROW_CACHE_CAPACITY)
                    .expect("cache capacity"),
            )),
        };
        store.load_counts()?;
        store.load_watermarks()?;
        Ok(store)
    }

    fn records_cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_RECORDS)
            .ok_or_else(|| anyhow!("missing records column family"))
    }

    fn watermarks_cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_WATERMARKS)
            .ok_or_else(|| anyhow!("missing watermarks column family"))
    }

    fn load_counts(&mut self) -> Result<()> {
        let cf = self.records_cf()?;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if let Some(table) = decode_table(&key) {
                *self.counts.entry(table.to_string()).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    fn load_watermarks(&mut self) -> Result<()> {
        let cf = self.watermarks_cf()?;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let table = String::from_utf8_lossy(&key).to_string();
            let watermark: ExtractionWatermark = bincode::deserialize(&value)?;
            self.watermarks.insert(table, watermark);
        }
        Ok(())
    }

    /// Scan one table's rows, decoded
    fn scan_table(&self, table: &str) -> Result<Vec<TargetRecord>> {
        let cf = self.records_cf()?;
        let prefix = table_prefix(table);
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            rows.push(bincode::deserialize(&value)?);
        }
        Ok(rows)
    }

    /// Write a consistent checkpoint of the database to `path`
    pub fn checkpoint_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint::new(&self.db)?;
        checkpoint.create_checkpoint(path)?;
        Ok(())
    }
}

impl TargetStore for PersistentStore {
    fn upsert(&mut self, table: &str, record: TargetRecord) -> Result<UpsertOutcome> {
        let row_key = encode_row_key(table, &record.key);
        let existing = self.get(table, &record.key);

        let outcome = match &existing {
            None => UpsertOutcome::Inserted,
            Some(old) if old.same_content(&record) => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };

        let cf = self.records_cf()?;
        self.db.put_cf(cf, &row_key, bincode::serialize(&record)?)?;
        if outcome == UpsertOutcome::Inserted {
            *self.counts.entry(table.to_string()).or_insert(0) += 1;
        }
        self.cache
            .lock()
            .expect("row cache poisoned")
            .put(row_key, record);
        Ok(outcome)
    }

    fn get(&self, table: &str, key: &ReconciliationKey) -> Option<TargetRecord> {
        let row_key = match bincode::serialize(key) {
            Ok(encoded) => {
                let mut full = table_prefix(table);
                full.extend_from_slice(&encoded);
                full
            }
            Err(_) => return None,
        };

        if let Some(hit) = self
            .cache
            .lock()
            .expect("row cache poisoned")
            .get(&row_key)
        {
            return Some(hit.clone());
        }

        let cf = self.db.cf_handle(CF_RECORDS)?;
        let value = self.db.get_cf(cf, &row_key).ok().flatten()?;
        let record: TargetRecord = bincode::deserialize(&value).ok()?;
        self.cache
            .lock()
            .expect("row cache poisoned")
            .put(row_key, record.clone());
        Some(record)
    }

    fn records(&self, table: &str) -> Vec<TargetRecord> {
        self.scan_table(table).unwrap_or_default()
    }

    fn records_in_window(&self, table: &str, window: Interval) -> Vec<TargetRecord> {
        self.records(table)
            .into_iter()
            .filter(|record| window.contains(record.occurred_at))
            .collect()
    }

    fn delete_stale_in_window(
        &mut self,
        table: &str,
        window: Interval,
        keep: &FxHashSet<ReconciliationKey>,
    ) -> Result<u64> {
        let stale: Vec<ReconciliationKey> = self
            .scan_table(table)?
            .into_iter()
            .filter(|record| window.contains(record.occurred_at) && !keep.contains(&record.key))
            .map(|record| record.key)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let cf = self.records_cf()?;
        let mut batch = WriteBatch::default();
        let mut cache = self.cache.lock().expect("row cache poisoned");
        for key in &stale {
            let row_key = encode_row_key(table, key);
            batch.delete_cf(cf, &row_key);
            cache.pop(&row_key);
        }
        drop(cache);
        self.db.write(batch)?;

        let deleted = stale.len() as u64;
        if let Some(count) = self.counts.get_mut(table) {
            *count = count.saturating_sub(deleted);
        }
        Ok(deleted)
    }

    fn replace_table(&mut self, table: &str, records: Vec<TargetRecord>) -> Result<u64> {
        let cf = self.records_cf()?;
        let mut batch = WriteBatch::default();
        for existing in self.scan_table(table)? {
            batch.delete_cf(cf, encode_row_key(table, &existing.key));
        }
        let mut count = 0u64;
        for record in records {
            batch.put_cf(
                cf,
                encode_row_key(table, &record.key),
                bincode::serialize(&record)?,
            );
            count += 1;
        }
        self.db.write(batch)?;

        // Replaced rows may shadow cached entries; drop the whole cache
        // rather than track per-table membership.
        self.cache.lock().expect("row cache poisoned").clear();
        self.counts.insert(table.to_string(), count);
        Ok(count)
    }

    fn row_count(&self, table: &str) -> u64 {
        self.counts.get(table).copied().unwrap_or(0)
    }

    fn watermark(&self, table: &str) -> Option<ExtractionWatermark> {
        self.watermarks.get(table).copied()
    }

    fn set_watermark(&mut self, table: &str, watermark: ExtractionWatermark) -> Result<()> {
        let cf = self.watermarks_cf()?;
        self.db
            .put_cf(cf, table.as_bytes(), bincode::serialize(&watermark)?)?;
        self.watermarks.insert(table.to_string(), watermark);
        Ok(())
    }

    fn metrics(&self) -> StoreMetrics {
        let mut names: Vec<String> = self
            .counts
            .keys()
            .chain(self.watermarks.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();

        StoreMetrics {
            tables: names
                .into_iter()
                .map(|table| TableMetrics {
                    rows: self.row_count(&table),
                    watermark: self.watermark(&table),
                    table,
                })
                .collect(),
        }
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn checkpoint(&self, path: &Path) -> Result<()> {
        self.checkpoint_to(path)
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        let _ = self.db.flush();
    }
}

fn open_db(path: impl AsRef<Path>, config: &StorageConfig) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_max_background_jobs(config.max_background_jobs as i32);
    options.set_write_buffer_size(config.write_buffer_mb * 1024 * 1024);

    let mut block_options = rocksdb::BlockBasedOptions::default();
    let cache = rocksdb::Cache::new_lru_cache(config.block_cache_mb * 1024 * 1024);
    block_options.set_block_cache(&cache);

    let cf_descriptors = [CF_RECORDS, CF_WATERMARKS, CF_METADATA]
        .iter()
        .map(|name| {
            let mut cf_options = Options::default();
            cf_options.set_block_based_table_factory(&block_options);
            ColumnFamilyDescriptor::new(*name, cf_options)
        })
        .collect::<Vec<_>>();

    let db = DB::open_cf_descriptors(&options, path, cf_descriptors)?;
    Ok(db)
}

fn validate_or_init_manifest(db: &DB) -> Result<()> {
    let cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| anyhow!("missing metadata column family"))?;
    match db.get_cf(cf, KEY_MANIFEST)? {
        Some(bytes) => {
            let manifest: StorageManifest = bincode::deserialize(&bytes)?;
            if manifest.format_version != STORAGE_FORMAT_VERSION {
                anyhow::bail!(
                    "storage format version {} is not supported (expected {})",
                    manifest.format_version,
                    STORAGE_FORMAT_VERSION
                );
            }
        }
        None => {
            let manifest = StorageManifest {
                format_version: STORAGE_FORMAT_VERSION,
                app_version: env!("CARGO_PKG_VERSION").to_string(),
            };
            db.put_cf(cf, KEY_MANIFEST, bincode::serialize(&manifest)?)?;
        }
    }
    Ok(())
}

fn table_prefix(table: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(table.len() + 1);
    prefix.extend_from_slice(table.as_bytes());
    prefix.push(TABLE_SEPARATOR);
    prefix
}

fn encode_row_key(table: &str, key: &ReconciliationKey) -> Vec<u8> {
    let mut row_key = table_prefix(table);
    row_key.extend_from_slice(&bincode::serialize(key).expect("key encoding is infallible"));
    row_key
}

fn decode_table(row_key: &[u8]) -> Option<&str> {
    let separator = row_key.iter().position(|b| *b == TABLE_SEPARATOR)?;
    std::str::from_utf8(&row_key[..separator]).ok()
}
