//! # Worksync
//!
//! An incremental synchronization and reconciliation engine for moving
//! operational records from a source system of record into a secondary
//! analytical store, and keeping the copy consistent over time despite
//! partial failures, re-sent batches, and source-side edits or deletions.
//!
//! The pipeline of one run is Extract → Merge → Reconcile:
//!
//! - the [`extract`] module pulls a bounded window of records page by page
//!   and keeps "zero rows" strictly apart from "fetch failed";
//! - the [`merge`] module upserts batches keyed by reconciliation identity,
//!   collapsing repeated extractions of the same logical record;
//! - the [`reconcile`] module removes rows that genuinely no longer exist
//!   upstream, under guards that make a transient outage unable to delete
//!   anything;
//! - the [`view`] module derives a deduplicated, fully-covering aggregation
//!   over the allocation and usage streams, so every actor appears exactly
//!   once regardless of which stream mentions them.

pub mod config;
pub mod engine;
pub mod extract;
pub mod keys;
pub mod merge;
pub mod model;
pub mod persistence;
pub mod reconcile;
pub mod source_http;
pub mod store;
pub mod temporal;
pub mod view;
pub mod watermark;

// Re-export main types for convenience
pub use config::SyncConfig;
pub use engine::{JobMode, JobRequest, RunOutcome, RunReport, SyncEngine};
pub use extract::{FetchOutcome, RecordSource, SourceError};
pub use keys::{KeyField, KeyPolicy, ReconciliationKey};
pub use model::{ActorId, EntityId, SourceRecord, StreamKind, TargetRecord};
pub use persistence::PersistentStore;
pub use reconcile::ReconcileOutcome;
pub use store::{MemoryStore, StoreMetrics, TargetStore};
pub use temporal::{Instant, Interval};
pub use view::{AllocationStatus, BudgetSource, CoverageReport, CoverageRow};
pub use watermark::{ExtractionWatermark, WatermarkFlag};
