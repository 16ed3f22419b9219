//! Default constants for worksync configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Source Defaults
// =============================================================================

/// Default page size for paginated extraction
pub const DEFAULT_PAGE_SIZE: u64 = 500;

/// Default per-request timeout against the source system (seconds)
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Run Defaults
// =============================================================================

/// Default wall-clock budget for one run (seconds).
/// Kept under the external execution-time ceiling so a run exits cleanly
/// after the in-flight batch instead of being killed mid-write.
pub const DEFAULT_TIME_BUDGET_SECS: u64 = 540;

/// Default lookback from now for a first run with no watermark (seconds)
pub const DEFAULT_LOOKBACK_SECS: i64 = 14 * 86_400;

/// Maximum window span one run will cover (seconds).
/// Catch-up after an outage is spread across scheduled runs.
pub const DEFAULT_MAX_WINDOW_SECS: i64 = 90 * 86_400;

// =============================================================================
// Storage Defaults (RocksDB)
// =============================================================================

/// Default block cache size in MB
pub const DEFAULT_BLOCK_CACHE_MB: usize = 128;

/// Default write buffer size in MB
pub const DEFAULT_WRITE_BUFFER_MB: usize = 64;

/// Default number of background compaction jobs
pub const DEFAULT_BACKGROUND_JOBS: usize = 2;

/// Default capacity of the persistent store's row read cache
pub const DEFAULT_ROW_CACHE_CAPACITY: usize = 100_000;

// =============================================================================
// Table Defaults
// =============================================================================

/// Default table name for the allocation stream
pub const DEFAULT_ALLOCATIONS_TABLE: &str = "allocations";

/// Default table name for the usage stream
pub const DEFAULT_USAGE_TABLE: &str = "usage";

/// Default table name for the entity reference dimension
pub const DEFAULT_ENTITIES_TABLE: &str = "entities";

// =============================================================================
// View Defaults
// =============================================================================

/// Utilization ratio at which an actor is flagged as approaching the limit
pub const DEFAULT_APPROACHING_LIMIT_RATIO: f64 = 0.80;

/// Divergence (minutes) between actor-level sums and the declared entity
/// total tolerated before a data-quality finding is reported
pub const DEFAULT_INCONSISTENCY_TOLERANCE_MINUTES: i64 = 60;
