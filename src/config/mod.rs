//! Unified configuration system for worksync jobs.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (worksync.toml)
//! ```toml
//! [source]
//! base_url = "https://tracker.example.com/api"
//! page_size = 500
//!
//! [storage]
//! data_dir = "/var/lib/worksync"
//!
//! [run]
//! time_budget_secs = 540
//! ```

mod defaults;

pub use defaults::*;

use crate::view::ViewOptions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for worksync jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source system connection
    pub source: SourceConfig,
    /// Target-store storage tuning
    pub storage: StorageConfig,
    /// Per-run budgets and windowing
    pub run: RunConfig,
    /// Table names for the synced streams
    pub tables: TablesConfig,
    /// Aggregation view tuning
    pub view: ViewConfig,
}

impl SyncConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(SyncConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with WORKSYNC_ prefix
        figment = figment.merge(Env::prefixed("WORKSYNC_").split("_"));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// Source system connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the source system's query API
    pub base_url: String,
    /// Bearer token presented to the source, if it requires one
    pub bearer_token: Option<String>,
    /// Rows per page for paginated extraction
    pub page_size: u64,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            bearer_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: DEFAULT_SOURCE_TIMEOUT_SECS,
        }
    }
}

/// Target-store storage configuration (advanced).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory for the persistent store; in-memory when unset
    pub data_dir: Option<PathBuf>,
    /// Block cache size in MB
    pub block_cache_mb: usize,
    /// Write buffer size in MB
    pub write_buffer_mb: usize,
    /// Maximum number of background compaction threads
    pub max_background_jobs: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            block_cache_mb: DEFAULT_BLOCK_CACHE_MB,
            write_buffer_mb: DEFAULT_WRITE_BUFFER_MB,
            max_background_jobs: DEFAULT_BACKGROUND_JOBS,
        }
    }
}

/// Per-run budgets and window sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock budget per run in seconds; the run exits cleanly after
    /// the in-flight batch once exceeded
    pub time_budget_secs: u64,
    /// Lookback from now for a first run with no watermark (seconds)
    pub lookback_secs: i64,
    /// Maximum window span one run will cover (seconds)
    pub max_window_secs: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: DEFAULT_TIME_BUDGET_SECS,
            lookback_secs: DEFAULT_LOOKBACK_SECS,
            max_window_secs: DEFAULT_MAX_WINDOW_SECS,
        }
    }
}

/// Table names for the synced streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub allocations: String,
    pub usage: String,
    pub entities: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            allocations: DEFAULT_ALLOCATIONS_TABLE.to_string(),
            usage: DEFAULT_USAGE_TABLE.to_string(),
            entities: DEFAULT_ENTITIES_TABLE.to_string(),
        }
    }
}

/// Aggregation view configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Synthesize proportional fallback allocations where no actor-level
    /// allocation data exists
    pub enable_fallback: bool,
    /// Utilization ratio that classifies as approaching the limit
    pub approaching_limit_ratio: f64,
    /// Tolerated divergence between actor sums and declared totals (minutes)
    pub inconsistency_tolerance_minutes: i64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            approaching_limit_ratio: DEFAULT_APPROACHING_LIMIT_RATIO,
            inconsistency_tolerance_minutes: DEFAULT_INCONSISTENCY_TOLERANCE_MINUTES,
        }
    }
}

impl ViewConfig {
    pub fn to_options(&self) -> ViewOptions {
        ViewOptions {
            enable_fallback: self.enable_fallback,
            approaching_limit_ratio: self.approaching_limit_ratio,
            inconsistency_tolerance_minutes: self.inconsistency_tolerance_minutes,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_window_secs: Option<i64>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
