//! # Extraction Watermarks
//!
//! The recorded boundary of the last extraction per table. The watermark is
//! an explicit value threaded through the pipeline and persisted by the
//! store; there is no process-global "last sync date".

use crate::temporal::{Instant, Interval};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the watermark's window ended.
///
/// "Zero rows returned" and "fetch failed" are separate variants by
/// construction; downstream code cannot conflate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkFlag {
    /// The window was pulled successfully and yielded this many rows
    RowsExtracted(u64),
    /// The window returned zero rows and the source confirmed it is empty
    VerifiedEmpty,
    /// The fetch failed; the window was not covered
    FetchFailed,
    /// The run stopped early (time budget or mid-pagination failure) after
    /// merging this many rows; the window must be re-pulled
    Partial(u64),
}

impl fmt::Display for WatermarkFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkFlag::RowsExtracted(n) => write!(f, "rows-extracted({})", n),
            WatermarkFlag::VerifiedEmpty => write!(f, "verified-empty"),
            WatermarkFlag::FetchFailed => write!(f, "fetch-failed"),
            WatermarkFlag::Partial(n) => write!(f, "partial({})", n),
        }
    }
}

/// The (start, end) bounds of the window most recently pulled for one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionWatermark {
    pub window: Interval,
    /// When the run that wrote this watermark finished
    pub completed_at: Instant,
    pub flag: WatermarkFlag,
}

impl ExtractionWatermark {
    pub fn new(window: Interval, completed_at: Instant, flag: WatermarkFlag) -> Self {
        Self {
            window,
            completed_at,
            flag,
        }
    }

    /// Whether the window this watermark covers was fully processed
    pub fn is_complete(&self) -> bool {
        matches!(
            self.flag,
            WatermarkFlag::RowsExtracted(_) | WatermarkFlag::VerifiedEmpty
        )
    }

    /// Where the next scheduled run should start extracting.
    ///
    /// A complete window advances the boundary to its end; a failed or
    /// partial window is re-pulled from its start (the merge side is
    /// idempotent, so overlap is safe).
    pub fn resume_start(&self) -> Instant {
        if self.is_complete() {
            self.window.end
        } else {
            self.window.start
        }
    }
}

impl fmt::Display for ExtractionWatermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.window, self.flag)
    }
}
