//! # Batch Extractor
//!
//! Paginated pull from the source system for a bounded time window. The
//! extraction is a lazy, finite, non-restartable sequence of record batches;
//! alongside the batches it accumulates the complete set of reconciliation
//! keys observed, which the reconciler later uses to find stale rows.
//!
//! Three fetch outcomes are kept strictly apart: rows, a legitimately empty
//! window, and a failed fetch. Conflating "failed" with "empty" is the root
//! cause the reconciliation guards exist to prevent.

use crate::keys::{KeyPolicy, ReconciliationKey};
use crate::model::SourceRecord;
use crate::temporal::{Instant, Interval};
use rustc_hash::FxHashSet;
use std::fmt;
use tracing::warn;

/// Failure talking to the source system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Connection-level failure: DNS, refused, reset
    Unreachable(String),
    /// The request exceeded its timeout
    Timeout(String),
    /// The source rejected our credentials
    Auth(String),
    /// The response arrived but could not be decoded
    BadPayload(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unreachable(detail) => write!(f, "source unreachable: {}", detail),
            SourceError::Timeout(detail) => write!(f, "source timed out: {}", detail),
            SourceError::Auth(detail) => write!(f, "source rejected credentials: {}", detail),
            SourceError::BadPayload(detail) => write!(f, "undecodable source payload: {}", detail),
        }
    }
}

impl std::error::Error for SourceError {}

/// One page of raw rows from the source
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<serde_json::Value>,
    /// Whether the source reports more rows past this page
    pub has_more: bool,
}

/// Result of the row-count/reachability probe, used only by the
/// empty-window safety check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceProbe {
    /// Total rows the source holds for the probed window
    pub row_count: u64,
}

/// The source-system boundary: a paginated query interface plus a
/// row-count probe. Implementations perform network I/O and nothing else;
/// the source never mutates the target store.
pub trait RecordSource {
    fn fetch_page(
        &mut self,
        window: Interval,
        offset: u64,
        limit: u64,
    ) -> Result<Page, SourceError>;

    fn probe(&mut self, window: Interval) -> Result<SourceProbe, SourceError>;
}

/// How the extraction of one window ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Successful fetch with N >= 1 rows
    Rows(u64),
    /// Successful fetch, zero rows: the window may legitimately be empty
    Empty,
    /// The fetch failed; nothing can be said about the window's content
    Failed(SourceError),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, FetchOutcome::Failed(_))
    }
}

/// Everything known about a window once its extraction sequence is exhausted
#[derive(Debug)]
pub struct WindowExtract {
    pub window: Interval,
    pub outcome: FetchOutcome,
    /// Every reconciliation key observed across all pages
    pub keys: FxHashSet<ReconciliationKey>,
    /// Parsed rows yielded across all pages
    pub rows: u64,
    /// Malformed rows dropped at the boundary
    pub dropped_malformed: u64,
}

enum ExtractionState {
    Active,
    Done,
    Failed(SourceError),
}

/// A lazy, finite, non-restartable extraction of one window.
///
/// Drive it with [`Extraction::next_batch`] until it returns `None`, then
/// take the key set and outcome from [`Extraction::finish`]. The sequence
/// cannot be rewound; a retry is a new extraction.
pub struct Extraction<'a> {
    source: &'a mut dyn RecordSource,
    policy: &'a KeyPolicy,
    window: Interval,
    page_size: u64,
    extracted_at: Instant,
    offset: u64,
    keys: FxHashSet<ReconciliationKey>,
    rows: u64,
    dropped_malformed: u64,
    state: ExtractionState,
}

impl<'a> Extraction<'a> {
    pub fn begin(
        source: &'a mut dyn RecordSource,
        policy: &'a KeyPolicy,
        window: Interval,
        page_size: u64,
        extracted_at: Instant,
    ) -> Self {
        Self {
            source,
            policy,
            window,
            page_size: page_size.max(1),
            extracted_at,
            offset: 0,
            keys: FxHashSet::default(),
            rows: 0,
            dropped_malformed: 0,
            state: ExtractionState::Active,
        }
    }

    /// Pull and parse the next page. Returns `None` once the source reports
    /// no more rows or the fetch fails; which of the two happened is
    /// recorded in the final [`WindowExtract`].
    pub fn next_batch(&mut self) -> Option<Vec<SourceRecord>> {
        if !matches!(self.state, ExtractionState::Active) {
            return None;
        }

        let page = match self.source.fetch_page(self.window, self.offset, self.page_size) {
            Ok(page) => page,
            Err(err) => {
                warn!(window = %self.window, offset = self.offset, error = %err,
                    "page fetch failed, extraction abandoned");
                self.state = ExtractionState::Failed(err);
                return None;
            }
        };

        self.offset += page.rows.len() as u64;
        if !page.has_more {
            self.state = ExtractionState::Done;
        }

        let mut batch = Vec::with_capacity(page.rows.len());
        for (position, raw) in page.rows.iter().enumerate() {
            match SourceRecord::from_raw(raw, self.extracted_at) {
                Ok(record) => {
                    self.keys.insert(self.policy.key_for(&record));
                    batch.push(record);
                }
                Err(rejection) => {
                    self.dropped_malformed += 1;
                    warn!(window = %self.window, position, reason = %rejection,
                        "dropped malformed source row");
                }
            }
        }
        self.rows += batch.len() as u64;

        if batch.is_empty() && matches!(self.state, ExtractionState::Done) && self.rows == 0 {
            // A single empty page: let finish() classify the window
            return None;
        }
        Some(batch)
    }

    pub fn finish(self) -> WindowExtract {
        let outcome = match self.state {
            ExtractionState::Failed(err) => FetchOutcome::Failed(err),
            _ if self.rows == 0 && self.dropped_malformed == 0 => FetchOutcome::Empty,
            _ => FetchOutcome::Rows(self.rows),
        };
        WindowExtract {
            window: self.window,
            outcome,
            keys: self.keys,
            rows: self.rows,
            dropped_malformed: self.dropped_malformed,
        }
    }
}
