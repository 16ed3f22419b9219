//! # Temporal Module
//!
//! Extraction windows as half-open intervals over UTC epoch seconds.
//! All times are normalized to UTC; the engine never works in local time.

use serde::{Deserialize, Serialize};
use std::cmp::{max, min, Ordering};
use std::fmt;
use time::OffsetDateTime;

/// Represents a temporal instant as UTC epoch seconds
/// Using i64 to support both past and future times, and to avoid floating point issues
pub type Instant = i64;

/// Special sentinel values for open-ended windows
pub const NEG_INF: Instant = i64::MIN;
pub const POS_INF: Instant = i64::MAX;

/// A temporal window [start, end) where start < end
///
/// Windows are half-open: the start time is inclusive, the end time is exclusive.
/// This ensures that consecutive extraction windows [t0, t1) and [t1, t2) cover
/// every record exactly once with no gap and no double-pull at the seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// Start time (inclusive)
    pub start: Instant,
    /// End time (exclusive)
    pub end: Instant,
}

impl Interval {
    /// Create a new window with validation
    ///
    /// # Errors
    /// Returns an error if start >= end (zero-length windows are not allowed)
    pub fn new(start: Instant, end: Instant) -> anyhow::Result<Self> {
        if start >= end {
            anyhow::bail!(
                "Invalid window: start ({}) must be less than end ({})",
                start,
                end
            );
        }
        Ok(Self { start, end })
    }

    /// Create a window from UTC OffsetDateTime instances
    pub fn from_utc_datetimes(start: OffsetDateTime, end: OffsetDateTime) -> anyhow::Result<Self> {
        Self::new(start.unix_timestamp(), end.unix_timestamp())
    }

    /// Create an open-ended window starting from a specific time
    pub fn from_start(start: Instant) -> Self {
        Self {
            start,
            end: POS_INF,
        }
    }

    /// Create a window that covers all time, used by full-reload jobs
    pub fn all_time() -> Self {
        Self {
            start: NEG_INF,
            end: POS_INF,
        }
    }

    /// Check if this window contains a specific instant
    pub fn contains(&self, instant: Instant) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Get the duration of this window in seconds
    /// Returns None for windows with infinite endpoints
    pub fn duration(&self) -> Option<i64> {
        if self.start == NEG_INF || self.end == POS_INF {
            None
        } else {
            Some(self.end - self.start)
        }
    }

    /// Check if this window is finite (has both start and end defined)
    pub fn is_finite(&self) -> bool {
        self.start != NEG_INF && self.end != POS_INF
    }

    /// Clamp this window so it spans at most `max_span` seconds, keeping the start.
    ///
    /// Long catch-up windows after an outage are split across scheduled runs;
    /// the watermark left by each run moves the start forward.
    pub fn clamp_span(&self, max_span: i64) -> Self {
        if max_span <= 0 || !self.is_finite() {
            return *self;
        }
        match self.duration() {
            Some(d) if d > max_span => Self {
                start: self.start,
                end: self.start + max_span,
            },
            _ => *self,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start_str = if self.start == NEG_INF {
            "(-∞".to_string()
        } else {
            format!("[{}", self.start)
        };

        let end_str = if self.end == POS_INF {
            "+∞)".to_string()
        } else {
            format!("{})", self.end)
        };

        write!(f, "{}, {}", start_str, end_str)
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.start.cmp(&other.start) {
            Ordering::Equal => self.end.cmp(&other.end),
            ordering => ordering,
        }
    }
}

/// Check if two windows overlap
#[inline]
pub fn is_overlapping(a: &Interval, b: &Interval) -> bool {
    // Half-open windows overlap unless one ends at or before the other's start.
    a.start < b.end && b.start < a.end
}

/// Compute the intersection of two windows
/// Returns None if the windows don't overlap
pub fn intersect(a: &Interval, b: &Interval) -> Option<Interval> {
    let start = max(a.start, b.start);
    let end = min(a.end, b.end);

    if start < end {
        Some(Interval { start, end })
    } else {
        None
    }
}

/// Check if a window encloses another (i.e., completely contains it).
/// A window A encloses B if A.start <= B.start and A.end >= B.end.
#[inline]
pub fn encloses(outer: &Interval, inner: &Interval) -> bool {
    outer.start <= inner.start && outer.end >= inner.end
}

/// Parse a source-supplied timestamp into an epoch-second instant.
///
/// Sources are inconsistent about timestamp encodings: some send epoch
/// seconds as a JSON number, some send RFC 3339 strings. Anything else is
/// rejected at the extraction boundary.
pub fn parse_instant(raw: &serde_json::Value) -> Option<Instant> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => {
            OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
                .ok()
                .map(|dt| dt.unix_timestamp())
        }
        _ => None,
    }
}
