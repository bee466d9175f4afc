// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Core data model shared by every pipeline stage.
//!
//! All timestamps are unix epoch seconds. Ranges are half-open: `[start, end)`.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, SetupError};

/// A camera in scope for a run. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
}

impl Camera {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), name: None, location_id: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location_id = Some(location.into());
        self
    }

    /// Directory / file stem: alphanumeric display name followed by the id.
    pub fn archive_stem(&self) -> String {
        let id: String = self
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let name: String = self
            .name
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if name.is_empty() {
            id
        } else {
            format!("{name}_{id}")
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Requested footage range `[start, start + duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: i64,
    duration: u64,
}

impl TimeWindow {
    pub fn new(start: i64, duration: u64) -> Result<Self, SetupError> {
        if duration == 0 {
            return Err(SetupError::InvalidWindow("duration must be > 0".into()));
        }
        if start < 0 {
            return Err(SetupError::InvalidWindow(format!("start {start} is before the epoch")));
        }
        start
            .checked_add_unsigned(duration)
            .ok_or_else(|| SetupError::InvalidWindow("window end overflows".into()))?;
        Ok(Self { start, duration })
    }

    /// The hour ending at `now`.
    pub fn last_hour(now: DateTime<Utc>) -> Self {
        Self { start: now.timestamp() - 3600, duration: 3600 }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn end(&self) -> i64 {
        self.start + self.duration as i64
    }

    pub fn contains(&self, t: i64) -> bool {
        t >= self.start && t < self.end()
    }

    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        start < self.end() && end > self.start
    }

    /// Intersect `[start, end)` with the window. `None` if they do not overlap.
    pub fn clip(&self, start: i64, end: i64) -> Option<(i64, i64)> {
        if !self.overlaps(start, end) {
            return None;
        }
        Some((start.max(self.start), end.min(self.end())))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} — {})", format_epoch(self.start), format_epoch(self.end()))
    }
}

/// RFC 3339 rendering of an epoch timestamp, used in logs and manifests.
pub fn format_epoch(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

/// One footage segment as listed by the catalog, normalized to the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub camera_id: String,
    /// Start clipped to the requested window.
    pub start: i64,
    /// End clipped to the requested window.
    pub end: i64,
    /// Range as reported by the source, before clipping.
    pub reported_start: i64,
    pub reported_end: i64,
    /// Opaque token the source needs to fetch the bytes.
    pub locator: String,
    pub expected_size: Option<u64>,
}

impl SegmentDescriptor {
    /// Unclipped descriptor, as a source reports it.
    pub fn new(camera_id: impl Into<String>, start: i64, end: i64, locator: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            start,
            end,
            reported_start: start,
            reported_end: end,
            locator: locator.into(),
            expected_size: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Unique per camera once the catalog has deduplicated reported starts.
    pub fn file_name(&self) -> String {
        format!("seg_{}_{}.m4v", self.reported_start, self.reported_end)
    }

    /// Seconds fetched before the window start.
    pub fn trimmed_head(&self) -> u64 {
        (self.start - self.reported_start).max(0) as u64
    }

    /// Seconds fetched past the window end.
    pub fn trimmed_tail(&self) -> u64 {
        (self.reported_end - self.end).max(0) as u64
    }
}

/// Why a segment ended up without a local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failures on every attempt.
    Exhausted,
    /// Non-retryable remote or local error.
    Permanent,
    /// Run was cancelled before the transfer completed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub detail: String,
}

impl FailureReason {
    pub fn cancelled() -> Self {
        Self { kind: FailureKind::Cancelled, detail: "run cancelled".into() }
    }

    /// Classify the last error seen for a segment.
    pub fn from_error(err: &FetchError) -> Self {
        let kind = if matches!(err, FetchError::Cancelled) {
            FailureKind::Cancelled
        } else if err.is_retryable() {
            FailureKind::Exhausted
        } else {
            FailureKind::Permanent
        };
        Self { kind, detail: err.to_string() }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success { path: PathBuf, bytes: u64, attempts: u32 },
    Failed { reason: FailureReason, attempts: u32 },
}

/// Terminal state of one segment job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub descriptor: SegmentDescriptor,
    pub result: FetchResult,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, FetchResult::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self.result {
            FetchResult::Success { attempts, .. } | FetchResult::Failed { attempts, .. } => attempts,
        }
    }
}
