// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! On-disk manifest describing one camera's archive.
//!
//! The manifest is a pure function of the camera's outcomes: it carries no
//! wall-clock fields and every list is sorted, so the same outcomes always
//! serialize to the same bytes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{format_epoch, FailureKind, TimeWindow};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Whole window covered, nothing failed.
    Complete,
    /// Some footage archived, with gaps or failures.
    Partial,
    /// The source had no footage in the window.
    Empty,
    /// Footage existed but none of it could be fetched.
    Failed,
    /// The camera's segment listing could not be obtained.
    ListingUnavailable,
}

impl ArchiveStatus {
    /// Whether the archive holds any footage worth keeping.
    pub fn is_usable(self) -> bool {
        matches!(self, ArchiveStatus::Complete | ArchiveStatus::Partial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapCause {
    /// No segment was ever reported for the range.
    NoFootage,
    /// Segments existed but their transfer failed.
    FetchFailed,
    ListingUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub start: i64,
    pub end: i64,
    pub start_utc: String,
    pub end_utc: String,
}

impl From<&TimeWindow> for WindowEntry {
    fn from(w: &TimeWindow) -> Self {
        Self {
            start: w.start(),
            end: w.end(),
            start_utc: format_epoch(w.start()),
            end_utc: format_epoch(w.end()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub file: String,
    pub start: i64,
    pub end: i64,
    pub bytes: u64,
    /// Seconds of fetched footage before the window start.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub trimmed_head: u64,
    /// Seconds of fetched footage after the window end.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub trimmed_tail: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapEntry {
    pub start: i64,
    pub end: i64,
    pub cause: GapCause,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub start: i64,
    pub end: i64,
    pub kind: FailureKind,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: u64,
    pub missing_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub camera_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_name: Option<String>,
    pub window: WindowEntry,
    pub status: ArchiveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stitched_file: Option<String>,
    pub segments: Vec<SegmentEntry>,
    pub gaps: Vec<GapEntry>,
    pub failures: Vec<FailureEntry>,
    pub totals: Totals,
}

impl Manifest {
    /// Canonical serialized form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Read `manifest.json` from a camera directory.
    pub fn load(camera_dir: &Path) -> Result<Self> {
        let raw = std::fs::read(camera_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}
