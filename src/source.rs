// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Seams to the outside world: where footage comes from and which cameras a
//! run targets.
//!
//! The pipeline only ever talks to these traits. The Rhombus HTTP client
//! implements both; tests plug in in-memory sources.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SourceError;
use crate::model::{Camera, SegmentDescriptor, TimeWindow};

/// Result of listing a camera's footage for a window.
#[derive(Debug, Clone, Default)]
pub struct SegmentListing {
    /// Segments in whatever order the source reports them.
    pub segments: Vec<SegmentDescriptor>,
    /// Stream initialization header (e.g. the fMP4 `moov` box), if the
    /// source uses one.
    pub init: Option<Bytes>,
}

/// Remote footage store: a vendor cloud API or a camera on the LAN.
#[async_trait]
pub trait FootageSource: Send + Sync {
    async fn list_segments(
        &self,
        camera: &Camera,
        window: &TimeWindow,
    ) -> Result<SegmentListing, SourceError>;

    async fn fetch_segment(&self, segment: &SegmentDescriptor) -> Result<Bytes, SourceError>;
}

/// Which cameras a run targets. Both filters apply when both are set; with
/// neither, every available camera is in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub location: Option<String>,
    pub camera: Option<String>,
}

impl Scope {
    pub fn camera(id: impl Into<String>) -> Self {
        Self { location: None, camera: Some(id.into()) }
    }

    pub fn location(id: impl Into<String>) -> Self {
        Self { location: Some(id.into()), camera: None }
    }

    /// Apply the filters to `available`. An id that matches nothing is a
    /// `ScopeNotFound`; filters that match individually but not together
    /// simply yield an empty set.
    pub fn select(&self, available: Vec<Camera>) -> Result<Vec<Camera>, SourceError> {
        if let Some(cam) = &self.camera {
            if !available.iter().any(|c| &c.id == cam) {
                return Err(SourceError::ScopeNotFound(cam.clone()));
            }
        }
        if let Some(loc) = &self.location {
            if !available.iter().any(|c| c.location_id.as_ref() == Some(loc)) {
                return Err(SourceError::ScopeNotFound(loc.clone()));
            }
        }
        Ok(available
            .into_iter()
            .filter(|c| self.camera.as_ref().map_or(true, |id| &c.id == id))
            .filter(|c| {
                self.location
                    .as_ref()
                    .map_or(true, |loc| c.location_id.as_ref() == Some(loc))
            })
            .collect())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.location, &self.camera) {
            (None, None) => f.write_str("all cameras"),
            (Some(l), None) => write!(f, "location {l}"),
            (None, Some(c)) => write!(f, "camera {c}"),
            (Some(l), Some(c)) => write!(f, "camera {c} at location {l}"),
        }
    }
}

/// Turns a [`Scope`] into the concrete camera list for a run.
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    async fn resolve(&self, scope: &Scope) -> Result<Vec<Camera>, SourceError>;
}

/// Scope resolution against a fixed camera list (the `[[cameras]]` table of
/// the config file).
#[derive(Debug, Clone, Default)]
pub struct StaticScope {
    cameras: Vec<Camera>,
}

impl StaticScope {
    pub fn new(cameras: Vec<Camera>) -> Self {
        Self { cameras }
    }
}

#[async_trait]
impl ScopeResolver for StaticScope {
    async fn resolve(&self, scope: &Scope) -> Result<Vec<Camera>, SourceError> {
        scope.select(self.cameras.clone())
    }
}
