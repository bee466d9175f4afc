// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segment catalog: what footage exists for a camera inside the window.
//!
//! Listings are fetched under their own retry policy and then normalized:
//! segments outside the window are dropped, repeated start times are
//! collapsed onto the first report, and partial overlaps are clipped to the
//! window. Clipping is logical only; the full segment is still fetched.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::model::{Camera, SegmentDescriptor, TimeWindow};
use crate::retry::RetryPolicy;
use crate::source::FootageSource;

/// Normalized listing for one camera.
#[derive(Debug, Clone)]
pub struct CameraCatalog {
    pub camera: Camera,
    pub segments: Vec<SegmentDescriptor>,
    pub init: Option<Bytes>,
}

pub struct CatalogResolver {
    source: Arc<dyn FootageSource>,
    policy: RetryPolicy,
}

impl CatalogResolver {
    pub fn new(source: Arc<dyn FootageSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// List and normalize `camera`'s segments in `window`. An empty result
    /// is a valid answer; only a listing that cannot be obtained is an error.
    pub async fn resolve(
        &self,
        camera: &Camera,
        window: &TimeWindow,
    ) -> Result<CameraCatalog, CatalogError> {
        let source = &self.source;
        let outcome = self
            .policy
            .run(
                move |attempt| {
                    debug!(camera = camera.id, attempt, "Listing segments");
                    source.list_segments(camera, window)
                },
                move |e| {
                    warn!(camera = camera.id, error = %e, "Segment listing failed");
                    e.is_retryable()
                },
            )
            .await;

        let listing = outcome.result.map_err(|source| CatalogError {
            camera: camera.id.clone(),
            attempts: outcome.attempts,
            source,
        })?;

        let reported = listing.segments.len();
        let segments = normalize(&camera.id, window, listing.segments);
        info!(
            camera = camera.id,
            reported,
            in_window = segments.len(),
            init = listing.init.is_some(),
            "Catalog resolved"
        );

        Ok(CameraCatalog { camera: camera.clone(), segments, init: listing.init })
    }
}

/// Drop foreign, malformed, duplicate and out-of-window descriptors and clip
/// the rest to `window`. Source order is preserved.
pub fn normalize(
    camera_id: &str,
    window: &TimeWindow,
    raw: Vec<SegmentDescriptor>,
) -> Vec<SegmentDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for mut seg in raw {
        if seg.camera_id != camera_id {
            warn!(camera = camera_id, other = seg.camera_id, "Listing returned a foreign segment");
            continue;
        }
        if seg.reported_end <= seg.reported_start {
            warn!(
                camera = camera_id,
                start = seg.reported_start,
                end = seg.reported_end,
                "Ignoring segment with empty range"
            );
            continue;
        }
        if !seen.insert(seg.reported_start) {
            debug!(camera = camera_id, start = seg.reported_start, "Duplicate segment start dropped");
            continue;
        }
        let Some((start, end)) = window.clip(seg.reported_start, seg.reported_end) else {
            continue;
        };
        seg.start = start;
        seg.end = end;
        out.push(seg);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::SegmentListing;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn seg(start: i64, end: i64) -> SegmentDescriptor {
        SegmentDescriptor::new("cam", start, end, format!("s{start}"))
    }

    #[test]
    fn clips_dedups_and_drops() {
        let w = TimeWindow::new(1000, 300).unwrap();
        let raw = vec![
            seg(900, 1050),
            seg(1100, 1200),
            seg(1100, 1150),
            seg(1250, 1350),
            seg(1400, 1500),
            seg(1200, 1200),
            SegmentDescriptor::new("other", 1000, 1100, "x"),
        ];
        let out = normalize("cam", &w, raw);
        let ranges: Vec<_> = out.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, [(1000, 1050), (1100, 1200), (1250, 1300)]);
        assert_eq!(out[0].reported_start, 900);
        assert_eq!(out[1].locator, "s1100");
        assert_eq!(out[2].trimmed_tail(), 50);
    }

    struct FlakyListing {
        failures_left: Mutex<u32>,
        error: SourceError,
    }

    #[async_trait]
    impl FootageSource for FlakyListing {
        async fn list_segments(
            &self,
            _camera: &Camera,
            _window: &TimeWindow,
        ) -> Result<SegmentListing, SourceError> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(self.error.clone());
            }
            Ok(SegmentListing { segments: vec![seg(1000, 1100)], init: None })
        }

        async fn fetch_segment(&self, _segment: &SegmentDescriptor) -> Result<Bytes, SourceError> {
            unreachable!("catalog never fetches segment bytes")
        }
    }

    fn resolver(failures: u32, error: SourceError) -> CatalogResolver {
        let source = Arc::new(FlakyListing { failures_left: Mutex::new(failures), error });
        CatalogResolver::new(source, RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)))
    }

    #[tokio::test]
    async fn retries_transient_listing_errors() {
        let r = resolver(2, SourceError::Timeout("slow".into()));
        let w = TimeWindow::new(1000, 300).unwrap();
        let cat = r.resolve(&Camera::new("cam"), &w).await.unwrap();
        assert_eq!(cat.segments.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_after_budget() {
        let r = resolver(5, SourceError::Network("reset".into()));
        let w = TimeWindow::new(1000, 300).unwrap();
        let err = r.resolve(&Camera::new("cam"), &w).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.camera, "cam");
    }

    #[tokio::test]
    async fn permanent_listing_error_fails_fast() {
        let r = resolver(5, SourceError::Unauthorized("revoked".into()));
        let w = TimeWindow::new(1000, 300).unwrap();
        assert_eq!(r.resolve(&Camera::new("cam"), &w).await.unwrap_err().attempts, 1);
    }
}
