// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Run controller: drives one archival run from scope resolution to the
//! final summary.
//!
//! ```text
//! ResolvingScope → ListingSegments → Downloading → Assembling → Done
//!        └───────────────┴──────────────→ Failed (setup errors only)
//! ```
//!
//! Downloading and assembling overlap: a camera is handed to the assembler
//! as soon as its last outcome arrives, while other cameras keep fetching.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembler::{ArchiveAssembler, CameraArchive};
use crate::catalog::CatalogResolver;
use crate::config::Config;
use crate::error::{Result as VaultResult, SetupError};
use crate::fetcher::{FetchJob, SegmentFetcher};
use crate::manifest::{ArchiveStatus, Manifest};
use crate::model::{Camera, FailureKind, FailureReason, FetchOutcome, FetchResult, SegmentDescriptor, TimeWindow};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::source::{FootageSource, Scope, ScopeResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ResolvingScope,
    ListingSegments,
    Downloading,
    Assembling,
    Done,
    Failed,
}

/// Shared, read-mostly view of the controller's current state.
#[derive(Debug, Clone)]
pub struct RunStateHandle(Arc<RwLock<RunState>>);

impl Default for RunStateHandle {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(RunState::Idle)))
    }
}

impl RunStateHandle {
    pub fn get(&self) -> RunState {
        *self.0.read()
    }

    fn set(&self, state: RunState) {
        let mut cur = self.0.write();
        debug!(from = ?*cur, to = ?state, "Run state changed");
        *cur = state;
    }
}

/// Result of archiving one camera.
#[derive(Debug, Clone)]
pub struct CameraReport {
    pub camera: Camera,
    pub dir: PathBuf,
    pub manifest: Option<Manifest>,
    /// Set when the archive could not be written.
    pub error: Option<String>,
}

impl CameraReport {
    pub fn status(&self) -> Option<ArchiveStatus> {
        self.manifest.as_ref().map(|m| m.status)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub cameras: Vec<CameraReport>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl RunSummary {
    fn new(cameras: Vec<CameraReport>, elapsed: Duration, cancelled: bool) -> Self {
        let totals = cameras.iter().filter_map(|c| c.manifest.as_ref()).map(|m| &m.totals);
        let (mut attempted, mut succeeded, mut failed, mut bytes) = (0, 0, 0, 0);
        for t in totals {
            attempted += t.attempted;
            succeeded += t.succeeded;
            failed += t.failed;
            bytes += t.bytes;
        }
        Self { cameras, attempted, succeeded, failed, bytes, elapsed, cancelled }
    }

    /// 0 when at least one camera produced usable footage, 1 otherwise.
    /// Only `complete` and `partial` count: a run whose cameras are all
    /// `empty` archived nothing and exits 1.
    pub fn exit_code(&self) -> i32 {
        let usable = self
            .cameras
            .iter()
            .any(|c| c.status().is_some_and(|s| s.is_usable()));
        if usable { 0 } else { 1 }
    }

    pub fn log(&self) {
        for report in &self.cameras {
            match (&report.manifest, &report.error) {
                (Some(m), _) => info!(
                    camera = report.camera.id,
                    name = report.camera.name.as_deref().unwrap_or(""),
                    status = ?m.status,
                    segments = m.totals.succeeded,
                    failed = m.totals.failed,
                    gaps = m.gaps.len(),
                    dir = ?report.dir,
                    "Camera summary"
                ),
                (None, err) => error!(
                    camera = report.camera.id,
                    error = err.as_deref().unwrap_or("unknown"),
                    "Camera archive not written"
                ),
            }
        }
        info!(
            cameras = self.cameras.len(),
            attempted = self.attempted,
            succeeded = self.succeeded,
            failed = self.failed,
            bytes = self.bytes,
            elapsed_secs = self.elapsed.as_secs_f64(),
            cancelled = self.cancelled,
            "Run finished"
        );
    }
}

/// Per-camera bookkeeping while downloads are in progress.
struct CameraSlot {
    archive: Option<CameraArchive>,
    /// Segments still waiting for an outcome, keyed by reported start.
    remaining: HashMap<i64, SegmentDescriptor>,
}

pub struct RunController {
    source: Arc<dyn FootageSource>,
    scopes: Arc<dyn ScopeResolver>,
    catalog: CatalogResolver,
    scheduler: Scheduler,
    assembler: ArchiveAssembler,
    fetch_policy: RetryPolicy,
    destination: PathBuf,
    listing_concurrency: usize,
    state: RunStateHandle,
}

impl RunController {
    pub fn new(source: Arc<dyn FootageSource>, scopes: Arc<dyn ScopeResolver>, config: &Config) -> Self {
        let a = &config.archive;
        Self {
            catalog: CatalogResolver::new(source.clone(), config.catalog_policy()),
            scheduler: Scheduler::new(a.max_concurrency, a.outcome_buffer, Duration::from_secs(a.cancel_grace_secs)),
            assembler: ArchiveAssembler::new(a.gap_tolerance_secs, a.stitch),
            fetch_policy: config.fetch_policy(),
            destination: a.destination.clone(),
            listing_concurrency: a.max_concurrency.max(1),
            source,
            scopes,
            state: RunStateHandle::default(),
        }
    }

    pub fn state(&self) -> RunStateHandle {
        self.state.clone()
    }

    /// Archive every camera in `scope` for `window`. Only setup failures are
    /// errors; per-camera problems end up in the summary.
    pub async fn run(
        &self,
        scope: &Scope,
        window: TimeWindow,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SetupError> {
        let started = Instant::now();
        info!(%scope, %window, destination = ?self.destination, "Starting archival run");

        match self.execute(scope, window, &cancel).await {
            Ok(reports) => {
                let summary = RunSummary::new(reports, started.elapsed(), cancel.is_cancelled());
                self.state.set(RunState::Done);
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, "Run aborted during setup");
                self.state.set(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        scope: &Scope,
        window: TimeWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CameraReport>, SetupError> {
        self.state.set(RunState::ResolvingScope);
        let cameras = self.scopes.resolve(scope).await?;
        if cameras.is_empty() {
            return Err(SetupError::EmptyScope);
        }
        info!(cameras = cameras.len(), "Scope resolved");

        let dirs = self.prepare_dirs(&cameras)?;

        self.state.set(RunState::ListingSegments);
        let catalog = &self.catalog;
        let window_ref = &window;
        let mut listings: Vec<_> = stream::iter(cameras.iter().enumerate())
            .map(|(idx, camera)| async move { (idx, catalog.resolve(camera, window_ref).await) })
            .buffer_unordered(self.listing_concurrency)
            .collect()
            .await;
        listings.sort_by_key(|(idx, _)| *idx);

        let mut slots = Vec::with_capacity(cameras.len());
        let mut by_camera = HashMap::new();
        let mut jobs = Vec::new();
        for ((idx, listing), dir) in listings.into_iter().zip(&dirs) {
            let camera = &cameras[idx];
            let mut archive = CameraArchive::new(camera.clone(), window, dir.clone());
            let mut remaining = HashMap::new();
            match listing {
                Ok(catalog) => {
                    archive.init = catalog.init;
                    let camera_dir = Arc::new(dir.clone());
                    for descriptor in catalog.segments {
                        remaining.insert(descriptor.reported_start, descriptor.clone());
                        jobs.push(FetchJob { descriptor, camera_dir: camera_dir.clone() });
                    }
                }
                Err(e) => {
                    warn!(camera = camera.id, attempts = e.attempts, error = %e.source, "Listing unavailable");
                    archive.listing_error = Some(e.source.to_string());
                }
            }
            by_camera.insert(camera.id.clone(), idx);
            slots.push(CameraSlot { archive: Some(archive), remaining });
        }

        self.state.set(RunState::Downloading);
        let mut assembly: Vec<(usize, JoinHandle<VaultResult<Manifest>>)> = Vec::new();
        for (idx, slot) in slots.iter_mut().enumerate() {
            if slot.remaining.is_empty() {
                if let Some(archive) = slot.archive.take() {
                    assembly.push((idx, self.spawn_assembly(archive)));
                }
            }
        }

        let fetcher = Arc::new(SegmentFetcher::new(self.source.clone(), self.fetch_policy.clone(), cancel.clone()));
        let mut run = self.scheduler.run(jobs, fetcher, cancel.clone());
        while let Some(outcome) = run.outcomes.next().await {
            let Some(&idx) = by_camera.get(&outcome.descriptor.camera_id) else {
                warn!(camera = outcome.descriptor.camera_id, "Outcome for unknown camera ignored");
                continue;
            };
            if let Some(handle) = self.route(&mut slots[idx], outcome) {
                assembly.push((idx, handle));
            }
        }
        debug!(
            dispatched = run.stats.dispatched(),
            drained = run.stats.drained(),
            peak = run.stats.peak(),
            "Outcome stream closed"
        );

        // Workers that died without reporting still owe an outcome per job.
        for (idx, slot) in slots.iter_mut().enumerate() {
            let missing: Vec<_> = slot.remaining.drain().map(|(_, d)| d).collect();
            if missing.is_empty() {
                continue;
            }
            if let Some(mut archive) = slot.archive.take() {
                warn!(camera = archive.camera.id, missing = missing.len(), "Segments finished without an outcome");
                archive.outcomes.extend(missing.into_iter().map(|descriptor| FetchOutcome {
                    descriptor,
                    result: FetchResult::Failed {
                        reason: FailureReason { kind: FailureKind::Cancelled, detail: "no outcome reported".into() },
                        attempts: 0,
                    },
                }));
                assembly.push((idx, self.spawn_assembly(archive)));
            }
        }

        self.state.set(RunState::Assembling);
        let mut manifests: Vec<Option<VaultResult<Manifest>>> = (0..cameras.len()).map(|_| None).collect();
        for (idx, handle) in assembly {
            manifests[idx] = Some(match handle.await {
                Ok(res) => res,
                Err(e) => Err(std::io::Error::other(format!("assembly task failed: {e}")).into()),
            });
        }

        Ok(cameras
            .into_iter()
            .zip(dirs)
            .zip(manifests)
            .map(|((camera, dir), res)| match res {
                Some(Ok(manifest)) => CameraReport { camera, dir, manifest: Some(manifest), error: None },
                Some(Err(e)) => {
                    error!(camera = camera.id, error = %e, "Assembly failed");
                    CameraReport { camera, dir, manifest: None, error: Some(e.to_string()) }
                }
                None => CameraReport { camera, dir, manifest: None, error: Some("never assembled".into()) },
            })
            .collect())
    }

    fn prepare_dirs(&self, cameras: &[Camera]) -> Result<Vec<PathBuf>, SetupError> {
        let mut dirs = Vec::with_capacity(cameras.len());
        for camera in cameras {
            let dir = self.destination.join(camera.archive_stem());
            std::fs::create_dir_all(&dir).map_err(|source| SetupError::Destination { path: dir.clone(), source })?;
            dirs.push(dir);
        }
        Ok(dirs)
    }

    /// Record `outcome` against its camera. Returns the assembly task once
    /// the camera has no outstanding segments.
    fn route(&self, slot: &mut CameraSlot, outcome: FetchOutcome) -> Option<JoinHandle<VaultResult<Manifest>>> {
        if slot.remaining.remove(&outcome.descriptor.reported_start).is_none() {
            debug!(
                camera = outcome.descriptor.camera_id,
                segment_start = outcome.descriptor.start,
                "Duplicate outcome ignored"
            );
            return None;
        }
        let archive = slot.archive.as_mut()?;
        archive.outcomes.push(outcome);
        if !slot.remaining.is_empty() {
            return None;
        }
        slot.archive.take().map(|archive| self.spawn_assembly(archive))
    }

    fn spawn_assembly(&self, archive: CameraArchive) -> JoinHandle<VaultResult<Manifest>> {
        debug!(camera = archive.camera.id, outcomes = archive.outcomes.len(), "Camera ready for assembly");
        let assembler = self.assembler.clone();
        tokio::task::spawn_blocking(move || assembler.assemble(&archive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Totals;

    fn report(status: Option<ArchiveStatus>) -> CameraReport {
        let window = TimeWindow::new(0, 10).unwrap();
        CameraReport {
            camera: Camera::new("c"),
            dir: PathBuf::from("/tmp/c"),
            manifest: status.map(|status| Manifest {
                version: 1,
                camera_id: "c".into(),
                camera_name: None,
                window: (&window).into(),
                status,
                listing_error: None,
                init_file: None,
                stitched_file: None,
                segments: vec![],
                gaps: vec![],
                failures: vec![],
                totals: Totals { attempted: 2, succeeded: 1, failed: 1, bytes: 7, missing_seconds: 0 },
            }),
            error: None,
        }
    }

    #[test]
    fn exit_code_requires_usable_footage() {
        let ok = RunSummary::new(
            vec![report(Some(ArchiveStatus::ListingUnavailable)), report(Some(ArchiveStatus::Partial))],
            Duration::ZERO,
            false,
        );
        assert_eq!(ok.exit_code(), 0);
        assert_eq!(ok.attempted, 4);
        assert_eq!(ok.bytes, 14);

        let bad = RunSummary::new(
            vec![report(Some(ArchiveStatus::Empty)), report(Some(ArchiveStatus::Failed)), report(None)],
            Duration::ZERO,
            false,
        );
        assert_eq!(bad.exit_code(), 1);
    }

    #[test]
    fn all_empty_cameras_exit_nonzero() {
        let quiet = RunSummary::new(
            vec![report(Some(ArchiveStatus::Empty)), report(Some(ArchiveStatus::Empty))],
            Duration::ZERO,
            false,
        );
        assert_eq!(quiet.exit_code(), 1);
        assert!(!ArchiveStatus::Empty.is_usable());
    }

    #[test]
    fn state_handle_is_shared() {
        let handle = RunStateHandle::default();
        let view = handle.clone();
        assert_eq!(view.get(), RunState::Idle);
        handle.set(RunState::Downloading);
        assert_eq!(view.get(), RunState::Downloading);
    }
}
