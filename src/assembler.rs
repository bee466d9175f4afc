// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Archive assembler: turns a camera's terminal outcomes into a finished
//! archive directory.
//!
//! ```text
//! <destination>/<Name>_<uuid>/
//!   seg_<start>_<end>.m4v ...      fetched segments
//!   init.mp4                       stream header, when the source has one
//!   <Name>_<uuid>_<start>_video.mp4  init + segments in order (stitch = true)
//!   manifest.json
//! ```
//!
//! Runs only once every job of the camera is terminal, and is safe to run
//! again over the same outcomes: output files are rewritten through a temp
//! file and skipped when already identical.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::fetcher::PARTIAL_DIR;
use crate::manifest::{
    ArchiveStatus, FailureEntry, GapCause, GapEntry, Manifest, SegmentEntry, Totals, WindowEntry,
    MANIFEST_FILE, MANIFEST_VERSION,
};
use crate::model::{Camera, FetchOutcome, FetchResult, TimeWindow};

pub const INIT_FILE: &str = "init.mp4";

/// Everything known about one camera once its jobs are terminal.
#[derive(Debug, Clone)]
pub struct CameraArchive {
    pub camera: Camera,
    pub window: TimeWindow,
    pub dir: PathBuf,
    pub init: Option<Bytes>,
    pub outcomes: Vec<FetchOutcome>,
    /// Set when the segment listing could not be obtained.
    pub listing_error: Option<String>,
}

impl CameraArchive {
    pub fn new(camera: Camera, window: TimeWindow, dir: PathBuf) -> Self {
        Self { camera, window, dir, init: None, outcomes: Vec::new(), listing_error: None }
    }

    pub fn stitched_name(&self) -> String {
        format!("{}_{}_video.mp4", self.camera.archive_stem(), self.window.start())
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveAssembler {
    gap_tolerance: u64,
    stitch: bool,
}

impl ArchiveAssembler {
    pub fn new(gap_tolerance: u64, stitch: bool) -> Self {
        Self { gap_tolerance, stitch }
    }

    /// Pure part of assembly: compute the manifest without touching disk.
    pub fn build_manifest(&self, archive: &CameraArchive) -> Manifest {
        let window = &archive.window;

        let mut successes: Vec<(&FetchOutcome, &Path, u64)> = archive
            .outcomes
            .iter()
            .filter_map(|o| match &o.result {
                FetchResult::Success { path, bytes, .. } => Some((o, path.as_path(), *bytes)),
                FetchResult::Failed { .. } => None,
            })
            .collect();
        // Segment identity is the reported start; clipped starts may collide.
        successes.sort_by_key(|s| s.0.descriptor.reported_start);
        successes.dedup_by_key(|s| s.0.descriptor.reported_start);
        successes.sort_by_key(|s| (s.0.descriptor.start, s.0.descriptor.end, s.0.descriptor.reported_start));
        let fetched: Vec<i64> = successes.iter().map(|s| s.0.descriptor.reported_start).collect();

        let segments: Vec<SegmentEntry> = successes
            .iter()
            .map(|(o, path, bytes)| SegmentEntry {
                file: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| o.descriptor.file_name()),
                start: o.descriptor.start,
                end: o.descriptor.end,
                bytes: *bytes,
                trimmed_head: o.descriptor.trimmed_head(),
                trimmed_tail: o.descriptor.trimmed_tail(),
            })
            .collect();

        let mut failed: Vec<(i64, FailureEntry)> = archive
            .outcomes
            .iter()
            .filter(|o| !fetched.contains(&o.descriptor.reported_start))
            .filter_map(|o| match &o.result {
                FetchResult::Failed { reason, attempts } => Some((
                    o.descriptor.reported_start,
                    FailureEntry {
                        start: o.descriptor.start,
                        end: o.descriptor.end,
                        kind: reason.kind,
                        reason: reason.detail.clone(),
                        attempts: *attempts,
                    },
                )),
                FetchResult::Success { .. } => None,
            })
            .collect();
        failed.sort_by(|a, b| (a.0, a.1.kind).cmp(&(b.0, b.1.kind)));
        failed.dedup_by_key(|f| f.0);
        failed.sort_by_key(|f| (f.1.start, f.1.end, f.0));
        let failures: Vec<FailureEntry> = failed.into_iter().map(|(_, f)| f).collect();

        let gaps: Vec<GapEntry> = if archive.listing_error.is_some() {
            vec![GapEntry {
                start: window.start(),
                end: window.end(),
                cause: GapCause::ListingUnavailable,
            }]
        } else {
            let covered: Vec<(i64, i64)> = segments.iter().map(|s| (s.start, s.end)).collect();
            detect_gaps(window, &covered, self.gap_tolerance)
                .into_iter()
                .map(|(start, end)| {
                    let failed = failures.iter().any(|f| f.start < end && f.end > start);
                    GapEntry {
                        start,
                        end,
                        cause: if failed { GapCause::FetchFailed } else { GapCause::NoFootage },
                    }
                })
                .collect()
        };

        let status = if archive.listing_error.is_some() {
            ArchiveStatus::ListingUnavailable
        } else if segments.is_empty() && failures.is_empty() {
            ArchiveStatus::Empty
        } else if segments.is_empty() {
            ArchiveStatus::Failed
        } else if gaps.is_empty() && failures.is_empty() {
            ArchiveStatus::Complete
        } else {
            ArchiveStatus::Partial
        };

        let totals = Totals {
            attempted: segments.len() + failures.len(),
            succeeded: segments.len(),
            failed: failures.len(),
            bytes: segments.iter().map(|s| s.bytes).sum(),
            missing_seconds: gaps.iter().map(|g| (g.end - g.start) as u64).sum(),
        };

        let has_init = archive.init.is_some();
        Manifest {
            version: MANIFEST_VERSION,
            camera_id: archive.camera.id.clone(),
            camera_name: archive.camera.name.clone(),
            window: WindowEntry::from(window),
            status,
            listing_error: archive.listing_error.clone(),
            init_file: has_init.then(|| INIT_FILE.to_string()),
            stitched_file: (self.stitch && !segments.is_empty()).then(|| archive.stitched_name()),
            segments,
            gaps,
            failures,
            totals,
        }
    }

    /// Write the camera's archive files and return its manifest.
    pub fn assemble(&self, archive: &CameraArchive) -> Result<Manifest> {
        let dir = &archive.dir;
        std::fs::create_dir_all(dir).map_err(|source| VaultError::Write { path: dir.clone(), source })?;

        let manifest = self.build_manifest(archive);

        if let Some(init) = &archive.init {
            write_if_changed(&dir.join(INIT_FILE), init)?;
        }
        if let Some(name) = &manifest.stitched_file {
            self.stitch_segments(archive, &manifest, &dir.join(name))?;
        }

        let manifest_bytes = manifest.to_bytes()?;
        let written = write_if_changed(&dir.join(MANIFEST_FILE), &manifest_bytes)?;

        match std::fs::remove_dir_all(dir.join(PARTIAL_DIR)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(camera = archive.camera.id, error = %e, "Cannot clean partial downloads"),
        }

        info!(
            camera = archive.camera.id,
            status = ?manifest.status,
            segments = manifest.totals.succeeded,
            failed = manifest.totals.failed,
            gaps = manifest.gaps.len(),
            missing_secs = manifest.totals.missing_seconds,
            manifest_updated = written,
            "Camera archive finalized"
        );
        Ok(manifest)
    }

    /// Concatenate init header and segments, in manifest order, into `dest`.
    fn stitch_segments(&self, archive: &CameraArchive, manifest: &Manifest, dest: &Path) -> Result<()> {
        let expected: u64 = archive.init.as_ref().map_or(0, |b| b.len() as u64) + manifest.totals.bytes;
        if let Ok(meta) = std::fs::metadata(dest) {
            if meta.len() == expected {
                debug!(camera = archive.camera.id, file = ?dest, "Stitched file already up to date");
                return Ok(());
            }
        }

        let tmp = temp_path(dest);
        let res = (|| -> io::Result<()> {
            let mut out = io::BufWriter::new(File::create(&tmp)?);
            if let Some(init) = &archive.init {
                out.write_all(init)?;
            }
            for seg in &manifest.segments {
                let mut input = File::open(archive.dir.join(&seg.file))?;
                io::copy(&mut input, &mut out)?;
            }
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            std::fs::rename(&tmp, dest)
        })();

        if let Err(source) = res {
            let _ = std::fs::remove_file(&tmp);
            return Err(VaultError::Write { path: dest.to_path_buf(), source });
        }
        info!(camera = archive.camera.id, file = ?dest, bytes = expected, "Stitched video written");
        Ok(())
    }
}

/// Uncovered ranges of `window` longer than `tolerance` seconds. `covered`
/// must be sorted by start; overlaps are fine.
pub fn detect_gaps(window: &TimeWindow, covered: &[(i64, i64)], tolerance: u64) -> Vec<(i64, i64)> {
    let mut gaps = Vec::new();
    let mut cursor = window.start();
    for &(start, end) in covered {
        if start > cursor && (start - cursor) as u64 > tolerance {
            gaps.push((cursor, start));
        }
        cursor = cursor.max(end);
    }
    if window.end() > cursor && (window.end() - cursor) as u64 > tolerance {
        gaps.push((cursor, window.end()));
    }
    gaps
}

fn temp_path(dest: &Path) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dest.with_file_name(format!(".{name}.tmp"))
}

/// Atomically replace `dest` with `data` unless it already holds exactly
/// those bytes. Returns whether the file was written.
fn write_if_changed(dest: &Path, data: &[u8]) -> Result<bool> {
    if let Ok(existing) = std::fs::read(dest) {
        if existing == data {
            return Ok(false);
        }
    }
    let tmp = temp_path(dest);
    let res = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, dest)
    })();
    if let Err(source) = res {
        let _ = std::fs::remove_file(&tmp);
        return Err(VaultError::Write { path: dest.to_path_buf(), source });
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FailureKind, FailureReason, SegmentDescriptor};

    fn window() -> TimeWindow {
        TimeWindow::new(1000, 300).unwrap()
    }

    fn ok(dir: &Path, start: i64, end: i64) -> FetchOutcome {
        let d = SegmentDescriptor::new("cam", start, end, "loc");
        let path = dir.join(d.file_name());
        std::fs::write(&path, format!("{start}|")).unwrap();
        let bytes = std::fs::metadata(&path).unwrap().len();
        FetchOutcome { descriptor: d, result: FetchResult::Success { path, bytes, attempts: 1 } }
    }

    fn failed(start: i64, end: i64, kind: FailureKind) -> FetchOutcome {
        FetchOutcome {
            descriptor: SegmentDescriptor::new("cam", start, end, "loc"),
            result: FetchResult::Failed {
                reason: FailureReason { kind, detail: "boom".into() },
                attempts: 3,
            },
        }
    }

    fn archive(dir: &Path, outcomes: Vec<FetchOutcome>) -> CameraArchive {
        let mut a = CameraArchive::new(Camera::new("cam").with_name("Lobby"), window(), dir.to_path_buf());
        a.outcomes = outcomes;
        a
    }

    #[test]
    fn gap_detection_respects_tolerance() {
        let w = window();
        assert!(detect_gaps(&w, &[(1000, 1100), (1101, 1300)], 1).is_empty());
        assert_eq!(detect_gaps(&w, &[(1000, 1100), (1102, 1300)], 1), vec![(1100, 1102)]);
        assert!(detect_gaps(&w, &[(1000, 1200), (1150, 1299)], 1).is_empty());
        assert_eq!(detect_gaps(&w, &[], 1), vec![(1000, 1300)]);
        assert_eq!(detect_gaps(&w, &[(1010, 1290)], 1), vec![(1000, 1010), (1290, 1300)]);
    }

    #[test]
    fn scenario_single_gap() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        // Delivered out of order on purpose.
        let a = archive(p, vec![ok(p, 1250, 1300), ok(p, 1000, 1100), ok(p, 1100, 1200)]);
        let m = ArchiveAssembler::new(1, false).build_manifest(&a);
        let starts: Vec<_> = m.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, [1000, 1100, 1250]);
        assert_eq!(m.gaps, vec![GapEntry { start: 1200, end: 1250, cause: GapCause::NoFootage }]);
        assert_eq!(m.status, ArchiveStatus::Partial);
        assert_eq!(m.totals.missing_seconds, 50);
    }

    #[test]
    fn failures_are_distinct_from_natural_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let a = archive(
            p,
            vec![
                ok(p, 1000, 1100),
                failed(1100, 1200, FailureKind::Exhausted),
                failed(1100, 1200, FailureKind::Exhausted),
            ],
        );
        let m = ArchiveAssembler::new(1, false).build_manifest(&a);
        assert_eq!(m.failures.len(), 1);
        assert_eq!(m.failures[0].attempts, 3);
        assert_eq!(
            m.gaps,
            vec![
                GapEntry { start: 1100, end: 1200, cause: GapCause::FetchFailed },
                GapEntry { start: 1200, end: 1300, cause: GapCause::NoFootage },
            ]
        );
    }

    #[test]
    fn success_supersedes_failure_for_same_segment() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let a = archive(p, vec![failed(1000, 1300, FailureKind::Exhausted), ok(p, 1000, 1300)]);
        let m = ArchiveAssembler::new(1, false).build_manifest(&a);
        assert!(m.failures.is_empty());
        assert_eq!(m.status, ArchiveStatus::Complete);
    }

    /// Descriptor as the catalog leaves it: reported range kept, clipped to the window.
    fn straddler(reported_start: i64, reported_end: i64) -> SegmentDescriptor {
        let mut d = SegmentDescriptor::new("cam", reported_start, reported_end, "loc");
        d.start = reported_start.max(1000);
        d.end = reported_end.min(1300);
        d
    }

    #[test]
    fn overlapping_straddlers_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let outcomes = [(900, 1050), (950, 1100), (1100, 1300)]
            .into_iter()
            .map(|(s, e)| {
                let d = straddler(s, e);
                let path = p.join(d.file_name());
                std::fs::write(&path, format!("{s}|")).unwrap();
                FetchOutcome { descriptor: d, result: FetchResult::Success { path, bytes: 5, attempts: 1 } }
            })
            .collect();
        let m = ArchiveAssembler::new(1, false).build_manifest(&archive(p, outcomes));

        let files: Vec<_> = m.segments.iter().map(|s| s.file.as_str()).collect();
        assert_eq!(files, ["seg_900_1050.m4v", "seg_950_1100.m4v", "seg_1100_1300.m4v"]);
        assert!(m.gaps.is_empty());
        assert_eq!(m.status, ArchiveStatus::Complete);
        assert_eq!(m.totals.attempted, 3);
    }

    #[test]
    fn failed_straddler_is_reported_next_to_fetched_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let ok_d = straddler(900, 1050);
        let ok_path = p.join(ok_d.file_name());
        std::fs::write(&ok_path, b"900|").unwrap();
        let outcomes = vec![
            FetchOutcome { descriptor: ok_d, result: FetchResult::Success { path: ok_path, bytes: 4, attempts: 1 } },
            FetchOutcome {
                descriptor: straddler(950, 1100),
                result: FetchResult::Failed {
                    reason: FailureReason { kind: FailureKind::Exhausted, detail: "timeout".into() },
                    attempts: 3,
                },
            },
            ok(p, 1100, 1300),
        ];
        let m = ArchiveAssembler::new(1, false).build_manifest(&archive(p, outcomes));

        assert_eq!(m.failures.len(), 1);
        assert_eq!((m.failures[0].start, m.failures[0].end), (1000, 1100));
        assert_eq!(m.gaps, vec![GapEntry { start: 1050, end: 1100, cause: GapCause::FetchFailed }]);
        assert_eq!(m.totals.attempted, 3);
        assert_eq!(m.status, ArchiveStatus::Partial);
    }

    #[test]
    fn status_for_empty_and_listing_failure() {
        let dir = tempfile::tempdir().unwrap();
        let asm = ArchiveAssembler::new(1, true);
        let empty = archive(dir.path(), vec![]);
        let m = asm.build_manifest(&empty);
        assert_eq!(m.status, ArchiveStatus::Empty);
        assert!(m.stitched_file.is_none());

        let mut unavailable = archive(dir.path(), vec![]);
        unavailable.listing_error = Some("timeout".into());
        let m = asm.build_manifest(&unavailable);
        assert_eq!(m.status, ArchiveStatus::ListingUnavailable);
        assert_eq!(m.gaps[0].cause, GapCause::ListingUnavailable);
    }

    #[test]
    fn assemble_is_idempotent_and_stitches() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let mut a = archive(p, vec![ok(p, 1100, 1200), ok(p, 1000, 1100)]);
        a.init = Some(Bytes::from_static(b"INIT|"));
        let asm = ArchiveAssembler::new(1, true);

        let first = asm.assemble(&a).unwrap();
        let bytes_first = std::fs::read(p.join(MANIFEST_FILE)).unwrap();
        let second = asm.assemble(&a).unwrap();
        let bytes_second = std::fs::read(p.join(MANIFEST_FILE)).unwrap();
        assert_eq!(first, second);
        assert_eq!(bytes_first, bytes_second);

        let stitched = std::fs::read(p.join("Lobby_cam_1000_video.mp4")).unwrap();
        assert_eq!(stitched, b"INIT|1000|1100|");
        assert_eq!(std::fs::read(p.join(INIT_FILE)).unwrap(), b"INIT|");
        assert_eq!(Manifest::load(p).unwrap(), first);
    }
}
