// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segment fetcher: moves one segment from the remote source into the
//! camera's directory.
//!
//! Bytes land in `<camera_dir>/.partial/<name>.part` first and are renamed
//! into place only after a full, synced write, so the assembler never sees a
//! half-written segment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::model::{FailureReason, FetchOutcome, FetchResult, SegmentDescriptor};
use crate::retry::RetryPolicy;
use crate::source::FootageSource;

/// Scratch directory inside each camera directory.
pub const PARTIAL_DIR: &str = ".partial";

/// One unit of work for the scheduler.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub descriptor: SegmentDescriptor,
    pub camera_dir: Arc<PathBuf>,
}

pub struct SegmentFetcher {
    source: Arc<dyn FootageSource>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl SegmentFetcher {
    pub fn new(source: Arc<dyn FootageSource>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { source, policy, cancel }
    }

    /// Transfer one segment, retrying transient failures. Always returns a
    /// terminal outcome.
    pub async fn fetch(&self, job: &FetchJob) -> FetchOutcome {
        let d = &job.descriptor;
        let this = self;
        let attempted = self
            .policy
            .run(move |attempt| this.attempt(job, attempt), |e: &FetchError| e.is_retryable())
            .await;

        let result = match attempted.result {
            Ok((path, bytes)) => FetchResult::Success { path, bytes, attempts: attempted.attempts },
            Err(e) => {
                let reason = FailureReason::from_error(&e);
                warn!(
                    camera = d.camera_id,
                    segment_start = d.start,
                    attempts = attempted.attempts,
                    reason = %reason,
                    "Segment failed"
                );
                FetchResult::Failed { reason, attempts: attempted.attempts }
            }
        };
        FetchOutcome { descriptor: d.clone(), result }
    }

    async fn attempt(&self, job: &FetchJob, attempt: u32) -> Result<(PathBuf, u64), FetchError> {
        let d = &job.descriptor;
        if attempt > 1 && self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        debug!(camera = d.camera_id, segment_start = d.start, attempt, "Fetching segment");

        let res = self.transfer(job).await;
        match &res {
            Ok((_, bytes)) => info!(
                camera = d.camera_id,
                segment_start = d.start,
                attempt,
                bytes,
                "Segment stored"
            ),
            Err(e) => warn!(
                camera = d.camera_id,
                segment_start = d.start,
                attempt,
                retryable = e.is_retryable(),
                error = %e,
                "Segment attempt failed"
            ),
        }
        res
    }

    async fn transfer(&self, job: &FetchJob) -> Result<(PathBuf, u64), FetchError> {
        let d = &job.descriptor;
        let data = self.source.fetch_segment(d).await?;
        let actual = data.len() as u64;
        if let Some(expected) = d.expected_size {
            if actual != expected {
                return Err(FetchError::SizeMismatch { expected, actual });
            }
        }

        let name = d.file_name();
        let partial_dir = job.camera_dir.join(PARTIAL_DIR);
        tokio::fs::create_dir_all(&partial_dir).await?;
        let tmp = partial_dir.join(format!("{name}.part"));
        let dest = job.camera_dir.join(&name);

        if let Err(e) = write_then_rename(&tmp, &dest, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok((dest, actual))
    }
}

async fn write_then_rename(tmp: &Path, dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, dest).await
}
