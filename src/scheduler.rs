// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Download scheduler: a fixed pool of workers draining a shared job arena.
//!
//! ```text
//!                 ┌─ worker 0 ─┐
//! JobArena ──idx──┼─ worker 1 ─┼──→ mpsc (bounded) ──→ outcome stream
//! (read-only)     └─ worker N ─┘
//! ```
//!
//! Jobs are never moved or locked: each worker claims the next index with an
//! atomic `fetch_add`. At most `max_concurrency` transfers run at once.
//! Every job yields exactly one [`FetchOutcome`]; after cancellation the
//! remaining jobs are drained as cancelled failures instead of being fetched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fetcher::{FetchJob, SegmentFetcher};
use crate::model::{FailureReason, FetchOutcome, FetchResult};

struct JobArena {
    jobs: Vec<FetchJob>,
    next: AtomicUsize,
}

impl JobArena {
    fn claim(&self) -> Option<&FetchJob> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        self.jobs.get(idx)
    }
}

/// Live counters, shared with the caller.
#[derive(Debug, Default)]
pub struct ScheduleStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    dispatched: AtomicUsize,
    drained: AtomicUsize,
}

impl ScheduleStats {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of simultaneous transfers observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Jobs handed to the fetcher.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Jobs skipped because the run was cancelled first.
    pub fn drained(&self) -> usize {
        self.drained.load(Ordering::SeqCst)
    }
}

/// Handle to a scheduled batch.
pub struct ScheduledRun {
    /// Terminal outcomes in completion order. Ends once every job is done.
    pub outcomes: ReceiverStream<FetchOutcome>,
    pub stats: Arc<ScheduleStats>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    max_concurrency: usize,
    outcome_buffer: usize,
    cancel_grace: Duration,
}

impl Scheduler {
    pub fn new(max_concurrency: usize, outcome_buffer: usize, cancel_grace: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            outcome_buffer: outcome_buffer.max(1),
            cancel_grace,
        }
    }

    /// Spawn the worker pool over `jobs` and return the outcome stream.
    pub fn run(
        &self,
        jobs: Vec<FetchJob>,
        fetcher: Arc<SegmentFetcher>,
        cancel: CancellationToken,
    ) -> ScheduledRun {
        let workers = self.max_concurrency.min(jobs.len());
        let (tx, rx) = mpsc::channel(self.outcome_buffer);
        let stats = Arc::new(ScheduleStats::default());

        info!(jobs = jobs.len(), workers, "Scheduling segment downloads");

        let arena = Arc::new(JobArena { jobs, next: AtomicUsize::new(0) });
        for worker_id in 0..workers {
            let arena = arena.clone();
            let fetcher = fetcher.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let stats = stats.clone();
            let grace = self.cancel_grace;
            tokio::spawn(async move {
                worker_loop(worker_id, arena, fetcher, tx, cancel, grace, stats).await;
            });
        }

        ScheduledRun { outcomes: ReceiverStream::new(rx), stats }
    }
}

async fn worker_loop(
    worker_id: usize,
    arena: Arc<JobArena>,
    fetcher: Arc<SegmentFetcher>,
    tx: mpsc::Sender<FetchOutcome>,
    cancel: CancellationToken,
    grace: Duration,
    stats: Arc<ScheduleStats>,
) {
    debug!(worker_id, "Download worker started");

    while let Some(job) = arena.claim() {
        let outcome = if cancel.is_cancelled() {
            stats.drained.fetch_add(1, Ordering::SeqCst);
            cancelled(job, 0)
        } else {
            stats.enter();
            let outcome = tokio::select! {
                biased;
                outcome = fetcher.fetch(job) => outcome,
                _ = grace_expired(&cancel, grace) => {
                    warn!(
                        worker_id,
                        camera = job.descriptor.camera_id,
                        segment_start = job.descriptor.start,
                        "Abandoning transfer after cancellation grace period"
                    );
                    cancelled(job, 1)
                }
            };
            stats.leave();
            outcome
        };

        if tx.send(outcome).await.is_err() {
            debug!(worker_id, "Outcome receiver dropped, worker exiting");
            return;
        }
    }

    debug!(worker_id, "Download worker finished");
}

async fn grace_expired(cancel: &CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    sleep(grace).await;
}

fn cancelled(job: &FetchJob, attempts: u32) -> FetchOutcome {
    FetchOutcome {
        descriptor: job.descriptor.clone(),
        result: FetchResult::Failed { reason: FailureReason::cancelled(), attempts },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::model::{Camera, FailureKind, SegmentDescriptor, TimeWindow};
    use crate::retry::RetryPolicy;
    use crate::source::{FootageSource, SegmentListing};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use tokio_stream::StreamExt;

    /// Sleeps on every fetch and records how many fetches overlap.
    #[derive(Default)]
    struct Slow {
        delay: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl FootageSource for Slow {
        async fn list_segments(&self, _: &Camera, _: &TimeWindow) -> Result<SegmentListing, SourceError> {
            Ok(SegmentListing::default())
        }

        async fn fetch_segment(&self, _: &SegmentDescriptor) -> Result<Bytes, SourceError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"x"))
        }
    }

    fn jobs(dir: &std::path::Path, n: i64) -> Vec<FetchJob> {
        let dir = Arc::new(PathBuf::from(dir));
        (0..n)
            .map(|i| FetchJob {
                descriptor: SegmentDescriptor::new("cam", i * 2, i * 2 + 2, format!("seg_{i}")),
                camera_dir: dir.clone(),
            })
            .collect()
    }

    fn fetcher(source: Arc<Slow>, cancel: &CancellationToken) -> Arc<SegmentFetcher> {
        Arc::new(SegmentFetcher::new(source, RetryPolicy::default(), cancel.clone()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_max_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(Slow { delay: Duration::from_millis(5), ..Default::default() });
        let cancel = CancellationToken::new();
        let run = Scheduler::new(3, 4, Duration::from_secs(1)).run(
            jobs(dir.path(), 40),
            fetcher(source.clone(), &cancel),
            cancel,
        );

        let outcomes: Vec<_> = run.outcomes.collect().await;
        assert_eq!(outcomes.len(), 40);
        assert!(outcomes.iter().all(|o| o.is_success()));
        let starts: HashSet<_> = outcomes.iter().map(|o| o.descriptor.start).collect();
        assert_eq!(starts.len(), 40);
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
        assert!(run.stats.peak() <= 3);
        assert_eq!(run.stats.dispatched(), 40);
    }

    #[tokio::test]
    async fn empty_batch_ends_immediately() {
        let cancel = CancellationToken::new();
        let source = Arc::new(Slow::default());
        let run = Scheduler::new(8, 8, Duration::ZERO).run(vec![], fetcher(source, &cancel), cancel);
        assert_eq!(run.outcomes.collect::<Vec<_>>().await.len(), 0);
    }

    #[tokio::test]
    async fn cancellation_drains_remaining_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(Slow { delay: Duration::from_secs(30), ..Default::default() });
        let cancel = CancellationToken::new();
        let run = Scheduler::new(2, 16, Duration::from_millis(10)).run(
            jobs(dir.path(), 10),
            fetcher(source, &cancel),
            cancel.clone(),
        );

        cancel.cancel();
        let outcomes: Vec<_> = run.outcomes.collect().await;
        assert_eq!(outcomes.len(), 10);
        for o in &outcomes {
            match &o.result {
                FetchResult::Failed { reason, .. } => assert_eq!(reason.kind, FailureKind::Cancelled),
                FetchResult::Success { .. } => panic!("hung transfer should have been abandoned"),
            }
        }
        assert_eq!(run.stats.dispatched() + run.stats.drained(), 10);
    }
}
