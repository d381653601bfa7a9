//! Bounded-concurrency dispatch of one process's jobs.

use futures::stream::{self, FuturesUnordered, StreamExt, TryStreamExt};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::ProcSettings;
use crate::core::{ErrorStrategy, JobStatus};
use crate::errors::{ProcflowError, Result};
use crate::events::{EventBus, EventKind, PipelineEvent};
use crate::job::{JobCache, JobRecord};
use crate::pipeline::RetryPolicy;
use crate::scheduler::{JobHandle, PollStatus, SchedulerAdapter, Submission};

/// Jobs with a higher index only log at debug level.
pub const JOB_LOG_LIMIT: usize = 3;

/// How a submitted job left the poll loop.
enum Finish {
    Exited(PollStatus),
    Killed,
}

/// Submits, polls, retries and kills the jobs of one process.
#[derive(Debug)]
pub struct JobQueue {
    pipeline: String,
    adapter: Arc<dyn SchedulerAdapter>,
    forks: usize,
    submission_batch: usize,
    strategy: ErrorStrategy,
    poll_interval: Duration,
    retry: RetryPolicy,
    cache: JobCache,
    events: EventBus,
    cancel: Arc<CancellationToken>,
    /// Stops the remaining jobs after a fatal backend error.
    abort: CancellationToken,
    halted: AtomicBool,
    interrupted: AtomicBool,
}

impl JobQueue {
    /// Creates a queue for a process with resolved `settings`.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        adapter: Arc<dyn SchedulerAdapter>,
        settings: &ProcSettings,
        events: EventBus,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            adapter,
            forks: settings.forks.max(1),
            submission_batch: settings.submission_batch.max(1),
            strategy: settings.error_strategy,
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            retry: RetryPolicy::from_settings(settings),
            cache: JobCache::new(settings.cache, settings.dirsig),
            events,
            cancel,
            abort: CancellationToken::new(),
            halted: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Returns true once a failure under the `halt` strategy stopped new submissions.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    /// Completes on run cancellation or on a fatal error in this queue.
    async fn stop_requested(&self) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = self.abort.cancelled() => {}
        }
    }

    /// Marks `job` killed because the queue is stopping.
    async fn interrupt(&self, job: &mut JobRecord) {
        if self.is_stopping() {
            self.interrupted.store(true, Ordering::SeqCst);
        }
        job.set_status(JobStatus::Killed);
        self.emit(EventKind::JobKilled, job).await;
    }

    /// Records a job that failed before it could be queued.
    ///
    /// The error strategy applies as for any failure, so under `halt` no job
    /// of this queue is submitted afterwards.
    pub async fn fail_prepared(&self, job: JobRecord) -> JobRecord {
        self.fail(job, false).await
    }

    /// Runs `jobs` to completion and returns them in index order.
    ///
    /// Fails with [`ProcflowError::Cancelled`] when the cancellation token
    /// stopped any job, and with a scheduler error when the backend itself
    /// breaks. In both cases in-flight jobs are killed before returning.
    pub async fn run(&self, jobs: Vec<JobRecord>) -> Result<Vec<JobRecord>> {
        if jobs.is_empty() {
            return Ok(jobs);
        }

        stream::iter(jobs.iter())
            .map(|job| self.adapter.wrap(job))
            .buffer_unordered(self.submission_batch)
            .try_collect::<Vec<_>>()
            .await?;

        let semaphore = Semaphore::new(self.forks);
        let mut running: FuturesUnordered<_> = jobs
            .into_iter()
            .map(|job| self.drive(job, &semaphore))
            .collect();

        let mut done = Vec::with_capacity(running.len());
        let mut fatal = None;
        while let Some(result) = running.next().await {
            match result {
                Ok(job) => done.push(job),
                Err(e) if fatal.is_none() => {
                    error!(error = %e, "Scheduler failed, killing remaining jobs");
                    self.abort.cancel(e.to_string());
                    fatal = Some(e);
                }
                Err(e) => debug!(error = %e, "Scheduler error while stopping"),
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        done.sort_by_key(|job| job.index);

        if self.interrupted.load(Ordering::SeqCst) {
            if let Some(reason) = self.cancel.reason() {
                return Err(ProcflowError::Cancelled(reason));
            }
        }
        Ok(done)
    }

    async fn emit(&self, kind: EventKind, job: &JobRecord) {
        self.events.emit(&PipelineEvent::job(kind, &self.pipeline, job)).await;
    }

    /// Takes one job from `QUEUED` to a terminal status.
    async fn drive(&self, mut job: JobRecord, semaphore: &Semaphore) -> Result<JobRecord> {
        job.set_status(JobStatus::Queued);
        self.emit(EventKind::JobQueued, &job).await;

        loop {
            let permit = tokio::select! {
                biased;
                () = self.stop_requested() => None,
                permit = semaphore.acquire() => Some(permit.map_err(|_| {
                    ProcflowError::Cancelled("job queue closed".to_string())
                })?),
            };
            let Some(permit) = permit.filter(|_| !self.is_halted() && !self.is_stopping()) else {
                self.interrupt(&mut job).await;
                return Ok(job);
            };

            job.set_status(JobStatus::Submitting);
            if !self
                .events
                .allow(&PipelineEvent::job(EventKind::JobSubmitting, &self.pipeline, &job))
                .await
            {
                job.error = Some("Submission vetoed".to_string());
                return Ok(self.fail(job, false).await);
            }

            remove_stale_rc(&job).await;
            let handle = match self.adapter.submit(&job).await? {
                Submission::Accepted(handle) => handle,
                Submission::Rejected(reason) => {
                    warn!(job = %job.label(), reason = %reason, "Submission rejected");
                    job.error = Some(reason);
                    return Ok(self.fail(job, false).await);
                }
            };
            job.set_status(JobStatus::Submitted);
            self.emit(EventKind::JobSubmitted, &job).await;
            if job.index < JOB_LOG_LIMIT {
                info!(job = %job.label(), jid = %handle, "Submitted");
            }

            let finish = self.watch(&mut job, &handle).await?;
            drop(permit);

            match finish {
                Finish::Killed => {
                    job.set_status(JobStatus::Killed);
                    self.emit(EventKind::JobKilled, &job).await;
                    job.killed = true;
                    job.set_status(JobStatus::Failed);
                    self.emit(EventKind::JobFailed, &job).await;
                    return Ok(job);
                }
                Finish::Exited(PollStatus::Succeeded) if outputs_generated(&job) => {
                    job.set_status(JobStatus::Succeeded);
                    if let Err(e) = self.cache.write(&job) {
                        warn!(job = %job.label(), error = %e, "Failed to write signature");
                    }
                    self.emit(EventKind::JobSucceeded, &job).await;
                    return Ok(job);
                }
                Finish::Exited(_) => {}
            }

            job.set_status(JobStatus::Failed);
            let retryable = self.strategy == ErrorStrategy::Retry
                && self.retry.can_retry(job.retry_count)
                && !self.is_stopping();
            if !retryable {
                return Ok(self.fail(job, true).await);
            }

            job.set_status(JobStatus::Retrying);
            self.emit(EventKind::JobRetrying, &job).await;
            let delay = self.retry.delay(job.retry_count);
            job.retry_count += 1;
            debug!(job = %job.label(), retry = job.retry_count, delay = ?delay, "Retrying");
            tokio::select! {
                biased;
                () = self.stop_requested() => {}
                () = tokio::time::sleep(delay) => {}
            }
            if self.is_stopping() || self.is_halted() {
                self.interrupt(&mut job).await;
                return Ok(job);
            }
            job.set_status(JobStatus::Queued);
            self.emit(EventKind::JobQueued, &job).await;
        }
    }

    /// Polls a submitted job until it finishes or is killed on cancellation.
    async fn watch(&self, job: &mut JobRecord, handle: &JobHandle) -> Result<Finish> {
        let mut watch_cancel = true;
        loop {
            let cancelled = tokio::select! {
                biased;
                () = self.stop_requested(), if watch_cancel => true,
                () = tokio::time::sleep(self.poll_interval) => false,
            };
            if cancelled {
                if self
                    .events
                    .allow(&PipelineEvent::job(EventKind::JobKilling, &self.pipeline, job))
                    .await
                {
                    if let Err(e) = self.adapter.kill(handle).await {
                        warn!(job = %job.label(), error = %e, "Failed to kill job");
                    }
                    self.interrupted.store(true, Ordering::SeqCst);
                    return Ok(Finish::Killed);
                }
                // Vetoed: let the job run to completion.
                watch_cancel = false;
                continue;
            }

            match self.adapter.poll(handle).await? {
                PollStatus::Queued => {}
                PollStatus::Running => {
                    if job.status() == JobStatus::Submitted {
                        job.set_status(JobStatus::Running);
                        self.emit(EventKind::JobRunning, job).await;
                    }
                }
                finished => return Ok(Finish::Exited(finished)),
            }
        }
    }

    /// Records a final failure according to the error strategy.
    ///
    /// `counted` is false for vetoes and rejections, which never retry.
    async fn fail(&self, mut job: JobRecord, counted: bool) -> JobRecord {
        if job.status() != JobStatus::Failed {
            job.set_status(JobStatus::Failed);
        }
        match self.strategy {
            ErrorStrategy::Ignore => job.failure_ignored = true,
            ErrorStrategy::Halt => {
                if !self.halted.swap(true, Ordering::SeqCst) {
                    warn!(job = %job.label(), "Job failed, halting process");
                }
            }
            ErrorStrategy::Retry => {}
        }
        if job.index < JOB_LOG_LIMIT || !job.failure_ignored {
            warn!(
                job = %job.label(),
                rc = ?job.rc(),
                retries = job.retry_count,
                counted,
                ignored = job.failure_ignored,
                "Job failed"
            );
        }
        self.emit(EventKind::JobFailed, &job).await;
        job
    }
}

async fn remove_stale_rc(job: &JobRecord) {
    if let Err(e) = tokio::fs::remove_file(job.rc_file()).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(job = %job.label(), error = %e, "Cannot remove job.rc");
        }
    }
}

/// Checks declared file outputs, noting missing ones in `job.stderr`.
fn outputs_generated(job: &JobRecord) -> bool {
    let missing: Vec<&str> = job
        .output_paths()
        .into_iter()
        .filter(|(_, path, _)| !path.exists())
        .map(|(name, _, _)| name)
        .collect();
    if missing.is_empty() {
        return true;
    }
    let notes: String = missing
        .iter()
        .map(|name| format!("Output file {name} is not generated.\n"))
        .collect();
    let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(job.stderr_file())
        .and_then(|mut f| f.write_all(notes.as_bytes()));
    if let Err(e) = appended {
        warn!(job = %job.label(), error = %e, "Cannot append to job.stderr");
    }
    false
}
