//! Typed lifecycle events.
//!
//! The pipeline publishes a [`PipelineEvent`] at every step of a run to an
//! [`EventBus`]. Sinks observe events; the two veto points
//! (`on_job_submitting` and `on_job_killing`) additionally ask sinks to
//! [`decide`](EventSink::decide).

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::core::{JobStatus, RunOutcome};
use crate::job::JobRecord;

/// Lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Before the first process.
    PipelineStart,
    /// A process begins.
    ProcStart,
    /// A job was skipped by the cache.
    JobCached,
    /// A job waits for a slot.
    JobQueued,
    /// A job is about to be submitted; vetoable.
    JobSubmitting,
    /// The backend accepted a job.
    JobSubmitted,
    /// The backend reports a job running.
    JobRunning,
    /// A job is about to be killed; vetoable.
    JobKilling,
    /// A job was killed.
    JobKilled,
    /// A failed job will be resubmitted.
    JobRetrying,
    /// A job finished with all outputs present.
    JobSucceeded,
    /// A job failed for good.
    JobFailed,
    /// A process finished.
    ProcDone,
    /// The run finished.
    PipelineComplete,
}

impl EventKind {
    /// Returns the hook name, e.g. `on_job_submitting`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStart => "on_pipeline_start",
            Self::ProcStart => "on_proc_start",
            Self::JobCached => "on_job_cached",
            Self::JobQueued => "on_job_queued",
            Self::JobSubmitting => "on_job_submitting",
            Self::JobSubmitted => "on_job_submitted",
            Self::JobRunning => "on_job_running",
            Self::JobKilling => "on_job_killing",
            Self::JobKilled => "on_job_killed",
            Self::JobRetrying => "on_job_retrying",
            Self::JobSucceeded => "on_job_succeeded",
            Self::JobFailed => "on_job_failed",
            Self::ProcDone => "on_proc_done",
            Self::PipelineComplete => "on_pipeline_complete",
        }
    }

    /// Returns true for events whose sinks may veto the action.
    #[must_use]
    pub fn is_vetoable(&self) -> bool {
        matches!(self, Self::JobSubmitting | Self::JobKilling)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job details carried by job-level events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEventData {
    /// Job index.
    pub index: usize,
    /// Status when the event fired.
    pub status: JobStatus,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Exit code from `job.rc`, if written.
    pub rc: Option<i32>,
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineEvent {
    /// Event type.
    pub kind: EventKind,
    /// Pipeline name.
    pub pipeline: String,
    /// Unset for pipeline-level events.
    pub proc: Option<String>,
    /// Set on job-level events.
    pub job: Option<JobEventData>,
    /// Set on `on_proc_done` and `on_pipeline_complete`.
    pub outcome: Option<RunOutcome>,
}

impl PipelineEvent {
    /// Creates a pipeline-level event.
    #[must_use]
    pub fn pipeline(kind: EventKind, pipeline: impl Into<String>) -> Self {
        Self {
            kind,
            pipeline: pipeline.into(),
            proc: None,
            job: None,
            outcome: None,
        }
    }

    /// Creates a process-level event.
    #[must_use]
    pub fn proc(kind: EventKind, pipeline: impl Into<String>, proc: impl Into<String>) -> Self {
        Self {
            proc: Some(proc.into()),
            ..Self::pipeline(kind, pipeline)
        }
    }

    /// Creates a job-level event from the job's current state.
    #[must_use]
    pub fn job(kind: EventKind, pipeline: impl Into<String>, job: &JobRecord) -> Self {
        Self {
            job: Some(JobEventData {
                index: job.index,
                status: job.status(),
                retry_count: job.retry_count,
                rc: job.rc(),
            }),
            ..Self::proc(kind, pipeline, job.proc.clone())
        }
    }

    /// Attaches an outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: RunOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

/// Fans events out to every registered sink.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").field("sinks", &self.sinks.len()).finish()
    }
}

impl EventBus {
    /// Creates a bus without sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Returns the number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if no sink is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Delivers `event` to every sink.
    pub async fn emit(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.emit(event).await;
        }
    }

    /// Delivers a vetoable event and returns false if any sink vetoed it.
    ///
    /// Every sink sees the event even after a veto.
    pub async fn allow(&self, event: &PipelineEvent) -> bool {
        let mut allowed = true;
        for sink in &self.sinks {
            sink.emit(event).await;
            if sink.decide(event).await == Some(false) {
                allowed = false;
            }
        }
        if !allowed {
            warn!(event = %event.kind, proc = ?event.proc, job = ?event.job.as_ref().map(|j| j.index), "Vetoed");
        }
        allowed
    }
}
