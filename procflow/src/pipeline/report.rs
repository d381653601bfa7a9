//! Run summaries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::{JobStatus, RunOutcome};
use crate::job::JobRecord;
use crate::proc::{DataTable, StageResult};
use crate::utils::brief_list;
use crate::utils::fs::tail_lines;

/// Lines of `job.stderr` kept in a failure diagnosis.
pub const STDERR_TAIL_LINES: usize = 20;

/// Summary of one process in a run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// Process name.
    pub proc: String,
    /// Outcome of the process.
    pub outcome: RunOutcome,
    /// Number of jobs.
    pub jobs: usize,
    /// Jobs that ran and succeeded.
    pub succeeded: usize,
    /// Cached job indices, abbreviated.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cached: String,
    /// Failed or killed jobs, ignored ones included.
    pub failed: usize,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

impl StageReport {
    /// Summarizes a finished process.
    #[must_use]
    pub fn from_result(proc: &str, result: &StageResult) -> Self {
        let count = |pred: fn(&JobStatus) -> bool| result.jobs.iter().filter(|j| pred(&j.status())).count();
        Self {
            proc: proc.to_string(),
            outcome: result.outcome,
            jobs: result.jobs.len(),
            succeeded: count(|s| *s == JobStatus::Succeeded),
            cached: if result.cached.is_empty() {
                String::new()
            } else {
                brief_list(&result.cached)
            },
            failed: count(JobStatus::is_failure),
            duration_ms: result.duration_ms,
        }
    }
}

/// Where a failed run went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct FailureDiagnosis {
    /// Process of the failing job.
    pub proc: String,
    /// Job index.
    pub index: usize,
    /// Rendered script of the job.
    pub script: PathBuf,
    /// Preparation error, if the job never reached a backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last lines of `job.stderr`.
    pub stderr_tail: String,
}

impl FailureDiagnosis {
    /// Picks the first job that failed the process, if any.
    ///
    /// Jobs whose failure was ignored are only considered when no other
    /// job failed.
    #[must_use]
    pub fn first_of(result: &StageResult) -> Option<Self> {
        let failed = |j: &&JobRecord| j.status().is_failure();
        let job = result
            .jobs
            .iter()
            .filter(failed)
            .find(|j| !j.failure_ignored)
            .or_else(|| result.jobs.iter().find(failed))?;
        Some(Self {
            proc: job.proc.clone(),
            index: job.index,
            script: job.script_file(),
            error: job.error.clone(),
            stderr_tail: tail_lines(&job.stderr_file(), STDERR_TAIL_LINES),
        })
    }
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Overall outcome: the worst stage outcome.
    pub outcome: RunOutcome,
    /// Processes that ran, in execution order.
    pub stages: Vec<StageReport>,
    /// Processes never reached because an earlier one failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    /// First failing job of the failed process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<FailureDiagnosis>,
    /// Output tables of the processes that did not fail.
    #[serde(skip)]
    pub outputs: HashMap<String, Arc<DataTable>>,
}

impl RunReport {
    pub(crate) fn new(pipeline: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::now_v7(),
            pipeline: pipeline.into(),
            started_at: now,
            finished_at: now,
            outcome: RunOutcome::Success,
            stages: Vec::new(),
            skipped: Vec::new(),
            first_failure: None,
            outputs: HashMap::new(),
        }
    }

    /// Records a finished process and folds its outcome into the run outcome.
    pub(crate) fn record(&mut self, proc: &str, result: &StageResult) {
        self.outcome = match (self.outcome, result.outcome) {
            (RunOutcome::Failed, _) | (_, RunOutcome::Failed) => RunOutcome::Failed,
            (RunOutcome::Partial, _) | (_, RunOutcome::Partial) => RunOutcome::Partial,
            _ => RunOutcome::Success,
        };
        if result.outcome == RunOutcome::Failed && self.first_failure.is_none() {
            self.first_failure = FailureDiagnosis::first_of(result);
        }
        if let Some(table) = &result.output_table {
            self.outputs.insert(proc.to_string(), Arc::clone(table));
        }
        self.stages.push(StageReport::from_result(proc, result));
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Returns the report of process `proc`.
    #[must_use]
    pub fn stage(&self, proc: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.proc == proc)
    }

    /// Returns the output table of process `proc`.
    #[must_use]
    pub fn output(&self, proc: &str) -> Option<&DataTable> {
        self.outputs.get(proc).map(AsRef::as_ref)
    }

    /// Returns true unless a process failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.allows_continuation()
    }

    /// Returns the run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pipeline {} {} in {} ms",
            self.pipeline,
            self.outcome,
            self.duration_ms()
        )?;
        for stage in &self.stages {
            write!(
                f,
                "  {}: {} ({} jobs, {} succeeded, {} failed",
                stage.proc, stage.outcome, stage.jobs, stage.succeeded, stage.failed
            )?;
            if !stage.cached.is_empty() {
                write!(f, ", cached: {}", stage.cached)?;
            }
            writeln!(f, ")")?;
        }
        if !self.skipped.is_empty() {
            writeln!(f, "  not run: {}", self.skipped.join(", "))?;
        }
        if let Some(failure) = &self.first_failure {
            writeln!(f, "First failure: {}[{}]", failure.proc, failure.index)?;
            writeln!(f, "  script: {}", failure.script.display())?;
            if let Some(error) = &failure.error {
                writeln!(f, "  error: {error}")?;
            }
            if !failure.stderr_tail.is_empty() {
                writeln!(f, "  stderr:")?;
                for line in failure.stderr_tail.lines() {
                    writeln!(f, "    {line}")?;
                }
            }
        }
        Ok(())
    }
}
