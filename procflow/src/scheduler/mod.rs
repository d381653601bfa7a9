//! Scheduler adapters.
//!
//! A [`SchedulerAdapter`] turns a prepared job into a backend submission
//! unit, submits it, polls it and kills it. The dispatcher in
//! [`JobQueue`](crate::job::JobQueue) only talks to this trait, so local
//! processes, grid engines and remote hosts look the same to it.
//!
//! Every built-in adapter runs the same wrapper script: it executes the job
//! command from the job's metadata directory, redirects stdout and stderr
//! into `job.stdout`/`job.stderr` and writes the exit code into `job.rc`.

mod command;
mod local;
mod sge;
mod slurm;
mod ssh;

pub use command::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use local::LocalScheduler;
pub use sge::SgeScheduler;
pub use slurm::SlurmScheduler;
pub use ssh::SshScheduler;

#[cfg(test)]
pub use command::MockCommandRunner;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{DeclarationError, SchedulerError};
use crate::job::JobRecord;
use crate::utils::fs::read_rc;
use crate::utils::{shell_join, shell_quote};

/// Identifies a submitted job within its scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    /// Backend job id.
    pub id: String,
    /// Job index within its process.
    pub index: usize,
    /// Where the wrapper writes the exit code.
    pub rc_file: PathBuf,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The backend accepted the job.
    Accepted(JobHandle),
    /// The backend refused this job; the job fails without using a retry.
    Rejected(String),
}

/// Backend view of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollStatus {
    /// Waiting in the backend queue.
    Queued,
    /// Executing.
    Running,
    /// Finished with exit code 0.
    Succeeded,
    /// Finished otherwise.
    Failed,
}

impl PollStatus {
    /// Returns true if the job has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A job execution backend.
#[async_trait]
pub trait SchedulerAdapter: Send + Sync + fmt::Debug {
    /// Returns the scheduler name used in configuration and file names.
    fn name(&self) -> &str;

    /// Returns backend directive lines placed at the top of the wrapper script.
    fn directives(&self, _job: &JobRecord) -> Vec<String> {
        Vec::new()
    }

    /// Writes the submission unit for `job` and returns its path.
    async fn wrap(&self, job: &JobRecord) -> Result<PathBuf, SchedulerError> {
        let path = job.wrapped_script(self.name());
        let content = wrapper_script(job, &self.directives(job));
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| SchedulerError::prepare(self.name(), format!("{}: {e}", path.display())))?;
        Ok(path)
    }

    /// Submits a wrapped job.
    async fn submit(&self, job: &JobRecord) -> Result<Submission, SchedulerError>;

    /// Reports the state of a submitted job.
    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus, SchedulerError>;

    /// Kills a submitted job.
    async fn kill(&self, handle: &JobHandle) -> Result<(), SchedulerError>;
}

/// Renders the wrapper script shared by the built-in adapters.
#[must_use]
pub fn wrapper_script(job: &JobRecord, directives: &[String]) -> String {
    let mut lines = vec!["#!/usr/bin/env bash".to_string()];
    lines.extend(directives.iter().cloned());
    lines.push(format!("# {} wrapped by procflow", job.label()));
    lines.push(format!("rm -f {}", quote_path(&job.rc_file())));
    lines.push(format!("cd {} || exit 1", quote_path(&job.metadir)));
    lines.push(format!(
        "{} 1>{} 2>{}",
        shell_join(&job.cmd),
        quote_path(&job.stdout_file()),
        quote_path(&job.stderr_file())
    ));
    lines.push("rc=$?".to_string());
    lines.push(format!("echo $rc > {}", quote_path(&job.rc_file())));
    lines.push("exit $rc".to_string());
    lines.push(String::new());
    lines.join("\n")
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Status of a job the backend no longer knows about, taken from its `job.rc`.
#[must_use]
pub fn finished_status(rc_file: &Path) -> PollStatus {
    match read_rc(rc_file) {
        Some(0) => PollStatus::Succeeded,
        _ => PollStatus::Failed,
    }
}

/// Formats a scheduler option as command line flag text.
///
/// Single-letter keys become `-k value`, longer keys `--key=value` (or
/// `--key value` when `long_sep` is a space). `true` yields a bare flag and
/// `false`/null drop the option.
#[must_use]
pub fn option_flag(key: &str, value: &Value, long_sep: char) -> Option<String> {
    let value = match value {
        Value::Bool(false) | Value::Null => return None,
        Value::Bool(true) => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    };
    let dash = if key.chars().count() == 1 { "-" } else { "--" };
    Some(match value {
        None => format!("{dash}{key}"),
        Some(v) if dash == "-" => format!("-{key} {v}"),
        Some(v) => format!("--{key}{long_sep}{v}"),
    })
}

/// Resolves scheduler names to adapters.
#[derive(Debug, Default, Clone)]
pub struct SchedulerRegistry {
    custom: HashMap<String, Arc<dyn SchedulerAdapter>>,
}

impl SchedulerRegistry {
    /// Creates a registry with only the built-in adapters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter instance under `name`, shadowing any built-in.
    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn SchedulerAdapter>) {
        self.custom.insert(name.into(), adapter);
    }

    /// Returns the adapter for `name`, configured with `opts`.
    pub fn resolve(
        &self,
        name: &str,
        opts: &serde_json::Map<String, Value>,
    ) -> Result<Arc<dyn SchedulerAdapter>, DeclarationError> {
        if let Some(adapter) = self.custom.get(name) {
            return Ok(Arc::clone(adapter));
        }
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
        match name {
            "local" => Ok(Arc::new(LocalScheduler::new(Arc::clone(&runner)))),
            "sge" => Ok(Arc::new(SgeScheduler::new(opts.clone(), runner))),
            "slurm" => Ok(Arc::new(SlurmScheduler::new(opts.clone(), runner))),
            "ssh" => Ok(Arc::new(SshScheduler::new(opts.clone(), runner))),
            other => Err(DeclarationError::NoSuchScheduler {
                name: other.to_string(),
            }),
        }
    }
}
