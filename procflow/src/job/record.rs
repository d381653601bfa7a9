//! Per-job data and state.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

use crate::core::{InputType, JobStatus, OutputType};
use crate::utils::fs::read_rc;

/// An input path and the link to it inside the job's `input/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedPath {
    /// Absolute path of the original file or directory.
    pub source: PathBuf,
    /// Path handed to the script.
    pub staged: PathBuf,
}

/// A resolved input value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobInput {
    /// A plain value.
    Var(Value),
    /// A `file` or `dir` input.
    Path(StagedPath),
    /// A `files` or `dirs` input.
    Paths(Vec<StagedPath>),
    /// No data was available.
    Null,
}

impl JobInput {
    /// Returns the value exposed to templates.
    #[must_use]
    pub fn template_value(&self) -> Value {
        match self {
            Self::Var(v) => v.clone(),
            Self::Path(p) => Value::String(p.staged.to_string_lossy().into_owned()),
            Self::Paths(ps) => Value::Array(
                ps.iter()
                    .map(|p| Value::String(p.staged.to_string_lossy().into_owned()))
                    .collect(),
            ),
            Self::Null => Value::Null,
        }
    }

    /// Returns the value recorded in the signature; paths are the original sources.
    #[must_use]
    pub fn signature_value(&self) -> Value {
        match self {
            Self::Var(v) => v.clone(),
            Self::Path(p) => Value::String(p.source.to_string_lossy().into_owned()),
            Self::Paths(ps) => Value::Array(
                ps.iter()
                    .map(|p| Value::String(p.source.to_string_lossy().into_owned()))
                    .collect(),
            ),
            Self::Null => Value::Null,
        }
    }

    /// Returns the source paths this input refers to.
    #[must_use]
    pub fn source_paths(&self) -> Vec<&Path> {
        match self {
            Self::Path(p) => vec![p.source.as_path()],
            Self::Paths(ps) => ps.iter().map(|p| p.source.as_path()).collect(),
            Self::Var(_) | Self::Null => Vec::new(),
        }
    }
}

/// A resolved output value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    /// A plain value.
    Var(String),
    /// A file or directory under the job output directory.
    Path(PathBuf),
}

impl JobOutput {
    /// Returns the value exposed to templates and output tables.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Var(s) => Value::String(s.clone()),
            Self::Path(p) => Value::String(p.to_string_lossy().into_owned()),
        }
    }
}

/// One job: a row of a process's input table and everything derived from it.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Row index, stable for the run.
    pub index: usize,
    /// Owning process.
    pub proc: String,
    /// Private metadata directory holding `job.*` files.
    pub metadir: PathBuf,
    /// Directory output paths are rooted under.
    pub outdir: PathBuf,
    /// Declared input types.
    pub input_types: IndexMap<String, InputType>,
    /// Resolved inputs.
    pub input: IndexMap<String, JobInput>,
    /// Declared output types.
    pub output_types: IndexMap<String, OutputType>,
    /// Resolved outputs.
    pub output: IndexMap<String, JobOutput>,
    /// Rendered script.
    pub script: String,
    /// Command that runs the script.
    pub cmd: Vec<String>,
    /// Attempts that were retried.
    pub retry_count: u32,
    /// Failed, but the error strategy ignores it.
    pub failure_ignored: bool,
    /// Killed while in flight.
    pub killed: bool,
    /// Reason the job failed without producing an exit code.
    pub error: Option<String>,
    status: JobStatus,
}

impl JobRecord {
    /// Creates a pending job.
    #[must_use]
    pub fn new(proc: impl Into<String>, index: usize, metadir: PathBuf, outdir: PathBuf) -> Self {
        Self {
            index,
            proc: proc.into(),
            metadir,
            outdir,
            input_types: IndexMap::new(),
            input: IndexMap::new(),
            output_types: IndexMap::new(),
            output: IndexMap::new(),
            script: String::new(),
            cmd: Vec::new(),
            retry_count: 0,
            failure_ignored: false,
            killed: false,
            error: None,
            status: JobStatus::Pending,
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Moves to `next`, logging illegal transitions.
    pub fn set_status(&mut self, next: JobStatus) {
        if !self.status.can_transition_to(next) {
            warn!(
                proc = %self.proc,
                index = self.index,
                from = %self.status,
                to = %next,
                "Unexpected job status transition"
            );
        }
        trace!(proc = %self.proc, index = self.index, from = %self.status, to = %next, "Job status");
        self.status = next;
    }

    /// Returns a short label such as `P1#3`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}#{}", self.proc, self.index)
    }

    /// Path of the rendered script.
    #[must_use]
    pub fn script_file(&self) -> PathBuf {
        self.metadir.join("job.script")
    }

    /// Path of the captured stdout.
    #[must_use]
    pub fn stdout_file(&self) -> PathBuf {
        self.metadir.join("job.stdout")
    }

    /// Path of the captured stderr.
    #[must_use]
    pub fn stderr_file(&self) -> PathBuf {
        self.metadir.join("job.stderr")
    }

    /// Path of the exit code file.
    #[must_use]
    pub fn rc_file(&self) -> PathBuf {
        self.metadir.join("job.rc")
    }

    /// Path of the scheduler job id file.
    #[must_use]
    pub fn jid_file(&self) -> PathBuf {
        self.metadir.join("job.jid")
    }

    /// Path of the signature file.
    #[must_use]
    pub fn signature_file(&self) -> PathBuf {
        self.metadir.join("job.signature")
    }

    /// Path of the scheduler submission unit.
    #[must_use]
    pub fn wrapped_script(&self, scheduler: &str) -> PathBuf {
        self.metadir.join(format!("job.wrapped.{scheduler}"))
    }

    /// Directory holding staged input links.
    #[must_use]
    pub fn input_dir(&self) -> PathBuf {
        self.metadir.join("input")
    }

    /// Exit code of the last attempt, if recorded.
    #[must_use]
    pub fn rc(&self) -> Option<i32> {
        read_rc(&self.rc_file())
    }

    /// File-typed outputs, which must exist after a successful run.
    #[must_use]
    pub fn output_paths(&self) -> Vec<(&str, &Path, OutputType)> {
        self.output
            .iter()
            .filter_map(|(name, value)| match value {
                JobOutput::Path(p) => Some((
                    name.as_str(),
                    p.as_path(),
                    self.output_types.get(name).copied().unwrap_or(OutputType::File),
                )),
                JobOutput::Var(_) => None,
            })
            .collect()
    }

    /// The data tree templates are rendered against.
    #[must_use]
    pub fn template_data(&self, args: &serde_json::Map<String, Value>) -> Value {
        let input: serde_json::Map<String, Value> = self
            .input
            .iter()
            .map(|(k, v)| (k.clone(), v.template_value()))
            .collect();
        let output: serde_json::Map<String, Value> = self
            .output
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        json!({
            "in": input,
            "out": output,
            "job": {
                "index": self.index,
                "workdir": self.metadir.to_string_lossy(),
                "outdir": self.outdir.to_string_lossy(),
                "stdout_path": self.stdout_file().to_string_lossy(),
                "stderr_path": self.stderr_file().to_string_lossy(),
            },
            "proc": args,
        })
    }
}
