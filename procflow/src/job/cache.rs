//! Job signatures and the cache check.
//!
//! A signature records the input and output type/value maps of a job and the
//! newest mtime among its script and file-typed entries (`ctime`). A job is
//! reused when a later run computes the same maps and nothing on disk is
//! newer than the stored `ctime`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use tracing::debug;

use crate::core::{CacheMode, InputType, OutputType};
use crate::job::record::{JobInput, JobOutput, JobRecord};
use crate::utils::fs::{get_mtime, remove_path};

/// Slack allowed when comparing mtimes, in seconds.
pub const MTIME_EPSILON: f64 = 1e-3;

/// Type and value maps of one side of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureSection {
    /// Declared types.
    #[serde(rename = "type")]
    pub types: IndexMap<String, String>,
    /// Values; paths are recorded as strings.
    pub data: IndexMap<String, Value>,
}

/// The persisted snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Inputs.
    pub input: SignatureSection,
    /// Outputs.
    pub output: SignatureSection,
    /// Newest relevant mtime; `None` stands for +infinity.
    pub ctime: Option<f64>,
}

impl Signature {
    /// Computes the signature of `job` as it is on disk now.
    #[must_use]
    pub fn compute(job: &JobRecord, dirsig: u32) -> Self {
        let mut max_mtime = get_mtime(&job.script_file(), 0);

        let mut input = SignatureSection::default();
        for (key, itype) in &job.input_types {
            input.types.insert(key.clone(), itype.to_string());
            let value = job.input.get(key).unwrap_or(&JobInput::Null);
            for path in value.source_paths() {
                max_mtime = max_mtime.max(get_mtime(path, dirsig));
            }
            input.data.insert(key.clone(), value.signature_value());
        }

        let mut output = SignatureSection::default();
        for (key, otype) in &job.output_types {
            output.types.insert(key.clone(), otype.to_string());
            let value = job
                .output
                .get(key)
                .map_or(Value::Null, JobOutput::to_value);
            if let Some(JobOutput::Path(path)) = job.output.get(key) {
                max_mtime = max_mtime.max(get_mtime(path, dirsig));
            }
            output.data.insert(key.clone(), value);
        }

        Self {
            input,
            output,
            ctime: if max_mtime == 0.0 { None } else { Some(max_mtime) },
        }
    }

    /// Returns `ctime`, with `None` as +infinity.
    #[must_use]
    pub fn ctime_value(&self) -> f64 {
        self.ctime.unwrap_or(f64::INFINITY)
    }

    /// Reads a signature file.
    pub fn load(job: &JobRecord) -> io::Result<Self> {
        let content = fs::read_to_string(job.signature_file())?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Cache policy of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCache {
    mode: CacheMode,
    dirsig: u32,
}

impl JobCache {
    /// Creates a cache for the given mode and directory depth.
    #[must_use]
    pub fn new(mode: CacheMode, dirsig: u32) -> Self {
        Self { mode, dirsig }
    }

    /// Returns the cache mode.
    #[must_use]
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Decides whether the previous result of `job` can be reused.
    #[must_use]
    pub fn cached(&self, job: &JobRecord) -> bool {
        let label = job.label();
        if self.mode == CacheMode::Off {
            debug!(job = %label, "Not cached (cache is off)");
            return false;
        }
        if job.rc() != Some(0) {
            debug!(job = %label, "Not cached (job.rc != 0)");
            return false;
        }
        let stored = match Signature::load(job) {
            Ok(sig) => sig,
            Err(e) => {
                debug!(job = %label, error = %e, "Not cached (no usable signature)");
                return false;
            }
        };
        if self.mode == CacheMode::Force {
            if let Err(e) = self.write(job) {
                debug!(job = %label, error = %e, "Not cached (failed to refresh signature)");
                return false;
            }
            return true;
        }

        match self.invalidation(job, &stored) {
            Some(reason) => {
                debug!(job = %label, "Not cached ({reason})");
                false
            }
            None => true,
        }
    }

    /// Returns why `stored` no longer matches `job`, or `None` if it does.
    fn invalidation(&self, job: &JobRecord, stored: &Signature) -> Option<String> {
        let current = Signature::compute(job, self.dirsig);
        if stored.input.types != current.input.types || stored.output.types != current.output.types {
            return Some("input or output types are different".to_string());
        }

        let limit = stored.ctime_value() + MTIME_EPSILON;
        let script_mtime = get_mtime(&job.script_file(), 0);
        if script_mtime > limit {
            return Some(format!("script file is newer: {script_mtime} > {limit}"));
        }

        for (key, itype) in &job.input_types {
            let stored_value = stored.input.data.get(key).unwrap_or(&Value::Null);
            let value = job.input.get(key).unwrap_or(&JobInput::Null);
            if *stored_value != value.signature_value() {
                return Some(format!("input {key}:{itype} is different"));
            }
            if *itype != InputType::Var {
                for path in value.source_paths() {
                    if get_mtime(path, self.dirsig) > limit {
                        return Some(format!("input {key}:{itype} is newer"));
                    }
                }
            }
        }

        for (key, otype) in &job.output_types {
            let stored_value = stored.output.data.get(key).unwrap_or(&Value::Null);
            let value = job.output.get(key).map_or(Value::Null, JobOutput::to_value);
            if *stored_value != value {
                return Some(format!("output {key}:{otype} is different"));
            }
            if let Some(JobOutput::Path(path)) = job.output.get(key) {
                if fs::symlink_metadata(path).is_err() {
                    return Some(format!("output {key}:{otype} was removed"));
                }
                if get_mtime(path, self.dirsig) > limit {
                    return Some(format!("output {key}:{otype} is newer"));
                }
            }
        }
        None
    }

    /// Persists the current signature of `job`.
    pub fn write(&self, job: &JobRecord) -> io::Result<()> {
        let signature = Signature::compute(job, self.dirsig);
        let content = serde_json::to_string_pretty(&signature)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(job.signature_file(), content)
    }

    /// Removes stale file outputs of a job that is about to rerun; directories are recreated empty.
    pub fn clear_outputs(job: &JobRecord) -> io::Result<()> {
        for (_, path, otype) in job.output_paths() {
            remove_path(path)?;
            if otype == OutputType::Dir {
                fs::create_dir_all(path)?;
            }
        }
        Ok(())
    }
}
