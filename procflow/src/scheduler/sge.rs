//! Sun Grid Engine adapter (`qsub`, `qstat`, `qdel`).

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::errors::SchedulerError;
use crate::job::JobRecord;
use crate::scheduler::{
    finished_status, option_flag, CommandRunner, JobHandle, PollStatus, SchedulerAdapter,
    Submission,
};

const NAME: &str = "sge";

/// Submits wrapper scripts with `#$` directives through `qsub`.
///
/// Options: `qsub`, `qstat`, `qdel` override the command paths; every other
/// option becomes a `#$ -key value` directive.
pub struct SgeScheduler {
    opts: serde_json::Map<String, Value>,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for SgeScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SgeScheduler").field("opts", &self.opts).finish_non_exhaustive()
    }
}

impl SgeScheduler {
    /// Creates the adapter.
    #[must_use]
    pub fn new(opts: serde_json::Map<String, Value>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { opts, runner }
    }

    fn program(&self, key: &str) -> String {
        self.opts
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(key)
            .to_string()
    }

    /// Extracts the job id from `qsub` output.
    pub fn parse_job_id(stdout: &str) -> Result<String, SchedulerError> {
        let pattern = Regex::new(r"Your job(?:-array)? (\d+)")
            .map_err(|e| SchedulerError::protocol(NAME, e.to_string()))?;
        pattern
            .captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SchedulerError::protocol(NAME, format!("cannot find job id in: {}", stdout.trim())))
    }
}

#[async_trait]
impl SchedulerAdapter for SgeScheduler {
    fn name(&self) -> &str {
        NAME
    }

    fn directives(&self, job: &JobRecord) -> Vec<String> {
        let mut lines = vec![
            format!("#$ -N {}.{}", job.proc, job.index),
            "#$ -o /dev/null".to_string(),
            "#$ -e /dev/null".to_string(),
        ];
        for (key, value) in &self.opts {
            if matches!(key.as_str(), "qsub" | "qstat" | "qdel") {
                continue;
            }
            if let Some(flag) = option_flag(key, value, ' ') {
                // SGE takes single-dash long options.
                lines.push(format!("#$ {}", flag.replacen("--", "-", 1)));
            }
        }
        lines
    }

    async fn submit(&self, job: &JobRecord) -> Result<Submission, SchedulerError> {
        let wrapped = job.wrapped_script(NAME).to_string_lossy().into_owned();
        let output = self
            .runner
            .run(&self.program("qsub"), &[wrapped])
            .await
            .map_err(|e| SchedulerError::command(NAME, format!("{e:#}")))?;
        if !output.success() {
            return Ok(Submission::Rejected(output.stderr.trim().to_string()));
        }
        let id = Self::parse_job_id(&output.stdout)?;
        tokio::fs::write(job.jid_file(), &id)
            .await
            .map_err(|e| SchedulerError::prepare(NAME, e.to_string()))?;
        Ok(Submission::Accepted(JobHandle {
            id,
            index: job.index,
            rc_file: job.rc_file(),
        }))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus, SchedulerError> {
        let output = self
            .runner
            .run(&self.program("qstat"), &["-j".to_string(), handle.id.clone()])
            .await
            .map_err(|e| SchedulerError::command(NAME, format!("{e:#}")))?;
        if output.success() {
            Ok(PollStatus::Running)
        } else {
            Ok(finished_status(&handle.rc_file))
        }
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        self.runner
            .run(&self.program("qdel"), &[handle.id.clone()])
            .await
            .map_err(|e| SchedulerError::command(NAME, format!("{e:#}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{CommandOutput, MockCommandRunner};
    use serde_json::json;
    use std::path::PathBuf;

    fn job(root: &std::path::Path) -> JobRecord {
        JobRecord::new("P1", 3, root.to_path_buf(), root.join("output"))
    }

    #[test]
    fn test_parse_job_id() {
        let id = SgeScheduler::parse_job_id("Your job 4242 (\"P1.3\") has been submitted\n").unwrap();
        assert_eq!(id, "4242");
        assert!(SgeScheduler::parse_job_id("qsub: error").is_err());
    }

    #[test]
    fn test_directives_from_options() {
        let mut opts = serde_json::Map::new();
        opts.insert("q".to_string(), json!("all.q"));
        opts.insert("notify".to_string(), json!(true));
        opts.insert("qsub".to_string(), json!("/opt/sge/bin/qsub"));
        let scheduler = SgeScheduler::new(opts, Arc::new(MockCommandRunner::new()));
        let lines = scheduler.directives(&job(&PathBuf::from("/w")));
        assert_eq!(lines[0], "#$ -N P1.3");
        assert!(lines.contains(&"#$ -q all.q".to_string()));
        assert!(lines.contains(&"#$ -notify".to_string()));
        assert!(!lines.iter().any(|l| l.contains("qsub")));
    }

    #[tokio::test]
    async fn test_submit_and_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, _| program == "qsub")
            .times(1)
            .returning(|_, _| {
                Ok(CommandOutput {
                    status: 0,
                    stdout: "Your job 7 (\"P1.3\") has been submitted".to_string(),
                    stderr: String::new(),
                })
            });
        runner
            .expect_run()
            .withf(|program, args| program == "qstat" && args == ["-j".to_string(), "7".to_string()])
            .times(1)
            .returning(|_, _| Ok(CommandOutput { status: 1, ..CommandOutput::default() }));

        let scheduler = SgeScheduler::new(serde_json::Map::new(), Arc::new(runner));
        let job = job(dir.path());
        let Submission::Accepted(handle) = scheduler.submit(&job).await.unwrap() else {
            panic!("expected acceptance");
        };
        assert_eq!(handle.id, "7");
        assert_eq!(std::fs::read_to_string(job.jid_file()).unwrap(), "7");

        std::fs::write(job.rc_file(), "0").unwrap();
        assert_eq!(scheduler.poll(&handle).await.unwrap(), PollStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_qsub_failure_is_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _| {
            Ok(CommandOutput {
                status: 2,
                stdout: String::new(),
                stderr: "Unable to run job: quota exceeded".to_string(),
            })
        });
        let scheduler = SgeScheduler::new(serde_json::Map::new(), Arc::new(runner));
        let submission = scheduler.submit(&job(dir.path())).await.unwrap();
        assert_eq!(
            submission,
            Submission::Rejected("Unable to run job: quota exceeded".to_string())
        );
    }
}
