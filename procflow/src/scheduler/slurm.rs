//! Slurm adapter (`sbatch`, `squeue`, `scancel`).

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::errors::SchedulerError;
use crate::job::JobRecord;
use crate::scheduler::{
    finished_status, option_flag, CommandRunner, JobHandle, PollStatus, SchedulerAdapter,
    Submission,
};

const NAME: &str = "slurm";
const COMMAND_KEYS: [&str; 3] = ["sbatch", "squeue", "scancel"];

/// Submits wrapper scripts with `#SBATCH` directives.
pub struct SlurmScheduler {
    opts: serde_json::Map<String, Value>,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for SlurmScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlurmScheduler").field("opts", &self.opts).finish_non_exhaustive()
    }
}

impl SlurmScheduler {
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

    async fn run(&self, key: &str, args: Vec<String>) -> Result<crate::scheduler::CommandOutput, SchedulerError> {
        self.runner
            .run(&self.program(key), &args)
            .await
            .map_err(|e| SchedulerError::command(NAME, format!("{e:#}")))
    }
}

#[async_trait]
impl SchedulerAdapter for SlurmScheduler {
    fn name(&self) -> &str {
        NAME
    }

    fn directives(&self, job: &JobRecord) -> Vec<String> {
        let mut lines = vec![
            format!("#SBATCH --job-name={}.{}", job.proc, job.index),
            "#SBATCH --output=/dev/null".to_string(),
            "#SBATCH --error=/dev/null".to_string(),
        ];
        lines.extend(
            self.opts
                .iter()
                .filter(|(key, _)| !COMMAND_KEYS.contains(&key.as_str()))
                .filter_map(|(key, value)| option_flag(key, value, '='))
                .map(|flag| format!("#SBATCH {flag}")),
        );
        lines
    }

    async fn submit(&self, job: &JobRecord) -> Result<Submission, SchedulerError> {
        let wrapped = job.wrapped_script(NAME).to_string_lossy().into_owned();
        let output = self.run("sbatch", vec!["--parsable".to_string(), wrapped]).await?;
        if !output.success() {
            return Ok(Submission::Rejected(output.stderr.trim().to_string()));
        }
        // `--parsable` prints `jobid[;cluster]`.
        let id = output
            .stdout
            .trim()
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();
        if id.is_empty() {
            return Err(SchedulerError::protocol(NAME, "sbatch printed no job id"));
        }
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
        let args = ["-h", "-j", handle.id.as_str(), "-o", "%t"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let output = self.run("squeue", args).await?;
        let state = output.stdout.trim();
        if !output.success() || state.is_empty() {
            return Ok(finished_status(&handle.rc_file));
        }
        Ok(match state {
            "PD" | "CF" => PollStatus::Queued,
            _ => PollStatus::Running,
        })
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        self.run("scancel", vec![handle.id.clone()]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{CommandOutput, MockCommandRunner};
    use serde_json::json;

    fn stdout(text: &str) -> CommandOutput {
        CommandOutput {
            status: 0,
            stdout: text.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_directives() {
        let mut opts = serde_json::Map::new();
        opts.insert("partition".to_string(), json!("short"));
        opts.insert("sbatch".to_string(), json!("/usr/bin/sbatch"));
        let scheduler = SlurmScheduler::new(opts, Arc::new(MockCommandRunner::new()));
        let job = JobRecord::new("Align", 2, "/w".into(), "/w/output".into());
        let lines = scheduler.directives(&job);
        assert_eq!(lines[0], "#SBATCH --job-name=Align.2");
        assert!(lines.contains(&"#SBATCH --partition=short".to_string()));
        assert_eq!(lines.len(), 4);
    }

    #[tokio::test]
    async fn test_submit_parses_cluster_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args| program == "sbatch" && args[0] == "--parsable")
            .returning(|_, _| Ok(stdout("1234;cluster-a\n")));
        let scheduler = SlurmScheduler::new(serde_json::Map::new(), Arc::new(runner));
        let job = JobRecord::new("P", 0, dir.path().to_path_buf(), dir.path().join("output"));
        let Submission::Accepted(handle) = scheduler.submit(&job).await.unwrap() else {
            panic!("expected acceptance");
        };
        assert_eq!(handle.id, "1234");
    }

    #[tokio::test]
    async fn test_poll_states() {
        let dir = tempfile::tempdir().unwrap();
        let rc_file = dir.path().join("job.rc");
        let mut runner = MockCommandRunner::new();
        let mut replies = vec![stdout(""), stdout("R\n"), stdout("PD\n")];
        runner
            .expect_run()
            .times(3)
            .returning(move |_, _| Ok(replies.pop().unwrap_or_default()));
        let scheduler = SlurmScheduler::new(serde_json::Map::new(), Arc::new(runner));
        let handle = JobHandle {
            id: "9".to_string(),
            index: 0,
            rc_file: rc_file.clone(),
        };

        assert_eq!(scheduler.poll(&handle).await.unwrap(), PollStatus::Queued);
        assert_eq!(scheduler.poll(&handle).await.unwrap(), PollStatus::Running);
        std::fs::write(&rc_file, "1").unwrap();
        assert_eq!(scheduler.poll(&handle).await.unwrap(), PollStatus::Failed);
    }
}
