//! Runs jobs as child processes of the controller.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::errors::SchedulerError;
use crate::job::JobRecord;
use crate::scheduler::command::{CommandRunner, TokioCommandRunner};
use crate::scheduler::{finished_status, JobHandle, PollStatus, SchedulerAdapter, Submission};

const NAME: &str = "local";

/// Spawns `bash job.wrapped.local` per job and tracks the children.
///
/// On unix every wrapper leads its own process group, so killing a job
/// also stops the job script and anything it started.
pub struct LocalScheduler {
    children: DashMap<String, Child>,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("running", &self.children.len())
            .finish_non_exhaustive()
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new(Arc::new(TokioCommandRunner))
    }
}

impl LocalScheduler {
    /// Creates a local scheduler signalling process groups through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            children: DashMap::new(),
            runner,
        }
    }

    /// Returns the number of children still tracked.
    #[must_use]
    pub fn running(&self) -> usize {
        self.children.len()
    }
}

#[async_trait]
impl SchedulerAdapter for LocalScheduler {
    fn name(&self) -> &str {
        NAME
    }

    async fn submit(&self, job: &JobRecord) -> Result<Submission, SchedulerError> {
        let wrapped = job.wrapped_script(NAME);
        let mut command = Command::new("bash");
        command
            .arg(&wrapped)
            .current_dir(&job.metadir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let child = command
            .spawn()
            .map_err(|e| SchedulerError::command(NAME, format!("bash {}: {e}", wrapped.display())))?;

        let id = child.id().map_or_else(
            || format!("{}-{}", job.proc, job.index),
            |pid| pid.to_string(),
        );
        tokio::fs::write(job.jid_file(), &id)
            .await
            .map_err(|e| SchedulerError::prepare(NAME, e.to_string()))?;
        debug!(job = %job.label(), pid = %id, "Spawned local job");

        self.children.insert(id.clone(), child);
        Ok(Submission::Accepted(JobHandle {
            id,
            index: job.index,
            rc_file: job.rc_file(),
        }))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus, SchedulerError> {
        let exit = {
            let Some(mut child) = self.children.get_mut(&handle.id) else {
                return Ok(finished_status(&handle.rc_file));
            };
            child
                .try_wait()
                .map_err(|e| SchedulerError::command(NAME, e.to_string()))?
        };

        match exit {
            None => Ok(PollStatus::Running),
            Some(status) => {
                self.children.remove(&handle.id);
                if status.success() {
                    Ok(PollStatus::Succeeded)
                } else {
                    Ok(PollStatus::Failed)
                }
            }
        }
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        if let Some((_, mut child)) = self.children.remove(&handle.id) {
            if let Some(pgid) = child.id() {
                self.terminate_group(pgid).await;
            }
            child
                .kill()
                .await
                .map_err(|e| SchedulerError::command(NAME, e.to_string()))?;
        }
        Ok(())
    }
}

impl LocalScheduler {
    /// Sends SIGTERM to the process group led by the wrapper.
    async fn terminate_group(&self, pgid: u32) {
        if cfg!(not(unix)) {
            return;
        }
        let args = vec!["-c".to_string(), format!("kill -TERM -- -{pgid}")];
        match self.runner.run("bash", &args).await {
            Ok(output) if output.success() => debug!(pgid, "Terminated process group"),
            Ok(output) => debug!(pgid, stderr = %output.stderr.trim(), "Process group already gone"),
            Err(e) => warn!(pgid, error = %e, "Cannot signal process group"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    fn prepared_job(root: &Path, script: &str) -> JobRecord {
        let metadir = root.join("P").join("0");
        std::fs::create_dir_all(&metadir).unwrap();
        let mut job = JobRecord::new("P", 0, metadir.clone(), metadir.join("output"));
        std::fs::write(job.script_file(), script).unwrap();
        job.cmd = vec!["bash".to_string(), job.script_file().to_string_lossy().into_owned()];
        job
    }

    async fn wait(scheduler: &LocalScheduler, handle: &JobHandle) -> PollStatus {
        loop {
            let status = scheduler.poll(handle).await.unwrap();
            if status.is_finished() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_local_success_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let job = prepared_job(dir.path(), "echo hello\necho oops >&2\n");
        let scheduler = LocalScheduler::default();
        scheduler.wrap(&job).await.unwrap();

        let Submission::Accepted(handle) = scheduler.submit(&job).await.unwrap() else {
            panic!("local scheduler rejected the job");
        };
        assert_eq!(wait(&scheduler, &handle).await, PollStatus::Succeeded);
        assert_eq!(std::fs::read_to_string(job.stdout_file()).unwrap().trim(), "hello");
        assert_eq!(std::fs::read_to_string(job.stderr_file()).unwrap().trim(), "oops");
        assert_eq!(job.rc(), Some(0));
        assert!(job.jid_file().exists());
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test]
    async fn test_local_failure_records_rc() {
        let dir = tempfile::tempdir().unwrap();
        let job = prepared_job(dir.path(), "exit 4\n");
        let scheduler = LocalScheduler::default();
        scheduler.wrap(&job).await.unwrap();
        let Submission::Accepted(handle) = scheduler.submit(&job).await.unwrap() else {
            panic!("local scheduler rejected the job");
        };
        assert_eq!(wait(&scheduler, &handle).await, PollStatus::Failed);
        assert_eq!(job.rc(), Some(4));
    }

    #[tokio::test]
    async fn test_local_kill_stops_job_script() {
        let dir = tempfile::tempdir().unwrap();
        let job = prepared_job(dir.path(), "sleep 1\ntouch marker\n");
        let scheduler = LocalScheduler::default();
        scheduler.wrap(&job).await.unwrap();
        let Submission::Accepted(handle) = scheduler.submit(&job).await.unwrap() else {
            panic!("local scheduler rejected the job");
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scheduler.poll(&handle).await.unwrap(), PollStatus::Running);
        scheduler.kill(&handle).await.unwrap();
        assert_eq!(scheduler.running(), 0);
        // Killed before writing job.rc.
        assert_eq!(scheduler.poll(&handle).await.unwrap(), PollStatus::Failed);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!job.metadir.join("marker").exists());
        assert_eq!(job.rc(), None);
    }

    #[tokio::test]
    async fn test_local_kill_signals_process_group() {
        use crate::scheduler::command::{CommandOutput, MockCommandRunner};

        let dir = tempfile::tempdir().unwrap();
        let job = prepared_job(dir.path(), "sleep 5\n");
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args| program == "bash" && args[1].starts_with("kill -TERM -- -"))
            .times(1)
            .returning(|_, _| Ok(CommandOutput::default()));
        let scheduler = LocalScheduler::new(Arc::new(runner));
        scheduler.wrap(&job).await.unwrap();
        let Submission::Accepted(handle) = scheduler.submit(&job).await.unwrap() else {
            panic!("local scheduler rejected the job");
        };
        let pgid = std::fs::read_to_string(job.jid_file()).unwrap();
        assert_eq!(handle.id, pgid);
        scheduler.kill(&handle).await.unwrap();
        assert_eq!(scheduler.running(), 0);
    }
}
