//! Runs jobs on remote hosts over ssh.
//!
//! Hosts must share the workdir with the controller; the wrapper writes its
//! files through that shared filesystem.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::errors::SchedulerError;
use crate::job::JobRecord;
use crate::scheduler::{
    finished_status, CommandOutput, CommandRunner, JobHandle, PollStatus, SchedulerAdapter,
    Submission,
};
use crate::utils::shell_quote;

const NAME: &str = "ssh";

/// Distributes jobs round-robin over `servers`.
///
/// Options: `servers` (list, default `["localhost"]`), `ssh` (client
/// program) and `ssh_args` (extra client arguments).
pub struct SshScheduler {
    servers: Vec<String>,
    ssh: String,
    ssh_args: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for SshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshScheduler")
            .field("servers", &self.servers)
            .field("ssh", &self.ssh)
            .finish_non_exhaustive()
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

impl SshScheduler {
    /// Creates the adapter.
    #[must_use]
    pub fn new(opts: serde_json::Map<String, Value>, runner: Arc<dyn CommandRunner>) -> Self {
        let mut servers = string_list(opts.get("servers"));
        if servers.is_empty() {
            servers.push("localhost".to_string());
        }
        Self {
            servers,
            ssh: opts
                .get("ssh")
                .and_then(Value::as_str)
                .unwrap_or("ssh")
                .to_string(),
            ssh_args: string_list(opts.get("ssh_args")),
            runner,
        }
    }

    fn server_for(&self, index: usize) -> &str {
        &self.servers[index % self.servers.len()]
    }

    async fn remote(&self, server: &str, command: String) -> Result<CommandOutput, SchedulerError> {
        let mut args = self.ssh_args.clone();
        args.push(server.to_string());
        args.push(command);
        self.runner
            .run(&self.ssh, &args)
            .await
            .map_err(|e| SchedulerError::command(NAME, format!("{e:#}")))
    }

    fn split_handle(handle: &JobHandle) -> Result<(&str, &str), SchedulerError> {
        handle
            .id
            .rsplit_once(':')
            .ok_or_else(|| SchedulerError::UnknownHandle {
                scheduler: NAME.to_string(),
                handle: handle.id.clone(),
            })
    }
}

#[async_trait]
impl SchedulerAdapter for SshScheduler {
    fn name(&self) -> &str {
        NAME
    }

    async fn submit(&self, job: &JobRecord) -> Result<Submission, SchedulerError> {
        let server = self.server_for(job.index);
        let command = format!(
            "cd {} && nohup bash {} >/dev/null 2>&1 & echo $!",
            shell_quote(&job.metadir.to_string_lossy()),
            shell_quote(&job.wrapped_script(NAME).to_string_lossy()),
        );
        let output = self.remote(server, command).await?;
        if !output.success() {
            return Ok(Submission::Rejected(format!(
                "{server}: {}",
                output.stderr.trim()
            )));
        }
        let pid: u32 = output.stdout.trim().parse().map_err(|_| {
            SchedulerError::protocol(NAME, format!("expected a pid, got {:?}", output.stdout.trim()))
        })?;
        let id = format!("{server}:{pid}");
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
        let (server, pid) = Self::split_handle(handle)?;
        let output = self.remote(server, format!("kill -0 {pid}")).await?;
        if output.success() {
            Ok(PollStatus::Running)
        } else {
            Ok(finished_status(&handle.rc_file))
        }
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        let (server, pid) = Self::split_handle(handle)?;
        self.remote(server, format!("kill -9 {pid}")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::MockCommandRunner;
    use serde_json::json;

    fn opts() -> serde_json::Map<String, Value> {
        let mut opts = serde_json::Map::new();
        opts.insert("servers".to_string(), json!(["node1", "node2"]));
        opts.insert("ssh_args".to_string(), json!(["-o", "BatchMode=yes"]));
        opts
    }

    #[tokio::test]
    async fn test_submit_round_robin() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args| program == "ssh" && args[2] == "node2" && args[3].contains("nohup bash"))
            .times(1)
            .returning(|_, _| {
                Ok(CommandOutput {
                    status: 0,
                    stdout: "5151\n".to_string(),
                    stderr: String::new(),
                })
            });
        let scheduler = SshScheduler::new(opts(), Arc::new(runner));
        let job = JobRecord::new("P", 1, dir.path().to_path_buf(), dir.path().join("output"));
        let Submission::Accepted(handle) = scheduler.submit(&job).await.unwrap() else {
            panic!("expected acceptance");
        };
        assert_eq!(handle.id, "node2:5151");
        assert_eq!(std::fs::read_to_string(job.jid_file()).unwrap(), "node2:5151");
    }

    #[tokio::test]
    async fn test_poll_and_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args| args.last().is_some_and(|c| c == "kill -0 77"))
            .times(1)
            .returning(|_, _| Ok(CommandOutput { status: 1, ..CommandOutput::default() }));
        runner
            .expect_run()
            .withf(|_, args| args.last().is_some_and(|c| c == "kill -9 77"))
            .times(1)
            .returning(|_, _| Ok(CommandOutput::default()));
        let scheduler = SshScheduler::new(opts(), Arc::new(runner));
        let handle = JobHandle {
            id: "node1:77".to_string(),
            index: 0,
            rc_file: dir.path().join("job.rc"),
        };
        std::fs::write(&handle.rc_file, "0").unwrap();
        assert_eq!(scheduler.poll(&handle).await.unwrap(), PollStatus::Succeeded);
        scheduler.kill(&handle).await.unwrap();
    }

    #[test]
    fn test_default_server() {
        let scheduler = SshScheduler::new(serde_json::Map::new(), Arc::new(MockCommandRunner::new()));
        assert_eq!(scheduler.server_for(5), "localhost");
    }
}
