//! A scripted scheduler backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::OutputType;
use crate::errors::SchedulerError;
use crate::job::JobRecord;
use crate::scheduler::{JobHandle, PollStatus, SchedulerAdapter, Submission};

#[derive(Debug)]
struct MockJob {
    index: usize,
    label: String,
    rc_file: PathBuf,
    stdout_file: PathBuf,
    outputs: Vec<(PathBuf, OutputType)>,
    polls: u32,
    fail: bool,
    done: bool,
}

/// A backend that never runs anything.
///
/// A job finishes after `running_polls` polls. On success it writes
/// `job.rc`, `job.stdout` and creates every file or directory output, so
/// the queue and the cache see a finished job.
#[derive(Debug, Default)]
pub struct MockScheduler {
    running_polls: u32,
    fail_first: HashMap<usize, u32>,
    always_fail: HashSet<usize>,
    reject: HashSet<usize>,
    skip_outputs: HashSet<usize>,
    poll_errors: HashSet<usize>,
    jobs: Mutex<HashMap<String, MockJob>>,
    attempts: Mutex<HashMap<usize, u32>>,
    submits: AtomicUsize,
    kills: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockScheduler {
    /// Creates a mock where every job succeeds on its first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs report `Running` for `polls` polls before finishing.
    #[must_use]
    pub fn with_running_polls(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    /// The first `attempts` attempts of job `index` fail.
    #[must_use]
    pub fn failing_first(mut self, index: usize, attempts: u32) -> Self {
        self.fail_first.insert(index, attempts);
        self
    }

    /// Every attempt of job `index` fails.
    #[must_use]
    pub fn always_failing(mut self, index: usize) -> Self {
        self.always_fail.insert(index);
        self
    }

    /// Submissions of job `index` are rejected.
    #[must_use]
    pub fn rejecting(mut self, index: usize) -> Self {
        self.reject.insert(index);
        self
    }

    /// Job `index` exits 0 without creating its outputs.
    #[must_use]
    pub fn without_outputs(mut self, index: usize) -> Self {
        self.skip_outputs.insert(index);
        self
    }

    /// Polling job `index` fails as if the backend went away.
    #[must_use]
    pub fn poll_failing(mut self, index: usize) -> Self {
        self.poll_errors.insert(index);
        self
    }

    /// Number of accepted submissions.
    #[must_use]
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Number of kill requests.
    #[must_use]
    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Accepted submissions of job `index`.
    #[must_use]
    pub fn attempts_of(&self, index: usize) -> u32 {
        self.attempts.lock().get(&index).copied().unwrap_or(0)
    }

    /// Highest number of jobs submitted and not yet finished at one time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn finish(&self, job: &mut MockJob) -> Result<PollStatus, SchedulerError> {
        job.done = true;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let io = |e: std::io::Error| SchedulerError::command("mock", e.to_string());
        std::fs::write(&job.stdout_file, format!("mock run of {}\n", job.label)).map_err(io)?;
        if job.fail {
            std::fs::write(&job.rc_file, "1").map_err(io)?;
            return Ok(PollStatus::Failed);
        }
        if !self.skip_outputs.contains(&job.index) {
            for (path, otype) in &job.outputs {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(io)?;
                }
                match otype {
                    OutputType::Dir => std::fs::create_dir_all(path).map_err(io)?,
                    _ => std::fs::write(path, &job.label).map_err(io)?,
                }
            }
        }
        std::fs::write(&job.rc_file, "0").map_err(io)?;
        Ok(PollStatus::Succeeded)
    }
}

#[async_trait]
impl SchedulerAdapter for MockScheduler {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, job: &JobRecord) -> Result<Submission, SchedulerError> {
        if self.reject.contains(&job.index) {
            return Ok(Submission::Rejected(format!("{} rejected by mock", job.label())));
        }
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(job.index).or_insert(0);
            *count += 1;
            *count
        };
        let fail = self.always_fail.contains(&job.index)
            || self.fail_first.get(&job.index).is_some_and(|n| attempt <= *n);

        self.submits.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let id = format!("{}-{}-{attempt}", job.proc, job.index);
        self.jobs.lock().insert(
            id.clone(),
            MockJob {
                index: job.index,
                label: job.label(),
                rc_file: job.rc_file(),
                stdout_file: job.stdout_file(),
                outputs: job
                    .output_paths()
                    .into_iter()
                    .map(|(_, path, otype)| (path.to_path_buf(), otype))
                    .collect(),
                polls: 0,
                fail,
                done: false,
            },
        );
        Ok(Submission::Accepted(JobHandle {
            id,
            index: job.index,
            rc_file: job.rc_file(),
        }))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus, SchedulerError> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&handle.id)
            .ok_or_else(|| SchedulerError::UnknownHandle {
                scheduler: "mock".to_string(),
                handle: handle.id.clone(),
            })?;
        if self.poll_errors.contains(&job.index) {
            return Err(SchedulerError::command("mock", format!("lost track of {}", job.label)));
        }
        if job.done {
            return Ok(if job.fail { PollStatus::Failed } else { PollStatus::Succeeded });
        }
        job.polls += 1;
        if job.polls <= self.running_polls {
            return Ok(PollStatus::Running);
        }
        self.finish(job)
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if let Some(job) = self.jobs.lock().get_mut(&handle.id) {
            if !job.done {
                job.done = true;
                job.fail = true;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}
