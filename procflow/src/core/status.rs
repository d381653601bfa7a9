//! Job status and stage outcome enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a job.
///
/// ```text
/// PENDING -> CACHED
/// PENDING -> QUEUED -> SUBMITTING -> SUBMITTED -> RUNNING -> SUCCEEDED | FAILED
/// FAILED -> RETRYING -> QUEUED
/// any non-terminal -> KILLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet checked against the cache.
    #[default]
    Pending,
    /// Reused from a previous run.
    Cached,
    /// Waiting for a submission slot.
    Queued,
    /// Being handed to the scheduler.
    Submitting,
    /// Accepted by the scheduler.
    Submitted,
    /// Reported running by the scheduler.
    Running,
    /// Finished with exit code 0 and all outputs present.
    Succeeded,
    /// Finished unsuccessfully.
    Failed,
    /// Failed and scheduled for another attempt.
    Retrying,
    /// Never ran to completion because the stage halted or the run was cancelled.
    Killed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Cached => write!(f, "cached"),
            Self::Queued => write!(f, "queued"),
            Self::Submitting => write!(f, "submitting"),
            Self::Submitted => write!(f, "submitted"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status represents a terminal state.
    ///
    /// `Failed` is terminal once no retry follows it.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cached | Self::Succeeded | Self::Failed | Self::Killed)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Cached | Self::Succeeded)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Killed)
    }

    /// Returns true if the job occupies a scheduler slot in this status.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitting | Self::Submitted | Self::Running)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use JobStatus::{
            Cached, Failed, Killed, Pending, Queued, Retrying, Running, Submitted, Submitting,
            Succeeded,
        };
        match (self, next) {
            (Pending, Cached | Queued | Failed | Killed)
            | (Queued, Submitting | Killed)
            | (Submitting, Submitted | Failed | Killed)
            | (Submitted, Running | Succeeded | Failed | Killed)
            | (Running, Succeeded | Failed | Killed)
            | (Failed, Retrying)
            | (Retrying, Queued | Killed)
            | (Killed, Failed) => true,
            _ => false,
        }
    }
}

/// The aggregate outcome of running one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every job ended cached or succeeded.
    Success,
    /// Some jobs failed, but the error strategy ignores failures.
    Partial,
    /// At least one job failed or was killed.
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunOutcome {
    /// Returns true if downstream stages may run after this outcome.
    #[must_use]
    pub fn allows_continuation(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Cached.to_string(), "cached");
        assert_eq!(JobStatus::Retrying.to_string(), "retrying");
        assert_eq!(JobStatus::Killed.to_string(), "killed");
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Cached.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Killed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cached));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Retrying));
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Killed));
        assert!(!JobStatus::Cached.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Retrying));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_in_flight() {
        assert!(JobStatus::Submitted.is_in_flight());
        assert!(JobStatus::Running.is_in_flight());
        assert!(!JobStatus::Queued.is_in_flight());
    }

    #[test]
    fn test_outcome_continuation() {
        assert!(RunOutcome::Success.allows_continuation());
        assert!(RunOutcome::Partial.allows_continuation());
        assert!(!RunOutcome::Failed.allows_continuation());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        let outcome: RunOutcome = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(outcome, RunOutcome::Partial);
    }
}
