//! Pipeline building and execution.
//!
//! This module provides:
//! - Dependency linearization ([`GraphBuilder`])
//! - The sequential controller ([`Pipeline`])
//! - Retry backoff policies
//! - Run reports with first-failure diagnosis

mod graph;
mod integration_tests;
mod report;
mod retry;
mod runner;

pub use graph::{GraphBuilder, PipelineGraph};
pub use report::{FailureDiagnosis, RunReport, StageReport, STDERR_TAIL_LINES};
pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
pub use runner::Pipeline;
