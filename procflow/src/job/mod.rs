//! Jobs: per-row records, their cache signatures and the dispatch queue.

mod cache;
mod queue;
mod record;

pub use cache::{JobCache, Signature, SignatureSection, MTIME_EPSILON};
pub use queue::{JobQueue, JOB_LOG_LIMIT};
pub use record::{JobInput, JobOutput, JobRecord, StagedPath};
