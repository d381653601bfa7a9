//! Testing utilities for procflow pipelines.
//!
//! - [`MockScheduler`]: an in-memory backend with scripted outcomes
//! - fixtures building configurations rooted in a scratch directory

mod fixtures;
mod mocks;

pub use fixtures::{job_in, test_config};
pub use mocks::MockScheduler;
