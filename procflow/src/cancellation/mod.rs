//! Cooperative cancellation of a pipeline run.

mod token;

pub use token::CancellationToken;
