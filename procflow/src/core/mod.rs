//! Core enums shared across procflow.

mod status;
mod types;

pub use status::{JobStatus, RunOutcome};
pub use types::{CacheMode, ErrorStrategy, InputType, OutputType};
