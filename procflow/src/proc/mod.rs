//! Processes: declarations, input tables and per-run runtimes.

mod definition;
mod runtime;
mod table;

pub use definition::{
    split_outputs, InputData, InputTransform, OutputSpec, ProcBuilder, ProcDefinition,
    SCRIPT_FILE_PREFIX,
};
pub use runtime::{ProcRuntime, RunContext, StageResult};
pub use table::{match_columns, ColumnMatch, DataTable};
