//! # Procflow
//!
//! A pipeline orchestrator for file- and value-driven batch processing.
//!
//! Procflow runs declared processes in dependency order with support for:
//!
//! - **Job expansion**: every row of a process's input table becomes one job
//! - **Caching**: jobs whose inputs, script and outputs are unchanged are skipped
//! - **Pluggable schedulers**: local processes, SGE, Slurm and SSH hosts
//! - **Failure policy**: ignore, halt or retry failed jobs with backoff
//! - **Event-driven observability**: typed lifecycle events with veto points
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use procflow::prelude::*;
//!
//! let p1 = ProcDefinition::builder("P1")
//!     .input("infile:file")
//!     .output("outfile:file:{{in.infile | stem}}.txt")
//!     .script("cat {{in.infile}} > {{out.outfile}}")
//!     .build()?;
//! let p2 = ProcDefinition::builder("P2")
//!     .input("infile:file")
//!     .output("outfile:file:{{in.infile | basename}}")
//!     .script("wc -l {{in.infile}} > {{out.outfile}}")
//!     .requires(&p1)
//!     .build()?;
//!
//! let report = Pipeline::new("example")?
//!     .starts(&[p1])
//!     .add_procs(&[p2])
//!     .set_data("P1", DataTable::from_glob("infile", "data/*.csv")?)
//!     .run()
//!     .await?;
//! println!("{report}");
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod job;
pub mod observability;
pub mod pipeline;
pub mod proc;
pub mod scheduler;
pub mod template;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{PipelineConfig, ProcSettings};
    pub use crate::core::{CacheMode, ErrorStrategy, InputType, JobStatus, OutputType, RunOutcome};
    pub use crate::errors::{
        CyclicDependencyError, DeclarationError, ProcflowError, SchedulerError,
        TemplateRenderError, UnreachableProcessError,
    };
    pub use crate::events::{
        CollectingEventSink, EventBus, EventKind, EventSink, LoggingEventSink, NoOpEventSink,
        PipelineEvent,
    };
    pub use crate::job::{JobRecord, JobQueue};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{GraphBuilder, Pipeline, PipelineGraph, RunReport};
    pub use crate::proc::{DataTable, ProcDefinition, ProcRuntime};
    pub use crate::scheduler::{JobHandle, PollStatus, SchedulerAdapter, SchedulerRegistry, Submission};
    pub use crate::template::{SimpleTemplate, TemplateEngine};
}
