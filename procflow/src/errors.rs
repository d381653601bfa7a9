//! Error types for procflow.
//!
//! Errors fall into four groups: declaration errors raised before any job
//! runs, graph errors raised while linearizing dependencies, per-job runtime
//! errors (contained by the error strategy and never surfaced here) and
//! fatal run errors such as scheduler infrastructure failures or
//! cancellation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for procflow operations.
#[derive(Debug, Error)]
pub enum ProcflowError {
    /// A process declaration is invalid.
    #[error("{0}")]
    Declaration(#[from] DeclarationError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CyclicDependencyError),

    /// A process can only be reached through a process that is not started.
    #[error("{0}")]
    UnreachableProcess(#[from] UnreachableProcessError),

    /// A template failed to render outside of a job context.
    #[error("{0}")]
    TemplateRender(#[from] TemplateRenderError),

    /// The scheduler backend failed.
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProcflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for ProcflowError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ProcflowError> = std::result::Result<T, E>;

/// Diagnostic metadata attached to graph errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors in a process declaration, raised before any job runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeclarationError {
    /// Process or pipeline name does not match `^[\w.-]+$`.
    #[error("Invalid name '{name}': only letters, digits, '_', '.' and '-' are allowed")]
    InvalidName {
        /// The offending name.
        name: String,
    },

    /// Two different declarations share a name.
    #[error("Process name '{name}' is used by more than one declaration")]
    DuplicateName {
        /// The shared name.
        name: String,
    },

    /// The process declares no input keys.
    #[error("[{proc}] No input keys declared")]
    NoInput {
        /// Process name.
        proc: String,
    },

    /// An input key is declared with an unknown type.
    #[error("[{proc}] Unsupported input type '{input_type}' for input '{key}'")]
    InputType {
        /// Process name.
        proc: String,
        /// Input key.
        key: String,
        /// The unknown type.
        input_type: String,
    },

    /// Input data is not compatible with the declared input type.
    #[error("[{proc}] Job #{index}: {message}")]
    InputValue {
        /// Process name.
        proc: String,
        /// Job index.
        index: usize,
        /// Details.
        message: String,
    },

    /// An output entry could not be parsed.
    #[error("[{proc}] Invalid output '{output}': {message}")]
    Output {
        /// Process name.
        proc: String,
        /// The offending output entry.
        output: String,
        /// Details.
        message: String,
    },

    /// A `file://` script does not exist.
    #[error("[{proc}] Script file not found: {}", path.display())]
    ScriptNotFound {
        /// Process name.
        proc: String,
        /// The missing path.
        path: PathBuf,
    },

    /// The requested scheduler is not known.
    #[error("No such scheduler: {name}")]
    NoSuchScheduler {
        /// The scheduler name.
        name: String,
    },

    /// The requested template engine is not known.
    #[error("No such template engine: {name}")]
    NoSuchTemplate {
        /// The engine name.
        name: String,
    },

    /// No start processes were given.
    #[error("No start processes specified")]
    NoStarts,

    /// Start data was given for a process that is not a start.
    #[error("Data given for '{proc}', which is not a start process")]
    DataForNonStart {
        /// Process name.
        proc: String,
    },
}

/// Error raised when the dependency graph contains a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cyclic dependency detected among processes: {}", stages.join(", "))]
pub struct CyclicDependencyError {
    /// The stuck processes.
    pub stages: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CyclicDependencyError {
    /// Creates a new cyclic dependency error.
    #[must_use]
    pub fn new(stages: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "GRAPH-001-CYCLE",
            format!("Processes depend on each other: {}", stages.join(", ")),
        )
        .with_fix_hint("Remove one of the `requires` edges between these processes.");

        Self {
            stages,
            error_info: info,
        }
    }
}

/// Error raised when processes wait on a predecessor nothing starts.
#[derive(Debug, Clone, Error)]
#[error(
    "Processes {} require {} which cannot be reached from the start processes",
    stages.join(", "),
    missing.join(", ")
)]
pub struct UnreachableProcessError {
    /// The stuck processes.
    pub stages: Vec<String>,
    /// Required processes that are neither started nor downstream of a start.
    pub missing: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl UnreachableProcessError {
    /// Creates a new unreachable process error.
    #[must_use]
    pub fn new(stages: Vec<String>, missing: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "GRAPH-002-UNREACHABLE",
            format!("No available next processes: {}", stages.join(", ")),
        )
        .with_fix_hint("Add the required processes to the start processes.")
        .with_context_entry("missing", missing.join(", "));

        Self {
            stages,
            missing,
            error_info: info,
        }
    }
}

/// Error raised when a template fails to render.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to render {what}: {cause}")]
pub struct TemplateRenderError {
    /// What was being rendered (e.g., "script", "output").
    pub what: String,
    /// The underlying cause.
    pub cause: String,
}

impl TemplateRenderError {
    /// Creates a new template render error.
    #[must_use]
    pub fn new(what: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            cause: cause.into(),
        }
    }

    /// Returns the same error re-labelled with what was being rendered.
    #[must_use]
    pub fn rendering(mut self, what: impl Into<String>) -> Self {
        self.what = what.into();
        self
    }
}

/// Errors raised by scheduler adapters.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The backend command could not be started.
    #[error("[{scheduler}] Failed to run backend command: {message}")]
    Command {
        /// Scheduler name.
        scheduler: String,
        /// Details.
        message: String,
    },

    /// The backend answered with something unexpected.
    #[error("[{scheduler}] Unexpected backend response: {message}")]
    Protocol {
        /// Scheduler name.
        scheduler: String,
        /// Details.
        message: String,
    },

    /// Writing the submission unit failed.
    #[error("[{scheduler}] Failed to prepare job: {message}")]
    Prepare {
        /// Scheduler name.
        scheduler: String,
        /// Details.
        message: String,
    },

    /// The handle is not known to the scheduler.
    #[error("[{scheduler}] Unknown job handle: {handle}")]
    UnknownHandle {
        /// Scheduler name.
        scheduler: String,
        /// The handle id.
        handle: String,
    },
}

impl SchedulerError {
    /// Creates a command error.
    #[must_use]
    pub fn command(scheduler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            scheduler: scheduler.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(scheduler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            scheduler: scheduler.into(),
            message: message.into(),
        }
    }

    /// Creates a preparation error.
    #[must_use]
    pub fn prepare(scheduler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Prepare {
            scheduler: scheduler.into(),
            message: message.into(),
        }
    }
}
