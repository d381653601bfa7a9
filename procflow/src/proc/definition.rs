//! Process declarations.
//!
//! A [`ProcDefinition`] is an immutable description of one stage of work.
//! Declarations are shared as `Arc<ProcDefinition>` and referenced by every
//! pipeline that uses them; per-run state lives in
//! [`ProcRuntime`](crate::proc::ProcRuntime).

use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::{CacheMode, ErrorStrategy, InputType, OutputType};
use crate::errors::DeclarationError;
use crate::proc::table::DataTable;
use crate::utils::{is_valid_name, split_list};

/// Prefix marking a script that is loaded from a file.
pub const SCRIPT_FILE_PREFIX: &str = "file://";

/// Computes a start table from upstream output tables.
pub type InputTransform = Arc<dyn Fn(&[Arc<DataTable>]) -> DataTable + Send + Sync>;

/// Where a process gets its input data from.
#[derive(Clone)]
pub enum InputData {
    /// A fixed table; only used by start processes.
    Table(DataTable),
    /// A function of the upstream output tables, in `requires` order.
    Transform(InputTransform),
}

impl fmt::Debug for InputData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(table) => f.debug_tuple("Table").field(table).finish(),
            Self::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// One declared output: `name:type:template`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Output key.
    pub name: String,
    /// Output type.
    pub output_type: OutputType,
    /// Template rendered into the value.
    pub template: String,
}

impl OutputSpec {
    /// Parses `name:value` (a var) or `name:type:value`.
    pub fn parse(proc: &str, entry: &str) -> Result<Self, DeclarationError> {
        let err = |message: &str| DeclarationError::Output {
            proc: proc.to_string(),
            output: entry.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = entry.splitn(3, ':').collect();
        let (name, output_type, template) = match parts.as_slice() {
            [name, template] => (*name, OutputType::Var, *template),
            [name, otype, template] => {
                let otype = otype
                    .trim()
                    .parse::<OutputType>()
                    .map_err(|t| err(&format!("unsupported output type '{t}'")))?;
                (*name, otype, *template)
            }
            _ => return Err(err("expected 'name:value' or 'name:type:value'")),
        };

        let name = name.trim();
        if !is_valid_name(name) {
            return Err(err("invalid output name"));
        }
        Ok(Self {
            name: name.to_string(),
            output_type,
            template: template.trim().to_string(),
        })
    }
}

/// Splits a comma separated output declaration, ignoring commas inside `{{ }}`.
#[must_use]
pub fn split_outputs(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                depth += 1;
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '}' if chars.peek() == Some(&'}') && depth > 0 => {
                depth -= 1;
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// An immutable process declaration.
///
/// Optional fields fall back to the [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Clone)]
pub struct ProcDefinition {
    /// Unique name.
    pub name: String,
    /// Description.
    pub desc: String,
    /// Ordered input keys and their types.
    pub input: Vec<(String, InputType)>,
    /// Input data or transform.
    pub input_data: Option<InputData>,
    /// Output declarations.
    pub output: Vec<OutputSpec>,
    /// Script template, already loaded when declared as `file://`.
    pub script: Option<String>,
    /// Interpreter for the script.
    pub lang: Option<String>,
    /// Upstream processes.
    pub requires: Vec<Arc<ProcDefinition>>,
    /// Tie-breaker for the run order; lower runs first.
    pub order: i32,
    /// Maximum jobs in flight.
    pub forks: Option<usize>,
    /// Parallel preparation workers.
    pub submission_batch: Option<usize>,
    /// Cache mode.
    pub cache: Option<CacheMode>,
    /// Directory depth for directory mtimes.
    pub dirsig: Option<u32>,
    /// Whether outputs go to the export directory; terminal processes export by default.
    pub export: Option<bool>,
    /// Error strategy.
    pub error_strategy: Option<ErrorStrategy>,
    /// Retries per job.
    pub num_retries: Option<u32>,
    /// Scheduler name.
    pub scheduler: Option<String>,
    /// Scheduler options overlaid on the pipeline's.
    pub scheduler_opts: serde_json::Map<String, Value>,
    /// Template engine name.
    pub template: Option<String>,
    /// Constant arguments exposed to templates as `proc`.
    pub args: serde_json::Map<String, Value>,
}

impl ProcDefinition {
    /// Starts a builder for a process named `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ProcBuilder {
        ProcBuilder::new(name)
    }

    /// Returns the names of the upstream processes.
    #[must_use]
    pub fn require_names(&self) -> Vec<&str> {
        self.requires.iter().map(|r| r.name.as_str()).collect()
    }

    /// Returns the declared input keys.
    #[must_use]
    pub fn input_keys(&self) -> Vec<String> {
        self.input.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Returns true if the process has no upstream processes.
    #[must_use]
    pub fn is_start_candidate(&self) -> bool {
        self.requires.is_empty()
    }
}

/// Builder for [`ProcDefinition`]. Validation happens in [`ProcBuilder::build`].
#[derive(Debug, Clone)]
pub struct ProcBuilder {
    name: String,
    desc: String,
    input: Vec<(String, String)>,
    input_data: Option<InputData>,
    output: Vec<String>,
    script: Option<String>,
    lang: Option<String>,
    requires: Vec<Arc<ProcDefinition>>,
    order: i32,
    forks: Option<usize>,
    submission_batch: Option<usize>,
    cache: Option<CacheMode>,
    dirsig: Option<u32>,
    export: Option<bool>,
    error_strategy: Option<ErrorStrategy>,
    num_retries: Option<u32>,
    scheduler: Option<String>,
    scheduler_opts: serde_json::Map<String, Value>,
    template: Option<String>,
    args: serde_json::Map<String, Value>,
}

impl ProcBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            input: Vec::new(),
            input_data: None,
            output: Vec::new(),
            script: None,
            lang: None,
            requires: Vec::new(),
            order: 0,
            forks: None,
            submission_batch: None,
            cache: None,
            dirsig: None,
            export: None,
            error_strategy: None,
            num_retries: None,
            scheduler: None,
            scheduler_opts: serde_json::Map::new(),
            template: None,
            args: serde_json::Map::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Declares inputs, e.g. `"a, b:file, c:files"`.
    #[must_use]
    pub fn input(mut self, declaration: &str) -> Self {
        for entry in split_list(declaration) {
            let (key, itype) = match entry.split_once(':') {
                Some((key, itype)) => (key.trim().to_string(), itype.trim().to_string()),
                None => (entry, "var".to_string()),
            };
            self.input.push((key, itype));
        }
        self
    }

    /// Sets fixed input data for a start process.
    #[must_use]
    pub fn input_data(mut self, table: DataTable) -> Self {
        self.input_data = Some(InputData::Table(table));
        self
    }

    /// Computes input data from the upstream output tables.
    #[must_use]
    pub fn input_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&[Arc<DataTable>]) -> DataTable + Send + Sync + 'static,
    {
        self.input_data = Some(InputData::Transform(Arc::new(transform)));
        self
    }

    /// Declares outputs, e.g. `"o:var:{{in.a}}, f:file:{{in.a}}.txt"`.
    #[must_use]
    pub fn output(mut self, declaration: &str) -> Self {
        self.output.extend(split_outputs(declaration));
        self
    }

    /// Sets the script template, or `file://path` to load it from a file.
    #[must_use]
    pub fn script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Sets the interpreter.
    #[must_use]
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Adds an upstream process.
    #[must_use]
    pub fn requires(mut self, upstream: &Arc<ProcDefinition>) -> Self {
        self.requires.push(Arc::clone(upstream));
        self
    }

    /// Sets the order tie-breaker.
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Sets the maximum jobs in flight.
    #[must_use]
    pub fn forks(mut self, forks: usize) -> Self {
        self.forks = Some(forks);
        self
    }

    /// Sets the number of preparation workers.
    #[must_use]
    pub fn submission_batch(mut self, batch: usize) -> Self {
        self.submission_batch = Some(batch);
        self
    }

    /// Sets the cache mode.
    #[must_use]
    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the directory signature depth.
    #[must_use]
    pub fn dirsig(mut self, depth: u32) -> Self {
        self.dirsig = Some(depth);
        self
    }

    /// Forces exporting on or off.
    #[must_use]
    pub fn export(mut self, export: bool) -> Self {
        self.export = Some(export);
        self
    }

    /// Sets the error strategy.
    #[must_use]
    pub fn error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = Some(strategy);
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn num_retries(mut self, retries: u32) -> Self {
        self.num_retries = Some(retries);
        self
    }

    /// Sets the scheduler name.
    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = Some(scheduler.into());
        self
    }

    /// Sets a scheduler option.
    #[must_use]
    pub fn scheduler_opt(mut self, key: impl Into<String>, value: Value) -> Self {
        self.scheduler_opts.insert(key.into(), value);
        self
    }

    /// Sets the template engine.
    #[must_use]
    pub fn template(mut self, engine: impl Into<String>) -> Self {
        self.template = Some(engine.into());
        self
    }

    /// Sets a constant argument visible to templates as `proc.<key>`.
    #[must_use]
    pub fn arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Validates the declaration.
    pub fn build(self) -> Result<Arc<ProcDefinition>, DeclarationError> {
        if !is_valid_name(&self.name) {
            return Err(DeclarationError::InvalidName { name: self.name });
        }
        if self.input.is_empty() {
            return Err(DeclarationError::NoInput { proc: self.name });
        }

        let mut input = Vec::with_capacity(self.input.len());
        for (key, itype) in self.input {
            if !is_valid_name(&key) {
                return Err(DeclarationError::InvalidName { name: key });
            }
            let parsed = itype.parse::<InputType>().map_err(|t| DeclarationError::InputType {
                proc: self.name.clone(),
                key: key.clone(),
                input_type: t,
            })?;
            input.push((key, parsed));
        }

        let output = self
            .output
            .iter()
            .map(|entry| OutputSpec::parse(&self.name, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let script = match self.script {
            Some(script) => Some(load_script(&self.name, script)?),
            None => None,
        };

        Ok(Arc::new(ProcDefinition {
            name: self.name,
            desc: self.desc,
            input,
            input_data: self.input_data,
            output,
            script,
            lang: self.lang,
            requires: self.requires,
            order: self.order,
            forks: self.forks,
            submission_batch: self.submission_batch,
            cache: self.cache,
            dirsig: self.dirsig,
            export: self.export,
            error_strategy: self.error_strategy,
            num_retries: self.num_retries,
            scheduler: self.scheduler,
            scheduler_opts: self.scheduler_opts,
            template: self.template,
            args: self.args,
        }))
    }
}

fn load_script(proc: &str, script: String) -> Result<String, DeclarationError> {
    let Some(path) = script.strip_prefix(SCRIPT_FILE_PREFIX) else {
        return Ok(script);
    };
    let path = PathBuf::from(path);
    std::fs::read_to_string(&path).map_err(|_| DeclarationError::ScriptNotFound {
        proc: proc.to_string(),
        path,
    })
}
