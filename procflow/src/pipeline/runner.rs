//! The pipeline controller.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::{PipelineConfig, ProcSettings};
use crate::core::RunOutcome;
use crate::errors::{DeclarationError, ProcflowError, Result};
use crate::events::{EventBus, EventKind, EventSink, PipelineEvent};
use crate::pipeline::graph::{GraphBuilder, PipelineGraph};
use crate::pipeline::report::RunReport;
use crate::proc::{DataTable, ProcDefinition, ProcRuntime, RunContext};
use crate::scheduler::{SchedulerAdapter, SchedulerRegistry};
use crate::template::{builtin_engine, TemplateEngine};
use crate::utils::is_valid_name;

/// A named set of processes run from a list of starts.
///
/// Processes run strictly one after another in graph order; the jobs of a
/// process run concurrently up to its `forks`. The controller continues
/// after a `Success` or `Partial` process and stops after a `Failed` one.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    desc: String,
    config: PipelineConfig,
    starts: Vec<Arc<ProcDefinition>>,
    procs: Vec<Arc<ProcDefinition>>,
    start_data: HashMap<String, DataTable>,
    schedulers: SchedulerRegistry,
    engines: HashMap<String, Arc<dyn TemplateEngine>>,
    events: EventBus,
    cancel: Arc<CancellationToken>,
}

impl Pipeline {
    /// Creates a pipeline with the default configuration.
    pub fn new(name: impl Into<String>) -> Result<Self, DeclarationError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(DeclarationError::InvalidName { name });
        }
        Ok(Self {
            name,
            desc: String::new(),
            config: PipelineConfig::default(),
            starts: Vec::new(),
            procs: Vec::new(),
            start_data: HashMap::new(),
            schedulers: SchedulerRegistry::new(),
            engines: HashMap::new(),
            events: EventBus::new(),
            cancel: Arc::new(CancellationToken::new()),
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Sets a description.
    #[must_use]
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the directory exported outputs are written to.
    #[must_use]
    pub fn with_outdir(mut self, outdir: impl Into<std::path::PathBuf>) -> Self {
        self.config.outdir = Some(outdir.into());
        self
    }

    /// Sets the start processes, in the order they are placed.
    #[must_use]
    pub fn starts(mut self, starts: &[Arc<ProcDefinition>]) -> Self {
        self.starts = starts.to_vec();
        self
    }

    /// Declares the processes downstream of the starts.
    ///
    /// Dependencies only point upstream, so a process is discovered either
    /// here or through the `requires` of a declared one. Listing the
    /// terminal processes is enough.
    #[must_use]
    pub fn add_procs(mut self, procs: &[Arc<ProcDefinition>]) -> Self {
        self.procs.extend(procs.iter().cloned());
        self
    }

    /// Overrides the input data of start process `proc`.
    #[must_use]
    pub fn set_data(mut self, proc: impl Into<String>, data: DataTable) -> Self {
        self.start_data.insert(proc.into(), data);
        self
    }

    /// Registers a scheduler adapter under `name`.
    #[must_use]
    pub fn with_scheduler(mut self, name: impl Into<String>, adapter: Arc<dyn SchedulerAdapter>) -> Self {
        self.schedulers.register(name, adapter);
        self
    }

    /// Registers a template engine under its name.
    #[must_use]
    pub fn with_template_engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engines.insert(engine.name().to_string(), engine);
        self
    }

    /// Subscribes a sink to lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.subscribe(sink);
        self
    }

    /// Returns the token that cancels a running pipeline.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// Builds the execution graph without running anything.
    pub fn graph(&self) -> Result<PipelineGraph> {
        let graph = GraphBuilder::new(&self.procs)?.build(&self.starts)?;
        for proc in self.start_data.keys() {
            if !self.starts.iter().any(|s| &s.name == proc) {
                return Err(DeclarationError::DataForNonStart { proc: proc.clone() }.into());
            }
        }
        Ok(graph)
    }

    fn engine(&self, name: &str) -> Result<Arc<dyn TemplateEngine>, DeclarationError> {
        self.engines
            .get(name)
            .cloned()
            .or_else(|| builtin_engine(name))
            .ok_or_else(|| DeclarationError::NoSuchTemplate { name: name.to_string() })
    }

    /// Resolves every process into a runtime before any job runs.
    fn runtimes(&self, graph: &PipelineGraph, ctx: &RunContext) -> Result<Vec<ProcRuntime>> {
        graph
            .order()
            .iter()
            .map(|def| -> Result<ProcRuntime> {
                let settings = ProcSettings::resolve(&self.config, def);
                let engine = self.engine(&settings.template)?;
                let adapter = self
                    .schedulers
                    .resolve(&settings.scheduler, &settings.scheduler_opts)?;
                let export = def.export.unwrap_or_else(|| graph.is_terminal(&def.name));
                Ok(ProcRuntime::new(
                    Arc::clone(def),
                    settings,
                    ctx.clone(),
                    adapter,
                    engine,
                    export,
                    self.start_data.get(&def.name).cloned(),
                ))
            })
            .collect()
    }

    /// Runs the pipeline.
    ///
    /// Declaration and graph errors are returned before any job runs. A
    /// failed process is not an error: the report carries the outcome and
    /// the first failing job. Scheduler infrastructure failures and
    /// cancellation abort the run with an error.
    pub async fn run(&self) -> Result<RunReport> {
        let graph = self.graph()?;
        let ctx = RunContext {
            pipeline: self.name.clone(),
            workdir: self.config.workdir.join(&self.name),
            outdir: self.config.outdir_for(&self.name),
            events: self.events.clone(),
            cancel: Arc::clone(&self.cancel),
        };
        let runtimes = self.runtimes(&graph, &ctx)?;
        fs::create_dir_all(&ctx.workdir)?;

        let mut report = RunReport::new(&self.name);
        info!(
            pipeline = %self.name,
            run_id = %report.run_id,
            procs = ?graph.names(),
            "Pipeline started"
        );
        if !self.desc.is_empty() {
            info!(pipeline = %self.name, "{}", self.desc);
        }
        self.events
            .emit(&PipelineEvent::pipeline(EventKind::PipelineStart, &self.name))
            .await;

        for (position, runtime) in runtimes.iter().enumerate() {
            if let Some(reason) = self.cancel.reason() {
                return Err(self.abort(ProcflowError::Cancelled(reason)).await);
            }
            let upstream: Vec<Arc<DataTable>> = runtime
                .definition()
                .requires
                .iter()
                .filter_map(|req| report.outputs.get(&req.name).cloned())
                .collect();

            let result = match runtime.execute(&upstream).await {
                Ok(result) => result,
                Err(e) => return Err(self.abort(e).await),
            };
            report.record(runtime.name(), &result);

            if !result.outcome.allows_continuation() {
                report.skipped = runtimes[position + 1..]
                    .iter()
                    .map(|r| r.name().to_string())
                    .collect();
                break;
            }
        }

        report.finish();
        self.events
            .emit(
                &PipelineEvent::pipeline(EventKind::PipelineComplete, &self.name)
                    .with_outcome(report.outcome),
            )
            .await;
        if report.is_success() {
            info!(
                pipeline = %self.name,
                outcome = %report.outcome,
                duration_ms = report.duration_ms(),
                "Pipeline completed"
            );
        } else {
            error!(pipeline = %self.name, "{report}");
        }
        Ok(report)
    }

    /// Runs the pipeline, cancelling it on Ctrl-C.
    pub async fn run_until_interrupt(&self) -> Result<RunReport> {
        let cancel = Arc::clone(&self.cancel);
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, killing running jobs");
                cancel.cancel("interrupted");
            }
        });
        let result = self.run().await;
        watcher.abort();
        result
    }

    async fn abort(&self, err: ProcflowError) -> ProcflowError {
        error!(pipeline = %self.name, error = %err, "Pipeline aborted");
        self.events
            .emit(
                &PipelineEvent::pipeline(EventKind::PipelineComplete, &self.name)
                    .with_outcome(RunOutcome::Failed),
            )
            .await;
        err
    }
}
