//! Per-run execution of one process.
//!
//! A [`ProcRuntime`] pairs an immutable [`ProcDefinition`] with the resolved
//! settings, backend and template engine of one run. It expands the input
//! table into [`JobRecord`]s, sorts out cached jobs and hands the rest to a
//! [`JobQueue`].

use futures::stream::{self, StreamExt, TryStreamExt};
use md5::{Digest, Md5};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::ProcSettings;
use crate::core::{InputType, JobStatus, OutputType, RunOutcome};
use crate::errors::{DeclarationError, ProcflowError, Result};
use crate::events::{EventBus, EventKind, PipelineEvent};
use crate::job::{JobCache, JobInput, JobOutput, JobQueue, JobRecord, StagedPath, JOB_LOG_LIMIT};
use crate::observability::SpanTimer;
use crate::proc::definition::{InputData, ProcDefinition};
use crate::proc::table::{match_columns, DataTable};
use crate::scheduler::SchedulerAdapter;
use crate::template::TemplateEngine;
use crate::utils::fs::{absolutize, links_to, remove_path, symlink_or_copy, write_if_changed};
use crate::utils::{brief_list, get_shebang};

/// Command used for processes without a script.
const NOOP_COMMAND: &str = "true";

/// Run-wide context shared by every process of a pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Pipeline name.
    pub pipeline: String,
    /// `<workdir>/<pipeline>`; job metadirs live below it.
    pub workdir: PathBuf,
    /// Root of exported outputs.
    pub outdir: PathBuf,
    /// Lifecycle event bus.
    pub events: EventBus,
    /// Run-wide cancellation.
    pub cancel: Arc<CancellationToken>,
}

/// Result of running one process.
#[derive(Debug)]
pub struct StageResult {
    /// Aggregate outcome.
    pub outcome: RunOutcome,
    /// All jobs in index order.
    pub jobs: Vec<JobRecord>,
    /// Indices of cached jobs.
    pub cached: Vec<usize>,
    /// Output table, published unless the outcome is `Failed`.
    pub output_table: Option<Arc<DataTable>>,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

/// Everything job preparation needs, shared with the blocking workers.
#[derive(Debug)]
struct Preparer {
    def: Arc<ProcDefinition>,
    engine: Arc<dyn TemplateEngine>,
    fallback_lang: String,
    proc_dir: PathBuf,
    export_dir: Option<PathBuf>,
}

/// One process in one pipeline run.
#[derive(Debug)]
pub struct ProcRuntime {
    def: Arc<ProcDefinition>,
    settings: ProcSettings,
    ctx: RunContext,
    adapter: Arc<dyn SchedulerAdapter>,
    engine: Arc<dyn TemplateEngine>,
    export: bool,
    start_data: Option<DataTable>,
}

impl ProcRuntime {
    /// Creates the runtime.
    ///
    /// `start_data` overrides the declared input data of a start process.
    #[must_use]
    pub fn new(
        def: Arc<ProcDefinition>,
        settings: ProcSettings,
        ctx: RunContext,
        adapter: Arc<dyn SchedulerAdapter>,
        engine: Arc<dyn TemplateEngine>,
        export: bool,
        start_data: Option<DataTable>,
    ) -> Self {
        Self {
            def,
            settings,
            ctx,
            adapter,
            engine,
            export,
            start_data,
        }
    }

    /// Returns the process name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Returns the process declaration.
    #[must_use]
    pub fn definition(&self) -> &Arc<ProcDefinition> {
        &self.def
    }

    /// Returns true if outputs go to the pipeline output directory.
    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.export
    }

    /// Materializes, runs and publishes the process, emitting its lifecycle events.
    pub async fn execute(&self, upstream: &[Arc<DataTable>]) -> Result<StageResult> {
        let timer = SpanTimer::start(self.def.name.clone());
        self.ctx
            .events
            .emit(&PipelineEvent::proc(EventKind::ProcStart, &self.ctx.pipeline, &self.def.name))
            .await;
        info!(proc = %self.def.name, desc = %self.def.desc, "Process started");

        let jobs = self.materialize(upstream).await?;
        let mut result = self.run(jobs).await?;
        result.duration_ms = timer.finish();

        self.ctx
            .events
            .emit(
                &PipelineEvent::proc(EventKind::ProcDone, &self.ctx.pipeline, &self.def.name)
                    .with_outcome(result.outcome),
            )
            .await;
        info!(
            proc = %self.def.name,
            outcome = %result.outcome,
            jobs = result.jobs.len(),
            duration_ms = result.duration_ms,
            "Process done"
        );
        Ok(result)
    }

    /// Computes the input table of this process.
    fn input_table(&self, upstream: &[Arc<DataTable>]) -> DataTable {
        if let Some(table) = &self.start_data {
            return table.clone();
        }
        match &self.def.input_data {
            Some(InputData::Table(table)) => table.clone(),
            Some(InputData::Transform(transform)) => transform(upstream),
            None if upstream.is_empty() => DataTable::single_null_row(self.def.input.len()),
            None => {
                let tables: Vec<&DataTable> = upstream.iter().map(AsRef::as_ref).collect();
                DataTable::concat_columns(&tables)
            }
        }
    }

    /// Expands the input table into one prepared job per row.
    pub async fn materialize(&self, upstream: &[Arc<DataTable>]) -> Result<Vec<JobRecord>> {
        let mut table = self.input_table(upstream);
        table.make_columns_unique();
        let keys = self.def.input_keys();
        let matched = match_columns(&keys, table.columns());
        if !matched.wasted.is_empty() {
            warn!(
                proc = %self.def.name,
                columns = ?matched.wasted,
                "Wasted {} column(s) of input data",
                matched.wasted.len()
            );
        }
        for key in &matched.missing {
            warn!(proc = %self.def.name, "No data column for input: {key}, using None");
        }
        let table = table.select(&matched.mapping);

        if table.is_empty() {
            warn!(proc = %self.def.name, "No data found for process, no jobs will be created");
            return Ok(Vec::new());
        }
        if self.def.script.is_none() {
            warn!(proc = %self.def.name, "No script specified, jobs run a no-op command");
        }

        let nrows = table.nrows();
        let preparer = Arc::new(Preparer {
            def: Arc::clone(&self.def),
            engine: Arc::clone(&self.engine),
            fallback_lang: self.settings.lang.clone(),
            proc_dir: self.ctx.workdir.join(&self.def.name),
            export_dir: self.export.then(|| self.ctx.outdir.join(&self.def.name)),
        });
        let multi = nrows > 1;

        let jobs: Vec<JobRecord> = stream::iter(table.rows().iter().cloned().enumerate())
            .map(|(index, row)| {
                let preparer = Arc::clone(&preparer);
                async move {
                    match tokio::task::spawn_blocking(move || preparer.prepare(index, &row, multi)).await {
                        Ok(prepared) => prepared,
                        Err(e) => Err(ProcflowError::Io(io::Error::other(e))),
                    }
                }
            })
            .buffered(self.settings.submission_batch.max(1))
            .try_collect()
            .await?;

        debug!(proc = %self.def.name, jobs = jobs.len(), "Jobs prepared");
        Ok(jobs)
    }

    /// Resolves cached jobs, runs the others and computes the outcome.
    pub async fn run(&self, jobs: Vec<JobRecord>) -> Result<StageResult> {
        let cache = JobCache::new(self.settings.cache, self.settings.dirsig);
        let queue = JobQueue::new(
            self.ctx.pipeline.clone(),
            Arc::clone(&self.adapter),
            &self.settings,
            self.ctx.events.clone(),
            Arc::clone(&self.ctx.cancel),
        );
        let mut finished = Vec::with_capacity(jobs.len());
        let mut to_run = Vec::new();
        let mut cached = Vec::new();

        for mut job in jobs {
            if job.status() != JobStatus::Pending {
                // Under `halt` this stops the queue before anything is submitted.
                finished.push(queue.fail_prepared(job).await);
            } else if cache.cached(&job) {
                job.set_status(JobStatus::Cached);
                self.ctx
                    .events
                    .emit(&PipelineEvent::job(EventKind::JobCached, &self.ctx.pipeline, &job))
                    .await;
                cached.push(job.index);
                finished.push(job);
            } else {
                if let Err(e) = JobCache::clear_outputs(&job) {
                    warn!(job = %job.label(), error = %e, "Cannot clear previous outputs");
                }
                to_run.push(job);
            }
        }
        if !cached.is_empty() {
            info!(proc = %self.def.name, "Cached jobs: {}", brief_list(&cached));
        }

        finished.extend(queue.run(to_run).await?);
        finished.sort_by_key(|job| job.index);

        let outcome = outcome_of(&finished);
        let output_table = outcome
            .allows_continuation()
            .then(|| Arc::new(self.output_table(&finished)));
        Ok(StageResult {
            outcome,
            jobs: finished,
            cached,
            output_table,
            duration_ms: 0.0,
        })
    }

    /// Builds the output table: one row per job, one column per output key.
    fn output_table(&self, jobs: &[JobRecord]) -> DataTable {
        let columns: Vec<String> = self.def.output.iter().map(|o| o.name.clone()).collect();
        let rows = jobs
            .iter()
            .map(|job| {
                columns
                    .iter()
                    .map(|name| job.output.get(name).map_or(Value::Null, JobOutput::to_value))
                    .collect()
            })
            .collect();
        DataTable::from_rows(columns, rows)
    }
}

/// `Failed` if a job failed without being ignored or was killed, `Partial`
/// if only ignored failures occurred.
fn outcome_of(jobs: &[JobRecord]) -> RunOutcome {
    let mut ignored = false;
    for job in jobs {
        match job.status() {
            JobStatus::Killed => return RunOutcome::Failed,
            JobStatus::Failed if !job.failure_ignored => return RunOutcome::Failed,
            JobStatus::Failed => ignored = true,
            _ => {}
        }
    }
    if ignored {
        RunOutcome::Partial
    } else {
        RunOutcome::Success
    }
}

impl Preparer {
    fn prepare(&self, index: usize, row: &[Value], multi: bool) -> Result<JobRecord> {
        let metadir = self.proc_dir.join(index.to_string());
        fs::create_dir_all(&metadir)?;
        let outdir = self.output_dir(&metadir, index, multi)?;
        let mut job = JobRecord::new(&self.def.name, index, metadir, outdir);

        fs::create_dir_all(job.input_dir())?;
        for ((key, itype), value) in self.def.input.iter().zip(row) {
            job.input_types.insert(key.clone(), *itype);
            let input = self.resolve_input(&job, key, *itype, value)?;
            job.input.insert(key.clone(), input);
        }

        if let Err(message) = self.render(&mut job)? {
            job.error = Some(message);
            job.set_status(JobStatus::Failed);
            warn!(job = %job.label(), error = ?job.error, "Job preparation failed");
            return Ok(job);
        }

        if index < JOB_LOG_LIMIT {
            debug!(job = %job.label(), input = ?job.input, output = ?job.output, "Job prepared");
        }
        Ok(job)
    }

    /// Returns the job output directory, linking it into the metadir when exported.
    fn output_dir(&self, metadir: &Path, index: usize, multi: bool) -> Result<PathBuf> {
        let metaout = metadir.join("output");
        let Some(export_dir) = &self.export_dir else {
            if fs::symlink_metadata(&metaout).is_ok_and(|m| !m.is_dir()) {
                remove_path(&metaout)?;
            }
            fs::create_dir_all(&metaout)?;
            return Ok(metaout);
        };

        let outdir = if multi {
            export_dir.join(index.to_string())
        } else {
            export_dir.clone()
        };
        let outdir = absolutize(&outdir)?;
        fs::create_dir_all(&outdir)?;
        if !links_to(&metaout, &outdir) {
            remove_path(&metaout)?;
            symlink_or_copy(&outdir, &metaout)?;
        }
        Ok(outdir)
    }

    fn resolve_input(&self, job: &JobRecord, key: &str, itype: InputType, value: &Value) -> Result<JobInput> {
        let invalid = |message: String| DeclarationError::InputValue {
            proc: self.def.name.clone(),
            index: job.index,
            message: format!("{key}:{itype}: {message}"),
        };

        if itype == InputType::Var {
            return Ok(JobInput::Var(value.clone()));
        }
        if value.is_null() {
            return Ok(JobInput::Null);
        }

        if itype.is_multi() {
            let items: Vec<&str> = match value {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().ok_or_else(|| invalid(format!("expected a path, got {v}"))))
                    .collect::<std::result::Result<_, _>>()?,
                other => return Err(invalid(format!("expected a list of paths, got {other}")).into()),
            };
            let staged = items
                .into_iter()
                .map(|p| stage_input(&job.input_dir(), Path::new(p)))
                .collect::<io::Result<Vec<_>>>()?;
            return Ok(JobInput::Paths(staged));
        }

        let Value::String(path) = value else {
            return Err(invalid(format!("expected a path, got {value}")).into());
        };
        Ok(JobInput::Path(stage_input(&job.input_dir(), Path::new(path))?))
    }

    /// Renders outputs and the script. The inner error is a render failure
    /// that fails only this job.
    fn render(&self, job: &mut JobRecord) -> Result<std::result::Result<(), String>> {
        for spec in &self.def.output {
            let data = job.template_data(&self.def.args);
            let rendered = match self.engine.render(&spec.template, &data) {
                Ok(text) => text,
                Err(e) => return Ok(Err(e.rendering(format!("output {}", spec.name)).to_string())),
            };
            job.output_types.insert(spec.name.clone(), spec.output_type);
            let value = match spec.output_type {
                OutputType::Var => JobOutput::Var(rendered),
                OutputType::File | OutputType::Dir => {
                    if Path::new(&rendered).is_absolute() {
                        return Err(DeclarationError::Output {
                            proc: self.def.name.clone(),
                            output: spec.name.clone(),
                            message: format!("output path must be relative: {rendered}"),
                        }
                        .into());
                    }
                    let path = job.outdir.join(&rendered);
                    if spec.output_type == OutputType::Dir {
                        fs::create_dir_all(&path)?;
                    }
                    JobOutput::Path(path)
                }
            };
            job.output.insert(spec.name.clone(), value);
        }

        let script = match &self.def.script {
            Some(source) => match self.engine.render(source, &job.template_data(&self.def.args)) {
                Ok(text) => text,
                Err(e) => return Ok(Err(e.rendering("script").to_string())),
            },
            None => String::new(),
        };
        write_if_changed(&job.script_file(), &script)?;

        let script_path = job.script_file().to_string_lossy().into_owned();
        job.cmd = if self.def.script.is_none() {
            vec![NOOP_COMMAND.to_string()]
        } else {
            let lang = self
                .def
                .lang
                .clone()
                .or_else(|| get_shebang(&script))
                .unwrap_or_else(|| self.fallback_lang.clone());
            lang.split_whitespace()
                .map(str::to_string)
                .chain(std::iter::once(script_path))
                .collect()
        };
        job.script = script;
        Ok(Ok(()))
    }
}

/// Links `source` into `input_dir`, reusing an existing link to the same
/// source and renaming to `stem[hash].ext` when another file took the name.
fn stage_input(input_dir: &Path, source: &Path) -> io::Result<StagedPath> {
    let source = absolutize(source)?;
    let name = source
        .file_name()
        .map_or_else(|| "input".into(), |n| n.to_string_lossy().into_owned());

    let mut staged = input_dir.join(&name);
    if fs::symlink_metadata(&staged).is_ok() && !links_to(&staged, &source) {
        staged = input_dir.join(hashed_name(&name, &source));
        if fs::symlink_metadata(&staged).is_ok() && !links_to(&staged, &source) {
            remove_path(&staged)?;
        }
    }
    if fs::symlink_metadata(&staged).is_err() {
        symlink_or_copy(&source, &staged)?;
    }
    Ok(StagedPath { source, staged })
}

fn hashed_name(name: &str, source: &Path) -> String {
    let digest = hex::encode(Md5::digest(source.to_string_lossy().as_bytes()));
    let tag = &digest[..8];
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}[{tag}].{ext}"),
        _ => format!("{name}[{tag}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::core::ErrorStrategy;
    use crate::template::builtin_engine;
    use crate::testing::MockScheduler;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn runtime(root: &Path, def: Arc<ProcDefinition>, export: bool, data: Option<DataTable>) -> ProcRuntime {
        let config = PipelineConfig::default().with_poll_interval_ms(1);
        runtime_with(root, def, &config, Arc::new(MockScheduler::new()), export, data)
    }

    fn runtime_with(
        root: &Path,
        def: Arc<ProcDefinition>,
        config: &PipelineConfig,
        mock: Arc<MockScheduler>,
        export: bool,
        data: Option<DataTable>,
    ) -> ProcRuntime {
        let settings = ProcSettings::resolve(config, &def);
        let ctx = RunContext {
            pipeline: "pipe".to_string(),
            workdir: root.join("workdir").join("pipe"),
            outdir: root.join("outdir"),
            events: EventBus::new(),
            cancel: Arc::new(CancellationToken::new()),
        };
        let engine = builtin_engine("simple").unwrap();
        ProcRuntime::new(def, settings, ctx, mock, engine, export, data)
    }

    #[tokio::test]
    async fn test_materialize_vars_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P1")
            .input("a")
            .output("o:{{in.a}}-x, f:file:{{in.a}}.txt")
            .script("echo {{in.a}} > {{out.f}}")
            .build()
            .unwrap();
        let rt = runtime(dir.path(), def, false, Some(DataTable::from_values("a", vec!["u", "v"])));
        let jobs = rt.materialize(&[]).await.unwrap();

        assert_eq!(jobs.len(), 2);
        let job = &jobs[1];
        assert_eq!(job.metadir, dir.path().join("workdir/pipe/P1/1"));
        assert_eq!(job.output["o"], JobOutput::Var("v-x".to_string()));
        assert_eq!(job.output["f"], JobOutput::Path(job.metadir.join("output/v.txt")));
        let script = std::fs::read_to_string(job.script_file()).unwrap();
        assert!(script.starts_with("echo v > "));
        assert_eq!(job.cmd[0], "bash");
    }

    #[tokio::test]
    async fn test_positional_match_and_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P").input("a, b").build().unwrap();
        let data = DataTable::from_values("x", vec![1, 2]);
        let rt = runtime(dir.path(), def, false, Some(data));
        let jobs = rt.materialize(&[]).await.unwrap();
        assert_eq!(jobs[0].input["a"], JobInput::Var(json!(1)));
        assert_eq!(jobs[0].input["b"], JobInput::Var(Value::Null));
        assert_eq!(jobs[0].cmd, vec!["true".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_inputs_are_staged() {
        let dir = tempfile::tempdir().unwrap();
        let d1 = dir.path().join("d1");
        let d2 = dir.path().join("d2");
        std::fs::create_dir_all(&d1).unwrap();
        std::fs::create_dir_all(&d2).unwrap();
        std::fs::write(d1.join("x.txt"), "1").unwrap();
        std::fs::write(d2.join("x.txt"), "2").unwrap();

        let def = ProcDefinition::builder("P").input("one:file, many:files").build().unwrap();
        let data = DataTable::from_rows(
            vec!["one".to_string(), "many".to_string()],
            vec![vec![
                json!(d1.join("x.txt")),
                json!([d1.join("x.txt"), d2.join("x.txt")]),
            ]],
        );
        let rt = runtime(dir.path(), def, false, Some(data));
        let jobs = rt.materialize(&[]).await.unwrap();
        let JobInput::Path(one) = &jobs[0].input["one"] else { panic!("expected a path") };
        assert_eq!(one.staged, jobs[0].input_dir().join("x.txt"));
        let JobInput::Paths(many) = &jobs[0].input["many"] else { panic!("expected paths") };
        // Same source reuses the link; a different source with the same name is renamed.
        assert_eq!(many[0].staged, one.staged);
        let renamed = many[1].staged.file_name().unwrap().to_string_lossy().into_owned();
        assert!(renamed.starts_with("x[") && renamed.ends_with("].txt"));
        assert_eq!(std::fs::read_to_string(&many[1].staged).unwrap(), "2");
    }

    #[tokio::test]
    async fn test_wrong_input_value_type() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P").input("f:file").build().unwrap();
        let rt = runtime(dir.path(), def, false, Some(DataTable::from_values("f", vec![3])));
        let err = rt.materialize(&[]).await.unwrap_err();
        assert!(matches!(err, ProcflowError::Declaration(DeclarationError::InputValue { index: 0, .. })));
    }

    #[tokio::test]
    async fn test_render_failure_fails_job_only() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P")
            .input("a")
            .script("echo {{in.nope}}")
            .build()
            .unwrap();
        let rt = runtime(dir.path(), def, false, Some(DataTable::from_values("a", vec![1])));
        let jobs = rt.materialize(&[]).await.unwrap();
        assert_eq!(jobs[0].status(), JobStatus::Failed);
        assert!(jobs[0].error.as_deref().unwrap().contains("script"));
    }

    #[tokio::test]
    async fn test_render_failure_halts_remaining_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P")
            .input("a")
            .script("echo {{in.a.b}}")
            .build()
            .unwrap();
        let config = PipelineConfig::default()
            .with_poll_interval_ms(1)
            .with_forks(1)
            .with_error_strategy(ErrorStrategy::Halt);
        let mock = Arc::new(MockScheduler::new());
        let data = DataTable::from_values("a", vec![json!("s"), json!({"b": 1}), json!({"b": 2})]);
        let rt = runtime_with(dir.path(), def, &config, mock.clone(), false, Some(data));

        let jobs = rt.materialize(&[]).await.unwrap();
        assert_eq!(jobs[0].status(), JobStatus::Failed);
        let result = rt.run(jobs).await.unwrap();

        let statuses: Vec<JobStatus> = result.jobs.iter().map(JobRecord::status).collect();
        assert_eq!(statuses, vec![JobStatus::Failed, JobStatus::Killed, JobStatus::Killed]);
        assert_eq!(mock.submit_count(), 0);
        assert_eq!(result.outcome, RunOutcome::Failed);
        assert!(result.output_table.is_none());
    }

    #[tokio::test]
    async fn test_render_failure_ignored_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P")
            .input("a")
            .script("echo {{in.a.b}}")
            .build()
            .unwrap();
        let config = PipelineConfig::default()
            .with_poll_interval_ms(1)
            .with_error_strategy(ErrorStrategy::Ignore);
        let mock = Arc::new(MockScheduler::new());
        let data = DataTable::from_values("a", vec![json!("s"), json!({"b": 1})]);
        let rt = runtime_with(dir.path(), def, &config, mock.clone(), false, Some(data));

        let result = rt.run(rt.materialize(&[]).await.unwrap()).await.unwrap();
        assert!(result.jobs[0].failure_ignored);
        assert_eq!(result.jobs[1].status(), JobStatus::Succeeded);
        assert_eq!(mock.submit_count(), 1);
        assert_eq!(result.outcome, RunOutcome::Partial);
    }

    #[tokio::test]
    async fn test_absolute_output_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P").input("a").output("f:file:/tmp/x").build().unwrap();
        let rt = runtime(dir.path(), def, false, None);
        let err = rt.materialize(&[]).await.unwrap_err();
        assert!(matches!(err, ProcflowError::Declaration(DeclarationError::Output { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_export_links_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P").input("a").output("f:file:out.txt").build().unwrap();
        let rt = runtime(dir.path(), def, true, Some(DataTable::from_values("a", vec![1, 2])));
        let jobs = rt.materialize(&[]).await.unwrap();
        let expected = absolutize(&dir.path().join("outdir/P/1")).unwrap();
        assert_eq!(jobs[1].outdir, expected);
        assert!(links_to(&jobs[1].metadir.join("output"), &expected));
    }

    #[tokio::test]
    async fn test_run_outcome_and_output_table() {
        let dir = tempfile::tempdir().unwrap();
        let def = ProcDefinition::builder("P").input("a").output("o:{{in.a}}").build().unwrap();
        let rt = runtime(dir.path(), def, false, Some(DataTable::from_values("a", vec!["p", "q"])));
        let jobs = rt.materialize(&[]).await.unwrap();
        let result = rt.run(jobs).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Success);
        let table = result.output_table.unwrap();
        assert_eq!(table.column("o").unwrap(), vec![&json!("p"), &json!("q")]);

        // Second run is fully cached.
        let jobs = rt.materialize(&[]).await.unwrap();
        let again = rt.run(jobs).await.unwrap();
        assert_eq!(again.cached, vec![0, 1]);
    }

    #[test]
    fn test_hashed_name() {
        let name = hashed_name("reads.fq", Path::new("/data/a/reads.fq"));
        assert!(name.starts_with("reads[") && name.ends_with("].fq"));
        assert_eq!(name.len(), "reads[12345678].fq".len());
        assert_eq!(hashed_name("README", Path::new("/x/README")).len(), "README[12345678]".len());
    }
}
