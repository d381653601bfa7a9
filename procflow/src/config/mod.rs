//! Layered configuration.
//!
//! Precedence, lowest first: built-in defaults, `~/.procflow.toml`,
//! `./.procflow.toml`, `PROCFLOW_*` environment variables, values set on the
//! [`Pipeline`](crate::pipeline::Pipeline), and finally the fields of each
//! [`ProcDefinition`](crate::proc::ProcDefinition).
//!
//! Config files are keyed by profile:
//!
//! ```toml
//! [default]
//! forks = 4
//!
//! [cluster]
//! scheduler = "slurm"
//! scheduler_opts = { partition = "short" }
//! ```

use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Profile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::{CacheMode, ErrorStrategy};
use crate::errors::ProcflowError;
use crate::pipeline::BackoffStrategy;
use crate::proc::ProcDefinition;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "PROCFLOW_";

/// Name of the per-user and per-project configuration file.
pub const CONFIG_FILE_NAME: &str = ".procflow.toml";

/// Pipeline-wide configuration; every process inherits these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Log level used by [`init_tracing`](crate::observability::init_tracing).
    pub loglevel: String,
    /// Cache mode.
    pub cache: CacheMode,
    /// Directory depth used when computing directory mtimes.
    pub dirsig: u32,
    /// Error strategy.
    pub error_strategy: ErrorStrategy,
    /// Retries per job under the `retry` strategy.
    pub num_retries: u32,
    /// Base delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Backoff applied to the retry delay.
    pub retry_backoff: BackoffStrategy,
    /// Maximum jobs in flight per process.
    pub forks: usize,
    /// Interpreter for scripts.
    pub lang: String,
    /// Parallel workers used while preparing jobs.
    pub submission_batch: usize,
    /// Root of the per-job metadata directories.
    pub workdir: PathBuf,
    /// Root of exported outputs; `./<pipeline>-output` when unset.
    pub outdir: Option<PathBuf>,
    /// Template engine name.
    pub template: String,
    /// Scheduler name.
    pub scheduler: String,
    /// Scheduler-specific options.
    pub scheduler_opts: serde_json::Map<String, serde_json::Value>,
    /// Interval between scheduler polls in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            cache: CacheMode::On,
            dirsig: 1,
            error_strategy: ErrorStrategy::Ignore,
            num_retries: 3,
            retry_delay_ms: 0,
            retry_backoff: BackoffStrategy::Constant,
            forks: 1,
            lang: "bash".to_string(),
            submission_batch: 8,
            workdir: PathBuf::from("./.procflow"),
            outdir: None,
            template: "simple".to_string(),
            scheduler: "local".to_string(),
            scheduler_opts: serde_json::Map::new(),
            poll_interval_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration for `profile` from the standard locations.
    pub fn load(profile: &str) -> Result<Self, ProcflowError> {
        let mut files = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            files.push(PathBuf::from(home).join(CONFIG_FILE_NAME));
        }
        files.push(PathBuf::from(CONFIG_FILE_NAME));
        Self::load_from(profile, &files)
    }

    /// Loads configuration for `profile` from the given files, in precedence order.
    pub fn load_from(profile: &str, files: &[PathBuf]) -> Result<Self, ProcflowError> {
        Ok(Self::figment(profile, files).extract()?)
    }

    /// Builds the provider chain without extracting it.
    #[must_use]
    pub fn figment(profile: &str, files: &[PathBuf]) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        for file in files {
            figment = figment.merge(Toml::file(file).nested());
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).global())
            .select(Profile::new(profile))
    }

    /// Sets the number of forks.
    #[must_use]
    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks;
        self
    }

    /// Sets the cache mode.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the error strategy.
    #[must_use]
    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_num_retries(mut self, retries: u32) -> Self {
        self.num_retries = retries;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Sets the export directory.
    #[must_use]
    pub fn with_outdir(mut self, outdir: impl Into<PathBuf>) -> Self {
        self.outdir = Some(outdir.into());
        self
    }

    /// Sets the scheduler name.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = scheduler.into();
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Returns the export directory for a pipeline name.
    #[must_use]
    pub fn outdir_for(&self, pipeline: &str) -> PathBuf {
        self.outdir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("./{pipeline}-output")))
    }
}

/// Settings of one process after applying the pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcSettings {
    /// Cache mode.
    pub cache: CacheMode,
    /// Directory depth used when computing directory mtimes.
    pub dirsig: u32,
    /// Error strategy.
    pub error_strategy: ErrorStrategy,
    /// Retries per job.
    pub num_retries: u32,
    /// Base delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Backoff applied to the retry delay.
    pub retry_backoff: BackoffStrategy,
    /// Maximum jobs in flight.
    pub forks: usize,
    /// Parallel preparation workers.
    pub submission_batch: usize,
    /// Fallback interpreter, used when neither the process nor the script shebang names one.
    pub lang: String,
    /// Template engine name.
    pub template: String,
    /// Scheduler name.
    pub scheduler: String,
    /// Scheduler options: pipeline options overlaid with process options.
    pub scheduler_opts: serde_json::Map<String, serde_json::Value>,
    /// Interval between scheduler polls in milliseconds.
    pub poll_interval_ms: u64,
}

impl ProcSettings {
    /// Resolves the settings of `proc` on top of `config`.
    #[must_use]
    pub fn resolve(config: &PipelineConfig, proc: &ProcDefinition) -> Self {
        let mut scheduler_opts = config.scheduler_opts.clone();
        for (key, value) in &proc.scheduler_opts {
            scheduler_opts.insert(key.clone(), value.clone());
        }

        Self {
            cache: proc.cache.unwrap_or(config.cache),
            dirsig: proc.dirsig.unwrap_or(config.dirsig),
            error_strategy: proc.error_strategy.unwrap_or(config.error_strategy),
            num_retries: proc.num_retries.unwrap_or(config.num_retries),
            retry_delay_ms: config.retry_delay_ms,
            retry_backoff: config.retry_backoff,
            forks: proc.forks.unwrap_or(config.forks).max(1),
            submission_batch: proc
                .submission_batch
                .unwrap_or(config.submission_batch)
                .max(1),
            lang: config.lang.clone(),
            template: proc
                .template
                .clone()
                .unwrap_or_else(|| config.template.clone()),
            scheduler: proc
                .scheduler
                .clone()
                .unwrap_or_else(|| config.scheduler.clone()),
            scheduler_opts,
            poll_interval_ms: config.poll_interval_ms.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InputType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache, CacheMode::On);
        assert_eq!(config.dirsig, 1);
        assert_eq!(config.error_strategy, ErrorStrategy::Ignore);
        assert_eq!(config.num_retries, 3);
        assert_eq!(config.forks, 1);
        assert_eq!(config.lang, "bash");
        assert_eq!(config.submission_batch, 8);
        assert_eq!(config.scheduler, "local");
        assert_eq!(config.template, "simple");
    }

    #[test]
    fn test_load_without_files_is_default() {
        let config = PipelineConfig::load_from("default", &[]).unwrap();
        assert_eq!(config.forks, PipelineConfig::default().forks);
    }

    #[test]
    fn test_profile_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &file,
            "[default]\nforks = 2\n\n[cluster]\nforks = 16\nscheduler = \"slurm\"\nerror_strategy = \"retry\"\n",
        )
        .unwrap();

        let default = PipelineConfig::load_from("default", &[file.clone()]).unwrap();
        assert_eq!(default.forks, 2);
        assert_eq!(default.scheduler, "local");

        let cluster = PipelineConfig::load_from("cluster", &[file]).unwrap();
        assert_eq!(cluster.forks, 16);
        assert_eq!(cluster.scheduler, "slurm");
        assert_eq!(cluster.error_strategy, ErrorStrategy::Retry);
    }

    #[test]
    fn test_later_files_win() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home.toml");
        let project = dir.path().join("project.toml");
        std::fs::write(&home, "[default]\nforks = 3\nlang = \"sh\"\n").unwrap();
        std::fs::write(&project, "[default]\nforks = 5\n").unwrap();

        let config = PipelineConfig::load_from("default", &[home, project]).unwrap();
        assert_eq!(config.forks, 5);
        assert_eq!(config.lang, "sh");
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.toml");
        std::fs::write(&file, "[default]\ncache = \"sometimes\"\n").unwrap();
        let err = PipelineConfig::load_from("default", &[file]).unwrap_err();
        assert!(matches!(err, ProcflowError::Config(_)));
    }

    #[test]
    fn test_proc_settings_prefer_process_fields() {
        let config = PipelineConfig::default()
            .with_forks(4)
            .with_error_strategy(ErrorStrategy::Halt);
        let proc = ProcDefinition::builder("P1")
            .input("a")
            .forks(2)
            .cache(CacheMode::Off)
            .scheduler_opt("queue", serde_json::json!("fast"))
            .build()
            .unwrap();

        let settings = ProcSettings::resolve(&config, &proc);
        assert_eq!(settings.forks, 2);
        assert_eq!(settings.cache, CacheMode::Off);
        assert_eq!(settings.error_strategy, ErrorStrategy::Halt);
        assert_eq!(settings.scheduler_opts["queue"], serde_json::json!("fast"));
        assert_eq!(proc.input[0].1, InputType::Var);
    }

    #[test]
    fn test_outdir_for_pipeline() {
        let config = PipelineConfig::default();
        assert_eq!(config.outdir_for("demo"), PathBuf::from("./demo-output"));
        let config = config.with_outdir("/tmp/out");
        assert_eq!(config.outdir_for("demo"), PathBuf::from("/tmp/out"));
    }
}
