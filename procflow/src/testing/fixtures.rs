//! Test fixtures.

use std::path::Path;

use crate::config::PipelineConfig;
use crate::job::JobRecord;

/// Configuration writing everything below `root`, polling every 5 ms.
#[must_use]
pub fn test_config(root: &Path) -> PipelineConfig {
    PipelineConfig::default()
        .with_workdir(root.join("workdir"))
        .with_outdir(root.join("outdir"))
        .with_poll_interval_ms(5)
}

/// A pending job whose metadir `<root>/<proc>/<index>` exists.
#[must_use]
pub fn job_in(root: &Path, proc: &str, index: usize) -> JobRecord {
    let metadir = root.join(proc).join(index.to_string());
    let outdir = metadir.join("output");
    // Best effort; tests fail loudly on the first file they cannot write.
    let _ = std::fs::create_dir_all(&outdir);
    let mut job = JobRecord::new(proc, index, metadir, outdir);
    job.cmd = vec!["bash".to_string(), job.script_file().to_string_lossy().into_owned()];
    job
}
