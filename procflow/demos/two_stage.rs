//! Two processes on the local scheduler.
//!
//! `P1` writes one file per input value; `P2` counts the characters of each
//! file. Run it twice to see every job cached the second time.

use procflow::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info", false);

    let root = std::env::temp_dir().join("procflow-two-stage");
    let config = PipelineConfig::default()
        .with_workdir(root.join("workdir"))
        .with_outdir(root.join("output"))
        .with_forks(2);

    let p1 = ProcDefinition::builder("P1")
        .desc("Write each value to a file")
        .input("name")
        .output("outfile:file:{{in.name}}.txt")
        .script("echo {{in.name | quote}} > {{out.outfile | quote}}")
        .build()?;
    let p2 = ProcDefinition::builder("P2")
        .desc("Count characters")
        .input("infile:file")
        .output("outfile:file:{{in.infile | stem}}.count")
        .script("wc -c < {{in.infile | quote}} > {{out.outfile | quote}}")
        .requires(&p1)
        .build()?;

    let report = Pipeline::new("two_stage")?
        .with_config(config)
        .with_event_sink(Arc::new(LoggingEventSink::info()))
        .starts(&[p1])
        .add_procs(&[p2])
        .set_data("P1", DataTable::from_values("name", vec!["alpha", "beta", "gamma"]))
        .run_until_interrupt()
        .await?;

    println!("{report}");
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
