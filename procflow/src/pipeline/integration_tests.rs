//! End-to-end pipeline runs against the mock scheduler.

#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::core::{ErrorStrategy, JobStatus, RunOutcome};
    use crate::errors::ProcflowError;
    use crate::events::{CollectingEventSink, EventKind};
    use crate::pipeline::Pipeline;
    use crate::proc::{DataTable, ProcDefinition};
    use crate::testing::{test_config, MockScheduler};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    fn p1() -> Arc<ProcDefinition> {
        ProcDefinition::builder("P1")
            .input("a")
            .output("o:{{in.a}}-1")
            .script("echo {{in.a}}")
            .build()
            .unwrap()
    }

    fn p2(upstream: &Arc<ProcDefinition>) -> Arc<ProcDefinition> {
        ProcDefinition::builder("P2")
            .input("b")
            .output("o:{{in.b}}-2")
            .script("echo {{in.b}}")
            .requires(upstream)
            .build()
            .unwrap()
    }

    fn config(root: &Path) -> PipelineConfig {
        test_config(root).with_scheduler("mock").with_forks(2)
    }

    fn two_stage(
        root: &Path,
        config: PipelineConfig,
        scheduler: &Arc<MockScheduler>,
        values: &[&str],
    ) -> Pipeline {
        let start = p1();
        let end = p2(&start);
        Pipeline::new("two_stage")
            .unwrap()
            .with_config(config)
            .with_outdir(root.join("outdir"))
            .with_scheduler("mock", scheduler.clone())
            .starts(&[start])
            .add_procs(&[end])
            .set_data("P1", DataTable::from_values("a", values.to_vec()))
    }

    #[tokio::test]
    async fn test_two_stage_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new().with_running_polls(2));
        let pipeline = two_stage(dir.path(), config(dir.path()), &scheduler, &["x", "y", "z"]);

        let report = pipeline.run().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(scheduler.submit_count(), 6);
        assert!(scheduler.max_in_flight() <= 2);
        for proc in ["P1", "P2"] {
            let stage = report.stage(proc).unwrap();
            assert_eq!(stage.jobs, 3);
            assert_eq!(stage.succeeded, 3);
        }
        let out = report.output("P2").unwrap();
        assert_eq!(
            out.column("o").unwrap(),
            vec![&json!("x-1-2"), &json!("y-1-2"), &json!("z-1-2")]
        );
        // Terminal processes are exported.
        assert!(dir.path().join("outdir/P2/0").is_dir());
    }

    #[tokio::test]
    async fn test_second_run_is_fully_cached() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new());
        let pipeline = two_stage(dir.path(), config(dir.path()), &scheduler, &["x", "y", "z"]);

        pipeline.run().await.unwrap();
        let submitted = scheduler.submit_count();
        let again = pipeline.run().await.unwrap();

        assert_eq!(scheduler.submit_count(), submitted);
        assert_eq!(again.outcome, RunOutcome::Success);
        for proc in ["P1", "P2"] {
            let stage = again.stage(proc).unwrap();
            assert_eq!(stage.cached, "[0-2]");
            assert_eq!(stage.succeeded, 0);
        }
        assert_eq!(
            again.output("P2").unwrap().column("o").unwrap(),
            vec![&json!("x-1-2"), &json!("y-1-2"), &json!("z-1-2")]
        );
    }

    #[tokio::test]
    async fn test_changed_value_reruns_only_affected_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new());
        two_stage(dir.path(), config(dir.path()), &scheduler, &["x", "y", "z"])
            .run()
            .await
            .unwrap();
        assert_eq!(scheduler.submit_count(), 6);

        let report = two_stage(dir.path(), config(dir.path()), &scheduler, &["x", "w", "z"])
            .run()
            .await
            .unwrap();

        assert_eq!(scheduler.submit_count(), 8);
        assert_eq!(report.stage("P1").unwrap().cached, "[0, 2]");
        assert_eq!(report.stage("P2").unwrap().cached, "[0, 2]");
        assert_eq!(report.output("P2").unwrap().get(1, "o"), Some(&json!("w-1-2")));
    }

    #[tokio::test]
    async fn test_retry_bound_and_stop_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new().always_failing(0));
        let config = config(dir.path())
            .with_error_strategy(ErrorStrategy::Retry)
            .with_num_retries(2);
        let pipeline = two_stage(dir.path(), config, &scheduler, &["x"]);

        let report = pipeline.run().await.unwrap();

        assert_eq!(scheduler.attempts_of(0), 3);
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.skipped, vec!["P2".to_string()]);
        assert!(report.stage("P2").is_none());
        let failure = report.first_failure.as_ref().unwrap();
        assert_eq!((failure.proc.as_str(), failure.index), ("P1", 0));
        assert!(failure.script.ends_with("job.script"));
    }

    #[tokio::test]
    async fn test_ignored_failures_continue_as_partial() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new().always_failing(1));
        let config = config(dir.path()).with_error_strategy(ErrorStrategy::Ignore);
        let pipeline = two_stage(dir.path(), config, &scheduler, &["x", "y", "z"]);

        let report = pipeline.run().await.unwrap();

        assert_eq!(report.stage("P1").unwrap().outcome, RunOutcome::Partial);
        assert_eq!(report.stage("P1").unwrap().failed, 1);
        assert_eq!(report.stage("P2").unwrap().jobs, 3);
        assert_eq!(report.outcome, RunOutcome::Partial);
        assert!(report.is_success());
        assert!(report.first_failure.is_none());
    }

    #[tokio::test]
    async fn test_halt_kills_remaining_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new().always_failing(0));
        let config = config(dir.path())
            .with_forks(1)
            .with_error_strategy(ErrorStrategy::Halt);
        let pipeline = two_stage(dir.path(), config, &scheduler, &["x", "y", "z"]);

        let report = pipeline.run().await.unwrap();

        assert_eq!(scheduler.submit_count(), 1);
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.stage("P1").unwrap().failed, 3);
        assert_eq!(report.skipped, vec!["P2".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_two_stage_through_local_processes() {
        let dir = tempfile::tempdir().unwrap();
        let build = || {
            let start = p1();
            let end = p2(&start);
            Pipeline::new("local_run")
                .unwrap()
                .with_config(test_config(dir.path()).with_scheduler("local").with_forks(2))
                .starts(&[start])
                .add_procs(&[end])
                .set_data("P1", DataTable::from_values("a", vec!["x", "y", "z"]))
        };

        let report = build().run().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
        let p2_dir = dir.path().join("workdir/local_run/P2");
        for (index, expected) in ["x-1", "y-1", "z-1"].iter().enumerate() {
            let metadir = p2_dir.join(index.to_string());
            let stdout = std::fs::read_to_string(metadir.join("job.stdout")).unwrap();
            assert_eq!(stdout.trim(), *expected);
            assert_eq!(std::fs::read_to_string(metadir.join("job.rc")).unwrap().trim(), "0");
            assert!(metadir.join("job.signature").is_file());
        }

        let again = build().run().await.unwrap();
        assert_eq!(again.outcome, RunOutcome::Success);
        for proc in ["P1", "P2"] {
            let stage = again.stage(proc).unwrap();
            assert_eq!(stage.cached, "[0-2]");
            assert_eq!(stage.succeeded, 0);
        }
        assert_eq!(
            again.output("P2").unwrap().column("o").unwrap(),
            vec![&json!("x-1-2"), &json!("y-1-2"), &json!("z-1-2")]
        );
    }

    #[tokio::test]
    async fn test_mutual_dependency_is_cyclic() {
        let a = ProcDefinition::builder("A").input("a").build().unwrap();
        let b = ProcDefinition::builder("B").input("a").requires(&a).build().unwrap();
        let pipeline = Pipeline::new("cyclic").unwrap().starts(&[a, b]);
        assert!(matches!(
            pipeline.run().await,
            Err(ProcflowError::CyclicDependency(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_predecessor_is_unreachable() {
        let a = ProcDefinition::builder("A").input("a").build().unwrap();
        let x = ProcDefinition::builder("X").input("a").build().unwrap();
        let b = ProcDefinition::builder("B")
            .input("a, b")
            .requires(&a)
            .requires(&x)
            .build()
            .unwrap();
        let pipeline = Pipeline::new("unreachable").unwrap().starts(&[a]).add_procs(&[b]);
        match pipeline.run().await {
            Err(ProcflowError::UnreachableProcess(e)) => assert_eq!(e.missing, vec!["X".to_string()]),
            other => panic!("expected unreachable error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new().with_running_polls(1));
        let collector = Arc::new(CollectingEventSink::new());
        let def = p1();
        let pipeline = Pipeline::new("events")
            .unwrap()
            .with_config(config(dir.path()))
            .with_scheduler("mock", scheduler.clone())
            .with_event_sink(collector.clone())
            .starts(&[def])
            .set_data("P1", DataTable::from_values("a", vec!["x"]));

        pipeline.run().await.unwrap();

        assert_eq!(
            collector.kinds(),
            vec![
                "on_pipeline_start",
                "on_proc_start",
                "on_job_queued",
                "on_job_submitting",
                "on_job_submitted",
                "on_job_running",
                "on_job_succeeded",
                "on_proc_done",
                "on_pipeline_complete",
            ]
        );
        let done = collector.events_of_kind(EventKind::PipelineComplete);
        assert_eq!(done[0].outcome, Some(RunOutcome::Success));
        let succeeded = collector.events_of_kind(EventKind::JobSucceeded);
        assert_eq!(succeeded[0].job.as_ref().map(|j| j.status), Some(JobStatus::Succeeded));
    }
}
