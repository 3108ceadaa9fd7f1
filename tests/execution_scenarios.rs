// tests/execution_scenarios.rs

mod common;

use std::time::Duration;

use suiteflow::model::{
    FailureClassification, JobStatus, NodeState, RetryPolicy, RetryStrategy,
};
use suiteflow_test_utils::{
    ConfigBuilder, JobSpecBuilder, NodeSpecBuilder, ScriptedHandler, with_timeout,
};

use crate::common::{TestResult, init_tracing, orchestrator, position, wait_until};

#[tokio::test]
async fn linear_chain_completes_with_durations_and_full_progress() -> TestResult {
    init_tracing();

    let handler = ScriptedHandler::new().sleep("b", Duration::from_millis(30));
    let orch = orchestrator(ConfigBuilder::new().build(), &handler);
    orch.start()?;

    let spec = JobSpecBuilder::new("chain").chain(&["a", "b", "c"]).build();
    let job = orch.scheduler().schedule_job(&spec, "alice").await?;

    let done = with_timeout(wait_until(orch.repository(), &job.job_id, |j| {
        j.status.is_terminal()
    }))
    .await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.execution_path, vec!["a", "b", "c"]);
    assert!(done.completed_at >= done.started_at);
    assert!(done.error_details.is_none());
    assert_eq!(handler.started_order(), vec!["a", "b", "c"]);

    for node in orch.repository().nodes(&job.job_id)? {
        assert_eq!(node.execution_status, JobStatus::Completed, "node {}", node.node_id);
        let (Some(start), Some(end)) = (node.started_at, node.completed_at) else {
            panic!("node {} has no recorded duration", node.node_id);
        };
        assert!(end >= start);
        assert!(node.result.is_some());
    }

    let b = handler
        .executions()
        .into_iter()
        .find(|e| e.node_id == "b")
        .expect("b ran");
    let finished = b.finished.expect("b finished");
    assert!(finished - b.started >= Duration::from_millis(30));

    let progress = orch.scheduler().get_job_progress(&job.job_id)?;
    assert_eq!(progress.percent, 100.0);
    assert_eq!(progress.counters.completed, 3);
    assert!(orch.scheduler().resources().in_use() == 0);

    orch.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn critical_node_failure_halts_job_and_never_starts_dependents() -> TestResult {
    init_tracing();

    let handler = ScriptedHandler::new().fail("provision", "environment unreachable");
    let orch = orchestrator(ConfigBuilder::new().build(), &handler);
    orch.start()?;

    let spec = JobSpecBuilder::new("diamond")
        .node(NodeSpecBuilder::new("provision").critical())
        .node(NodeSpecBuilder::new("tests").after(&["provision"]))
        .build();
    let job = orch.scheduler().schedule_job(&spec, "alice").await?;

    let done = with_timeout(wait_until(orch.repository(), &job.job_id, |j| {
        j.status.is_terminal()
    }))
    .await;

    // no retry policy applies, so the failed job is aborted
    assert_eq!(done.status, JobStatus::Aborted);
    let error = done.error_details.expect("failure recorded");
    assert_eq!(error.classification, FailureClassification::CriticalError);
    assert_eq!(error.node_id.as_deref(), Some("provision"));

    assert_eq!(handler.calls("tests"), 0);
    let tests = orch
        .repository()
        .nodes(&job.job_id)?
        .into_iter()
        .find(|n| n.node_id == "tests")
        .expect("node record");
    assert!(matches!(
        tests.execution_status,
        JobStatus::Pending | JobStatus::Cancelled
    ));

    let graph = orch.tracker().load_state(&job.job_id)?.expect("graph tracked");
    assert_eq!(graph.node_states["provision"], NodeState::Failed);
    assert!(matches!(
        graph.node_states["tests"],
        NodeState::Pending | NodeState::Cancelled
    ));

    // the execution closed as failed before the retry decision aborted the job
    assert_eq!(graph.final_status, Some(JobStatus::Failed));
    assert!(graph
        .error_summary
        .iter()
        .any(|e| e.message.contains("environment unreachable")));

    let history = orch.retry().history(&job.job_id);
    assert_eq!(history.len(), 1);
    let decision = &history[0];
    assert_eq!(decision.attempt, 1);
    assert!(decision.failure_reason.contains("critical_node_failure"));
    assert!(decision.failure_reason.contains("provision"));
    assert!(decision.failure_reason.contains("environment unreachable"));
    assert_eq!(decision.refused.as_deref(), Some("no retry policy applies"));
    assert!(decision.delay.is_none());
    assert!(done.completed_at.is_some());
    assert!(orch.repository().audits(&job.job_id)?.is_empty());

    orch.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exponential_retries_back_off_then_abort() -> TestResult {
    init_tracing();

    let config = ConfigBuilder::new()
        .policy(RetryPolicy::new("exp", RetryStrategy::Exponential, 3, 1000))
        .build();
    let handler = ScriptedHandler::new().fail("run", "suite crashed");
    let orch = orchestrator(config, &handler);
    orch.start()?;

    let spec = JobSpecBuilder::new("flaky")
        .node(NodeSpecBuilder::new("run"))
        .retry_policy("exp")
        .build();
    let job = orch.scheduler().schedule_job(&spec, "alice").await?;

    let done = tokio::time::timeout(
        Duration::from_secs(60),
        wait_until(orch.repository(), &job.job_id, |j| j.status.is_terminal()),
    )
    .await?;

    assert_eq!(done.status, JobStatus::Aborted);
    assert_eq!(done.retry_count, 3);

    let history = orch.retry().history(&job.job_id);
    let delays: Vec<u128> = history
        .iter()
        .filter_map(|r| r.delay)
        .map(|d| d.as_millis())
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000]);
    let last = history.last().expect("final decision recorded");
    assert!(last.refused.as_deref().is_some_and(|r| r.contains("exhausted")));

    let runs = handler.executions();
    assert_eq!(runs.len(), 4);
    for (i, run) in runs.iter().enumerate() {
        assert_eq!(run.job_attempt, i as u32 + 1);
        assert!(run.failed);
    }
    for (pair, expected_ms) in runs.windows(2).zip([1000u64, 2000, 4000]) {
        let gap = pair[1].started - pair[0].finished.expect("run finished");
        assert!(gap >= Duration::from_millis(expected_ms), "gap {gap:?}");
        assert!(gap < Duration::from_millis(expected_ms + 500), "gap {gap:?}");
    }

    orch.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cycle_is_rejected_before_any_node_runs() -> TestResult {
    init_tracing();

    let handler = ScriptedHandler::new();
    let orch = orchestrator(ConfigBuilder::new().build(), &handler);
    orch.start()?;

    let spec = JobSpecBuilder::new("loop")
        .node(NodeSpecBuilder::new("a").after(&["b"]))
        .node(NodeSpecBuilder::new("b").after(&["a"]))
        .build();
    let job = orch.scheduler().schedule_job(&spec, "alice").await?;

    let done = with_timeout(wait_until(orch.repository(), &job.job_id, |j| {
        j.status.is_terminal()
    }))
    .await;

    assert_eq!(done.status, JobStatus::Aborted);
    assert_eq!(
        done.error_details.map(|e| e.classification),
        Some(FailureClassification::DependencyFailure)
    );
    assert!(handler.executions().is_empty());
    assert!(orch.tracker().load_state(&job.job_id)?.is_none());

    orch.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn dependents_wait_for_every_dependency() -> TestResult {
    init_tracing();

    let handler = ScriptedHandler::new()
        .sleep("left", Duration::from_millis(40))
        .sleep("right", Duration::from_millis(10));
    let orch = orchestrator(ConfigBuilder::new().max_parallel_nodes(4).build(), &handler);
    orch.start()?;

    let spec = JobSpecBuilder::new("fan")
        .node(NodeSpecBuilder::new("setup"))
        .node(NodeSpecBuilder::new("left").after(&["setup"]))
        .node(NodeSpecBuilder::new("right").after(&["setup"]))
        .node(NodeSpecBuilder::new("report").after(&["left", "right"]))
        .build();
    let job = orch.scheduler().schedule_job(&spec, "alice").await?;

    let done = with_timeout(wait_until(orch.repository(), &job.job_id, |j| {
        j.status.is_terminal()
    }))
    .await;
    assert_eq!(done.status, JobStatus::Completed);

    let order = handler.started_order();
    assert_eq!(position(&order, "setup"), 0);
    assert_eq!(position(&order, "report"), 3);

    let runs = handler.executions();
    let report = runs.iter().find(|e| e.node_id == "report").expect("report ran");
    for dep in ["left", "right"] {
        let run = runs.iter().find(|e| e.node_id == dep).expect("dependency ran");
        assert!(run.finished.is_some_and(|f| f <= report.started));
    }

    orch.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parallelism_is_bounded_per_job() -> TestResult {
    init_tracing();

    let mut handler = ScriptedHandler::new();
    for id in ["n1", "n2", "n3", "n4", "n5"] {
        handler = handler.sleep(id, Duration::from_millis(100));
    }
    let orch = orchestrator(ConfigBuilder::new().max_parallel_nodes(2).build(), &handler);
    orch.start()?;

    let mut spec = JobSpecBuilder::new("wide");
    for id in ["n1", "n2", "n3", "n4", "n5"] {
        spec = spec.node(NodeSpecBuilder::new(id));
    }
    let job = orch.scheduler().schedule_job(&spec.build(), "alice").await?;

    let done = with_timeout(wait_until(orch.repository(), &job.job_id, |j| {
        j.status.is_terminal()
    }))
    .await;
    assert_eq!(done.status, JobStatus::Completed);

    let runs = handler.executions();
    assert_eq!(runs.len(), 5);
    for run in &runs {
        let overlapping = runs
            .iter()
            .filter(|r| r.started <= run.started && r.finished.is_some_and(|f| f > run.started))
            .count();
        assert!(overlapping <= 2, "{overlapping} nodes ran at once");
    }

    orch.shutdown().await;
    Ok(())
}
