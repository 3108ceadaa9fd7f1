// tests/integration/store_failures.rs

use std::sync::Arc;

use suiteflow::clock::system_clock;
use suiteflow::errors::OrchestratorError;
use suiteflow::model::JobStatus;
use suiteflow::orchestrator::Orchestrator;
use suiteflow::store::{Filter, StoreError};
use suiteflow_test_utils::{
    ConfigBuilder, FlakyStore, JobSpecBuilder, ScriptedHandler, init_tracing,
};

fn orchestrator(store: &Arc<FlakyStore>) -> Orchestrator {
    Orchestrator::new(
        ConfigBuilder::new().build(),
        store.clone(),
        system_clock(),
        ScriptedHandler::new().handlers(),
    )
}

#[tokio::test]
async fn submission_fails_cleanly_when_the_store_is_down() {
    init_tracing();
    let store = Arc::new(FlakyStore::new());
    let orch = orchestrator(&store);
    let spec = JobSpecBuilder::new("nightly").chain(&["a", "b"]).build();

    store.set_fail_writes(true);
    let err = orch.scheduler().schedule_job(&spec, "alice").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Store(StoreError::Unavailable(_))), "got {err:?}");
    assert_eq!(store.rejected(), 1);

    store.set_fail_writes(false);
    assert!(orch.repository().jobs(&Filter::all()).unwrap().is_empty());
}

#[tokio::test]
async fn rejected_cancellation_leaves_the_job_untouched() {
    init_tracing();
    let store = Arc::new(FlakyStore::new());
    let orch = orchestrator(&store);
    let spec = JobSpecBuilder::new("nightly").chain(&["a"]).build();
    let job = orch.scheduler().schedule_job(&spec, "alice").await.unwrap();

    store.set_fail_writes(true);
    let err = orch.scheduler().cancel_job(&job.job_id).unwrap_err();
    assert!(matches!(err, OrchestratorError::Store(_)), "got {err:?}");

    store.set_fail_writes(false);
    let stored = orch.repository().require_job(&job.job_id).unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(stored.completed_at.is_none());

    let cancelled = orch.scheduler().cancel_job(&job.job_id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
}
