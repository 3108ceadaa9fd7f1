// tests/service_requests.rs

mod common;

use std::sync::Arc;

use suiteflow::errors::OrchestratorError;
use suiteflow::model::{JobStatus, JobTarget, JobType};
use suiteflow::orchestrator::Orchestrator;
use suiteflow::store::Filter;
use suiteflow::service::{JobFilter, OrchestratorService, Pagination, StaticAccounts};
use suiteflow_test_utils::{ConfigBuilder, JobSpecBuilder, ScriptedHandler};

use crate::common::{TestResult, init_tracing, orchestrator};

fn accounts() -> Arc<StaticAccounts> {
    Arc::new(
        StaticAccounts::new()
            .with_account("alice", true, false)
            .with_account("bob", true, false)
            .with_account("root", true, true)
            .with_account("mallory", false, false),
    )
}

/// Service over an orchestrator whose loops are not running, so submitted
/// jobs stay pending.
fn service() -> (Orchestrator, OrchestratorService) {
    let orch = orchestrator(ConfigBuilder::new().build(), &ScriptedHandler::new());
    let service = orch.service(accounts());
    (orch, service)
}

#[tokio::test]
async fn inactive_accounts_cannot_submit() -> TestResult {
    init_tracing();
    let (orch, service) = service();
    let spec = JobSpecBuilder::new("nightly").chain(&["a"]).build();

    for who in ["mallory", "stranger"] {
        let err = service.submit_job(&spec, who).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Permission(_)), "{who}: {err}");
    }
    assert!(orch.repository().jobs(&Filter::all())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn only_owner_or_admin_may_read_and_cancel() -> TestResult {
    init_tracing();
    let (_orch, service) = service();
    let spec = JobSpecBuilder::new("nightly").chain(&["a", "b"]).build();
    let receipt = service.submit_job(&spec, "alice").await?;
    assert_eq!(receipt.status, JobStatus::Pending);

    let view = service.get_job_status(&receipt.job_id, "alice")?;
    assert_eq!(view.triggered_by, "alice");
    assert_eq!(view.counters.total, 2);
    assert_eq!(view.progress_percent, 0.0);

    let err = service.get_job_status(&receipt.job_id, "bob").unwrap_err();
    assert!(matches!(err, OrchestratorError::AccessDenied(_)));
    let err = service.cancel_job(&receipt.job_id, "bob").unwrap_err();
    assert!(matches!(err, OrchestratorError::AccessDenied(_)));

    assert!(service.get_job_status(&receipt.job_id, "root").is_ok());
    let cancelled = service.cancel_job(&receipt.job_id, "root")?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let err = service.cancel_job(&receipt.job_id, "alice").unwrap_err();
    assert!(matches!(err, OrchestratorError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    init_tracing();
    let (_orch, service) = service();
    let err = service.get_job_status("no-such-job", "root").unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
    let err = service.cancel_job("no-such-job", "root").unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn invalid_submissions_are_rejected_before_any_write() -> TestResult {
    init_tracing();
    let (orch, service) = service();

    let no_nodes = JobSpecBuilder::new("empty").build();
    let bad_priority = JobSpecBuilder::new("loud").priority(11).chain(&["a"]).build();
    let wrong_target = JobSpecBuilder::new("maint")
        .job_type(JobType::Maintenance, JobTarget {
            suite_id: Some("suite-1".to_string()),
            ..Default::default()
        })
        .chain(&["a"])
        .build();

    for spec in [no_nodes, bad_priority, wrong_target] {
        let err = service.submit_job(&spec, "alice").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)), "{}: {err}", spec.name);
    }
    assert!(orch.repository().jobs(&Filter::all())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn listing_filters_and_paginates_newest_first() -> TestResult {
    init_tracing();
    let (_orch, service) = service();

    let mut ids = Vec::new();
    for i in 0..5 {
        let spec = JobSpecBuilder::new(&format!("job-{i}")).chain(&["a"]).build();
        ids.push(service.submit_job(&spec, "alice").await?.job_id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    let maintenance = JobSpecBuilder::new("vacuum")
        .job_type(JobType::Maintenance, JobTarget::default())
        .chain(&["a"])
        .build();
    service.submit_job(&maintenance, "bob").await?;
    service.cancel_job(&ids[0], "alice")?;

    let suites = JobFilter {
        job_type: Some(JobType::TestSuiteRun),
        ..Default::default()
    };
    let first = service.list_jobs(&suites, Pagination { page: 1, page_size: 2 })?;
    assert_eq!(first.total, 5);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].job_id, ids[4]);
    assert_eq!(first.items[1].job_id, ids[3]);

    let last = service.list_jobs(&suites, Pagination { page: 3, page_size: 2 })?;
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].job_id, ids[0]);

    let cancelled = JobFilter {
        status: Some(JobStatus::Cancelled),
        ..Default::default()
    };
    let page = service.list_jobs(&cancelled, Pagination::default())?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].status, JobStatus::Cancelled);

    let err = service
        .list_jobs(&JobFilter::default(), Pagination { page: 1, page_size: 500 })
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    Ok(())
}
