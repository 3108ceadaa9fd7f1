// src/recovery/mod.rs

//! Recovery processor.
//!
//! Two periodic scans feed a bounded request queue:
//! - stall detection: `running` jobs with no state update for longer than
//!   `stall_threshold_secs`,
//! - critical-failure detection: `failed`/`retrying` jobs whose retry count
//!   reached `critical_retry_threshold`.
//!
//! Requests are deduplicated per job while a session is in progress. Each
//! session opens a [`RecoveryAudit`], picks an action from the failure
//! classification, runs it, and closes the audit whatever the result.

pub mod strategy;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::config::OrchestratorConfig;
use crate::errors::{OrchestratorError, Result};
use crate::model::{FailureClassification, JobStatus, RecoveryAction, RecoveryAudit};
use crate::scheduler::{DispatchQueue, LiveExecutions, StopOutcome, stopped};
use crate::store::{Filter, Repository};
use crate::tracker::StateTracker;
use crate::types::JobId;

pub use strategy::StrategyOutcome;
use strategy::StrategyContext;

/// Counters over all sessions run by this processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub irrecoverable: u64,
}

/// Request to recover one job.
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub job_id: JobId,
    pub classification: FailureClassification,
    /// Overrides the classification table when set.
    pub action: Option<RecoveryAction>,
    pub trigger_reason: String,
}

impl RecoveryRequest {
    pub fn new(job_id: &str, classification: FailureClassification, trigger_reason: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            classification,
            action: None,
            trigger_reason: trigger_reason.to_string(),
        }
    }

    pub fn with_action(mut self, action: RecoveryAction) -> Self {
        self.action = Some(action);
        self
    }
}

#[derive(Debug)]
pub struct RecoveryProcessor {
    config: Arc<OrchestratorConfig>,
    repo: Repository,
    tracker: Arc<StateTracker>,
    queue: DispatchQueue,
    executions: Arc<LiveExecutions>,
    clock: SharedClock,
    active: Mutex<HashSet<JobId>>,
    stats: Mutex<RecoveryStats>,
    requests_tx: mpsc::Sender<RecoveryAudit>,
    requests_rx: tokio::sync::Mutex<mpsc::Receiver<RecoveryAudit>>,
}

impl RecoveryProcessor {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        repo: Repository,
        tracker: Arc<StateTracker>,
        queue: DispatchQueue,
        executions: Arc<LiveExecutions>,
        clock: SharedClock,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(config.recovery.queue_capacity.max(1));
        Self {
            config,
            repo,
            tracker,
            queue,
            executions,
            clock,
            active: Mutex::new(HashSet::new()),
            stats: Mutex::new(RecoveryStats::default()),
            requests_tx,
            requests_rx: tokio::sync::Mutex::new(requests_rx),
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        *self.lock_stats()
    }

    pub fn is_recovering(&self, job_id: &str) -> bool {
        self.lock_active().contains(job_id)
    }

    /// Running jobs whose last activity is older than the stall threshold.
    pub fn scan_stalled(&self) -> Result<Vec<RecoveryRequest>> {
        let now = self.clock.now();
        let threshold = Duration::seconds(self.config.recovery.stall_threshold_secs as i64);
        let mut found = Vec::new();

        for job in self
            .repo
            .jobs(&Filter::all().eq("status", JobStatus::Running.as_str()))?
        {
            let mut last_activity = job.updated_at;
            if let Some(graph) = self.tracker.load_state(&job.job_id)? {
                if let Some(last) = graph.history.last() {
                    last_activity = last_activity.max(last.at);
                }
            }
            if now - last_activity > threshold {
                debug!(job_id = %job.job_id, idle_secs = (now - last_activity).num_seconds(), "stalled job");
                found.push(RecoveryRequest::new(
                    &job.job_id,
                    FailureClassification::Timeout,
                    "no state update within stall threshold",
                ));
            }
        }
        Ok(found)
    }

    /// Failed or retrying jobs that hit the critical retry threshold.
    pub fn scan_critical_failures(&self) -> Result<Vec<RecoveryRequest>> {
        let threshold = self.config.recovery.critical_retry_threshold;
        let mut found = Vec::new();
        for status in [JobStatus::Failed, JobStatus::Retrying] {
            for job in self
                .repo
                .jobs(&Filter::all().eq("status", status.as_str()))?
            {
                if job.retry_count < threshold {
                    continue;
                }
                let classification = job
                    .error_details
                    .as_ref()
                    .map(|e| e.classification)
                    .unwrap_or(FailureClassification::Unknown);
                found.push(RecoveryRequest::new(
                    &job.job_id,
                    classification,
                    "retry count reached critical threshold",
                ));
            }
        }
        Ok(found)
    }

    /// Open a session and queue it for execution. Returns `None` when the
    /// job already has a session in progress or the queue is full.
    pub fn initiate_recovery(&self, request: RecoveryRequest) -> Result<Option<RecoveryAudit>> {
        let Some(audit) = self.open_session(&request)? else {
            return Ok(None);
        };
        match self.requests_tx.try_send(audit.clone()) {
            Ok(()) => Ok(Some(audit)),
            Err(e) => {
                warn!(job_id = %request.job_id, error = %e, "recovery queue rejected request");
                let mut audit = audit;
                self.finish(&mut audit, Err(OrchestratorError::RecoveryProcess {
                    job_id: request.job_id.clone(),
                    message: "recovery queue full".to_string(),
                }));
                Ok(None)
            }
        }
    }

    /// Open a session and run it inline.
    pub async fn recover_now(&self, request: RecoveryRequest) -> Result<Option<RecoveryAudit>> {
        match self.open_session(&request)? {
            Some(audit) => Ok(Some(self.execute_recovery(audit).await)),
            None => Ok(None),
        }
    }

    /// Append post-hoc escalation metadata to an audit, closed or not.
    pub fn append_escalation_note(&self, audit_id: &str, note: &str) -> Result<RecoveryAudit> {
        let mut audit = self
            .repo
            .audit(audit_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("recovery audit {audit_id}")))?;
        audit.escalation_notes.push(note.to_string());
        self.repo.save_audit(&audit)?;
        Ok(audit)
    }

    fn open_session(&self, request: &RecoveryRequest) -> Result<Option<RecoveryAudit>> {
        {
            let mut active = self.lock_active();
            if !active.insert(request.job_id.clone()) {
                debug!(job_id = %request.job_id, "recovery already in progress; skipping");
                return Ok(None);
            }
        }

        let job = match self.repo.require_job(&request.job_id) {
            Ok(job) => job,
            Err(e) => {
                self.lock_active().remove(&request.job_id);
                return Err(e);
            }
        };
        let action = request
            .action
            .unwrap_or_else(|| request.classification.recovery_action());
        let audit = RecoveryAudit::open(
            &request.job_id,
            action,
            request.classification,
            &request.trigger_reason,
            serde_json::to_value(&job)?,
            self.clock.now(),
        );
        if let Err(e) = self.repo.save_audit(&audit) {
            self.lock_active().remove(&request.job_id);
            return Err(e);
        }
        self.lock_stats().attempted += 1;
        info!(
            job_id = %request.job_id,
            session = %audit.recovery_session_id,
            action = %action,
            classification = %request.classification,
            "recovery session opened"
        );
        Ok(Some(audit))
    }

    /// Run the audited strategy and close the audit.
    ///
    /// The job is moved to `recovering` first, then any live execution of it
    /// is cancelled and awaited, so the strategy is the job's only writer.
    pub async fn execute_recovery(&self, mut audit: RecoveryAudit) -> RecoveryAudit {
        let job_id = audit.job_id.clone();
        let now = self.clock.now();

        let entered = self
            .repo
            .update_job(&job_id, |job| strategy::enter_recovering(job, now));

        let outcome = match entered {
            Ok(_) => match self.wind_down(&job_id).await {
                Ok(()) => {
                    let ctx = StrategyContext {
                        repo: &self.repo,
                        tracker: &self.tracker,
                        queue: &self.queue,
                        now: self.clock.now(),
                    };
                    strategy::execute(audit.recovery_action, &job_id, &ctx).await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        self.finish(&mut audit, outcome);
        audit
    }

    async fn wind_down(&self, job_id: &str) -> Result<()> {
        let limit = self.config.recovery.wind_down_timeout();
        match self.executions.stop(job_id, limit).await {
            StopOutcome::Idle => Ok(()),
            StopOutcome::Stopped => {
                info!(job_id, "live execution stopped for recovery");
                Ok(())
            }
            StopOutcome::StillRunning => Err(OrchestratorError::RecoveryProcess {
                job_id: job_id.to_string(),
                message: format!(
                    "live execution did not stop within {}ms",
                    limit.as_millis()
                ),
            }),
        }
    }

    fn finish(&self, audit: &mut RecoveryAudit, outcome: Result<StrategyOutcome>) {
        let job_id = audit.job_id.clone();
        let state_after = self
            .repo
            .job(&job_id)
            .ok()
            .flatten()
            .and_then(|job| serde_json::to_value(job).ok())
            .unwrap_or(serde_json::Value::Null);
        let now = self.clock.now();

        {
            let mut stats = self.lock_stats();
            match &outcome {
                Ok(StrategyOutcome::Recovered) => {
                    stats.succeeded += 1;
                    audit.close(true, state_after, None, now);
                }
                Ok(StrategyOutcome::Escalated) => {
                    stats.irrecoverable += 1;
                    audit.escalation_notes.push("escalated for manual intervention".to_string());
                    audit.close(false, state_after, Some("manual intervention required".to_string()), now);
                }
                Ok(StrategyOutcome::Unrecovered) => {
                    stats.failed += 1;
                    audit.close(false, state_after, Some("retry budget exhausted".to_string()), now);
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(job_id = %job_id, action = %audit.recovery_action, error = %e, "recovery failed");
                    audit.close(false, state_after, Some(e.to_string()), now);
                }
            }
        }

        if let Err(e) = self.repo.save_audit(audit) {
            error!(job_id = %job_id, error = %e, "failed to persist recovery audit");
        }
        self.lock_active().remove(&job_id);
        info!(
            job_id = %job_id,
            session = %audit.recovery_session_id,
            success = audit.recovery_success.unwrap_or(false),
            "recovery session closed"
        );
    }

    /// Run both scans once and queue what they find.
    pub fn scan_once(&self) -> Result<usize> {
        let mut requests = self.scan_stalled()?;
        requests.extend(self.scan_critical_failures()?);
        let mut queued = 0;
        for request in requests {
            if self.initiate_recovery(request)?.is_some() {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Scan periodically and execute queued sessions until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.recovery.scan_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rx = self.requests_rx.lock().await;
        info!("recovery processor started");

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tick.tick() => {
                    if let Err(e) = self.scan_once() {
                        error!(error = %e, "recovery scan failed");
                    }
                }
                Some(audit) = rx.recv() => {
                    self.execute_recovery(audit).await;
                }
            }
        }
        info!("recovery processor stopped");
    }

    fn lock_active(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stats(&self) -> MutexGuard<'_, RecoveryStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::model::{Job, JobSpec, JobTarget, JobType, Node, NodeSpec, NodeState, NodeType};
    use crate::scheduler::DispatchReceiver;
    use crate::store::MemoryStore;
    use crate::types::StallDetection;
    use chrono::Utc;

    struct Fixture {
        processor: RecoveryProcessor,
        repo: Repository,
        tracker: Arc<StateTracker>,
        clock: ManualClock,
        _rx: DispatchReceiver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let repo = Repository::new(store.clone());
        let tracker = Arc::new(StateTracker::new(
            store,
            Arc::new(clock.clone()),
            StallDetection::Conservative,
        ));
        let (queue, rx) = DispatchQueue::channel(16);
        let processor = RecoveryProcessor::new(
            Arc::new(OrchestratorConfig::default()),
            repo.clone(),
            Arc::clone(&tracker),
            queue,
            Arc::new(LiveExecutions::new()),
            Arc::new(clock.clone()),
        );
        Fixture {
            processor,
            repo,
            tracker,
            clock,
            _rx: rx,
        }
    }

    fn insert_job(f: &Fixture, path: &[JobStatus]) -> Job {
        let spec = JobSpec {
            name: "rec".into(),
            job_type: JobType::Maintenance,
            priority: 5,
            target: JobTarget::default(),
            scheduled_at: None,
            timeout_secs: None,
            max_retries: None,
            retry_policy_id: None,
            metadata: Default::default(),
            nodes: vec![],
        };
        let now = f.clock.now();
        let mut job = Job::new(&spec, "ops", 3, now);
        for s in path {
            job.transition(*s, now).unwrap();
        }
        f.repo.insert_job(&job).unwrap();
        job
    }

    const TO_RUNNING: [JobStatus; 3] = [JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running];

    #[tokio::test]
    async fn stalled_running_job_is_retried() {
        let f = fixture();
        let job = insert_job(&f, &TO_RUNNING);
        f.clock.advance(Duration::seconds(601));

        let requests = f.processor.scan_stalled().unwrap();
        assert_eq!(requests.len(), 1);

        let audit = f
            .processor
            .recover_now(requests[0].clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.recovery_action, RecoveryAction::RetryJob);
        assert_eq!(audit.recovery_success, Some(true));
        let stored = f.repo.require_job(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(f.processor.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn retry_job_aborts_when_budget_is_spent() {
        let f = fixture();
        let job = insert_job(&f, &[JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running, JobStatus::Failed]);
        f.repo
            .update_job(&job.job_id, |j| {
                j.retry_count = j.max_retries;
                Ok(())
            })
            .unwrap();

        let audit = f
            .processor
            .recover_now(
                RecoveryRequest::new(&job.job_id, FailureClassification::Timeout, "test"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.recovery_success, Some(false));
        assert_eq!(f.repo.require_job(&job.job_id).unwrap().status, JobStatus::Aborted);
        assert!(f.repo.require_job(&job.job_id).unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn skip_node_completes_failed_nodes_and_resumes() {
        let f = fixture();
        let job = insert_job(&f, &[JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running, JobStatus::Failed]);
        let spec = NodeSpec {
            node_id: "flaky".into(),
            node_type: NodeType::TestExecution,
            execution_strategy: Default::default(),
            depends_on: vec![],
            critical: false,
            timeout_secs: None,
            max_retries: 0,
            interruptible: true,
            config: Default::default(),
        };
        f.repo.save_node(&Node::from_spec(&job.job_id, &spec)).unwrap();
        f.tracker.initialize_graph(&job.job_id, &["flaky".to_string()], &Default::default());
        for s in [NodeState::Ready, NodeState::Running, NodeState::Failed] {
            f.tracker
                .update_node_state(&job.job_id, "flaky", s, Default::default())
                .unwrap();
        }

        let audit = f
            .processor
            .recover_now(RecoveryRequest::new(&job.job_id, FailureClassification::NodeFailure, "node failed"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.recovery_action, RecoveryAction::SkipNode);
        assert_eq!(audit.recovery_success, Some(true));

        let graph = f.tracker.load_state(&job.job_id).unwrap().unwrap();
        assert_eq!(graph.node_states["flaky"], NodeState::Completed);
        let node = &f.repo.nodes(&job.job_id).unwrap()[0];
        assert_eq!(node.result.as_ref().unwrap()["skipped_by_recovery"], true);
        assert_eq!(f.repo.require_job(&job.job_id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn rollback_without_checkpoint_fails_the_audit() {
        let f = fixture();
        let job = insert_job(&f, &[JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running, JobStatus::Failed]);

        let audit = f
            .processor
            .recover_now(RecoveryRequest::new(&job.job_id, FailureClassification::DependencyFailure, "stall"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.recovery_success, Some(false));
        assert!(audit.error_message.unwrap().contains("checkpoint"));
        assert_eq!(f.processor.stats().failed, 1);
        assert!(!f.processor.is_recovering(&job.job_id));
    }

    #[tokio::test]
    async fn rollback_restores_checkpoint() {
        let f = fixture();
        let job = insert_job(&f, &TO_RUNNING);
        f.repo
            .update_job(&job.job_id, |j| {
                j.current_node_id = Some("b".into());
                j.execution_path = vec!["a".into()];
                j.write_checkpoint();
                j.execution_path.push("b".into());
                j.transition(JobStatus::Failed, Utc::now())
            })
            .unwrap();

        f.processor
            .recover_now(RecoveryRequest::new(&job.job_id, FailureClassification::DependencyFailure, "stall"))
            .await
            .unwrap();
        let stored = f.repo.require_job(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.execution_path, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn escalation_pauses_and_counts_irrecoverable() {
        let f = fixture();
        let job = insert_job(&f, &[JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running, JobStatus::Failed]);

        let audit = f
            .processor
            .recover_now(RecoveryRequest::new(&job.job_id, FailureClassification::CriticalError, "critical"))
            .await
            .unwrap()
            .unwrap();
        let stored = f.repo.require_job(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Paused);
        assert!(stored.manual_intervention);
        assert_eq!(f.processor.stats().irrecoverable, 1);

        let noted = f
            .processor
            .append_escalation_note(&audit.audit_id, "paged on-call")
            .unwrap();
        assert_eq!(noted.escalation_notes.last().unwrap(), "paged on-call");
        assert!(noted.is_closed());
    }

    #[test]
    fn sessions_are_deduplicated_per_job() {
        let f = fixture();
        let job = insert_job(&f, &[JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running, JobStatus::Failed]);
        let req = RecoveryRequest::new(&job.job_id, FailureClassification::Unknown, "dup");

        assert!(f.processor.initiate_recovery(req.clone()).unwrap().is_some());
        assert!(f.processor.initiate_recovery(req).unwrap().is_none());
        assert_eq!(f.repo.audits(&job.job_id).unwrap().len(), 1);
    }

    #[test]
    fn critical_scan_uses_retry_threshold() {
        let f = fixture();
        let job = insert_job(&f, &[JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running, JobStatus::Failed]);
        assert!(f.processor.scan_critical_failures().unwrap().is_empty());

        f.repo
            .update_job(&job.job_id, |j| {
                j.retry_count = 3;
                Ok(())
            })
            .unwrap();
        let found = f.processor.scan_critical_failures().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].classification, FailureClassification::Unknown);
    }
}
