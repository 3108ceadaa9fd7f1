// src/scheduler/mod.rs

//! Job scheduler.
//!
//! Owns the job lifecycle around the execution engine:
//! - `schedule_job` validates a submission, persists the job and its nodes,
//!   and either enqueues it now or parks it on a timer until `scheduled_at`,
//! - the dispatch loop drains the queue and starts jobs
//!   (`pending|queued → scheduled → running`), allocating resources and
//!   handing the graph to the engine,
//! - engine events are mirrored onto node records, the job's current node,
//!   its execution path and checkpoint,
//! - completion hands failures to the retry manager and, when a timed-out job
//!   cannot be retried, to the recovery processor,
//! - a monitor loop moves jobs past their deadline to `timeout`.
//!
//! Live executions are tracked in [`LiveExecutions`], shared with the
//! recovery processor so a job never has two executions at once.

pub mod executions;
pub mod queue;
pub mod resources;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::config::OrchestratorConfig;
use crate::engine::{CancelHandle, EngineEvent, ExecutionEngine, ExecutionReport};
use crate::errors::{OrchestratorError, Result};
use crate::model::{
    FailureClassification, GraphCounters, Job, JobSpec, JobStatus, Node, NodeState,
};
use crate::recovery::{RecoveryProcessor, RecoveryRequest};
use crate::retry::{RetryDecision, RetryManager};
use crate::store::{Filter, Repository};
use crate::types::{JobId, NodeId};

pub use executions::{ExecutionLease, LiveExecutions, StopOutcome};
pub use queue::{DispatchQueue, DispatchReceiver};
pub use resources::ResourcePool;

/// Snapshot returned by [`JobScheduler::get_job_progress`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub counters: GraphCounters,
    pub percent: f64,
    pub current_node_id: Option<NodeId>,
    pub execution_path: Vec<NodeId>,
}

#[derive(Debug)]
pub struct JobScheduler {
    config: Arc<OrchestratorConfig>,
    repo: Repository,
    engine: Arc<ExecutionEngine>,
    retry: Arc<RetryManager>,
    recovery: Arc<RecoveryProcessor>,
    queue: DispatchQueue,
    clock: SharedClock,
    resources: ResourcePool,
    executions: Arc<LiveExecutions>,
}

impl JobScheduler {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        repo: Repository,
        engine: Arc<ExecutionEngine>,
        retry: Arc<RetryManager>,
        recovery: Arc<RecoveryProcessor>,
        queue: DispatchQueue,
        executions: Arc<LiveExecutions>,
        clock: SharedClock,
    ) -> Self {
        let resources = ResourcePool::new(config.resources.clone());
        Self {
            config,
            repo,
            engine,
            retry,
            recovery,
            queue,
            clock,
            resources,
            executions,
        }
    }

    pub fn resources(&self) -> &ResourcePool {
        &self.resources
    }

    pub fn active_jobs(&self) -> usize {
        self.executions.len()
    }

    pub fn executions(&self) -> &Arc<LiveExecutions> {
        &self.executions
    }

    /// Create a job from `spec`. Nothing is written when validation fails.
    pub async fn schedule_job(&self, spec: &JobSpec, triggered_by: &str) -> Result<Job> {
        spec.validate()?;

        let now = self.clock.now();
        let max_retries = spec
            .max_retries
            .unwrap_or(self.config.scheduler.default_max_retries);
        let job = Job::new(spec, triggered_by, max_retries, now);
        self.repo.insert_job(&job)?;
        for node_spec in &spec.nodes {
            self.repo.save_node(&Node::from_spec(&job.job_id, node_spec))?;
        }

        let delay = job
            .scheduled_at
            .and_then(|at| (at - now).to_std().ok())
            .filter(|d| !d.is_zero());
        match delay {
            Some(delay) => {
                info!(job_id = %job.job_id, delay_ms = delay.as_millis() as u64, "job parked until its scheduled time");
                let queue = self.queue.clone();
                let job_id = job.job_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = queue.push(&job_id).await {
                        warn!(job_id = %job_id, error = %e, "failed to enqueue scheduled job");
                    }
                });
            }
            None => {
                self.queue.push(&job.job_id).await?;
                info!(job_id = %job.job_id, job_type = %job.job_type, nodes = spec.nodes.len(), "job scheduled");
            }
        }
        Ok(job)
    }

    /// Start a dispatched job. Returns `false` when the job is no longer
    /// waiting for dispatch (e.g. cancelled while queued).
    pub async fn start_job_execution(self: &Arc<Self>, job_id: &str) -> Result<bool> {
        let current = self.repo.require_job(job_id)?;
        if !matches!(current.status, JobStatus::Pending | JobStatus::Queued) {
            debug!(job_id, status = %current.status, "job not waiting for dispatch; skipping");
            return Ok(false);
        }

        let now = self.clock.now();
        self.repo.update_job(job_id, |j| {
            if j.status == JobStatus::Pending {
                j.transition(JobStatus::Queued, now)?;
            }
            j.transition(JobStatus::Scheduled, now)?;
            j.started_at = None;
            j.completed_at = None;
            j.current_node_id = None;
            j.execution_path.clear();
            j.transition(JobStatus::Running, now)
        })?;

        let allocation = match self.resources.allocate(job_id, now) {
            Ok(allocation) => allocation,
            Err(e) => {
                warn!(job_id, error = %e, "resource allocation failed");
                self.fail_job(job_id, &e, None)?;
                self.handle_failure(job_id, &e.to_string()).await?;
                return Ok(true);
            }
        };
        let (job, _) = self.repo.update_job(job_id, |j| {
            j.allocated_resources = Some(allocation);
            Ok(())
        })?;

        let nodes = self.prepare_nodes(job_id)?;
        let cancel = CancelHandle::new();
        let lease = self.executions.register(job_id, cancel.clone());
        info!(job_id, retry = job.retry_count, nodes = nodes.len(), "job execution started");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(job, nodes, cancel, lease).await;
        });
        Ok(true)
    }

    /// Reset node records for a fresh run and mark roots `queued`.
    fn prepare_nodes(&self, job_id: &str) -> Result<Vec<Node>> {
        let mut nodes = self.repo.nodes(job_id)?;
        for node in &mut nodes {
            node.execution_status = if node.is_root() {
                JobStatus::Queued
            } else {
                JobStatus::Pending
            };
            node.result = None;
            node.started_at = None;
            node.completed_at = None;
            node.retry_count = 0;
            self.repo.save_node(node)?;
        }
        Ok(nodes)
    }

    /// Run the engine and apply its outcome. The lease is released only after
    /// the job record reflects the outcome.
    async fn drive(&self, job: Job, nodes: Vec<Node>, cancel: CancelHandle, lease: ExecutionLease) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = tokio::spawn(mirror_events(self.repo.clone(), rx));

        let outcome = self.engine.execute(&job, nodes, &cancel, Some(tx)).await;
        if let Err(e) = observer.await {
            warn!(job_id = %job.job_id, error = %e, "engine event observer ended abnormally");
        }

        if let Err(e) = self.complete_job(&job.job_id, outcome).await {
            error!(job_id = %job.job_id, error = %e, "failed to complete job");
        }
        drop(lease);
    }

    /// Apply the engine's outcome to the job record.
    pub async fn complete_job(&self, job_id: &str, outcome: Result<ExecutionReport>) -> Result<()> {
        let now = self.clock.now();
        if let Some(released) = self.resources.release(job_id, now) {
            self.repo.update_job(job_id, |j| {
                j.allocated_resources = Some(released);
                Ok(())
            })?;
        }

        let job = self.repo.require_job(job_id)?;
        match job.status {
            JobStatus::Running => {}
            JobStatus::Timeout => {
                let reason = job
                    .error_details
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "job timed out".to_string());
                return self.handle_failure(job_id, &reason).await;
            }
            other => {
                debug!(job_id, status = %other, "job left running before its execution finished");
                return Ok(());
            }
        }

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                let node_id = match &e {
                    OrchestratorError::GraphExecutionHalt { node_id, .. } => Some(node_id.clone()),
                    _ => None,
                };
                self.fail_job(job_id, &e, node_id)?;
                return self.handle_failure(job_id, &e.to_string()).await;
            }
        };

        match report.outcome {
            JobStatus::Completed => {
                let (job, _) = self.repo.update_job(job_id, |j| {
                    j.current_node_id = None;
                    j.error_details = None;
                    j.transition(JobStatus::Completed, now)
                })?;
                self.retry.record_success(&job)?;
                info!(job_id, path = ?job.execution_path, "job completed");
                Ok(())
            }
            JobStatus::Aborted => {
                self.repo
                    .update_job(job_id, |j| j.transition(JobStatus::Cancelled, now))?;
                info!(job_id, "job cancelled during execution");
                Ok(())
            }
            _ => {
                let (message, node_id) = match report.first_failure() {
                    Some(run) => (
                        run.error
                            .clone()
                            .unwrap_or_else(|| format!("node {} {}", run.node_id, run.state)),
                        Some(run.node_id.clone()),
                    ),
                    None => ("execution failed".to_string(), None),
                };
                let classification = match report.first_failure().map(|r| r.state) {
                    Some(NodeState::Timeout) => FailureClassification::Timeout,
                    _ => FailureClassification::NodeFailure,
                };
                self.repo.update_job(job_id, |j| {
                    j.set_error(classification, message.clone(), node_id.clone(), now);
                    j.transition(JobStatus::Failed, now)
                })?;
                warn!(job_id, node_id = ?node_id, error = %message, "job failed");
                self.handle_failure(job_id, &message).await
            }
        }
    }

    fn fail_job(&self, job_id: &str, err: &OrchestratorError, node_id: Option<NodeId>) -> Result<()> {
        let now = self.clock.now();
        self.repo.update_job(job_id, |j| {
            j.set_error(err.classify(), err.to_string(), node_id, now);
            j.transition(JobStatus::Failed, now)
        })?;
        warn!(job_id, classification = %err.classify(), error = %err, "job failed");
        Ok(())
    }

    /// Retry first; a refused retry that did not abort goes to recovery.
    async fn handle_failure(&self, job_id: &str, reason: &str) -> Result<()> {
        match self.retry.schedule_retry(job_id, reason).await? {
            RetryDecision::Scheduled { .. } | RetryDecision::Refused { aborted: true, .. } => Ok(()),
            RetryDecision::Refused { reason: refused, .. } => {
                let job = self.repo.require_job(job_id)?;
                let classification = job
                    .error_details
                    .as_ref()
                    .map(|e| e.classification)
                    .unwrap_or(FailureClassification::Timeout);
                info!(job_id, reason = %refused, "retry refused; handing job to recovery");
                self.recovery
                    .initiate_recovery(RecoveryRequest::new(job_id, classification, &refused))?;
                Ok(())
            }
        }
    }

    pub fn get_job_progress(&self, job_id: &str) -> Result<JobProgress> {
        let job = self.repo.require_job(job_id)?;
        let counters = match self.engine.tracker().load_state(job_id)? {
            Some(graph) => graph.counters,
            None => {
                let total = self.repo.nodes(job_id)?.len();
                GraphCounters {
                    total,
                    pending: total,
                    ..Default::default()
                }
            }
        };
        Ok(JobProgress {
            job_id: job.job_id,
            status: job.status,
            percent: counters.progress_percent(),
            counters,
            current_node_id: job.current_node_id,
            execution_path: job.execution_path,
        })
    }

    /// Cancel a job. Terminal jobs are a `Conflict`.
    pub fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let now = self.clock.now();
        let (job, _) = self.repo.update_job(job_id, |j| {
            if j.status.is_terminal() {
                return Err(OrchestratorError::Conflict(format!(
                    "job {} is already {}",
                    j.job_id, j.status
                )));
            }
            j.transition(JobStatus::Cancelled, now)
        })?;

        if !self.executions.cancel(job_id) {
            self.resources.release(job_id, now);
        }
        info!(job_id, "job cancelled");
        Ok(job)
    }

    /// Move running jobs past their deadline to `timeout`. Returns their ids.
    pub async fn check_timeouts(&self) -> Result<Vec<JobId>> {
        let now = self.clock.now();
        let default_timeout = self.config.scheduler.default_job_timeout_secs;
        let mut timed_out = Vec::new();

        for job in self
            .repo
            .jobs(&Filter::all().eq("status", JobStatus::Running.as_str()))?
        {
            let Some(deadline) = job.deadline(default_timeout) else {
                continue;
            };
            if now < deadline {
                continue;
            }
            let (_, moved) = self.repo.update_job(&job.job_id, |j| {
                if j.status != JobStatus::Running {
                    return Ok(false);
                }
                let message = format!("job exceeded its deadline of {deadline}");
                j.set_error(FailureClassification::Timeout, message, j.current_node_id.clone(), now);
                j.transition(JobStatus::Timeout, now)?;
                Ok(true)
            })?;
            if !moved {
                continue;
            }
            warn!(job_id = %job.job_id, %deadline, "job timed out");

            // a live engine winds down and completion routes the job to retry
            if !self.executions.cancel(&job.job_id) {
                self.resources.release(&job.job_id, now);
                self.handle_failure(&job.job_id, "job timed out").await?;
            }
            timed_out.push(job.job_id);
        }
        Ok(timed_out)
    }

    pub async fn run_dispatch(
        self: Arc<Self>,
        mut rx: DispatchReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("dispatch loop started");
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                next = rx.recv() => match next {
                    Some(job_id) => {
                        if let Err(e) = self.start_job_execution(&job_id).await {
                            error!(job_id = %job_id, error = %e, "failed to start job");
                        }
                    }
                    None => break,
                },
            }
        }
        info!("dispatch loop stopped");
    }

    pub async fn run_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.scheduler.monitor_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tick.tick() => {
                    if let Err(e) = self.check_timeouts().await {
                        error!(error = %e, "timeout monitor scan failed");
                    }
                }
            }
        }
    }

    /// Signal every running execution to stop.
    pub fn cancel_all(&self) {
        self.executions.cancel_all();
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone. The borrow
/// guard is released before returning so callers can await in select arms.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Mirror engine events onto node records and the job's progress fields.
async fn mirror_events(repo: Repository, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = rx.recv().await {
        let applied = match event {
            EngineEvent::NodeStarted { job_id, node_id, at } => repo
                .update_node(&job_id, &node_id, |n| {
                    n.execution_status = JobStatus::Running;
                    n.started_at = Some(at);
                })
                .and_then(|_| {
                    repo.update_job(&job_id, |j| {
                        j.current_node_id = Some(node_id.clone());
                        j.updated_at = at;
                        Ok(())
                    })
                })
                .map(|_| ()),
            EngineEvent::NodeResolved { job_id, run } => repo
                .update_node(&job_id, &run.node_id, |n| {
                    n.execution_status = run.state.as_job_status();
                    n.retry_count = run.attempts.saturating_sub(1);
                    n.result = run.result.clone();
                    n.completed_at = run.completed_at;
                    if n.started_at.is_none() {
                        n.started_at = run.started_at;
                    }
                })
                .and_then(|_| {
                    if run.state != NodeState::Completed {
                        return Ok(());
                    }
                    repo.update_job(&job_id, |j| {
                        j.execution_path.push(run.node_id.clone());
                        if let Some(at) = run.completed_at {
                            j.updated_at = at;
                        }
                        j.write_checkpoint();
                        Ok(())
                    })
                    .map(|_| ())
                }),
        };
        if let Err(e) = applied {
            warn!(error = %e, "failed to mirror engine event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::model::{JobTarget, JobType, NodeSpec, NodeType};
    use crate::orchestrator::Orchestrator;
    use crate::runner::HandlerSet;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn spec() -> JobSpec {
        JobSpec {
            name: "smoke".into(),
            job_type: JobType::TestSuiteRun,
            priority: 5,
            target: JobTarget {
                suite_id: Some("suite-1".into()),
                ..Default::default()
            },
            scheduled_at: None,
            timeout_secs: Some(60),
            max_retries: None,
            retry_policy_id: None,
            metadata: Default::default(),
            nodes: vec![NodeSpec {
                node_id: "setup".into(),
                node_type: NodeType::Setup,
                execution_strategy: Default::default(),
                depends_on: vec![],
                critical: false,
                timeout_secs: None,
                max_retries: 0,
                interruptible: true,
                config: Default::default(),
            }],
        }
    }

    fn orchestrator(clock: &ManualClock) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            HandlerSet::default(),
        )
    }

    #[tokio::test]
    async fn invalid_spec_writes_nothing() {
        let orch = orchestrator(&ManualClock::default());
        let mut bad = spec();
        bad.target = JobTarget::default();

        let err = orch.scheduler().schedule_job(&bad, "alice").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(orch.repository().jobs(&Filter::all()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_marks_roots_queued_and_allocates() {
        let clock = ManualClock::default();
        let orch = orchestrator(&clock);
        let job = orch.scheduler().schedule_job(&spec(), "alice").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let scheduler = Arc::clone(orch.scheduler());
        assert!(scheduler.start_job_execution(&job.job_id).await.unwrap());
        let stored = orch.repository().require_job(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert!(stored.allocated_resources.is_some());
        assert_eq!(stored.started_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn cancelled_job_is_not_dispatched_and_cannot_be_cancelled_twice() {
        let orch = orchestrator(&ManualClock::default());
        let job = orch.scheduler().schedule_job(&spec(), "alice").await.unwrap();

        orch.scheduler().cancel_job(&job.job_id).unwrap();
        let again = orch.scheduler().cancel_job(&job.job_id).unwrap_err();
        assert!(matches!(again, OrchestratorError::Conflict(_)));

        let scheduler = Arc::clone(orch.scheduler());
        assert!(!scheduler.start_job_execution(&job.job_id).await.unwrap());
    }

    #[tokio::test]
    async fn monitor_times_out_jobs_past_their_deadline() {
        let clock = ManualClock::default();
        let orch = orchestrator(&clock);
        let job = orch.scheduler().schedule_job(&spec(), "alice").await.unwrap();
        orch.repository()
            .update_job(&job.job_id, |j| {
                for s in [JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running] {
                    j.transition(s, clock.now())?;
                }
                Ok(())
            })
            .unwrap();

        assert!(orch.scheduler().check_timeouts().await.unwrap().is_empty());
        clock.advance(Duration::seconds(61));
        let timed_out = orch.scheduler().check_timeouts().await.unwrap();
        assert_eq!(timed_out, vec![job.job_id.clone()]);

        // no retry policy: a refused timeout is left for recovery
        let stored = orch.repository().require_job(&job.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Timeout);
        assert_eq!(
            stored.error_details.unwrap().classification,
            FailureClassification::Timeout
        );
    }

    #[tokio::test]
    async fn progress_before_execution_counts_all_nodes_pending() {
        let orch = orchestrator(&ManualClock::default());
        let job = orch.scheduler().schedule_job(&spec(), "alice").await.unwrap();
        let progress = orch.scheduler().get_job_progress(&job.job_id).unwrap();
        assert_eq!(progress.counters.total, 1);
        assert_eq!(progress.percent, 0.0);
    }
}
