// src/recovery/strategy.rs

//! Recovery strategy execution.
//!
//! Strategies repair jobs outside the normal transition table, so they use
//! [`Job::repair_status`] where the table has no edge. Every call is wrapped
//! in an audit by the processor.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::errors::{OrchestratorError, Result};
use crate::model::{Job, JobStatus, NodeState, RecoveryAction};
use crate::scheduler::DispatchQueue;
use crate::store::Repository;
use crate::tracker::StateTracker;

/// What a strategy achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOutcome {
    Recovered,
    /// Job handed to an operator; not recoverable automatically.
    Escalated,
    /// Strategy ran but could not recover the job (e.g. retry budget spent).
    Unrecovered,
}

pub(crate) struct StrategyContext<'a> {
    pub repo: &'a Repository,
    pub tracker: &'a StateTracker,
    pub queue: &'a DispatchQueue,
    pub now: DateTime<Utc>,
}

/// Move the job into `recovering`, through the table where an edge exists.
pub(crate) fn enter_recovering(job: &mut Job, now: DateTime<Utc>) -> Result<()> {
    match job.status {
        JobStatus::Recovering => Ok(()),
        JobStatus::Failed | JobStatus::Timeout => job.transition(JobStatus::Recovering, now),
        JobStatus::Running => {
            job.transition(JobStatus::Timeout, now)?;
            job.transition(JobStatus::Recovering, now)
        }
        JobStatus::Completed | JobStatus::Cancelled | JobStatus::Aborted => {
            Err(OrchestratorError::RecoveryProcess {
                job_id: job.job_id.clone(),
                message: format!("job is already {}", job.status),
            })
        }
        _ => {
            job.repair_status(JobStatus::Recovering, now);
            Ok(())
        }
    }
}

pub(crate) async fn execute(
    action: RecoveryAction,
    job_id: &str,
    ctx: &StrategyContext<'_>,
) -> Result<StrategyOutcome> {
    match action {
        RecoveryAction::RetryJob => retry_job(job_id, ctx).await,
        RecoveryAction::SkipNode => skip_node(job_id, ctx),
        RecoveryAction::RequeueJob => requeue_job(job_id, ctx).await,
        RecoveryAction::RollbackState => rollback_state(job_id, ctx),
        RecoveryAction::EscalateManual => escalate_manual(job_id, ctx),
        RecoveryAction::AbortExecution => abort_execution(job_id, ctx),
    }
}

async fn retry_job(job_id: &str, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
    let now = ctx.now;
    let (job, requeued) = ctx.repo.update_job(job_id, |job| {
        if job.retry_count >= job.max_retries {
            job.transition(JobStatus::Aborted, now)?;
            return Ok(false);
        }
        job.record_retry()?;
        job.transition(JobStatus::Queued, now)?;
        Ok(true)
    })?;

    if !requeued {
        warn!(job_id, retries = job.retry_count, "retry budget spent; job aborted");
        return Ok(StrategyOutcome::Unrecovered);
    }
    ctx.queue.push(job_id).await?;
    info!(job_id, attempt = job.retry_count, "job requeued by recovery");
    Ok(StrategyOutcome::Recovered)
}

fn skip_node(job_id: &str, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
    let graph = ctx
        .tracker
        .load_state(job_id)?
        .ok_or_else(|| OrchestratorError::RecoveryProcess {
            job_id: job_id.to_string(),
            message: "no execution graph to repair".to_string(),
        })?;

    let mut skipped = graph.nodes_in(NodeState::Failed);
    skipped.extend(graph.nodes_in(NodeState::Timeout));
    for node_id in &skipped {
        ctx.tracker
            .force_node_state(job_id, node_id, NodeState::Completed, "skipped_by_recovery")?;
        ctx.repo.update_node(job_id, node_id, |node| {
            node.execution_status = JobStatus::Completed;
            node.result = Some(json!({ "skipped_by_recovery": true }));
            node.completed_at = Some(ctx.now);
        })?;
    }

    ctx.repo.update_job(job_id, |job| {
        job.repair_status(JobStatus::Running, ctx.now);
        job.error_details = None;
        Ok(())
    })?;
    info!(job_id, skipped = ?skipped, "failed nodes skipped; job resumed");
    Ok(StrategyOutcome::Recovered)
}

async fn requeue_job(job_id: &str, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
    let now = ctx.now;
    ctx.repo.update_job(job_id, |job| {
        job.repair_status(JobStatus::Pending, now);
        job.started_at = None;
        job.completed_at = None;
        job.retry_count = 0;
        job.current_node_id = None;
        job.execution_path.clear();
        job.allocated_resources = None;
        job.error_details = None;
        Ok(())
    })?;

    for node in ctx.repo.nodes(job_id)? {
        ctx.repo.update_node(job_id, &node.node_id, |n| {
            n.execution_status = JobStatus::Pending;
            n.retry_count = 0;
            n.result = None;
            n.started_at = None;
            n.completed_at = None;
        })?;
    }

    match ctx.tracker.reset_graph(job_id) {
        Ok(()) | Err(OrchestratorError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    ctx.queue.push(job_id).await?;
    info!(job_id, "job reset to pending and requeued");
    Ok(StrategyOutcome::Recovered)
}

fn rollback_state(job_id: &str, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
    ctx.repo.update_job(job_id, |job| {
        let checkpoint = job.checkpoint().ok_or_else(|| OrchestratorError::RecoveryProcess {
            job_id: job.job_id.clone(),
            message: "no checkpoint to roll back to".to_string(),
        })?;
        job.repair_status(checkpoint.status, ctx.now);
        job.current_node_id = checkpoint.current_node_id;
        job.execution_path = checkpoint.execution_path;
        Ok(())
    })?;
    info!(job_id, "job rolled back to checkpoint");
    Ok(StrategyOutcome::Recovered)
}

fn escalate_manual(job_id: &str, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
    ctx.repo.update_job(job_id, |job| {
        job.repair_status(JobStatus::Paused, ctx.now);
        job.manual_intervention = true;
        Ok(())
    })?;
    warn!(job_id, "job escalated for manual intervention");
    Ok(StrategyOutcome::Escalated)
}

fn abort_execution(job_id: &str, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
    ctx.repo
        .update_job(job_id, |job| job.transition(JobStatus::Aborted, ctx.now))?;
    warn!(job_id, "job aborted by recovery");
    Ok(StrategyOutcome::Recovered)
}
