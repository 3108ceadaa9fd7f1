// src/retry/mod.rs

//! Retry manager.
//!
//! Decides whether a failed or timed-out job is retried, computes the delay
//! from the applicable [`RetryPolicy`], and requeues the job once the delay
//! elapses. Policy resolution order: the job's own policy id, then a policy
//! for the job's type, then the configured default. A job with no policy is
//! not retried.

pub mod backoff;
pub mod circuit;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::OrchestratorConfig;
use crate::errors::Result;
use crate::model::{Job, JobStatus, RetryPolicy, RetryStrategy};
use crate::scheduler::DispatchQueue;
use crate::store::Repository;
use crate::types::JobId;

pub use backoff::{calculate_delay, nominal_delay};
pub use circuit::{CircuitBreakers, CircuitState};

/// Result of [`RetryManager::schedule_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Scheduled { attempt: u32, delay: Duration },
    /// Not retried. `aborted` is set when the job was moved to `aborted`.
    Refused { reason: String, aborted: bool },
}

impl RetryDecision {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, RetryDecision::Scheduled { .. })
    }
}

/// One retry decision, kept per job.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRecord {
    pub attempt: u32,
    pub policy_id: Option<String>,
    pub failure_reason: String,
    pub delay: Option<Duration>,
    pub refused: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RetryManager {
    config: Arc<OrchestratorConfig>,
    repo: Repository,
    queue: DispatchQueue,
    clock: SharedClock,
    breakers: CircuitBreakers,
    history: Mutex<HashMap<JobId, Vec<RetryRecord>>>,
}

impl RetryManager {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        repo: Repository,
        queue: DispatchQueue,
        clock: SharedClock,
    ) -> Self {
        let breakers = CircuitBreakers::new(config.retry.circuit_scope, Arc::clone(&clock));
        Self {
            config,
            repo,
            queue,
            clock,
            breakers,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Policy by id: stored policies take precedence over configured ones.
    fn find_policy(&self, policy_id: &str) -> Result<Option<RetryPolicy>> {
        if let Some(policy) = self.repo.policy(policy_id)? {
            return Ok(Some(policy));
        }
        Ok(self
            .config
            .retry
            .policies
            .iter()
            .find(|p| p.policy_id == policy_id)
            .cloned())
    }

    pub fn resolve_policy(&self, job: &Job) -> Result<Option<RetryPolicy>> {
        if let Some(id) = &job.retry_policy_id {
            match self.find_policy(id)? {
                Some(policy) => return Ok(Some(policy)),
                None => warn!(job_id = %job.job_id, policy_id = %id, "job names an unknown retry policy"),
            }
        }

        let mut by_type = self.repo.policies()?;
        by_type.extend(self.config.retry.policies.iter().cloned());
        if let Some(policy) = by_type.into_iter().find(|p| p.job_type == Some(job.job_type)) {
            return Ok(Some(policy));
        }

        match &self.config.retry.default_policy {
            Some(id) => self.find_policy(id),
            None => Ok(None),
        }
    }

    /// Eligibility check. Fails closed; the `Err` carries the reason.
    pub fn can_retry(
        &self,
        policy: &RetryPolicy,
        job: &Job,
        failure_reason: &str,
    ) -> std::result::Result<(), String> {
        if policy.strategy == RetryStrategy::None {
            return Err(format!("policy '{}' never retries", policy.policy_id));
        }
        if job.retry_count >= policy.max_attempts {
            return Err(format!(
                "retry attempts exhausted ({} of {})",
                job.retry_count, policy.max_attempts
            ));
        }
        if job.retry_count >= job.max_retries {
            return Err(format!(
                "job retry budget exhausted ({} of {})",
                job.retry_count, job.max_retries
            ));
        }
        if self.breakers.state(policy, &job.job_id) == CircuitState::Open {
            return Err(format!("circuit open for policy '{}'", policy.policy_id));
        }
        if matches_any(&policy.non_retryable_errors, failure_reason) {
            return Err(format!("error is non-retryable: {failure_reason}"));
        }
        if !policy.retryable_errors.is_empty()
            && !matches_any(&policy.retryable_errors, failure_reason)
        {
            return Err(format!("error is not in the retryable list: {failure_reason}"));
        }
        Ok(())
    }

    /// Handle a failed or timed-out job.
    ///
    /// Refused retries of a `failed` job abort it. A refused `timeout` job is
    /// left as is for the recovery processor.
    pub async fn schedule_retry(&self, job_id: &str, failure_reason: &str) -> Result<RetryDecision> {
        let job = self.repo.require_job(job_id)?;

        let Some(policy) = self.resolve_policy(&job)? else {
            return self.refuse(&job, None, failure_reason, "no retry policy applies".to_string());
        };
        self.breakers.record_failure(&policy, job_id);
        if let Err(reason) = self.can_retry(&policy, &job, failure_reason) {
            return self.refuse(&job, Some(&policy), failure_reason, reason);
        }

        let attempt = job.retry_count + 1;
        let delay = calculate_delay(&policy, attempt, &mut rand::thread_rng());

        let now = self.clock.now();
        self.repo.update_job(job_id, |j| {
            j.record_retry()?;
            j.transition(JobStatus::Retrying, now)
        })?;
        self.remember(job_id, RetryRecord {
            attempt,
            policy_id: Some(policy.policy_id.clone()),
            failure_reason: failure_reason.to_string(),
            delay: Some(delay),
            refused: None,
            decided_at: now,
        });
        info!(
            job_id,
            attempt,
            policy_id = %policy.policy_id,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );

        let repo = self.repo.clone();
        let queue = self.queue.clone();
        let clock = Arc::clone(&self.clock);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let requeued = repo.update_job(&job_id, |j| j.transition(JobStatus::Queued, clock.now()));
            match requeued {
                Ok(_) => {
                    if let Err(e) = queue.push(&job_id).await {
                        warn!(job_id = %job_id, error = %e, "failed to requeue retried job");
                    }
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "retried job could not be requeued"),
            }
        });

        Ok(RetryDecision::Scheduled { attempt, delay })
    }

    /// Credit the circuit breaker after a successful run.
    pub fn record_success(&self, job: &Job) -> Result<()> {
        if let Some(policy) = self.resolve_policy(job)? {
            let state = self.breakers.record_success(&policy, &job.job_id);
            debug!(job_id = %job.job_id, policy_id = %policy.policy_id, circuit = %state, "success recorded");
        }
        Ok(())
    }

    pub fn history(&self, job_id: &str) -> Vec<RetryRecord> {
        self.lock_history().get(job_id).cloned().unwrap_or_default()
    }

    fn refuse(
        &self,
        job: &Job,
        policy: Option<&RetryPolicy>,
        failure_reason: &str,
        reason: String,
    ) -> Result<RetryDecision> {
        warn!(job_id = %job.job_id, reason = %reason, "retry refused");
        let now = self.clock.now();
        let aborted = job.status == JobStatus::Failed;
        if aborted {
            self.repo
                .update_job(&job.job_id, |j| j.transition(JobStatus::Aborted, now))?;
        }
        self.remember(&job.job_id, RetryRecord {
            attempt: job.retry_count + 1,
            policy_id: policy.map(|p| p.policy_id.clone()),
            failure_reason: failure_reason.to_string(),
            delay: None,
            refused: Some(reason.clone()),
            decided_at: now,
        });
        Ok(RetryDecision::Refused { reason, aborted })
    }

    fn remember(&self, job_id: &str, record: RetryRecord) {
        self.lock_history()
            .entry(job_id.to_string())
            .or_default()
            .push(record);
    }

    fn lock_history(&self) -> MutexGuard<'_, HashMap<JobId, Vec<RetryRecord>>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Case-insensitive regex match against any pattern. Patterns were checked
/// when the policy was validated; one that fails to compile matches nothing.
fn matches_any(patterns: &[String], text: &str) -> bool {
    patterns.iter().any(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    })
}
