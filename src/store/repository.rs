// src/store/repository.rs

//! Typed access to the orchestration collections.
//!
//! Every component that mutates a job goes through [`Repository::update_job`],
//! which reads the current revision, applies the change to a copy and writes
//! it back with an optimistic revision check. A closure that returns an error
//! leaves the stored job untouched.

use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::errors::{OrchestratorError, Result};
use crate::model::{Job, Node, RecoveryAudit, RetryPolicy};
use crate::store::{self, DocumentStore, Filter, collections};

#[derive(Debug, Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
    write_lock: Arc<Mutex<()>>,
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(store::load(self.store.as_ref(), collections::JOBS, job_id)?)
    }

    pub fn require_job(&self, job_id: &str) -> Result<Job> {
        self.job(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))
    }

    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let body = serde_json::to_value(job)?;
        self.store.insert(collections::JOBS, &job.job_id, body)?;
        Ok(())
    }

    /// Read-modify-write a job. Returns the updated job and the closure's
    /// value; nothing is written when the closure fails.
    pub fn update_job<R>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut Job) -> Result<R>,
    ) -> Result<(Job, R)> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let doc = self
            .store
            .find_one(collections::JOBS, job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))?;
        let mut job: Job = serde_json::from_value(doc.body)?;

        let out = f(&mut job)?;

        let body = serde_json::to_value(&job)?;
        let revision =
            self.store
                .upsert_if_revision(collections::JOBS, job_id, body, Some(doc.revision))?;
        trace!(job_id, revision, status = %job.status, "job updated");
        Ok((job, out))
    }

    pub fn jobs(&self, filter: &Filter) -> Result<Vec<Job>> {
        Ok(store::load_many(self.store.as_ref(), collections::JOBS, filter)?)
    }

    pub fn nodes(&self, job_id: &str) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = store::load_many(
            self.store.as_ref(),
            collections::NODES,
            &Filter::all().eq("job_id", job_id),
        )?;
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    pub fn save_node(&self, node: &Node) -> Result<()> {
        store::save(self.store.as_ref(), collections::NODES, &node.key(), node)?;
        Ok(())
    }

    /// Apply `f` to one stored node. Missing nodes are a `NotFound`.
    pub fn update_node(
        &self,
        job_id: &str,
        node_id: &str,
        f: impl FnOnce(&mut Node),
    ) -> Result<Node> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = Node::store_key(job_id, node_id);
        let mut node: Node = store::load(self.store.as_ref(), collections::NODES, &key)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("node {job_id}/{node_id}")))?;
        f(&mut node);
        store::save(self.store.as_ref(), collections::NODES, &key, &node)?;
        Ok(node)
    }

    pub fn save_audit(&self, audit: &RecoveryAudit) -> Result<()> {
        store::save(
            self.store.as_ref(),
            collections::RECOVERY_AUDITS,
            &audit.audit_id,
            audit,
        )?;
        Ok(())
    }

    pub fn audit(&self, audit_id: &str) -> Result<Option<RecoveryAudit>> {
        Ok(store::load(
            self.store.as_ref(),
            collections::RECOVERY_AUDITS,
            audit_id,
        )?)
    }

    pub fn audits(&self, job_id: &str) -> Result<Vec<RecoveryAudit>> {
        let mut audits: Vec<RecoveryAudit> = store::load_many(
            self.store.as_ref(),
            collections::RECOVERY_AUDITS,
            &Filter::all().eq("job_id", job_id),
        )?;
        audits.sort_by_key(|a| a.recovery_started_at);
        Ok(audits)
    }

    pub fn policy(&self, policy_id: &str) -> Result<Option<RetryPolicy>> {
        Ok(store::load(
            self.store.as_ref(),
            collections::RETRY_POLICIES,
            policy_id,
        )?)
    }

    pub fn policies(&self) -> Result<Vec<RetryPolicy>> {
        Ok(store::load_many(
            self.store.as_ref(),
            collections::RETRY_POLICIES,
            &Filter::all(),
        )?)
    }

    /// Register a policy version. An id already in use is replaced only by a
    /// strictly newer version.
    pub fn save_policy(&self, policy: &RetryPolicy) -> Result<()> {
        policy.validate()?;
        if let Some(existing) = self.policy(&policy.policy_id)? {
            if existing.version >= policy.version {
                return Err(OrchestratorError::Conflict(format!(
                    "retry policy '{}' version {} is not newer than stored version {}",
                    policy.policy_id, policy.version, existing.version
                )));
            }
        }
        store::save(
            self.store.as_ref(),
            collections::RETRY_POLICIES,
            &policy.policy_id,
            policy,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobSpec, JobStatus, JobTarget, JobType, RetryStrategy};
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn job() -> Job {
        let spec = JobSpec {
            name: "repo".into(),
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
        Job::new(&spec, "alice", 3, Utc::now())
    }

    #[test]
    fn failed_update_writes_nothing() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let job = job();
        repo.insert_job(&job).unwrap();

        let err = repo
            .update_job(&job.job_id, |j| j.transition(JobStatus::Completed, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
        assert_eq!(repo.require_job(&job.job_id).unwrap().status, JobStatus::Pending);

        repo.update_job(&job.job_id, |j| j.transition(JobStatus::Queued, Utc::now()))
            .unwrap();
        assert_eq!(repo.require_job(&job.job_id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn policy_versions_only_move_forward() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let mut policy = RetryPolicy::new("p", RetryStrategy::Linear, 3, 100);
        repo.save_policy(&policy).unwrap();
        assert!(matches!(
            repo.save_policy(&policy),
            Err(OrchestratorError::Conflict(_))
        ));
        policy.version = 2;
        policy.max_attempts = 5;
        repo.save_policy(&policy).unwrap();
        assert_eq!(repo.policy("p").unwrap().unwrap().max_attempts, 5);
    }
}
