// src/service.rs

//! Request-facing facade over the scheduler and the store.
//!
//! Account checks go through an [`AccountDirectory`]: inactive accounts may
//! not submit, and only a job's submitter or an admin may read or cancel it.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::errors::{OrchestratorError, Result};
use crate::model::{ErrorDetails, GraphCounters, Job, JobSpec, JobStatus, JobType};
use crate::scheduler::JobScheduler;
use crate::store::{Filter, Repository};
use crate::types::{JobId, NodeId};

pub const MAX_PAGE_SIZE: usize = 100;

pub trait AccountDirectory: Send + Sync + Debug {
    fn is_active(&self, account_id: &str) -> bool;
    fn is_admin(&self, account_id: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Account {
    active: bool,
    admin: bool,
}

/// Fixed account table. Unknown accounts are inactive.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    accounts: HashMap<String, Account>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account_id: &str, active: bool, admin: bool) -> Self {
        self.accounts
            .insert(account_id.to_string(), Account { active, admin });
        self
    }
}

impl AccountDirectory for StaticAccounts {
    fn is_active(&self, account_id: &str) -> bool {
        self.accounts.get(account_id).is_some_and(|a| a.active)
    }

    fn is_admin(&self, account_id: &str) -> bool {
        self.accounts
            .get(account_id)
            .is_some_and(|a| a.active && a.admin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub triggered_by: String,
    pub progress_percent: f64,
    pub counters: GraphCounters,
    pub current_node_id: Option<NodeId>,
    pub execution_path: Vec<NodeId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_details: Option<ErrorDetails>,
    pub manual_intervention: bool,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl JobFilter {
    fn store_filter(&self) -> Filter {
        let mut filter = Filter::all();
        if let Some(status) = self.status {
            filter = filter.eq("status", status.as_str());
        }
        if let Some(job_type) = self.job_type {
            filter = filter.eq("job_type", job_type.as_str());
        }
        filter
    }

    fn admits(&self, job: &Job) -> bool {
        self.created_after.is_none_or(|after| job.created_at > after)
            && self.created_before.is_none_or(|before| job.created_at < before)
    }
}

/// One-based pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl Pagination {
    fn validate(&self) -> Result<()> {
        if self.page < 1 {
            return Err(OrchestratorError::Validation(format!(
                "page must be >= 1 (got {})",
                self.page
            )));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(OrchestratorError::Validation(format!(
                "page_size must be within 1..={MAX_PAGE_SIZE} (got {})",
                self.page_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
pub struct OrchestratorService {
    scheduler: Arc<JobScheduler>,
    repo: Repository,
    accounts: Arc<dyn AccountDirectory>,
}

impl OrchestratorService {
    pub fn new(
        scheduler: Arc<JobScheduler>,
        repo: Repository,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            scheduler,
            repo,
            accounts,
        }
    }

    pub async fn submit_job(&self, spec: &JobSpec, triggered_by: &str) -> Result<SubmitReceipt> {
        if !self.accounts.is_active(triggered_by) {
            return Err(OrchestratorError::Permission(format!(
                "account '{triggered_by}' is not active"
            )));
        }
        let job = self.scheduler.schedule_job(spec, triggered_by).await?;
        info!(job_id = %job.job_id, triggered_by, "job submitted");
        Ok(SubmitReceipt {
            job_id: job.job_id,
            status: job.status,
        })
    }

    pub fn get_job_status(&self, job_id: &str, requester_id: &str) -> Result<JobStatusView> {
        let job = self.authorized_job(job_id, requester_id)?;
        self.view(job)
    }

    pub fn cancel_job(&self, job_id: &str, requester_id: &str) -> Result<SubmitReceipt> {
        self.authorized_job(job_id, requester_id)?;
        let job = self.scheduler.cancel_job(job_id)?;
        info!(job_id, requester_id, "job cancelled on request");
        Ok(SubmitReceipt {
            job_id: job.job_id,
            status: job.status,
        })
    }

    /// Newest first.
    pub fn list_jobs(&self, filter: &JobFilter, pagination: Pagination) -> Result<Page<JobStatusView>> {
        pagination.validate()?;

        let mut jobs: Vec<Job> = self
            .repo
            .jobs(&filter.store_filter())?
            .into_iter()
            .filter(|job| filter.admits(job))
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        let total = jobs.len();
        let items = jobs
            .into_iter()
            .skip((pagination.page - 1) * pagination.page_size)
            .take(pagination.page_size)
            .map(|job| self.view(job))
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    fn view(&self, job: Job) -> Result<JobStatusView> {
        let progress = self.scheduler.get_job_progress(&job.job_id)?;
        Ok(JobStatusView {
            progress_percent: progress.percent,
            counters: progress.counters,
            job_id: job.job_id,
            name: job.name,
            job_type: job.job_type,
            status: job.status,
            triggered_by: job.triggered_by,
            current_node_id: job.current_node_id,
            execution_path: job.execution_path,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_details: job.error_details,
            manual_intervention: job.manual_intervention,
        })
    }

    fn authorized_job(&self, job_id: &str, requester_id: &str) -> Result<Job> {
        let job = self.repo.require_job(job_id)?;
        if job.triggered_by != requester_id && !self.accounts.is_admin(requester_id) {
            return Err(OrchestratorError::AccessDenied(format!(
                "account '{requester_id}' may not access job {job_id}"
            )));
        }
        Ok(job)
    }
}
