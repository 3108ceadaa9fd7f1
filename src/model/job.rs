// src/model/job.rs

//! Job records and the submission shape they are created from.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{OrchestratorError, Result};
use crate::model::audit::FailureClassification;
use crate::model::node::NodeSpec;
use crate::model::status::JobStatus;
use crate::types::{JobId, MAX_METADATA_ENTRIES, Metadata, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    TestSuiteRun,
    TestCaseRun,
    TestItemRun,
    Validation,
    Maintenance,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::TestSuiteRun => "test_suite_run",
            JobType::TestCaseRun => "test_case_run",
            JobType::TestItemRun => "test_item_run",
            JobType::Validation => "validation",
            JobType::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job operates on in the test-management domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTarget {
    #[serde(default)]
    pub suite_id: Option<String>,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
}

impl JobTarget {
    fn is_empty(&self) -> bool {
        self.suite_id.is_none() && self.case_id.is_none() && self.item_id.is_none()
    }
}

/// Opaque resource-allocation bookkeeping for a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub allocation_id: String,
    pub environment_id: String,
    pub pool_name: String,
    pub allocated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub classification: FailureClassification,
    pub message: String,
    pub node_id: Option<NodeId>,
    pub occurred_at: DateTime<Utc>,
}

/// Rollback snapshot stored in `checkpoint_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub status: JobStatus,
    pub current_node_id: Option<NodeId>,
    #[serde(default)]
    pub execution_path: Vec<NodeId>,
}

/// Job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub job_type: JobType,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub target: JobTarget,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_policy_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeSpec>,
}

fn default_priority() -> u8 {
    5
}

impl JobSpec {
    /// Shape checks done before any state is created. Graph structure
    /// (cycles, dangling edges) is left to the execution engine.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "job name must not be empty".to_string(),
            ));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(OrchestratorError::Validation(format!(
                "priority must be within 1..=10 (got {})",
                self.priority
            )));
        }
        if self.metadata.len() > MAX_METADATA_ENTRIES {
            return Err(OrchestratorError::Validation(format!(
                "job metadata holds {} entries (max {MAX_METADATA_ENTRIES})",
                self.metadata.len()
            )));
        }
        self.validate_target()?;

        if self.nodes.is_empty() {
            return Err(OrchestratorError::Validation(
                "job must define at least one node".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.node_id.trim().is_empty() {
                return Err(OrchestratorError::Validation(
                    "node_id must not be empty".to_string(),
                ));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "duplicate node_id '{}'",
                    node.node_id
                )));
            }
            if let Some(params) = &node.config.params {
                if params.node_type() != node.node_type {
                    return Err(OrchestratorError::Validation(format!(
                        "node '{}' is {} but carries {} params",
                        node.node_id,
                        node.node_type,
                        params.node_type()
                    )));
                }
            }
            if node.config.metadata.len() > MAX_METADATA_ENTRIES {
                return Err(OrchestratorError::Validation(format!(
                    "node '{}' metadata exceeds {MAX_METADATA_ENTRIES} entries",
                    node.node_id
                )));
            }
        }
        Ok(())
    }

    fn validate_target(&self) -> Result<()> {
        let t = &self.target;
        let ok = match self.job_type {
            JobType::TestSuiteRun => t.suite_id.is_some(),
            JobType::TestCaseRun => t.case_id.is_some(),
            JobType::TestItemRun => t.item_id.is_some(),
            JobType::Validation => !t.is_empty(),
            JobType::Maintenance => t.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(OrchestratorError::Validation(format!(
                "job type {} is not valid for target {:?}",
                self.job_type, t
            )))
        }
    }
}

/// Persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub name: String,
    pub job_type: JobType,
    pub priority: u8,
    pub target: JobTarget,
    pub triggered_by: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub triggered_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_policy_id: Option<String>,
    pub timeout_secs: Option<u64>,
    pub execution_graph_id: Option<String>,
    pub current_node_id: Option<NodeId>,
    #[serde(default)]
    pub execution_path: Vec<NodeId>,
    pub allocated_resources: Option<ResourceAllocation>,
    pub checkpoint_data: Option<Value>,
    pub error_details: Option<ErrorDetails>,
    #[serde(default)]
    pub manual_intervention: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Job {
    pub fn new(spec: &JobSpec, triggered_by: &str, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            job_type: spec.job_type,
            priority: spec.priority,
            target: spec.target.clone(),
            triggered_by: triggered_by.to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            triggered_at: now,
            scheduled_at: spec.scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            retry_policy_id: spec.retry_policy_id.clone(),
            timeout_secs: spec.timeout_secs,
            execution_graph_id: None,
            current_node_id: None,
            execution_path: Vec::new(),
            allocated_resources: None,
            checkpoint_data: None,
            error_details: None,
            manual_intervention: false,
            metadata: spec.metadata.clone(),
        }
    }

    /// Validated transition. On rejection the job is left untouched.
    pub fn transition(&mut self, to: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(OrchestratorError::InvalidStateTransition {
                job_id: self.job_id.clone(),
                current: self.status,
                attempted: to,
            });
        }
        self.apply_status(to, now);
        Ok(())
    }

    /// Out-of-table status repair, reserved for audited recovery strategies.
    pub(crate) fn repair_status(&mut self, to: JobStatus, now: DateTime<Utc>) {
        self.apply_status(to, now);
    }

    fn apply_status(&mut self, to: JobStatus, now: DateTime<Utc>) {
        self.status = to;
        self.updated_at = now;
        if to == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            let end = match self.started_at {
                Some(started) if started > now => started,
                _ => now,
            };
            self.completed_at = Some(end);
        }
    }

    /// Count one more retry; refuses to exceed `max_retries`.
    pub fn record_retry(&mut self) -> Result<u32> {
        if self.retry_count >= self.max_retries {
            return Err(OrchestratorError::RetryPolicy(format!(
                "job {} already used {} of {} retries",
                self.job_id, self.retry_count, self.max_retries
            )));
        }
        self.retry_count += 1;
        Ok(self.retry_count)
    }

    pub fn set_error(
        &mut self,
        classification: FailureClassification,
        message: impl Into<String>,
        node_id: Option<NodeId>,
        now: DateTime<Utc>,
    ) {
        self.error_details = Some(ErrorDetails {
            classification,
            message: message.into(),
            node_id,
            occurred_at: now,
        });
    }

    /// Snapshot status, current node and path into `checkpoint_data`.
    pub fn write_checkpoint(&mut self) {
        let checkpoint = Checkpoint {
            status: self.status,
            current_node_id: self.current_node_id.clone(),
            execution_path: self.execution_path.clone(),
        };
        self.checkpoint_data = serde_json::to_value(checkpoint).ok();
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint_data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }

    /// When a running job should be considered timed out.
    pub fn deadline(&self, default_timeout_secs: u64) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        let secs = self.timeout_secs.unwrap_or(default_timeout_secs);
        Some(started + Duration::seconds(secs as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::NodeType;

    fn spec(job_type: JobType, target: JobTarget) -> JobSpec {
        JobSpec {
            name: "nightly".into(),
            job_type,
            priority: 5,
            target,
            scheduled_at: None,
            timeout_secs: None,
            max_retries: None,
            retry_policy_id: None,
            metadata: Metadata::new(),
            nodes: vec![NodeSpec {
                node_id: "a".into(),
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

    fn suite_target() -> JobTarget {
        JobTarget {
            suite_id: Some("suite-1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn rejected_transition_leaves_job_untouched() {
        let now = Utc::now();
        let mut job = Job::new(&spec(JobType::TestSuiteRun, suite_target()), "alice", 3, now);
        let before = job.clone();

        let err = job.transition(JobStatus::Running, now).unwrap_err();
        match err {
            OrchestratorError::InvalidStateTransition { current, attempted, .. } => {
                assert_eq!(current, JobStatus::Pending);
                assert_eq!(attempted, JobStatus::Running);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(job, before);
    }

    #[test]
    fn terminal_transition_sets_completed_at() {
        let now = Utc::now();
        let mut job = Job::new(&spec(JobType::TestSuiteRun, suite_target()), "alice", 3, now);
        for status in [JobStatus::Queued, JobStatus::Scheduled, JobStatus::Running] {
            job.transition(status, now).unwrap();
        }
        let later = now + Duration::seconds(5);
        job.transition(JobStatus::Completed, later).unwrap();
        assert_eq!(job.started_at, Some(now));
        assert_eq!(job.completed_at, Some(later));
    }

    #[test]
    fn retry_counter_is_capped() {
        let now = Utc::now();
        let mut job = Job::new(&spec(JobType::TestSuiteRun, suite_target()), "alice", 1, now);
        assert_eq!(job.record_retry().unwrap(), 1);
        assert!(job.record_retry().is_err());
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn target_must_fit_job_type() {
        assert!(spec(JobType::TestSuiteRun, suite_target()).validate().is_ok());
        assert!(spec(JobType::TestCaseRun, suite_target()).validate().is_err());
        assert!(spec(JobType::Maintenance, suite_target()).validate().is_err());
        assert!(spec(JobType::Maintenance, JobTarget::default()).validate().is_ok());
    }

    #[test]
    fn duplicate_nodes_are_rejected() {
        let mut s = spec(JobType::TestSuiteRun, suite_target());
        s.nodes.push(s.nodes[0].clone());
        assert!(matches!(s.validate(), Err(OrchestratorError::Validation(_))));
    }

    #[test]
    fn checkpoint_round_trips_through_checkpoint_data() {
        let now = Utc::now();
        let mut job = Job::new(&spec(JobType::TestSuiteRun, suite_target()), "alice", 3, now);
        job.current_node_id = Some("a".into());
        job.execution_path = vec!["a".into()];
        job.write_checkpoint();

        let cp = job.checkpoint().unwrap();
        assert_eq!(cp.status, JobStatus::Pending);
        assert_eq!(cp.current_node_id.as_deref(), Some("a"));
        assert_eq!(cp.execution_path, vec!["a".to_string()]);
    }
}
