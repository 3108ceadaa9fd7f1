// src/model/status.rs

//! Job and node state machines.
//!
//! Both machines are closed enums with an explicit transition table. Any
//! edge not listed is rejected; callers never mutate status on rejection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job (and, at node scope, of a persisted node record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    Retrying,
    Recovering,
    Aborted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 12] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Timeout,
        JobStatus::Retrying,
        JobStatus::Recovering,
        JobStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
            JobStatus::Retrying => "retrying",
            JobStatus::Recovering => "recovering",
            JobStatus::Aborted => "aborted",
        }
    }

    /// Legal successor states.
    pub fn allowed_transitions(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Pending => &[Queued, Cancelled],
            Queued => &[Scheduled, Cancelled],
            Scheduled => &[Running, Cancelled, Paused],
            Running => &[Completed, Failed, Cancelled, Timeout, Paused],
            Paused => &[Running, Cancelled],
            Failed => &[Retrying, Recovering, Aborted],
            Retrying => &[Queued, Aborted],
            Recovering => &[Queued, Aborted],
            Timeout => &[Retrying, Recovering],
            Completed | Cancelled | Aborted => &[],
        }
    }

    pub fn can_transition_to(self, to: JobStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Aborted
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

/// Per-node execution stage, as tracked by the engine and the state tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Timeout,
    Skipped,
    Cancelled,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
            NodeState::Timeout => "timeout",
            NodeState::Skipped => "skipped",
            NodeState::Cancelled => "cancelled",
        }
    }

    /// Legal successor states. `failed`/`timeout` may go back to `running`
    /// for a node-level retry.
    pub fn allowed_transitions(self) -> &'static [NodeState] {
        use NodeState::*;
        match self {
            Pending => &[Ready, Cancelled],
            Ready => &[Running, Cancelled, Skipped],
            Running => &[Completed, Failed, Timeout, Cancelled],
            Failed | Timeout => &[Running],
            Completed | Skipped | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: NodeState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// The node will not run again in this execution.
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            NodeState::Completed
                | NodeState::Failed
                | NodeState::Timeout
                | NodeState::Skipped
                | NodeState::Cancelled
        )
    }

    /// Resolved in a way that satisfies dependents.
    pub fn is_success(self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Skipped)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, NodeState::Failed | NodeState::Timeout)
    }

    /// Node-record status mirroring this stage.
    pub fn as_job_status(self) -> JobStatus {
        match self {
            NodeState::Pending => JobStatus::Pending,
            NodeState::Ready => JobStatus::Queued,
            NodeState::Running => JobStatus::Running,
            NodeState::Completed | NodeState::Skipped => JobStatus::Completed,
            NodeState::Failed => JobStatus::Failed,
            NodeState::Timeout => JobStatus::Timeout,
            NodeState::Cancelled => JobStatus::Cancelled,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
