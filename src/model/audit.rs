// src/model/audit.rs

//! Recovery audit trail.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::JobId;

/// Why a job needs recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    Timeout,
    NodeFailure,
    ResourceExhaustion,
    DependencyFailure,
    CriticalError,
    Unknown,
}

impl FailureClassification {
    /// Static classification → action table.
    pub fn recovery_action(self) -> RecoveryAction {
        match self {
            FailureClassification::Timeout => RecoveryAction::RetryJob,
            FailureClassification::NodeFailure => RecoveryAction::SkipNode,
            FailureClassification::ResourceExhaustion => RecoveryAction::RequeueJob,
            FailureClassification::DependencyFailure => RecoveryAction::RollbackState,
            FailureClassification::CriticalError | FailureClassification::Unknown => {
                RecoveryAction::EscalateManual
            }
        }
    }
}

impl fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureClassification::Timeout => "timeout",
            FailureClassification::NodeFailure => "node_failure",
            FailureClassification::ResourceExhaustion => "resource_exhaustion",
            FailureClassification::DependencyFailure => "dependency_failure",
            FailureClassification::CriticalError => "critical_error",
            FailureClassification::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    RetryJob,
    SkipNode,
    RequeueJob,
    RollbackState,
    EscalateManual,
    AbortExecution,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryAction::RetryJob => "retry_job",
            RecoveryAction::SkipNode => "skip_node",
            RecoveryAction::RequeueJob => "requeue_job",
            RecoveryAction::RollbackState => "rollback_state",
            RecoveryAction::EscalateManual => "escalate_manual",
            RecoveryAction::AbortExecution => "abort_execution",
        };
        f.write_str(s)
    }
}

/// One row per recovery attempt. Append-only: once `recovery_completed_at`
/// is set only `escalation_notes` may grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAudit {
    pub audit_id: String,
    pub recovery_session_id: String,
    pub job_id: JobId,
    pub recovery_action: RecoveryAction,
    pub trigger_reason: String,
    pub failure_classification: FailureClassification,
    pub state_before: Value,
    pub state_after: Option<Value>,
    pub recovery_success: Option<bool>,
    pub error_message: Option<String>,
    pub recovery_started_at: DateTime<Utc>,
    pub recovery_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalation_notes: Vec<String>,
}

impl RecoveryAudit {
    pub fn open(
        job_id: &str,
        action: RecoveryAction,
        classification: FailureClassification,
        trigger_reason: &str,
        state_before: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4().to_string(),
            recovery_session_id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            recovery_action: action,
            trigger_reason: trigger_reason.to_string(),
            failure_classification: classification,
            state_before,
            state_after: None,
            recovery_success: None,
            error_message: None,
            recovery_started_at: now,
            recovery_completed_at: None,
            escalation_notes: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.recovery_completed_at.is_some()
    }

    /// Record the outcome. A closed audit is never rewritten.
    pub fn close(
        &mut self,
        success: bool,
        state_after: Value,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_closed() {
            return false;
        }
        self.recovery_success = Some(success);
        self.state_after = Some(state_after);
        self.error_message = error_message;
        self.recovery_completed_at = Some(now);
        true
    }
}
