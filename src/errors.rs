// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The variants follow the orchestration error taxonomy: validation,
//! state-machine, execution, policy and recovery errors, plus the plumbing
//! errors (store, config, IO) that surround them.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::model::{FailureClassification, JobStatus, NodeState};
use crate::store::StoreError;
use crate::types::{JobId, NodeId};

/// Why the DAG engine stopped a graph before it could run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    CycleDetected,
    InvalidDependency,
    CriticalNodeFailure,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::CycleDetected => "cycle_detected",
            HaltReason::InvalidDependency => "invalid_dependency",
            HaltReason::CriticalNodeFailure => "critical_node_failure",
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition for job {job_id}: {current} -> {attempted}")]
    InvalidStateTransition {
        job_id: JobId,
        current: JobStatus,
        attempted: JobStatus,
    },

    #[error("Invalid node state transition for {job_id}/{node_id}: {current} -> {attempted}")]
    StateTransition {
        job_id: JobId,
        node_id: NodeId,
        current: NodeState,
        attempted: NodeState,
    },

    #[error("Node {node_id} failed: {message}")]
    NodeRunner { node_id: NodeId, message: String },

    #[error("Node {node_id} timed out after {elapsed:?} (limit {limit:?})")]
    NodeTimeout {
        node_id: NodeId,
        elapsed: Duration,
        limit: Duration,
    },

    #[error("Graph execution halted ({reason}) at node {node_id}: {message}")]
    GraphExecutionHalt {
        reason: HaltReason,
        node_id: NodeId,
        message: String,
    },

    #[error(
        "Orchestration stalled for job {job_id}: stuck nodes {stuck_nodes:?} \
         ({completed} completed, {failed} failed)"
    )]
    OrchestrationStall {
        job_id: JobId,
        stuck_nodes: Vec<NodeId>,
        completed: usize,
        failed: usize,
    },

    #[error("Execution graph for job {job_id} stalled with pending nodes {pending_nodes:?}")]
    ExecutionGraphStall {
        job_id: JobId,
        pending_nodes: Vec<NodeId>,
    },

    #[error("Resource pool '{pool}' exhausted (capacity {capacity})")]
    ResourceExhausted { pool: String, capacity: usize },

    #[error("Retry policy error: {0}")]
    RetryPolicy(String),

    #[error("Circuit breaker open for policy '{policy_id}'")]
    CircuitOpen { policy_id: String },

    #[error("Recovery of job {job_id} failed: {message}")]
    RecoveryProcess { job_id: JobId, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Failure class used for `error_details` and recovery strategy selection.
    pub fn classify(&self) -> FailureClassification {
        match self {
            OrchestratorError::NodeTimeout { .. } => FailureClassification::Timeout,
            OrchestratorError::NodeRunner { .. } => FailureClassification::NodeFailure,
            OrchestratorError::GraphExecutionHalt { reason, .. } => match reason {
                HaltReason::CriticalNodeFailure => FailureClassification::CriticalError,
                HaltReason::CycleDetected | HaltReason::InvalidDependency => {
                    FailureClassification::DependencyFailure
                }
            },
            OrchestratorError::OrchestrationStall { .. }
            | OrchestratorError::ExecutionGraphStall { .. } => {
                FailureClassification::DependencyFailure
            }
            OrchestratorError::ResourceExhausted { .. } => {
                FailureClassification::ResourceExhaustion
            }
            _ => FailureClassification::Unknown,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, OrchestratorError>;
