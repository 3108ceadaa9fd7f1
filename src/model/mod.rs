// src/model/mod.rs

//! Typed records for jobs, DAG nodes, retry policies, recovery audits and
//! the execution-graph mirror, plus their state machines.

pub mod audit;
pub mod graph;
pub mod job;
pub mod node;
pub mod policy;
pub mod status;

pub use audit::{FailureClassification, RecoveryAction, RecoveryAudit};
pub use graph::{ErrorEntry, ExecutionGraph, GraphCounters, TransitionRecord};
pub use job::{Checkpoint, ErrorDetails, Job, JobSpec, JobTarget, JobType, ResourceAllocation};
pub use node::{ExecutionStrategy, Node, NodeConfig, NodeParams, NodeSpec, NodeType};
pub use policy::{CircuitBreakerSettings, RetryPolicy, RetryStrategy};
pub use status::{JobStatus, NodeState};
