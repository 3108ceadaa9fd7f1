// src/model/node.rs

//! DAG node records.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::status::JobStatus;
use crate::runner::Condition;
use crate::types::{JobId, Metadata, NodeId};

/// Kind of work a node performs. Handlers are selected by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    TestExecution,
    Validation,
    Notification,
    DataProcessing,
    Conditional,
    Synchronization,
    Cleanup,
    Setup,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::TestExecution => "test_execution",
            NodeType::Validation => "validation",
            NodeType::Notification => "notification",
            NodeType::DataProcessing => "data_processing",
            NodeType::Conditional => "conditional",
            NodeType::Synchronization => "synchronization",
            NodeType::Cleanup => "cleanup",
            NodeType::Setup => "setup",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the runner dispatches a node. Only `Direct` branches on its own;
/// the rest are composition hooks that currently dispatch directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Direct,
    Queued,
    Parallel,
    Sequential,
    Conditional,
}

/// Typed parameters per node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeParams {
    TestExecution {
        #[serde(default)]
        environment: Option<String>,
        #[serde(default)]
        parallel_items: Option<u32>,
    },
    Validation {
        #[serde(default)]
        rules: Vec<String>,
    },
    Notification {
        channel: String,
        #[serde(default)]
        recipients: Vec<String>,
    },
    DataProcessing {
        operation: String,
    },
    Conditional,
    Synchronization {
        #[serde(default)]
        barrier: Option<String>,
    },
    Cleanup {
        #[serde(default)]
        targets: Vec<String>,
    },
    Setup {
        #[serde(default)]
        fixtures: Vec<String>,
    },
}

impl NodeParams {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeParams::TestExecution { .. } => NodeType::TestExecution,
            NodeParams::Validation { .. } => NodeType::Validation,
            NodeParams::Notification { .. } => NodeType::Notification,
            NodeParams::DataProcessing { .. } => NodeType::DataProcessing,
            NodeParams::Conditional => NodeType::Conditional,
            NodeParams::Synchronization { .. } => NodeType::Synchronization,
            NodeParams::Cleanup { .. } => NodeType::Cleanup,
            NodeParams::Setup { .. } => NodeType::Setup,
        }
    }
}

/// Node configuration: context references, run conditions, typed params and
/// a bounded extension bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub test_suite_id: Option<String>,
    #[serde(default)]
    pub test_case_id: Option<String>,
    #[serde(default)]
    pub test_item_id: Option<String>,

    /// The node runs if any condition holds; an empty list always runs.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub params: Option<NodeParams>,

    #[serde(default)]
    pub metadata: Metadata,
}

/// Node definition as submitted with a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: NodeId,
    pub node_type: NodeType,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_interruptible")]
    pub interruptible: bool,
    #[serde(default)]
    pub config: NodeConfig,
}

fn default_interruptible() -> bool {
    true
}

/// Persisted node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub job_id: JobId,
    pub node_type: NodeType,
    pub execution_strategy: ExecutionStrategy,
    pub depends_on: BTreeSet<NodeId>,
    pub execution_status: JobStatus,
    pub critical: bool,
    pub timeout_secs: Option<u64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub interruptible: bool,
    pub config: NodeConfig,
    pub result: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn from_spec(job_id: &str, spec: &NodeSpec) -> Self {
        Self {
            node_id: spec.node_id.clone(),
            job_id: job_id.to_string(),
            node_type: spec.node_type,
            execution_strategy: spec.execution_strategy,
            depends_on: spec.depends_on.iter().cloned().collect(),
            execution_status: JobStatus::Pending,
            critical: spec.critical,
            timeout_secs: spec.timeout_secs,
            retry_count: 0,
            max_retries: spec.max_retries,
            interruptible: spec.interruptible,
            config: spec.config.clone(),
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Store key: node ids are only unique within their job.
    pub fn store_key(job_id: &str, node_id: &str) -> String {
        format!("{job_id}:{node_id}")
    }

    pub fn key(&self) -> String {
        Self::store_key(&self.job_id, &self.node_id)
    }

    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}
