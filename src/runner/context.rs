// src/runner/context.rs

//! Job and node execution contexts.

use serde_json::{Value, json};

use crate::model::{Job, JobTarget, JobType, Node, NodeParams, NodeType};
use crate::types::{JobId, Metadata, NodeId};

/// Job-level context shared by every node of one run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_type: JobType,
    pub target: JobTarget,
    pub metadata: Metadata,
    pub attempt: u32,
}

impl JobContext {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            job_type: job.job_type,
            target: job.target.clone(),
            metadata: job.metadata.clone(),
            attempt: job.retry_count + 1,
        }
    }

    /// Build the context a handler sees for `node`.
    ///
    /// References in the node's configuration override the job target.
    /// Runtime metadata is the job metadata overlaid with the node's own,
    /// plus the resolved reference ids.
    pub fn inject(&self, node: &Node) -> NodeContext {
        let cfg = &node.config;
        let test_suite_id = cfg
            .test_suite_id
            .clone()
            .or_else(|| self.target.suite_id.clone());
        let test_case_id = cfg
            .test_case_id
            .clone()
            .or_else(|| self.target.case_id.clone());
        let test_item_id = cfg
            .test_item_id
            .clone()
            .or_else(|| self.target.item_id.clone());

        let mut metadata = self.metadata.clone();
        metadata.extend(cfg.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (key, id) in [
            ("test_suite_id", &test_suite_id),
            ("test_case_id", &test_case_id),
            ("test_item_id", &test_item_id),
        ] {
            if let Some(id) = id {
                metadata.insert(key.to_string(), id.clone());
            }
        }

        NodeContext {
            job_id: self.job_id.clone(),
            node_id: node.node_id.clone(),
            node_type: node.node_type,
            attempt: self.attempt,
            test_suite_id,
            test_case_id,
            test_item_id,
            params: cfg.params.clone(),
            metadata,
        }
    }
}

/// Everything a node handler receives.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub job_id: JobId,
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub attempt: u32,
    pub test_suite_id: Option<String>,
    pub test_case_id: Option<String>,
    pub test_item_id: Option<String>,
    pub params: Option<NodeParams>,
    pub metadata: Metadata,
}

impl NodeContext {
    /// Reference ids as a JSON object, for handler results.
    pub fn references(&self) -> Value {
        json!({
            "test_suite_id": self.test_suite_id,
            "test_case_id": self.test_case_id,
            "test_item_id": self.test_item_id,
        })
    }
}
