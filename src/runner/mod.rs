// src/runner/mod.rs

//! Single-node execution.
//!
//! The [`NodeRunner`] injects context references into a node, evaluates its
//! run conditions, and dispatches to the handler registered for its type
//! under a deadline. A missed deadline is reported to the tracker as a
//! `timeout` transition before the error is returned.

pub mod condition;
pub mod context;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{OrchestratorError, Result};
use crate::model::{ExecutionStrategy, Node, NodeState};
use crate::tracker::StateTracker;
use crate::types::Metadata;

pub use condition::Condition;
pub use context::{JobContext, NodeContext};
pub use handlers::{BuiltinHandler, HandlerFuture, HandlerSet, NodeHandler};

#[derive(Debug)]
pub struct NodeRunner {
    handlers: HandlerSet,
    tracker: Arc<StateTracker>,
    default_timeout: Duration,
}

impl NodeRunner {
    pub fn new(handlers: HandlerSet, tracker: Arc<StateTracker>, default_timeout: Duration) -> Self {
        Self {
            handlers,
            tracker,
            default_timeout,
        }
    }

    /// Whether `node` should run at all, given its conditions and the
    /// runtime metadata it would see.
    pub fn should_run(&self, node: &Node, ctx: &JobContext) -> bool {
        let node_ctx = ctx.inject(node);
        condition::any_holds(&node.config.conditions, &node_ctx.metadata)
    }

    pub fn timeout_for(&self, node: &Node) -> Duration {
        node.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    /// Run `node`, which the caller has already moved to `running`.
    pub async fn execute(&self, node: &Node, ctx: &JobContext) -> Result<Value> {
        let node_ctx = ctx.inject(node);
        let limit = self.timeout_for(node);
        let started = Instant::now();

        debug!(
            job_id = %node.job_id,
            node_id = %node.node_id,
            node_type = %node.node_type,
            timeout_ms = limit.as_millis() as u64,
            "dispatching node"
        );

        let outcome = tokio::time::timeout(limit, self.dispatch(node, &node_ctx)).await;

        match outcome {
            Ok(Ok(value)) => {
                info!(
                    job_id = %node.job_id,
                    node_id = %node.node_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "node handler finished"
                );
                Ok(value)
            }
            Ok(Err(err)) => {
                warn!(job_id = %node.job_id, node_id = %node.node_id, error = %err, "node handler failed");
                Err(OrchestratorError::NodeRunner {
                    node_id: node.node_id.clone(),
                    message: format!("{err:#}"),
                })
            }
            Err(_) => {
                let elapsed = started.elapsed();
                warn!(
                    job_id = %node.job_id,
                    node_id = %node.node_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    limit_ms = limit.as_millis() as u64,
                    "node timed out"
                );
                let mut metadata = Metadata::new();
                metadata.insert("elapsed_ms".to_string(), elapsed.as_millis().to_string());
                metadata.insert("limit_ms".to_string(), limit.as_millis().to_string());
                if let Err(e) = self.tracker.update_node_state(
                    &node.job_id,
                    &node.node_id,
                    NodeState::Timeout,
                    metadata,
                ) {
                    warn!(node_id = %node.node_id, error = %e, "failed to report node timeout");
                }
                Err(OrchestratorError::NodeTimeout {
                    node_id: node.node_id.clone(),
                    elapsed,
                    limit,
                })
            }
        }
    }

    async fn dispatch(&self, node: &Node, ctx: &NodeContext) -> anyhow::Result<Value> {
        let handler = self.handlers.get(node.node_type);
        match node.execution_strategy {
            ExecutionStrategy::Direct => handler.handle(ctx).await,
            ExecutionStrategy::Queued
            | ExecutionStrategy::Parallel
            | ExecutionStrategy::Sequential
            | ExecutionStrategy::Conditional => {
                debug!(
                    node_id = %node.node_id,
                    strategy = ?node.execution_strategy,
                    "no composition registered for strategy; dispatching directly"
                );
                handler.handle(ctx).await
            }
        }
    }
}
