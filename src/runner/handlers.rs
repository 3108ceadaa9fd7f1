// src/runner/handlers.rs

//! Node handler abstraction and the fixed per-type handler set.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::model::{NodeParams, NodeType};
use crate::runner::context::NodeContext;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

/// Work performed for one node type.
///
/// Production deployments plug real test runners and notifiers in here;
/// tests provide scripted handlers.
pub trait NodeHandler: Send + Sync + Debug {
    fn handle<'a>(&'a self, ctx: &'a NodeContext) -> HandlerFuture<'a>;
}

/// Handler used when nothing else is registered: succeeds immediately and
/// echoes what it was given.
#[derive(Debug, Default, Clone)]
pub struct BuiltinHandler;

impl NodeHandler for BuiltinHandler {
    fn handle<'a>(&'a self, ctx: &'a NodeContext) -> HandlerFuture<'a> {
        Box::pin(async move {
            debug!(job_id = %ctx.job_id, node_id = %ctx.node_id, node_type = %ctx.node_type, "builtin handler");
            let detail = match &ctx.params {
                Some(NodeParams::Notification { channel, recipients }) => {
                    json!({ "channel": channel, "recipients": recipients.len() })
                }
                Some(NodeParams::DataProcessing { operation }) => json!({ "operation": operation }),
                Some(NodeParams::Validation { rules }) => json!({ "rules_checked": rules.len() }),
                _ => Value::Null,
            };
            Ok(json!({
                "node_id": ctx.node_id,
                "node_type": ctx.node_type.as_str(),
                "attempt": ctx.attempt,
                "references": ctx.references(),
                "detail": detail,
            }))
        })
    }
}

/// One handler per node type.
#[derive(Debug, Clone)]
pub struct HandlerSet {
    test_execution: Arc<dyn NodeHandler>,
    validation: Arc<dyn NodeHandler>,
    notification: Arc<dyn NodeHandler>,
    data_processing: Arc<dyn NodeHandler>,
    conditional: Arc<dyn NodeHandler>,
    synchronization: Arc<dyn NodeHandler>,
    cleanup: Arc<dyn NodeHandler>,
    setup: Arc<dyn NodeHandler>,
}

impl HandlerSet {
    /// The same handler for every node type.
    pub fn uniform(handler: Arc<dyn NodeHandler>) -> Self {
        Self {
            test_execution: Arc::clone(&handler),
            validation: Arc::clone(&handler),
            notification: Arc::clone(&handler),
            data_processing: Arc::clone(&handler),
            conditional: Arc::clone(&handler),
            synchronization: Arc::clone(&handler),
            cleanup: Arc::clone(&handler),
            setup: handler,
        }
    }

    /// Replace the handler for one node type.
    pub fn with(mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) -> Self {
        *self.slot_mut(node_type) = handler;
        self
    }

    pub fn get(&self, node_type: NodeType) -> &Arc<dyn NodeHandler> {
        match node_type {
            NodeType::TestExecution => &self.test_execution,
            NodeType::Validation => &self.validation,
            NodeType::Notification => &self.notification,
            NodeType::DataProcessing => &self.data_processing,
            NodeType::Conditional => &self.conditional,
            NodeType::Synchronization => &self.synchronization,
            NodeType::Cleanup => &self.cleanup,
            NodeType::Setup => &self.setup,
        }
    }

    fn slot_mut(&mut self, node_type: NodeType) -> &mut Arc<dyn NodeHandler> {
        match node_type {
            NodeType::TestExecution => &mut self.test_execution,
            NodeType::Validation => &mut self.validation,
            NodeType::Notification => &mut self.notification,
            NodeType::DataProcessing => &mut self.data_processing,
            NodeType::Conditional => &mut self.conditional,
            NodeType::Synchronization => &mut self.synchronization,
            NodeType::Cleanup => &mut self.cleanup,
            NodeType::Setup => &mut self.setup,
        }
    }
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self::uniform(Arc::new(BuiltinHandler))
    }
}
