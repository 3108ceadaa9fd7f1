use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::json;
use suiteflow::runner::{HandlerFuture, HandlerSet, NodeContext, NodeHandler};
use suiteflow::types::NodeId;
use tokio::time::Instant;

/// What a scripted node does when invoked.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    Fail(String),
    /// Fail the first `n` invocations, then succeed.
    FailTimes(u32, String),
    Sleep(Duration),
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Execution {
    pub node_id: NodeId,
    pub job_attempt: u32,
    pub started: Instant,
    pub finished: Option<Instant>,
    pub failed: bool,
}

#[derive(Debug, Default)]
struct Script {
    behaviours: HashMap<NodeId, Behaviour>,
    calls: HashMap<NodeId, u32>,
    in_flight: HashMap<NodeId, u32>,
    peak_in_flight: HashMap<NodeId, u32>,
    log: Vec<Execution>,
}

/// Counts a call as in flight until dropped, including when the handler
/// future is dropped mid-sleep.
struct InFlight<'a> {
    handler: &'a ScriptedHandler,
    node_id: NodeId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = self.handler.lock().in_flight.get_mut(&self.node_id) {
            *n = n.saturating_sub(1);
        }
    }
}

/// A node handler driven by a per-node script that records every invocation.
///
/// Unscripted nodes succeed immediately. Clones share the same script and log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandler {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, node_id: &str, behaviour: Behaviour) -> Self {
        self.lock().behaviours.insert(node_id.to_string(), behaviour);
        self
    }

    pub fn fail(self, node_id: &str, message: &str) -> Self {
        self.on(node_id, Behaviour::Fail(message.to_string()))
    }

    pub fn fail_times(self, node_id: &str, times: u32, message: &str) -> Self {
        self.on(node_id, Behaviour::FailTimes(times, message.to_string()))
    }

    pub fn sleep(self, node_id: &str, duration: Duration) -> Self {
        self.on(node_id, Behaviour::Sleep(duration))
    }

    /// Use this handler for every node type.
    pub fn handlers(&self) -> HandlerSet {
        HandlerSet::uniform(Arc::new(self.clone()))
    }

    /// Node ids in invocation order.
    pub fn started_order(&self) -> Vec<NodeId> {
        self.lock().log.iter().map(|e| e.node_id.clone()).collect()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.lock().log.clone()
    }

    pub fn calls(&self, node_id: &str) -> u32 {
        self.lock().calls.get(node_id).copied().unwrap_or(0)
    }

    /// Most invocations of `node_id` that were ever running at once.
    pub fn peak_in_flight(&self, node_id: &str) -> u32 {
        self.lock().peak_in_flight.get(node_id).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the start and decide what this call does.
    fn begin(&self, ctx: &NodeContext) -> (usize, Behaviour) {
        let mut script = self.lock();
        let call = {
            let c = script.calls.entry(ctx.node_id.clone()).or_insert(0);
            *c += 1;
            *c
        };
        let behaviour = match script.behaviours.get(&ctx.node_id) {
            Some(Behaviour::FailTimes(n, msg)) if call <= *n => Behaviour::Fail(msg.clone()),
            Some(Behaviour::FailTimes(..)) | None => Behaviour::Succeed,
            Some(other) => other.clone(),
        };
        let running = {
            let n = script.in_flight.entry(ctx.node_id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let peak = script.peak_in_flight.entry(ctx.node_id.clone()).or_insert(0);
        *peak = (*peak).max(running);
        script.log.push(Execution {
            node_id: ctx.node_id.clone(),
            job_attempt: ctx.attempt,
            started: Instant::now(),
            finished: None,
            failed: false,
        });
        (script.log.len() - 1, behaviour)
    }

    fn finish(&self, index: usize, failed: bool) {
        let mut script = self.lock();
        if let Some(entry) = script.log.get_mut(index) {
            entry.finished = Some(Instant::now());
            entry.failed = failed;
        }
    }
}

impl NodeHandler for ScriptedHandler {
    fn handle<'a>(&'a self, ctx: &'a NodeContext) -> HandlerFuture<'a> {
        Box::pin(async move {
            let (index, behaviour) = self.begin(ctx);
            let _in_flight = InFlight {
                handler: self,
                node_id: ctx.node_id.clone(),
            };
            match behaviour {
                Behaviour::Fail(message) => {
                    self.finish(index, true);
                    anyhow::bail!("{message}");
                }
                Behaviour::Sleep(duration) => tokio::time::sleep(duration).await,
                Behaviour::Succeed | Behaviour::FailTimes(..) => {}
            }
            self.finish(index, false);
            Ok(json!({ "node_id": ctx.node_id, "attempt": ctx.attempt }))
        })
    }
}
