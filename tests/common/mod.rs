// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use suiteflow::clock::ManualClock;
use suiteflow::config::OrchestratorConfig;
use suiteflow::orchestrator::Orchestrator;
use suiteflow::store::MemoryStore;
use suiteflow_test_utils::ScriptedHandler;

pub use suiteflow_test_utils::{init_tracing, wait_for_status, wait_until};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Orchestrator over a fresh in-memory store, driven by `clock`.
pub fn orchestrator_with_clock(
    config: OrchestratorConfig,
    handler: &ScriptedHandler,
    clock: &ManualClock,
) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
        handler.handlers(),
    )
}

/// Orchestrator over a fresh in-memory store and the system clock.
pub fn orchestrator(config: OrchestratorConfig, handler: &ScriptedHandler) -> Orchestrator {
    Orchestrator::in_memory(config, handler.handlers())
}

/// Position of `node` in `order`, panicking if it never ran.
pub fn position(order: &[String], node: &str) -> usize {
    order
        .iter()
        .position(|n| n == node)
        .unwrap_or_else(|| panic!("node {node} never started; order was {order:?}"))
}
