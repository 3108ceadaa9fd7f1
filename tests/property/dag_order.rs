// tests/property/dag_order.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;
use suiteflow::clock::{ManualClock, SharedClock};
use suiteflow::config::OrchestratorConfig;
use suiteflow::engine::{CancelHandle, DagPlan, ExecutionEngine};
use suiteflow::errors::{HaltReason, OrchestratorError};
use suiteflow::model::{Job, JobSpec, JobStatus, Node};
use suiteflow::store::MemoryStore;
use suiteflow::tracker::StateTracker;
use suiteflow_test_utils::{JobSpecBuilder, NodeSpecBuilder, ScriptedHandler};

// Acyclic by construction: node i may only depend on nodes 0..i.
fn dag_spec_strategy(max_nodes: usize) -> impl Strategy<Value = JobSpec> {
    (1..=max_nodes).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n).prop_map(
            move |raw_deps| {
                let mut builder = JobSpecBuilder::new("prop");
                for (i, candidates) in raw_deps.into_iter().enumerate() {
                    let deps: BTreeSet<String> = if i == 0 {
                        BTreeSet::new()
                    } else {
                        candidates.into_iter().map(|d| format!("n{}", d % i)).collect()
                    };
                    let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                    builder = builder.node(NodeSpecBuilder::new(&format!("n{i}")).after(&deps));
                }
                builder.build()
            },
        )
    })
}

fn job_and_nodes(spec: &JobSpec) -> (Job, Vec<Node>) {
    let job = Job::new(spec, "prop", 0, Utc::now());
    let nodes = spec
        .nodes
        .iter()
        .map(|n| Node::from_spec(&job.job_id, n))
        .collect();
    (job, nodes)
}

fn engine(handler: &ScriptedHandler, parallel: usize) -> ExecutionEngine {
    let mut cfg = OrchestratorConfig::default();
    cfg.engine.max_parallel_nodes = parallel;
    cfg.engine.stall_poll_interval_ms = 20;
    let clock: SharedClock = Arc::new(ManualClock::default());
    let tracker = Arc::new(StateTracker::from_config(
        &cfg,
        Arc::new(MemoryStore::new()),
        Arc::clone(&clock),
    ));
    ExecutionEngine::from_config(&cfg, tracker, handler.handlers(), clock)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn topological_order_respects_every_edge(spec in dag_spec_strategy(12)) {
        let (job, nodes) = job_and_nodes(&spec);
        let plan = DagPlan::build(&job.job_id, &nodes).unwrap();

        let order = plan.topological_order();
        prop_assert_eq!(order.len(), nodes.len());
        for node in &nodes {
            let at = order.iter().position(|id| *id == node.node_id).unwrap();
            for dep in &node.depends_on {
                let dep_at = order.iter().position(|id| id == dep).unwrap();
                prop_assert!(dep_at < at, "{} placed before its dependency {}", node.node_id, dep);
            }
        }

        let roots: BTreeSet<String> = plan.roots().into_iter().collect();
        let expected: BTreeSet<String> = nodes
            .iter()
            .filter(|n| n.is_root())
            .map(|n| n.node_id.clone())
            .collect();
        prop_assert_eq!(roots, expected);
    }

    #[test]
    fn ring_of_nodes_is_always_rejected(n in 2usize..8) {
        let mut builder = JobSpecBuilder::new("ring");
        for i in 0..n {
            let prev = format!("n{}", (i + n - 1) % n);
            builder = builder.node(NodeSpecBuilder::new(&format!("n{i}")).after(&[prev.as_str()]));
        }
        let (job, nodes) = job_and_nodes(&builder.build());
        let err = DagPlan::build(&job.job_id, &nodes).unwrap_err();
        prop_assert!(
            matches!(
                err,
                OrchestratorError::GraphExecutionHalt { reason: HaltReason::CycleDetected, .. }
            ),
            "got {:?}",
            err
        );
    }

    #[test]
    fn nodes_start_only_after_their_dependencies_finish(
        spec in dag_spec_strategy(10),
        parallel in 1usize..4,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let handler = ScriptedHandler::new();
        let engine = engine(&handler, parallel);
        let (job, nodes) = job_and_nodes(&spec);
        let deps: Vec<(String, Vec<String>)> = nodes
            .iter()
            .map(|n| (n.node_id.clone(), n.depends_on.iter().cloned().collect()))
            .collect();

        let report = rt
            .block_on(engine.execute(&job, nodes, &CancelHandle::new(), None))
            .unwrap();
        prop_assert_eq!(report.outcome, JobStatus::Completed);

        let runs = handler.executions();
        prop_assert_eq!(runs.len(), deps.len());
        for (node_id, node_deps) in &deps {
            let run = runs.iter().find(|r| &r.node_id == node_id).unwrap();
            for dep in node_deps {
                let dep_run = runs.iter().find(|r| &r.node_id == dep).unwrap();
                prop_assert!(dep_run.finished.is_some_and(|f| f <= run.started));
                let dep_seq = report.runs[dep].finish_seq.unwrap();
                let seq = report.runs[node_id].start_seq.unwrap();
                prop_assert!(dep_seq < seq, "{} started before {} finished", node_id, dep);
            }
        }
    }
}
