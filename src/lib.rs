// src/lib.rs

//! Orchestration and recovery core of a test-management backend.
//!
//! Jobs are DAGs of typed nodes. The [`scheduler`] owns job lifecycle, the
//! [`engine`] runs graphs through the [`runner`] while the [`tracker`]
//! persists every node transition, the [`retry`] manager requeues failures
//! with backoff and the [`recovery`] processor repairs stalled or critically
//! failed jobs. [`service`] is the request-facing facade.

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tracker;
pub mod types;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{OrchestratorConfig, load_and_validate, load_job_spec};
use crate::engine::DagPlan;
use crate::model::{JobSpec, JobStatus, Node};
use crate::orchestrator::Orchestrator;
use crate::runner::HandlerSet;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// High-level entry point used by `main.rs`.
///
/// Loads config and the job definition, then either prints the plan
/// (`--dry-run`) or runs the job against the in-memory store with the
/// built-in handlers. Exits with failure unless the job completes.
pub async fn run(args: CliArgs) -> Result<ExitCode> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let spec = load_job_spec(&args.job)
        .with_context(|| format!("loading job {}", args.job.display()))?;

    if args.dry_run {
        print_dry_run(&cfg, &spec)?;
        return Ok(ExitCode::SUCCESS);
    }

    let orch = Orchestrator::in_memory(cfg, HandlerSet::default());
    orch.start()?;
    let job = orch.scheduler().schedule_job(&spec, &args.triggered_by).await?;
    info!(job_id = %job.job_id, name = %job.name, "job submitted");

    let status = tokio::select! {
        status = wait_for_settled(&orch, &job.job_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job.job_id, "interrupted; cancelling job");
            orch.scheduler().cancel_job(&job.job_id)?.status
        }
    };

    let progress = orch.scheduler().get_job_progress(&job.job_id)?;
    println!("job {} finished: {}", job.job_id, status);
    println!(
        "  progress: {:.0}% ({} of {} nodes resolved)",
        progress.percent,
        progress.counters.resolved(),
        progress.counters.total
    );
    if !progress.execution_path.is_empty() {
        println!("  path: {}", progress.execution_path.join(" -> "));
    }
    if let Some(err) = orch.repository().require_job(&job.job_id)?.error_details {
        println!("  error ({}): {}", err.classification, err.message);
    }

    orch.shutdown().await;
    Ok(if status == JobStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Poll until the job is terminal or parked for manual intervention.
async fn wait_for_settled(orch: &Orchestrator, job_id: &str) -> Result<JobStatus> {
    loop {
        let job = orch.repository().require_job(job_id)?;
        if job.status.is_terminal() || job.status == JobStatus::Paused {
            return Ok(job.status);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Validate the graph and print nodes in execution order.
fn print_dry_run(cfg: &OrchestratorConfig, spec: &JobSpec) -> Result<()> {
    let nodes: Vec<Node> = spec
        .nodes
        .iter()
        .map(|n| Node::from_spec("dry-run", n))
        .collect();
    let plan = DagPlan::build("dry-run", &nodes)?;

    println!("suiteflow dry-run");
    println!("  job: {} ({})", spec.name, spec.job_type);
    println!("  engine.max_parallel_nodes = {}", cfg.engine.max_parallel_nodes);
    println!("  engine.cascade_failures = {}", cfg.engine.cascade_failures);
    println!();

    println!("nodes ({}), in execution order:", plan.len());
    for id in plan.topological_order() {
        let Some(node) = nodes.iter().find(|n| &n.node_id == id) else {
            continue;
        };
        println!("  - {id} [{}]", node.node_type);
        let deps = plan.dependencies_of(id);
        if !deps.is_empty() {
            println!("      after: {deps:?}");
        }
        if node.critical {
            println!("      critical: true");
        }
        if !node.config.conditions.is_empty() {
            let conditions: Vec<String> =
                node.config.conditions.iter().map(|c| c.to_string()).collect();
            println!("      when any: {conditions:?}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
