pub mod builders;
pub mod handlers;
pub mod store;

use std::sync::Once;
use std::time::Duration;

use suiteflow::model::{Job, JobStatus};
use suiteflow::store::Repository;
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{ConfigBuilder, JobSpecBuilder, NodeSpecBuilder};
pub use handlers::{Behaviour, Execution, ScriptedHandler};
pub use store::FlakyStore;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=suiteflow=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Poll the store until `pred` holds for the job, returning it.
///
/// Sleeps through `tokio::time`, so it also advances paused test clocks.
pub async fn wait_until<P>(repo: &Repository, job_id: &str, mut pred: P) -> Job
where
    P: FnMut(&Job) -> bool,
{
    loop {
        let job = repo
            .require_job(job_id)
            .expect("job should exist while waiting on it");
        if pred(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the job reaches `status`.
pub async fn wait_for_status(repo: &Repository, job_id: &str, status: JobStatus) -> Job {
    wait_until(repo, job_id, |job| job.status == status).await
}
