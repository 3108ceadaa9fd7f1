// tests/integration/error_handling.rs

use std::io::Write;

use tempfile::NamedTempFile;

use suiteflow::config::{load_and_validate, load_job_spec};
use suiteflow::errors::OrchestratorError;
use suiteflow::model::{JobType, NodeType, RetryStrategy};

fn file_with(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn config_file_with_policies_is_loaded() {
    let file = file_with(
        r#"
[engine]
max_parallel_nodes = 2
cascade_failures = false

[retry]
default_policy = "standard"
circuit_scope = "job"

[[retry.policies]]
policy_id = "standard"
strategy = "exponential"
max_attempts = 3
base_delay_ms = 1000
jitter_ratio = 0.1

[[retry.policies]]
policy_id = "maintenance"
job_type = "maintenance"
strategy = "linear"
max_attempts = 2
base_delay_ms = 500
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.engine.max_parallel_nodes, 2);
    assert!(!cfg.engine.cascade_failures);
    assert_eq!(cfg.retry.default_policy.as_deref(), Some("standard"));
    assert_eq!(cfg.retry.policies.len(), 2);
    assert_eq!(cfg.retry.policies[0].strategy, RetryStrategy::Exponential);
    assert_eq!(cfg.retry.policies[1].job_type, Some(JobType::Maintenance));
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_and_validate(dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg.engine.max_parallel_nodes, 4);
    assert_eq!(cfg.recovery.stall_threshold_secs, 600);
}

#[test]
fn invalid_policy_is_a_config_error() {
    let file = file_with(
        r#"
[[retry.policies]]
policy_id = "flat"
strategy = "exponential"
max_attempts = 3
base_delay_ms = 1000
backoff_multiplier = 1.0
"#,
    );

    match load_and_validate(file.path()) {
        Err(OrchestratorError::Config(msg)) => {
            assert!(msg.contains("flat"));
            assert!(msg.contains("multiplier"));
        }
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn malformed_config_is_a_toml_error() {
    let file = file_with("[engine\nmax_parallel_nodes = ");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, OrchestratorError::Toml(_)), "got {err:?}");
}

#[test]
fn job_definition_with_node_tables_is_loaded() {
    let file = file_with(
        r#"
name = "nightly regression"
job_type = "test_suite_run"
priority = 7
timeout_secs = 1800

[target]
suite_id = "suite-42"

[[node]]
node_id = "setup"
node_type = "setup"
config = { params = { kind = "setup", fixtures = ["db"] } }

[[node]]
node_id = "run"
node_type = "test_execution"
depends_on = ["setup"]
critical = true

[[node]]
node_id = "notify"
node_type = "notification"
depends_on = ["run"]
interruptible = false
"#,
    );

    let spec = load_job_spec(file.path()).unwrap();
    assert_eq!(spec.name, "nightly regression");
    assert_eq!(spec.priority, 7);
    assert_eq!(spec.target.suite_id.as_deref(), Some("suite-42"));
    assert_eq!(spec.nodes.len(), 3);
    assert_eq!(spec.nodes[0].node_type, NodeType::Setup);
    assert!(spec.nodes[1].critical);
    assert_eq!(spec.nodes[1].depends_on, vec!["setup"]);
    assert!(spec.nodes[0].interruptible);
    assert!(!spec.nodes[2].interruptible);
}

#[test]
fn duplicate_node_ids_are_rejected() {
    let file = file_with(
        r#"
name = "dup"
job_type = "maintenance"

[[node]]
node_id = "a"
node_type = "cleanup"

[[node]]
node_id = "a"
node_type = "cleanup"
"#,
    );

    match load_job_spec(file.path()) {
        Err(OrchestratorError::Validation(msg)) => assert!(msg.contains("duplicate")),
        other => panic!("expected Validation error, got {other:?}"),
    }
}

#[test]
fn params_must_match_node_type() {
    let file = file_with(
        r#"
name = "mismatch"
job_type = "maintenance"

[[node]]
node_id = "a"
node_type = "cleanup"
config = { params = { kind = "notification", channel = "ops" } }
"#,
    );

    let err = load_job_spec(file.path()).unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)), "got {err:?}");
}
