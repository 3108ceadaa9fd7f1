#![allow(dead_code)]

use chrono::{DateTime, Utc};
use suiteflow::config::{OrchestratorConfig, RawConfigFile};
use suiteflow::model::{JobSpec, JobTarget, JobType, NodeParams, NodeSpec, NodeType, RetryPolicy};
use suiteflow::runner::Condition;
use suiteflow::types::{CircuitScope, StallDetection};

/// Builder for `OrchestratorConfig`, validated on `build`.
///
/// Starts from defaults with a fast stall poll so tests settle quickly.
pub struct ConfigBuilder {
    raw: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut raw = RawConfigFile::default();
        raw.engine.stall_poll_interval_ms = 20;
        Self { raw }
    }

    pub fn max_parallel_nodes(mut self, n: usize) -> Self {
        self.raw.engine.max_parallel_nodes = n;
        self
    }

    pub fn cascade_failures(mut self, on: bool) -> Self {
        self.raw.engine.cascade_failures = on;
        self
    }

    pub fn default_node_timeout_secs(mut self, secs: u64) -> Self {
        self.raw.engine.default_node_timeout_secs = secs;
        self
    }

    pub fn stall_detection(mut self, mode: StallDetection) -> Self {
        self.raw.tracker.stall_detection = mode;
        self
    }

    pub fn pool_capacity(mut self, n: usize) -> Self {
        self.raw.resources.pool_capacity = n;
        self
    }

    pub fn default_job_timeout_secs(mut self, secs: u64) -> Self {
        self.raw.scheduler.default_job_timeout_secs = secs;
        self
    }

    pub fn monitor_interval_ms(mut self, ms: u64) -> Self {
        self.raw.scheduler.monitor_interval_ms = ms;
        self
    }

    pub fn default_max_retries(mut self, n: u32) -> Self {
        self.raw.scheduler.default_max_retries = n;
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.raw.retry.policies.push(policy);
        self
    }

    pub fn default_policy(mut self, policy_id: &str) -> Self {
        self.raw.retry.default_policy = Some(policy_id.to_string());
        self
    }

    pub fn circuit_scope(mut self, scope: CircuitScope) -> Self {
        self.raw.retry.circuit_scope = scope;
        self
    }

    pub fn stall_threshold_secs(mut self, secs: u64) -> Self {
        self.raw.recovery.stall_threshold_secs = secs;
        self
    }

    pub fn critical_retry_threshold(mut self, n: u32) -> Self {
        self.raw.recovery.critical_retry_threshold = n;
        self
    }

    pub fn scan_interval_ms(mut self, ms: u64) -> Self {
        self.raw.recovery.scan_interval_ms = ms;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.raw
    }

    pub fn build(self) -> OrchestratorConfig {
        OrchestratorConfig::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobSpec`. Defaults to a suite run against `suite-1`.
pub struct JobSpecBuilder {
    spec: JobSpec,
}

impl JobSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: JobSpec {
                name: name.to_string(),
                job_type: JobType::TestSuiteRun,
                priority: 5,
                target: JobTarget {
                    suite_id: Some("suite-1".to_string()),
                    ..Default::default()
                },
                scheduled_at: None,
                timeout_secs: None,
                max_retries: None,
                retry_policy_id: None,
                metadata: Default::default(),
                nodes: Vec::new(),
            },
        }
    }

    pub fn job_type(mut self, job_type: JobType, target: JobTarget) -> Self {
        self.spec.job_type = job_type;
        self.spec.target = target;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.spec.priority = priority;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.spec.max_retries = Some(n);
        self
    }

    pub fn retry_policy(mut self, policy_id: &str) -> Self {
        self.spec.retry_policy_id = Some(policy_id.to_string());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.spec.timeout_secs = Some(secs);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.spec.scheduled_at = Some(at);
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.spec.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn node(mut self, node: NodeSpecBuilder) -> Self {
        self.spec.nodes.push(node.build());
        self
    }

    /// Linear chain: each node depends on the previous one.
    pub fn chain(mut self, ids: &[&str]) -> Self {
        let mut prev: Option<&str> = None;
        for id in ids {
            let mut node = NodeSpecBuilder::new(id);
            if let Some(p) = prev {
                node = node.after(&[p]);
            }
            self.spec.nodes.push(node.build());
            prev = Some(id);
        }
        self
    }

    pub fn build(self) -> JobSpec {
        self.spec
    }
}

/// Builder for `NodeSpec`. Defaults to an interruptible test-execution node.
pub struct NodeSpecBuilder {
    spec: NodeSpec,
}

impl NodeSpecBuilder {
    pub fn new(node_id: &str) -> Self {
        Self {
            spec: NodeSpec {
                node_id: node_id.to_string(),
                node_type: NodeType::TestExecution,
                execution_strategy: Default::default(),
                depends_on: Vec::new(),
                critical: false,
                timeout_secs: None,
                max_retries: 0,
                interruptible: true,
                config: Default::default(),
            },
        }
    }

    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.spec.node_type = node_type;
        self
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.spec
            .depends_on
            .extend(deps.iter().map(|d| d.to_string()));
        self
    }

    pub fn critical(mut self) -> Self {
        self.spec.critical = true;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.spec.max_retries = n;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.spec.timeout_secs = Some(secs);
        self
    }

    pub fn not_interruptible(mut self) -> Self {
        self.spec.interruptible = false;
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.spec.config.conditions.push(condition);
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.spec
            .config
            .metadata
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn params(mut self, params: NodeParams) -> Self {
        self.spec.node_type = params.node_type();
        self.spec.config.params = Some(params);
        self
    }

    pub fn build(self) -> NodeSpec {
        self.spec
    }
}
