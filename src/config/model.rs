// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::model::RetryPolicy;
use crate::types::{CircuitScope, StallDetection};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// max_parallel_nodes = 8
///
/// [retry]
/// default_policy = "standard"
///
/// [[retry.policies]]
/// policy_id = "standard"
/// strategy = "exponential"
/// max_attempts = 3
/// base_delay_ms = 1000
/// ```
///
/// Every section is optional and falls back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub resources: ResourcesSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub recovery: RecoverySection,
}

/// Validated, immutable configuration shared by every component.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (or `Default`, whose
/// values are valid by construction).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub engine: EngineSection,
    pub tracker: TrackerSection,
    pub scheduler: SchedulerSection,
    pub resources: ResourcesSection,
    pub retry: RetrySection,
    pub recovery: RecoverySection,
}

impl OrchestratorConfig {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            tracker: raw.tracker,
            scheduler: raw.scheduler,
            resources: raw.resources,
            retry: raw.retry,
            recovery: raw.recovery,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Upper bound on simultaneously executing nodes per job.
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,

    /// How often the engine checks for a stalled graph.
    #[serde(default = "default_stall_poll_interval_ms")]
    pub stall_poll_interval_ms: u64,

    /// Node deadline when the node sets none.
    #[serde(default = "default_node_timeout_secs")]
    pub default_node_timeout_secs: u64,

    /// Cancel the transitive dependents of a failed node right away.
    #[serde(default = "default_true")]
    pub cascade_failures: bool,
}

impl EngineSection {
    pub fn stall_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stall_poll_interval_ms)
    }

    pub fn default_node_timeout(&self) -> Duration {
        Duration::from_secs(self.default_node_timeout_secs)
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_parallel_nodes: default_max_parallel_nodes(),
            stall_poll_interval_ms: default_stall_poll_interval_ms(),
            default_node_timeout_secs: default_node_timeout_secs(),
            cascade_failures: true,
        }
    }
}

/// `[tracker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSection {
    #[serde(default)]
    pub stall_detection: StallDetection,

    /// Finalized graphs older than this are removed by `cleanup_completed`.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            stall_detection: StallDetection::default(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Capacity of the internal "due now" scheduling queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Period of the job-timeout monitor.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    #[serde(default = "default_job_timeout_secs")]
    pub default_job_timeout_secs: u64,

    /// Retry budget for jobs whose policy does not set one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl SchedulerSection {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            monitor_interval_ms: default_monitor_interval_ms(),
            default_job_timeout_secs: default_job_timeout_secs(),
            default_max_retries: default_max_retries(),
        }
    }
}

/// `[resources]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesSection {
    #[serde(default = "default_pool_name")]
    pub pool_name: String,

    #[serde(default = "default_environment_id")]
    pub environment_id: String,

    /// Maximum concurrently allocated jobs.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            pool_name: default_pool_name(),
            environment_id: default_environment_id(),
            pool_capacity: default_pool_capacity(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrySection {
    /// Policy used when neither the job nor its type selects one.
    #[serde(default)]
    pub default_policy: Option<String>,

    #[serde(default)]
    pub circuit_scope: CircuitScope,

    #[serde(default)]
    pub policies: Vec<RetryPolicy>,
}

/// `[recovery]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// A running job with no update for this long is considered stalled.
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,

    /// Failed/retrying jobs with at least this many retries are critical.
    #[serde(default = "default_critical_retry_threshold")]
    pub critical_retry_threshold: u32,

    #[serde(default = "default_recovery_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a session waits for a live execution of its job to stop.
    #[serde(default = "default_wind_down_timeout_ms")]
    pub wind_down_timeout_ms: u64,
}

impl RecoverySection {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn wind_down_timeout(&self) -> Duration {
        Duration::from_millis(self.wind_down_timeout_ms)
    }
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
            stall_threshold_secs: default_stall_threshold_secs(),
            critical_retry_threshold: default_critical_retry_threshold(),
            queue_capacity: default_recovery_queue_capacity(),
            wind_down_timeout_ms: default_wind_down_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_parallel_nodes() -> usize {
    4
}

fn default_stall_poll_interval_ms() -> u64 {
    250
}

fn default_node_timeout_secs() -> u64 {
    300
}

fn default_retention_hours() -> u64 {
    24
}

fn default_queue_capacity() -> usize {
    64
}

fn default_monitor_interval_ms() -> u64 {
    30_000
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_pool_name() -> String {
    "default".to_string()
}

fn default_environment_id() -> String {
    "local".to_string()
}

fn default_pool_capacity() -> usize {
    16
}

fn default_scan_interval_ms() -> u64 {
    60_000
}

fn default_stall_threshold_secs() -> u64 {
    600
}

fn default_critical_retry_threshold() -> u32 {
    3
}

fn default_recovery_queue_capacity() -> usize {
    32
}

fn default_wind_down_timeout_ms() -> u64 {
    30_000
}
