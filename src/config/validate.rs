// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{OrchestratorConfig, RawConfigFile};
use crate::errors::{OrchestratorError, Result};

impl TryFrom<RawConfigFile> for OrchestratorConfig {
    type Error = OrchestratorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(OrchestratorConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_scheduler(cfg)?;
    validate_recovery(cfg)?;
    validate_retry_policies(cfg)?;
    Ok(())
}

fn config_error(msg: String) -> OrchestratorError {
    OrchestratorError::Config(msg)
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.max_parallel_nodes == 0 {
        return Err(config_error(
            "[engine].max_parallel_nodes must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.engine.stall_poll_interval_ms == 0 {
        return Err(config_error(
            "[engine].stall_poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.engine.default_node_timeout_secs == 0 {
        return Err(config_error(
            "[engine].default_node_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<()> {
    if cfg.scheduler.queue_capacity == 0 {
        return Err(config_error(
            "[scheduler].queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.scheduler.monitor_interval_ms == 0 {
        return Err(config_error(
            "[scheduler].monitor_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.resources.pool_capacity == 0 {
        return Err(config_error(
            "[resources].pool_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_recovery(cfg: &RawConfigFile) -> Result<()> {
    if cfg.recovery.scan_interval_ms == 0 {
        return Err(config_error(
            "[recovery].scan_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.recovery.queue_capacity == 0 {
        return Err(config_error(
            "[recovery].queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_retry_policies(cfg: &RawConfigFile) -> Result<()> {
    let mut ids = HashSet::new();
    for policy in &cfg.retry.policies {
        policy
            .validate()
            .map_err(|e| config_error(format!("[[retry.policies]]: {e}")))?;
        if !ids.insert(policy.policy_id.as_str()) {
            return Err(config_error(format!(
                "duplicate retry policy '{}'",
                policy.policy_id
            )));
        }
    }

    if let Some(default) = &cfg.retry.default_policy {
        if !ids.contains(default.as_str()) {
            return Err(config_error(format!(
                "[retry].default_policy '{}' names no configured policy",
                default
            )));
        }
    }
    Ok(())
}
