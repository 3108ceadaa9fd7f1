// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{OrchestratorConfig, RawConfigFile};
use crate::errors::Result;
use crate::model::JobSpec;

/// Load a configuration file and return the raw, unvalidated sections.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file and validate it.
///
/// A missing file is not an error: the defaults are used instead.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<OrchestratorConfig> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "config file not found; using defaults");
        return Ok(OrchestratorConfig::default());
    }
    let raw_config = load_from_path(path)?;
    let config = OrchestratorConfig::try_from(raw_config)?;
    Ok(config)
}

/// Load a job definition (`JobSpec` with `[[node]]` tables) and check its shape.
pub fn load_job_spec(path: impl AsRef<Path>) -> Result<JobSpec> {
    let contents = fs::read_to_string(path.as_ref())?;
    let spec: JobSpec = toml::from_str(&contents)?;
    spec.validate()?;
    Ok(spec)
}

/// Default config path: `suiteflow.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("suiteflow.toml")
}
