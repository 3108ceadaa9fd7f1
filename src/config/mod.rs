// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] holds the TOML-facing sections and the validated
//!   [`OrchestratorConfig`].
//! - [`validate`] turns a [`RawConfigFile`] into an [`OrchestratorConfig`].
//! - [`loader`] reads config and job-definition files from disk.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_job_spec};
pub use model::{
    EngineSection, OrchestratorConfig, RawConfigFile, RecoverySection, ResourcesSection,
    RetrySection, SchedulerSection, TrackerSection,
};
