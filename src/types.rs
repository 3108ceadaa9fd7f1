use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical job identifier.
pub type JobId = String;

/// Node identifier, unique within one job.
pub type NodeId = String;

/// Open-ended key/value extension bag carried by jobs and nodes.
///
/// Bounded by [`MAX_METADATA_ENTRIES`]; anything structural belongs in a typed
/// field instead.
pub type Metadata = BTreeMap<String, String>;

pub const MAX_METADATA_ENTRIES: usize = 64;

/// How the state tracker decides that an execution graph is stalled.
///
/// - `Conservative`: nothing running or ready, pending nodes remain, and no
///   node resolved since the previous check. Every pending node is reported.
/// - `Deadlock`: only pending nodes whose dependencies can no longer all
///   succeed are reported, and only when nothing is running or ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StallDetection {
    Conservative,
    Deadlock,
}

impl Default for StallDetection {
    fn default() -> Self {
        StallDetection::Conservative
    }
}

impl FromStr for StallDetection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(StallDetection::Conservative),
            "deadlock" => Ok(StallDetection::Deadlock),
            other => Err(format!(
                "invalid stall_detection: {other} (expected \"conservative\" or \"deadlock\")"
            )),
        }
    }
}

/// Granularity of circuit-breaker state.
///
/// - `Policy`: one breaker per retry policy, shared by every job using it.
/// - `Job`: one breaker per (policy, job) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitScope {
    Policy,
    Job,
}

impl Default for CircuitScope {
    fn default() -> Self {
        CircuitScope::Policy
    }
}

impl FromStr for CircuitScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "policy" => Ok(CircuitScope::Policy),
            "job" => Ok(CircuitScope::Job),
            other => Err(format!(
                "invalid circuit_scope: {other} (expected \"policy\" or \"job\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Deadlock".parse::<StallDetection>(), Ok(StallDetection::Deadlock));
        assert_eq!(" job ".parse::<CircuitScope>(), Ok(CircuitScope::Job));
        assert!("sometimes".parse::<StallDetection>().is_err());
    }
}
