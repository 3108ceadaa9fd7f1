// src/runner/condition.rs

//! Run conditions for conditional nodes.
//!
//! Grammar: `always`, `never`, `metadata_exists(key)`,
//! `metadata_equals(key, value)`. Arguments may be quoted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::types::Metadata;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    Always,
    Never,
    MetadataExists(String),
    MetadataEquals(String, String),
}

impl Condition {
    pub fn holds(&self, metadata: &Metadata) -> bool {
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::MetadataExists(key) => metadata.contains_key(key),
            Condition::MetadataEquals(key, value) => metadata.get(key) == Some(value),
        }
    }
}

/// True if the list is empty or any condition holds.
pub fn any_holds(conditions: &[Condition], metadata: &Metadata) -> bool {
    conditions.is_empty() || conditions.iter().any(|c| c.holds(metadata))
}

fn unquote(arg: &str) -> &str {
    let arg = arg.trim();
    for q in ['"', '\''] {
        if arg.len() >= 2 && arg.starts_with(q) && arg.ends_with(q) {
            return &arg[1..arg.len() - 1];
        }
    }
    arg
}

impl FromStr for Condition {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || OrchestratorError::Validation(format!("invalid condition '{s}'"));

        match s {
            "always" => return Ok(Condition::Always),
            "never" => return Ok(Condition::Never),
            _ => {}
        }

        let (name, rest) = s.split_once('(').ok_or_else(invalid)?;
        let args = rest.strip_suffix(')').ok_or_else(invalid)?;

        match name.trim() {
            "metadata_exists" => {
                let key = unquote(args);
                if key.is_empty() || key.contains(',') {
                    return Err(invalid());
                }
                Ok(Condition::MetadataExists(key.to_string()))
            }
            "metadata_equals" => {
                let (key, value) = args.split_once(',').ok_or_else(invalid)?;
                let key = unquote(key);
                if key.is_empty() {
                    return Err(invalid());
                }
                Ok(Condition::MetadataEquals(
                    key.to_string(),
                    unquote(value).to_string(),
                ))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Condition {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => f.write_str("always"),
            Condition::Never => f.write_str("never"),
            Condition::MetadataExists(key) => write!(f, "metadata_exists({key})"),
            Condition::MetadataEquals(key, value) => write!(f, "metadata_equals({key}, {value})"),
        }
    }
}
