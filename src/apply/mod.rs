//! Apply operations
//!
//! One applier per resource kind; each performs a single
//! validate → fetch → plan → diff → execute → await cycle and produces an
//! [`ApplyResult`]. The topic applier is the full case; the broker, brokers
//! and acl appliers are reduced cases over the same machinery.

pub mod acl;
pub mod broker;
pub mod brokers;
pub mod controller;
pub mod topic;

use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::docparse::DefinitionFormat;
use crate::error::Result;

/// Options common to all appliers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplierOptions {
    pub definition_format: DefinitionFormat,
    pub dry_run: bool,
    /// Seconds to await in-progress partition reassignments; 0 disables the
    /// await loop. Only meaningful for topic applies.
    pub reass_await_timeout: u64,
}

/// The outcome of applying one definition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_def: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_def: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub diff: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    pub applied: bool,
}

impl ApplyResult {
    /// Whether the definition still differs from the cluster.
    pub fn has_unapplied_changes(&self) -> bool {
        !self.diff.is_empty() && !self.applied
    }
}

/// Results across all documents of an apply invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyResults(pub Vec<ApplyResult>);

impl ApplyResults {
    pub fn push(&mut self, result: ApplyResult) {
        self.0.push(result);
    }

    pub fn contains_err(&self) -> bool {
        self.0.iter().any(|r| r.err.is_some())
    }

    pub fn contains_unapplied_changes(&self) -> bool {
        self.0.iter().any(|r| r.has_unapplied_changes())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }
}

/// Render a diff with `-`/`+` lines colored for terminal output.
pub(crate) fn render_diff(diff: &str) -> String {
    diff.lines()
        .map(|line| match line.chars().next() {
            Some('-') => format!("{}\n", line.red()),
            Some('+') => format!("{}\n", line.green()),
            _ => format!("{line}\n"),
        })
        .collect()
}

/// Decode one definition document in the configured format.
pub(crate) fn parse_doc<T: serde::de::DeserializeOwned>(
    doc: &str,
    format: DefinitionFormat,
) -> Result<T> {
    match format {
        DefinitionFormat::Yaml => Ok(serde_yaml::from_str(doc)?),
        DefinitionFormat::Json => Ok(serde_json::from_str(doc)?),
    }
}
