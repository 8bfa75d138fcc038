//! Export operations
//!
//! The inverse of apply: materialize live cluster state into definition
//! documents in the same YAML/JSON format the appliers consume. Applying an
//! exported definition against the same cluster yields an empty plan.

pub mod acl;
pub mod broker;
pub mod brokers;
pub mod topic;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// How exported topic definitions express replica placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum AssignmentsFormat {
    /// Omit placement entirely.
    #[default]
    None,
    /// Explicit broker assignments.
    Broker,
    /// Rack constraints derived from the brokers' racks.
    Rack,
}

/// Options for the topic exporter; the other exporters take no options.
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    /// Regex a resource name must match to be exported.
    pub match_regex: String,
    /// Regex a resource name must not match.
    pub exclude_regex: String,
    pub include_internal: bool,
    pub assignments: AssignmentsFormat,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        ExporterOptions {
            match_regex: ".*".to_string(),
            exclude_regex: ".^".to_string(),
            include_internal: false,
            assignments: AssignmentsFormat::None,
        }
    }
}

/// One exported definition.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub id: String,
    pub def: Value,
}

/// All definitions produced by one export invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportResults(pub Vec<ExportResult>);

impl ExportResults {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as a `---`-separated YAML document stream.
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for result in &self.0 {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&result.def)?);
        }
        Ok(out)
    }

    /// Render as a JSON array of definitions.
    pub fn to_json(&self) -> Result<String> {
        let defs: Vec<&Value> = self.0.iter().map(|r| &r.def).collect();
        Ok(serde_json::to_string_pretty(&defs)?)
    }
}
