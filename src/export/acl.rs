//! ACL exporter

use regex::Regex;
use tracing::info;

use crate::def::acl::canonical_entry_groups;
use crate::def::AclDefinition;
use crate::error::{KdeclError, Result};
use crate::export::{ExportResult, ExportResults, ExporterOptions};
use crate::kafka::Service;

pub struct AclExporter<'a> {
    srv: &'a Service,
    opts: ExporterOptions,
}

impl<'a> AclExporter<'a> {
    pub fn new(srv: &'a Service, opts: ExporterOptions) -> Self {
        AclExporter { srv, opts }
    }

    pub async fn execute(&self) -> Result<ExportResults> {
        let match_regex = compile(&self.opts.match_regex)?;
        let exclude_regex = compile(&self.opts.exclude_regex)?;

        info!("fetching acls...");
        let resources = self.srv.describe_all_resource_acls().await?;

        let mut results = ExportResults::default();
        for (resource_type, name, entries) in &resources {
            if entries.is_empty() || !match_regex.is_match(name) || exclude_regex.is_match(name) {
                continue;
            }
            let def = AclDefinition::new(name, resource_type, canonical_entry_groups(entries));
            results.0.push(ExportResult {
                id: format!("{resource_type}:{name}"),
                def: serde_json::to_value(&def)?,
            });
        }

        info!("exported {} acl definition(s)", results.0.len());
        Ok(results)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| KdeclError::Config(format!("invalid regex {pattern:?}: {e}")))
}
