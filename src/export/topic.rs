//! Topic exporter

use regex::Regex;
use tracing::info;

use crate::error::{KdeclError, Result};
use crate::export::{AssignmentsFormat, ExportResult, ExportResults, ExporterOptions};
use crate::kafka::Service;
use crate::meta::ConfigSource;

pub struct TopicExporter<'a> {
    srv: &'a Service,
    opts: ExporterOptions,
}

impl<'a> TopicExporter<'a> {
    pub fn new(srv: &'a Service, opts: ExporterOptions) -> Self {
        TopicExporter { srv, opts }
    }

    pub async fn execute(&self) -> Result<ExportResults> {
        let match_regex = compile(&self.opts.match_regex)?;
        let exclude_regex = compile(&self.opts.exclude_regex)?;

        info!("fetching topics...");
        let (brokers, mut topics) = self.srv.request_metadata(None).await?;
        topics.sort_by(|a, b| a.name.cmp(&b.name));

        let mut results = ExportResults::default();
        for topic in &topics {
            if !selected(
                &topic.name,
                topic.internal,
                &match_regex,
                &exclude_regex,
                self.opts.include_internal,
            ) {
                continue;
            }

            let configs = self
                .srv
                .describe_topic_configs(&topic.name)
                .await?
                .to_exportable_map(ConfigSource::DynamicTopicConfig);
            let mut def = crate::def::TopicDefinition::from_cluster(
                &topic.name,
                &topic.assignments,
                &brokers,
                configs,
            );

            match self.opts.assignments {
                AssignmentsFormat::None => {
                    def.spec.assignments = None;
                    def.spec.rack_assignments = None;
                }
                AssignmentsFormat::Broker => {
                    def.spec.rack_assignments = None;
                }
                AssignmentsFormat::Rack => {
                    let racks = def.spec.rack_assignments.as_deref().unwrap_or_default();
                    if racks.iter().flatten().any(|rack| rack.is_empty()) {
                        return Err(KdeclError::precondition(format!(
                            "cannot export rack assignments for topic {:?}: not every broker has a rack id",
                            topic.name
                        )));
                    }
                    def.spec.assignments = None;
                }
            }

            results.0.push(ExportResult {
                id: topic.name.clone(),
                def: serde_json::to_value(&def)?,
            });
        }

        info!("exported {} topic definition(s)", results.0.len());
        Ok(results)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| KdeclError::Config(format!("invalid regex {pattern:?}: {e}")))
}

fn selected(
    name: &str,
    internal: bool,
    match_regex: &Regex,
    exclude_regex: &Regex,
    include_internal: bool,
) -> bool {
    if (internal || name.starts_with("__")) && !include_internal {
        return false;
    }
    match_regex.is_match(name) && !exclude_regex.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_honors_filters() {
        let match_all = Regex::new(".*").unwrap();
        let match_orders = Regex::new("^orders").unwrap();
        let exclude_none = Regex::new(".^").unwrap();
        let exclude_tmp = Regex::new("tmp$").unwrap();

        assert!(selected("orders", false, &match_all, &exclude_none, false));
        assert!(selected("orders.v2", false, &match_orders, &exclude_none, false));
        assert!(!selected("payments", false, &match_orders, &exclude_none, false));
        assert!(!selected("orders.tmp", false, &match_all, &exclude_tmp, false));
    }

    #[test]
    fn internal_topics_are_skipped_by_default() {
        let match_all = Regex::new(".*").unwrap();
        let exclude_none = Regex::new(".^").unwrap();

        assert!(!selected("__consumer_offsets", false, &match_all, &exclude_none, false));
        assert!(!selected("metrics", true, &match_all, &exclude_none, false));
        assert!(selected("__consumer_offsets", true, &match_all, &exclude_none, true));
    }
}
