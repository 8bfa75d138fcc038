//! Brokers exporter

use tracing::info;

use crate::def::BrokersDefinition;
use crate::error::Result;
use crate::export::{ExportResult, ExportResults};
use crate::kafka::{AdminOps, Service};
use crate::meta::ConfigSource;

pub struct BrokersExporter<'a> {
    srv: &'a Service,
}

impl<'a> BrokersExporter<'a> {
    pub fn new(srv: &'a Service) -> Self {
        BrokersExporter { srv }
    }

    pub async fn execute(&self) -> Result<ExportResults> {
        info!("fetching cluster-wide broker configuration...");
        let configs = self
            .srv
            .describe_broker_configs(None)
            .await?
            .to_exportable_map(ConfigSource::DynamicDefaultBrokerConfig);
        let def = BrokersDefinition::new("brokers", configs);

        Ok(ExportResults(vec![ExportResult {
            id: def.resource.metadata.name.clone(),
            def: serde_json::to_value(&def)?,
        }]))
    }
}
