//! Broker exporter

use tracing::info;

use crate::def::BrokerDefinition;
use crate::error::Result;
use crate::export::{ExportResult, ExportResults};
use crate::kafka::{AdminOps, Service};
use crate::meta::ConfigSource;

pub struct BrokerExporter<'a> {
    srv: &'a Service,
}

impl<'a> BrokerExporter<'a> {
    pub fn new(srv: &'a Service) -> Self {
        BrokerExporter { srv }
    }

    pub async fn execute(&self) -> Result<ExportResults> {
        info!("fetching per-broker configuration...");
        let brokers = self.srv.describe_brokers().await?;

        let mut results = ExportResults::default();
        for id in brokers.ids() {
            let configs = self
                .srv
                .describe_broker_configs(Some(id))
                .await?
                .to_exportable_map(ConfigSource::DynamicBrokerConfig);
            let def = BrokerDefinition::new(&id.to_string(), configs);
            results.0.push(ExportResult {
                id: id.to_string(),
                def: serde_json::to_value(&def)?,
            });
        }

        info!("exported {} broker definition(s)", results.0.len());
        Ok(results)
    }
}
