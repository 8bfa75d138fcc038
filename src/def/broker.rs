//! Per-broker resource definitions

use serde::{Deserialize, Serialize};

use crate::def::{ConfigsMap, ResourceDefinition};
use crate::error::{KdeclError, Result};
use crate::meta::Brokers;

/// A broker spec definition: the dynamic configuration of a single broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSpec {
    #[serde(default, skip_serializing_if = "ConfigsMap::is_empty")]
    pub configs: ConfigsMap,
    #[serde(default)]
    pub delete_undefined_configs: bool,
}

/// A broker resource definition. The metadata name is the broker id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerDefinition {
    #[serde(flatten)]
    pub resource: ResourceDefinition,
    pub spec: BrokerSpec,
}

impl BrokerDefinition {
    pub fn new(name: &str, configs: ConfigsMap) -> Self {
        BrokerDefinition {
            resource: ResourceDefinition::new("broker", name),
            spec: BrokerSpec {
                configs,
                delete_undefined_configs: false,
            },
        }
    }

    /// The broker id named by the definition.
    pub fn broker_id(&self) -> Result<i32> {
        self.resource
            .metadata
            .name
            .parse::<i32>()
            .map_err(|_| KdeclError::validation("metadata name must be an integer broker id"))
    }

    pub fn validate(&self) -> Result<()> {
        self.resource.validate()?;
        if self.resource.kind != "broker" {
            return Err(KdeclError::validation("kind must be \"broker\""));
        }
        self.broker_id()?;
        Ok(())
    }

    pub fn validate_with_metadata(&self, brokers: &Brokers) -> Result<()> {
        let id = self.broker_id()?;
        if !brokers.contains(id) {
            return Err(KdeclError::validation(
                "metadata name must be the id of an available broker",
            ));
        }
        Ok(())
    }
}
