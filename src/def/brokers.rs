//! Cluster-wide broker resource definitions

use serde::{Deserialize, Serialize};

use crate::def::{ConfigsMap, ResourceDefinition};
use crate::error::{KdeclError, Result};

/// A brokers spec definition: the cluster-wide dynamic broker defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokersSpec {
    #[serde(default, skip_serializing_if = "ConfigsMap::is_empty")]
    pub configs: ConfigsMap,
    #[serde(default)]
    pub delete_undefined_configs: bool,
}

/// A brokers resource definition. Addresses the cluster-wide default config,
/// which has the empty resource name on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokersDefinition {
    #[serde(flatten)]
    pub resource: ResourceDefinition,
    pub spec: BrokersSpec,
}

impl BrokersDefinition {
    pub fn new(name: &str, configs: ConfigsMap) -> Self {
        BrokersDefinition {
            resource: ResourceDefinition::new("brokers", name),
            spec: BrokersSpec {
                configs,
                delete_undefined_configs: false,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.resource.validate()?;
        if self.resource.kind != "brokers" {
            return Err(KdeclError::validation("kind must be \"brokers\""));
        }
        Ok(())
    }
}
