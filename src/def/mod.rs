//! Resource definitions
//!
//! Definitions are the YAML/JSON documents operators author: an envelope of
//! `apiVersion`, `kind` and `metadata`, plus a kind-specific `spec`. Parsed
//! definitions are read-only; all mutation of cluster state flows through
//! typed admin calls.

pub mod acl;
pub mod broker;
pub mod brokers;
pub mod topic;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{KdeclError, Result};

pub use acl::{AclDefinition, AclEntry, AclEntryGroup, AclEntryGroups, AclSpec};
pub use broker::{BrokerDefinition, BrokerSpec};
pub use brokers::{BrokersDefinition, BrokersSpec};
pub use topic::{
    PartitionAssignments, PartitionRackAssignments, TopicDefinition, TopicSpec,
};

/// The only definition API version currently recognized.
pub const API_VERSION: &str = "v1";

/// Recognized resource kinds.
pub const KINDS: &[&str] = &["topic", "broker", "brokers", "acl"];

/// Recognized ACL resource types for `metadata.type`.
pub const ACL_RESOURCE_TYPES: &[&str] = &[
    "topic",
    "group",
    "cluster",
    "transactional_id",
    "delegation_token",
];

/// Config key/value map. Values may be null; key order is canonicalized.
pub type ConfigsMap = BTreeMap<String, Option<String>>;

/// Definition metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub name: String,
    /// ACL resource type; only meaningful for `kind: acl`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// The envelope shared by every definition document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub api_version: String,
    pub kind: String,
    pub metadata: ResourceMetadata,
}

impl ResourceDefinition {
    pub fn new(kind: &str, name: &str) -> Self {
        ResourceDefinition {
            api_version: API_VERSION.to_string(),
            kind: kind.to_string(),
            metadata: ResourceMetadata {
                name: name.to_string(),
                type_: None,
            },
        }
    }

    /// Validate the envelope: non-empty supported apiVersion, recognized
    /// kind, non-empty metadata name.
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(KdeclError::validation(format!(
                "apiVersion must be {:?}",
                API_VERSION
            )));
        }
        if !KINDS.contains(&self.kind.as_str()) {
            return Err(KdeclError::validation(format!(
                "kind must be one of {:?}",
                KINDS.join("|")
            )));
        }
        if self.metadata.name.is_empty() {
            return Err(KdeclError::validation("metadata name must be supplied"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_validation() {
        let mut def = ResourceDefinition::new("topic", "orders");
        assert!(def.validate().is_ok());

        def.api_version = "v2".into();
        assert!(def.validate().is_err());
        def.api_version = API_VERSION.into();

        def.kind = "stream".into();
        assert!(def.validate().is_err());
        def.kind = "topic".into();

        def.metadata.name.clear();
        assert!(def.validate().is_err());
    }

    #[test]
    fn envelope_parses_from_yaml() {
        let doc = "apiVersion: v1\nkind: acl\nmetadata:\n  name: orders\n  type: topic\n";
        let def: ResourceDefinition = serde_yaml::from_str(doc).unwrap();
        assert_eq!(def.kind, "acl");
        assert_eq!(def.metadata.type_.as_deref(), Some("topic"));
    }
}
