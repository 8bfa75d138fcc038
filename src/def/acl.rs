//! ACL resource definitions
//!
//! ACL entries are authored as groups: each group carries lists of
//! principals, hosts and operations which multiply out to individual ACL
//! rules on the cluster. Groups must carry at least one element per list;
//! ordering is then total over the first element of each list.

use serde::{Deserialize, Serialize};

use crate::def::{ResourceDefinition, ACL_RESOURCE_TYPES};
use crate::error::{KdeclError, Result};

pub const ACL_OPERATIONS: &[&str] = &[
    "ALL",
    "READ",
    "WRITE",
    "CREATE",
    "DELETE",
    "ALTER",
    "DESCRIBE",
    "CLUSTER_ACTION",
    "DESCRIBE_CONFIGS",
    "ALTER_CONFIGS",
    "IDEMPOTENT_WRITE",
];

pub const ACL_PERMISSION_TYPES: &[&str] = &["ALLOW", "DENY"];

/// A group of ACL entries sharing a permission type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclEntryGroup {
    pub principals: Vec<String>,
    pub hosts: Vec<String>,
    pub operations: Vec<String>,
    pub permission_type: String,
}

pub type AclEntryGroups = Vec<AclEntryGroup>;

/// A single concrete ACL rule, the unit the cluster stores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AclEntry {
    pub principal: String,
    pub host: String,
    pub operation: String,
    pub permission_type: String,
}

/// Multiply entry groups out into their concrete entries, deduplicated and
/// sorted.
pub fn expand_entry_groups(groups: &AclEntryGroups) -> Vec<AclEntry> {
    let mut entries = Vec::new();
    for group in groups {
        for principal in &group.principals {
            for host in &group.hosts {
                for operation in &group.operations {
                    entries.push(AclEntry {
                        principal: principal.clone(),
                        host: host.clone(),
                        operation: operation.clone(),
                        permission_type: group.permission_type.clone(),
                    });
                }
            }
        }
    }
    entries.sort();
    entries.dedup();
    entries
}

/// The canonical group form of a set of entries: one singleton group per
/// entry, sorted. Appliers canonicalize both sides to this form so that the
/// textual diff and the operation plan agree.
pub fn canonical_entry_groups(entries: &[AclEntry]) -> AclEntryGroups {
    entries
        .iter()
        .map(|e| AclEntryGroup {
            principals: vec![e.principal.clone()],
            hosts: vec![e.host.clone()],
            operations: vec![e.operation.clone()],
            permission_type: e.permission_type.clone(),
        })
        .collect()
}

fn validate_entry_groups(groups: &AclEntryGroups) -> Result<()> {
    for group in groups {
        if group.principals.is_empty() || group.hosts.is_empty() || group.operations.is_empty() {
            return Err(KdeclError::validation(
                "acl entry groups must contain at least one principal, host and operation",
            ));
        }
        for operation in &group.operations {
            if !ACL_OPERATIONS.contains(&operation.as_str()) {
                return Err(KdeclError::validation(format!(
                    "acl operation must be one of {:?}",
                    ACL_OPERATIONS.join("|")
                )));
            }
        }
        if !ACL_PERMISSION_TYPES.contains(&group.permission_type.as_str()) {
            return Err(KdeclError::validation(format!(
                "acl permission type must be one of {:?}",
                ACL_PERMISSION_TYPES.join("|")
            )));
        }
    }
    Ok(())
}

/// An ACL spec definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acls: AclEntryGroups,
    #[serde(default)]
    pub delete_undefined_acls: bool,
}

/// An ACL resource definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclDefinition {
    #[serde(flatten)]
    pub resource: ResourceDefinition,
    pub spec: AclSpec,
}

impl AclDefinition {
    pub fn new(name: &str, resource_type: &str, acls: AclEntryGroups) -> Self {
        let mut resource = ResourceDefinition::new("acl", name);
        resource.metadata.type_ = Some(resource_type.to_string());
        AclDefinition {
            resource,
            spec: AclSpec {
                acls,
                delete_undefined_acls: false,
            },
        }
    }

    pub fn resource_type(&self) -> &str {
        self.resource.metadata.type_.as_deref().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        self.resource.validate()?;
        if self.resource.kind != "acl" {
            return Err(KdeclError::validation("kind must be \"acl\""));
        }

        let resource_type = self.resource.metadata.type_.as_deref().unwrap_or_default();
        if resource_type.is_empty() {
            return Err(KdeclError::validation("metadata type must be supplied"));
        }
        if !ACL_RESOURCE_TYPES.contains(&resource_type) {
            return Err(KdeclError::validation(format!(
                "metadata type must be one of {:?}",
                ACL_RESOURCE_TYPES.join("|")
            )));
        }
        if resource_type == "cluster" && self.resource.metadata.name != "kafka-cluster" {
            return Err(KdeclError::validation(
                "metadata name must be \"kafka-cluster\" when type is \"cluster\"",
            ));
        }

        validate_entry_groups(&self.spec.acls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(principal: &str, operation: &str) -> AclEntryGroup {
        AclEntryGroup {
            principals: vec![principal.into()],
            hosts: vec!["*".into()],
            operations: vec![operation.into()],
            permission_type: "ALLOW".into(),
        }
    }

    #[test]
    fn expansion_multiplies_and_dedupes() {
        let groups = vec![AclEntryGroup {
            principals: vec!["User:app".into(), "User:other".into()],
            hosts: vec!["*".into()],
            operations: vec!["READ".into(), "WRITE".into()],
            permission_type: "ALLOW".into(),
        }];
        let entries = expand_entry_groups(&groups);
        assert_eq!(entries.len(), 4);
        assert!(entries.windows(2).all(|w| w[0] <= w[1]));

        let doubled: AclEntryGroups = groups.iter().cloned().chain(groups.clone()).collect();
        assert_eq!(expand_entry_groups(&doubled).len(), 4);
    }

    #[test]
    fn canonical_groups_follow_entry_order() {
        let groups = vec![group("User:b", "READ"), group("User:a", "WRITE"), group("User:a", "READ")];
        let canonical = canonical_entry_groups(&expand_entry_groups(&groups));
        assert_eq!(canonical[0].principals[0], "User:a");
        assert_eq!(canonical[0].operations[0], "READ");
        assert_eq!(canonical[2].principals[0], "User:b");
    }

    #[test]
    fn rejects_empty_group_lists() {
        let def = AclDefinition::new(
            "orders",
            "topic",
            vec![AclEntryGroup {
                principals: vec![],
                hosts: vec!["*".into()],
                operations: vec!["READ".into()],
                permission_type: "ALLOW".into(),
            }],
        );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("at least one principal"));
    }

    #[test]
    fn rejects_unknown_operation_and_permission() {
        let def = AclDefinition::new("orders", "topic", vec![group("User:app", "PUBLISH")]);
        assert!(def.validate().is_err());

        let mut bad = group("User:app", "READ");
        bad.permission_type = "MAYBE".into();
        let def = AclDefinition::new("orders", "topic", vec![bad]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn cluster_type_requires_fixed_name() {
        let def = AclDefinition::new("orders", "cluster", vec![]);
        assert!(def.validate().is_err());
        let def = AclDefinition::new("kafka-cluster", "cluster", vec![]);
        assert!(def.validate().is_ok());
    }
}
