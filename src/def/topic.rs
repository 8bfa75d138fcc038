//! Topic resource definitions
//!
//! A topic definition combines three interlocking concerns: the config
//! key/value map, the partition count, and replica placement. Placement is
//! expressed either as explicit broker assignments, as rack constraints, or
//! implicitly through the replication factor.

use serde::{Deserialize, Serialize};

use crate::def::{ConfigsMap, ResourceDefinition};
use crate::error::{KdeclError, Result};
use crate::meta::Brokers;

/// `assignments[p][r]` is the broker hosting replica `r` of partition `p`.
/// `assignments[p][0]` is the preferred leader.
pub type PartitionAssignments = Vec<Vec<i32>>;

/// `rack_assignments[p][r]` is the rack that must host replica `r` of
/// partition `p`.
pub type PartitionRackAssignments = Vec<Vec<String>>;

/// A topic spec definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    pub partitions: i32,
    pub replication_factor: i32,
    #[serde(default, skip_serializing_if = "ConfigsMap::is_empty")]
    pub configs: ConfigsMap,
    #[serde(default)]
    pub delete_missing_configs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignments: Option<PartitionAssignments>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack_assignments: Option<PartitionRackAssignments>,
}

impl TopicSpec {
    pub fn has_assignments(&self) -> bool {
        self.assignments.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn has_rack_assignments(&self) -> bool {
        self.rack_assignments
            .as_ref()
            .is_some_and(|a| !a.is_empty())
    }
}

/// A topic resource definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDefinition {
    #[serde(flatten)]
    pub resource: ResourceDefinition,
    pub spec: TopicSpec,
}

impl TopicDefinition {
    /// Materialize a definition from live cluster state. The result carries
    /// both assignment forms so that a local definition using either can be
    /// compared against it; brokers without a rack label yield an empty rack
    /// id, which never matches a validated local rack id.
    pub fn from_cluster(
        name: &str,
        assignments: &PartitionAssignments,
        brokers: &Brokers,
        configs: ConfigsMap,
    ) -> Self {
        let rack_assignments: PartitionRackAssignments = assignments
            .iter()
            .map(|replicas| {
                replicas
                    .iter()
                    .map(|id| brokers.rack_of(*id).unwrap_or_default().to_string())
                    .collect()
            })
            .collect();

        TopicDefinition {
            resource: ResourceDefinition::new("topic", name),
            spec: TopicSpec {
                partitions: assignments.len() as i32,
                replication_factor: assignments.first().map_or(0, |r| r.len()) as i32,
                configs,
                delete_missing_configs: false,
                assignments: Some(assignments.clone()),
                rack_assignments: Some(rack_assignments),
            },
        }
    }

    /// Validate the definition against static rules.
    pub fn validate(&self) -> Result<()> {
        self.resource.validate()?;
        if self.resource.kind != "topic" {
            return Err(KdeclError::validation("kind must be \"topic\""));
        }

        let spec = &self.spec;
        if spec.partitions < 1 {
            return Err(KdeclError::validation(
                "number of partitions must be a positive integer",
            ));
        }
        if spec.replication_factor < 1 {
            return Err(KdeclError::validation(
                "replication factor must be a positive integer",
            ));
        }
        if spec.has_assignments() && spec.has_rack_assignments() {
            return Err(KdeclError::validation(
                "assignments and rack assignments cannot both be specified",
            ));
        }

        if let Some(assignments) = &spec.assignments {
            if assignments.len() as i32 != spec.partitions {
                return Err(KdeclError::validation(
                    "the number of replica assignments must match the number of partitions",
                ));
            }
            for replicas in assignments {
                if replicas.len() as i32 != spec.replication_factor {
                    return Err(KdeclError::validation(
                        "the number of replicas in each assignment must match the replication factor",
                    ));
                }
                let mut seen = replicas.clone();
                seen.sort_unstable();
                seen.dedup();
                if seen.len() != replicas.len() {
                    return Err(KdeclError::validation(
                        "a partition's replica assignment cannot contain duplicate broker ids",
                    ));
                }
            }
        }

        if let Some(rack_assignments) = &spec.rack_assignments {
            if rack_assignments.len() as i32 != spec.partitions {
                return Err(KdeclError::validation(
                    "the number of rack assignments must match the number of partitions",
                ));
            }
            for racks in rack_assignments {
                if racks.len() as i32 != spec.replication_factor {
                    return Err(KdeclError::validation(
                        "the number of racks in each assignment must match the replication factor",
                    ));
                }
                if racks.iter().any(|r| r.is_empty()) {
                    return Err(KdeclError::validation("rack ids cannot be empty"));
                }
            }
        }

        Ok(())
    }

    /// Further validate the definition using cluster metadata.
    pub fn validate_with_metadata(&self, brokers: &Brokers) -> Result<()> {
        if let Some(assignments) = &self.spec.assignments {
            for replicas in assignments {
                for id in replicas {
                    if !brokers.contains(*id) {
                        return Err(KdeclError::validation(format!(
                            "broker id {id} in assignments is not present in the cluster"
                        )));
                    }
                }
            }
        }

        if let Some(rack_assignments) = &self.spec.rack_assignments {
            let by_rack = brokers.by_rack();
            for racks in rack_assignments {
                for rack in racks {
                    if !by_rack.contains_key(rack) {
                        return Err(KdeclError::validation(format!(
                            "rack id {rack:?} has no brokers assigned to it"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Broker;

    fn definition(yaml: &str) -> TopicDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn base() -> TopicDefinition {
        definition(
            r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 2
  replicationFactor: 2
"#,
        )
    }

    fn brokers() -> Brokers {
        Brokers(vec![
            Broker {
                id: 1,
                rack: Some("rack-a".into()),
            },
            Broker {
                id: 2,
                rack: Some("rack-a".into()),
            },
            Broker {
                id: 3,
                rack: Some("rack-b".into()),
            },
        ])
    }

    #[test]
    fn valid_definition() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_counts() {
        let mut def = base();
        def.spec.partitions = 0;
        assert!(def.validate().is_err());

        let mut def = base();
        def.spec.replication_factor = 0;
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_both_assignment_forms() {
        let mut def = base();
        def.spec.assignments = Some(vec![vec![1, 2], vec![2, 3]]);
        def.spec.rack_assignments = Some(vec![
            vec!["rack-a".into(), "rack-b".into()],
            vec!["rack-b".into(), "rack-a".into()],
        ]);
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("cannot both be specified"));
    }

    #[test]
    fn rejects_mismatched_assignment_dimensions() {
        let mut def = base();
        def.spec.assignments = Some(vec![vec![1, 2]]);
        assert!(def.validate().is_err());

        let mut def = base();
        def.spec.assignments = Some(vec![vec![1, 2, 3], vec![2, 3, 1]]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_replica_brokers() {
        let mut def = base();
        def.spec.assignments = Some(vec![vec![1, 1], vec![2, 3]]);
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate broker ids"));
    }

    #[test]
    fn metadata_validation_checks_broker_membership() {
        let mut def = base();
        def.spec.assignments = Some(vec![vec![1, 2], vec![2, 9]]);
        assert!(def.validate().is_ok());
        let err = def.validate_with_metadata(&brokers()).unwrap_err();
        assert!(err.to_string().contains("broker id 9"));
    }

    #[test]
    fn metadata_validation_checks_rack_membership() {
        let mut def = base();
        def.spec.rack_assignments = Some(vec![
            vec!["rack-a".into(), "rack-b".into()],
            vec!["rack-b".into(), "rack-z".into()],
        ]);
        assert!(def.validate().is_ok());
        let err = def.validate_with_metadata(&brokers()).unwrap_err();
        assert!(err.to_string().contains("rack-z"));
    }

    #[test]
    fn from_cluster_derives_rack_assignments() {
        let assignments = vec![vec![1, 3], vec![3, 2]];
        let def = TopicDefinition::from_cluster("orders", &assignments, &brokers(), ConfigsMap::new());
        assert_eq!(def.spec.partitions, 2);
        assert_eq!(def.spec.replication_factor, 2);
        assert_eq!(
            def.spec.rack_assignments,
            Some(vec![
                vec!["rack-a".to_string(), "rack-b".to_string()],
                vec!["rack-b".to_string(), "rack-a".to_string()],
            ])
        );
    }

    #[test]
    fn serializes_camel_case() {
        let mut def = base();
        def.spec.delete_missing_configs = true;
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("\"replicationFactor\":2"));
        assert!(json.contains("\"deleteMissingConfigs\":true"));
        assert!(!json.contains("assignments"));
    }
}
