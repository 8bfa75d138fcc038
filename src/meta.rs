//! Cluster metadata types
//!
//! Thin value types describing the live cluster: broker membership with rack
//! labels, described config entries with their sources, and in-flight
//! partition reassignments. These are the shapes the appliers validate and
//! plan against; they never reference the wire protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::def::ConfigsMap;

/// A live cluster broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub id: i32,
    pub rack: Option<String>,
}

/// Broker membership of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Brokers(pub Vec<Broker>);

impl Brokers {
    /// Broker IDs in ascending order.
    pub fn ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.0.iter().map(|b| b.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, id: i32) -> bool {
        self.0.iter().any(|b| b.id == id)
    }

    /// Rack of a broker, if the broker exists and has one.
    pub fn rack_of(&self, id: i32) -> Option<&str> {
        self.0
            .iter()
            .find(|b| b.id == id)
            .and_then(|b| b.rack.as_deref())
    }

    /// Brokers grouped by rack, IDs ascending within each rack. Brokers
    /// without a rack label are not included.
    pub fn by_rack(&self) -> BTreeMap<String, Vec<i32>> {
        let mut racks: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        for broker in &self.0 {
            if let Some(rack) = &broker.rack {
                racks.entry(rack.clone()).or_default().push(broker.id);
            }
        }
        for ids in racks.values_mut() {
            ids.sort_unstable();
        }
        racks
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where a described config value comes from.
///
/// Values follow the DescribeConfigs protocol encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    DynamicTopicConfig,
    DynamicBrokerConfig,
    DynamicDefaultBrokerConfig,
    StaticBrokerConfig,
    DefaultConfig,
    DynamicBrokerLoggerConfig,
    Unknown,
}

impl ConfigSource {
    pub fn from_i8(value: i8) -> Self {
        match value {
            1 => ConfigSource::DynamicTopicConfig,
            2 => ConfigSource::DynamicBrokerConfig,
            3 => ConfigSource::DynamicDefaultBrokerConfig,
            4 => ConfigSource::StaticBrokerConfig,
            5 => ConfigSource::DefaultConfig,
            6 => ConfigSource::DynamicBrokerLoggerConfig,
            _ => ConfigSource::Unknown,
        }
    }
}

/// A single described config entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub name: String,
    pub value: Option<String>,
    pub source: ConfigSource,
    pub read_only: bool,
    pub sensitive: bool,
}

/// The described configuration of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEntries(pub Vec<ConfigEntry>);

impl ConfigEntries {
    /// Full key/value view, including defaults and static values.
    pub fn to_map(&self) -> ConfigsMap {
        self.0
            .iter()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }

    /// Key/value view restricted to entries with the given source, i.e. the
    /// explicitly-set configuration worth exporting.
    pub fn to_exportable_map(&self, source: ConfigSource) -> ConfigsMap {
        self.0
            .iter()
            .filter(|e| e.source == source && !e.sensitive)
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }

    pub fn source_of(&self, key: &str) -> Option<ConfigSource> {
        self.0.iter().find(|e| e.name == key).map(|e| e.source)
    }
}

/// An in-flight partition reassignment reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionReassignment {
    pub partition: i32,
    pub replicas: Vec<i32>,
    pub adding_replicas: Vec<i32>,
    pub removing_replicas: Vec<i32>,
}

pub type PartitionReassignments = Vec<PartitionReassignment>;

#[cfg(test)]
mod tests {
    use super::*;

    fn brokers() -> Brokers {
        Brokers(vec![
            Broker {
                id: 3,
                rack: Some("rack-b".into()),
            },
            Broker {
                id: 1,
                rack: Some("rack-a".into()),
            },
            Broker {
                id: 2,
                rack: Some("rack-a".into()),
            },
            Broker { id: 4, rack: None },
        ])
    }

    #[test]
    fn ids_are_sorted() {
        assert_eq!(brokers().ids(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn by_rack_skips_unlabeled_brokers() {
        let racks = brokers().by_rack();
        assert_eq!(racks.len(), 2);
        assert_eq!(racks["rack-a"], vec![1, 2]);
        assert_eq!(racks["rack-b"], vec![3]);
    }

    #[test]
    fn exportable_map_filters_by_source() {
        let entries = ConfigEntries(vec![
            ConfigEntry {
                name: "retention.ms".into(),
                value: Some("604800000".into()),
                source: ConfigSource::DynamicTopicConfig,
                read_only: false,
                sensitive: false,
            },
            ConfigEntry {
                name: "cleanup.policy".into(),
                value: Some("delete".into()),
                source: ConfigSource::DefaultConfig,
                read_only: false,
                sensitive: false,
            },
        ]);

        let exportable = entries.to_exportable_map(ConfigSource::DynamicTopicConfig);
        assert_eq!(exportable.len(), 1);
        assert!(exportable.contains_key("retention.ms"));

        assert_eq!(entries.to_map().len(), 2);
    }
}
