//! Kafka service adapter
//!
//! A typed facade over the Kafka admin protocol. The appliers and exporters
//! consume the [`AdminOps`] trait and the model types in `def`/`meta`; wire
//! message construction, routing and retries all live here. Topic mutations
//! are routed to the controller, per-broker config to the named broker, and
//! everything else to a seed broker.

pub(crate) mod conn;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use kafka_protocol::messages::alter_configs_request::{
    AlterConfigsResource as LegacyAlterConfigsResource, AlterableConfig as LegacyAlterableConfig,
};
use kafka_protocol::messages::alter_partition_reassignments_request::{
    ReassignablePartition, ReassignableTopic,
};
use kafka_protocol::messages::create_acls_request::AclCreation;
use kafka_protocol::messages::create_partitions_request::{
    CreatePartitionsAssignment, CreatePartitionsTopic,
};
use kafka_protocol::messages::create_topics_request::{
    CreatableReplicaAssignment, CreatableTopic, CreateableTopicConfig,
};
use kafka_protocol::messages::delete_acls_request::DeleteAclsFilter;
use kafka_protocol::messages::describe_configs_request::DescribeConfigsResource;
use kafka_protocol::messages::incremental_alter_configs_request::{
    AlterConfigsResource, AlterableConfig,
};
use kafka_protocol::messages::list_partition_reassignments_request::ListPartitionReassignmentsTopics;
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{
    AlterConfigsRequest, AlterPartitionReassignmentsRequest, ApiKey, BrokerId, CreateAclsRequest,
    CreatePartitionsRequest, CreateTopicsRequest, DeleteAclsRequest, DescribeAclsRequest,
    DescribeConfigsRequest, IncrementalAlterConfigsRequest, ListPartitionReassignmentsRequest,
    MetadataRequest, MetadataResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{AlterConfigsMethod, ClientConfig};
use crate::def::acl::AclEntry;
use crate::def::topic::PartitionAssignments;
use crate::def::{ConfigsMap, TopicDefinition};
use crate::error::{KdeclError, Result};
use crate::meta::{
    Broker, Brokers, ConfigEntries, ConfigEntry, ConfigSource, PartitionReassignment,
    PartitionReassignments,
};

use conn::BrokerConnection;

const RESOURCE_TYPE_TOPIC: i8 = 2;
const RESOURCE_TYPE_BROKER: i8 = 4;

// Wire-protocol codes for DescribeAcls/DeleteAcls filters. The "any"
// wildcard (1) exists only as a filter code; it is not a member of the named
// ACL_OPERATIONS / ACL_PERMISSION_TYPES / ACL_RESOURCE_TYPES tables and
// never appears in a stored entry.
const ACL_FILTER_ANY: i8 = 1;
const ACL_PATTERN_LITERAL: i8 = 3;

const NOT_CONTROLLER: i16 = 41;
const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

const CONTROLLER_RETRIES: u32 = 2;
const CONTROLLER_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A single planned change to a resource's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOp {
    Set,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOperation {
    pub key: String,
    pub value: Option<String>,
    pub op: ConfigOp,
}

/// An ordered, duplicate-free config plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOperations(pub Vec<ConfigOperation>);

impl ConfigOperations {
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|op| op.key == key)
    }

    pub fn contains_op(&self, op: ConfigOp) -> bool {
        self.0.iter().any(|o| o.op == op)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build the config plan from a local and a remote config map.
///
/// Sets cover local keys whose remote value differs or is absent. Deletes
/// cover remote keys that were explicitly set (per `dynamic_source`) and are
/// either locally null or, when `delete_missing` is enabled, locally absent.
/// Keys whose remote source is a default never produce deletes.
pub fn new_config_ops(
    local: &ConfigsMap,
    remote: &ConfigsMap,
    remote_meta: &ConfigEntries,
    delete_missing: bool,
    dynamic_source: ConfigSource,
) -> ConfigOperations {
    let mut ops = Vec::new();

    for (key, value) in local {
        match value {
            Some(_) => {
                if remote.get(key) != Some(value) {
                    ops.push(ConfigOperation {
                        key: key.clone(),
                        value: value.clone(),
                        op: ConfigOp::Set,
                    });
                }
            }
            // A null value means "ensure absent".
            None => {
                if remote_meta.source_of(key) == Some(dynamic_source) {
                    ops.push(ConfigOperation {
                        key: key.clone(),
                        value: None,
                        op: ConfigOp::Delete,
                    });
                }
            }
        }
    }

    if delete_missing {
        for key in remote.keys() {
            if !local.contains_key(key) && remote_meta.source_of(key) == Some(dynamic_source) {
                ops.push(ConfigOperation {
                    key: key.clone(),
                    value: None,
                    op: ConfigOp::Delete,
                });
            }
        }
    }

    ConfigOperations(ops)
}

/// Topic metadata used by the exporter.
#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    pub internal: bool,
    pub assignments: PartitionAssignments,
}

/// The admin operations the appliers consume. Implemented by [`Service`];
/// tests substitute an in-memory fake.
#[async_trait]
pub trait AdminOps {
    /// Fetch the remote definition for a topic together with its described
    /// configs and the cluster's brokers. The definition is `None` when the
    /// topic does not exist.
    async fn try_request_topic(
        &self,
        name: &str,
    ) -> Result<(Option<TopicDefinition>, ConfigEntries, Brokers)>;

    async fn create_topic(
        &self,
        def: &TopicDefinition,
        assignments: &PartitionAssignments,
        dry_run: bool,
    ) -> Result<()>;

    /// Alter topic configs. The incremental path issues per-key ops; the
    /// non-incremental path writes `configs`, the full desired set.
    async fn alter_topic_configs(
        &self,
        name: &str,
        configs: &ConfigsMap,
        ops: &ConfigOperations,
        dry_run: bool,
    ) -> Result<()>;

    /// Grow a topic to `total` partitions; `new_assignments` holds one row
    /// per added partition.
    async fn create_partitions(
        &self,
        name: &str,
        total: i32,
        new_assignments: &[Vec<i32>],
        dry_run: bool,
    ) -> Result<()>;

    /// Reassign replicas. The protocol offers no dry-run for this.
    async fn alter_partition_assignments(
        &self,
        name: &str,
        assignments: &PartitionAssignments,
    ) -> Result<()>;

    async fn list_partition_reassignments(
        &self,
        name: &str,
        partitions: &[i32],
    ) -> Result<PartitionReassignments>;

    /// Whether config alters will use the incremental protocol.
    async fn alter_configs_incremental(&self) -> Result<bool>;

    async fn describe_brokers(&self) -> Result<Brokers>;

    /// Described configs of a broker, or of the cluster-wide default when
    /// `broker_id` is `None`.
    async fn describe_broker_configs(&self, broker_id: Option<i32>) -> Result<ConfigEntries>;

    async fn alter_broker_configs(
        &self,
        broker_id: Option<i32>,
        configs: &ConfigsMap,
        ops: &ConfigOperations,
        dry_run: bool,
    ) -> Result<()>;

    async fn describe_resource_acls(
        &self,
        resource_type: &str,
        name: &str,
    ) -> Result<Vec<AclEntry>>;

    async fn create_resource_acls(
        &self,
        resource_type: &str,
        name: &str,
        entries: &[AclEntry],
    ) -> Result<()>;

    async fn delete_resource_acls(
        &self,
        resource_type: &str,
        name: &str,
        entries: &[AclEntry],
    ) -> Result<()>;
}

#[derive(Default)]
struct ServiceState {
    seed: Option<BrokerConnection>,
    controller: Option<BrokerConnection>,
    brokers: HashMap<i32, BrokerConnection>,
    broker_addrs: HashMap<i32, String>,
    controller_id: Option<i32>,
}

/// The real Kafka admin service.
pub struct Service {
    config: ClientConfig,
    state: Mutex<ServiceState>,
}

impl Service {
    pub fn new(config: ClientConfig) -> Self {
        Service {
            config,
            state: Mutex::new(ServiceState::default()),
        }
    }

    fn timeout_ms(&self) -> i32 {
        self.config.timeout_ms.min(i32::MAX as u64) as i32
    }

    async fn seed_conn<'a>(
        state: &'a mut ServiceState,
        config: &ClientConfig,
    ) -> Result<&'a mut BrokerConnection> {
        if state.seed.is_none() {
            let timeout = Duration::from_millis(config.timeout_ms);
            let mut last_err = None;
            for addr in &config.seed_brokers {
                match BrokerConnection::connect(addr, &config.client_id, timeout).await {
                    Ok(conn) => {
                        state.seed = Some(conn);
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            if state.seed.is_none() {
                return Err(last_err
                    .unwrap_or_else(|| KdeclError::protocol("no seed brokers configured")));
            }
        }
        state
            .seed
            .as_mut()
            .ok_or_else(|| KdeclError::protocol("broker connection unavailable"))
    }

    /// Refresh controller id and broker addresses from cluster metadata.
    async fn refresh_cluster(state: &mut ServiceState, config: &ClientConfig) -> Result<()> {
        let request = MetadataRequest::default()
            .with_topics(Some(Vec::new()))
            .with_allow_auto_topic_creation(false);
        let response = Self::seed_conn(state, config).await?.send(&request).await?;
        Self::absorb_metadata(state, &response);
        Ok(())
    }

    fn absorb_metadata(state: &mut ServiceState, response: &MetadataResponse) {
        state.controller_id = match response.controller_id.0 {
            id if id >= 0 => Some(id),
            _ => None,
        };
        state.broker_addrs = response
            .brokers
            .iter()
            .map(|b| (b.node_id.0, format!("{}:{}", b.host.as_str(), b.port)))
            .collect();
    }

    async fn controller_conn<'a>(
        state: &'a mut ServiceState,
        config: &ClientConfig,
    ) -> Result<&'a mut BrokerConnection> {
        if state.controller.is_none() {
            if state.controller_id.is_none() {
                Self::refresh_cluster(state, config).await?;
            }
            let id = state
                .controller_id
                .ok_or_else(|| KdeclError::protocol("cluster reported no active controller"))?;
            let addr = state
                .broker_addrs
                .get(&id)
                .cloned()
                .ok_or_else(|| KdeclError::protocol(format!("no address for controller {id}")))?;
            debug!(controller = id, %addr, "connecting to controller");
            let timeout = Duration::from_millis(config.timeout_ms);
            state.controller =
                Some(BrokerConnection::connect(&addr, &config.client_id, timeout).await?);
        }
        state
            .controller
            .as_mut()
            .ok_or_else(|| KdeclError::protocol("controller connection unavailable"))
    }

    async fn broker_conn<'a>(
        state: &'a mut ServiceState,
        config: &ClientConfig,
        id: i32,
    ) -> Result<&'a mut BrokerConnection> {
        if !state.brokers.contains_key(&id) {
            if !state.broker_addrs.contains_key(&id) {
                Self::refresh_cluster(state, config).await?;
            }
            let addr = state
                .broker_addrs
                .get(&id)
                .cloned()
                .ok_or_else(|| KdeclError::protocol(format!("broker {id} is not in the cluster")))?;
            let timeout = Duration::from_millis(config.timeout_ms);
            let conn = BrokerConnection::connect(&addr, &config.client_id, timeout).await?;
            state.brokers.insert(id, conn);
        }
        state
            .brokers
            .get_mut(&id)
            .ok_or_else(|| KdeclError::protocol("broker connection unavailable"))
    }

    /// Drop the controller connection so the next controller-routed request
    /// re-resolves it. Used after NOT_CONTROLLER responses.
    async fn invalidate_controller(&self) {
        let mut state = self.state.lock().await;
        state.controller = None;
        state.controller_id = None;
    }

    async fn describe_configs(&self, resource_type: i8, name: &str) -> Result<ConfigEntries> {
        let request = DescribeConfigsRequest::default().with_resources(vec![
            DescribeConfigsResource::default()
                .with_resource_type(resource_type)
                .with_resource_name(str_bytes(name)),
        ]);

        let response = {
            let mut state = self.state.lock().await;
            let conn = match resource_type {
                RESOURCE_TYPE_BROKER if !name.is_empty() => {
                    let id = name.parse::<i32>().map_err(|_| {
                        KdeclError::protocol(format!("invalid broker resource name {name:?}"))
                    })?;
                    Self::broker_conn(&mut state, &self.config, id).await?
                }
                _ => Self::seed_conn(&mut state, &self.config).await?,
            };
            conn.send(&request).await?
        };

        let result = response.results.first().ok_or_else(|| {
            KdeclError::protocol("DescribeConfigs response contained no results")
        })?;
        check_error(
            result.error_code,
            result.error_message.as_ref().map(|m| m.as_str()),
            &format!("failed to describe configs for {name:?}"),
        )?;

        let entries = result
            .configs
            .iter()
            .map(|c| {
                let mut source = ConfigSource::from_i8(c.config_source);
                if source == ConfigSource::Unknown && c.is_default {
                    source = ConfigSource::DefaultConfig;
                }
                ConfigEntry {
                    name: c.name.as_str().to_string(),
                    value: c.value.as_ref().map(|v| v.as_str().to_string()),
                    source,
                    read_only: c.read_only,
                    sensitive: c.is_sensitive,
                }
            })
            .collect();
        Ok(ConfigEntries(entries))
    }

    async fn alter_configs(
        &self,
        resource_type: i8,
        name: &str,
        configs: &ConfigsMap,
        ops: &ConfigOperations,
        dry_run: bool,
    ) -> Result<()> {
        let broker_route = match resource_type {
            RESOURCE_TYPE_BROKER if !name.is_empty() => Some(name.parse::<i32>().map_err(|_| {
                KdeclError::protocol(format!("invalid broker resource name {name:?}"))
            })?),
            _ => None,
        };

        if self.alter_configs_incremental().await? {
            let alterations: Vec<AlterableConfig> = ops
                .0
                .iter()
                .map(|op| {
                    AlterableConfig::default()
                        .with_name(str_bytes(&op.key))
                        .with_config_operation(match op.op {
                            ConfigOp::Set => 0,
                            ConfigOp::Delete => 1,
                        })
                        .with_value(op.value.as_deref().map(str_bytes))
                })
                .collect();
            let request = IncrementalAlterConfigsRequest::default()
                .with_validate_only(dry_run)
                .with_resources(vec![AlterConfigsResource::default()
                    .with_resource_type(resource_type)
                    .with_resource_name(str_bytes(name))
                    .with_configs(alterations)]);

            let response = {
                let mut state = self.state.lock().await;
                let conn = match broker_route {
                    Some(id) => Self::broker_conn(&mut state, &self.config, id).await?,
                    None => Self::seed_conn(&mut state, &self.config).await?,
                };
                conn.send(&request).await?
            };
            let result = response.responses.first().ok_or_else(|| {
                KdeclError::protocol("IncrementalAlterConfigs response contained no results")
            })?;
            check_error(
                result.error_code,
                result.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to alter configs for {name:?}"),
            )
        } else {
            // The legacy protocol replaces the entire dynamic config set, so
            // the full desired state goes on the wire.
            let alterations: Vec<LegacyAlterableConfig> = configs
                .iter()
                .filter_map(|(key, value)| {
                    value.as_ref().map(|v| {
                        LegacyAlterableConfig::default()
                            .with_name(str_bytes(key))
                            .with_value(Some(str_bytes(v)))
                    })
                })
                .collect();
            let request = AlterConfigsRequest::default()
                .with_validate_only(dry_run)
                .with_resources(vec![LegacyAlterConfigsResource::default()
                    .with_resource_type(resource_type)
                    .with_resource_name(str_bytes(name))
                    .with_configs(alterations)]);

            let response = {
                let mut state = self.state.lock().await;
                let conn = match broker_route {
                    Some(id) => Self::broker_conn(&mut state, &self.config, id).await?,
                    None => Self::seed_conn(&mut state, &self.config).await?,
                };
                conn.send(&request).await?
            };
            let result = response.responses.first().ok_or_else(|| {
                KdeclError::protocol("AlterConfigs response contained no results")
            })?;
            check_error(
                result.error_code,
                result.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to alter configs for {name:?}"),
            )
        }
    }

    /// Cluster brokers and per-topic metadata, optionally restricted to
    /// named topics. Used by `try_request_topic` and the exporters.
    pub async fn request_metadata(
        &self,
        topics: Option<&[String]>,
    ) -> Result<(Brokers, Vec<TopicMetadata>)> {
        let request_topics = topics.map(|names| {
            names
                .iter()
                .map(|name| MetadataRequestTopic::default().with_name(Some(topic_name(name))))
                .collect()
        });
        let request = MetadataRequest::default()
            .with_topics(request_topics)
            .with_allow_auto_topic_creation(false);

        let response = {
            let mut state = self.state.lock().await;
            let response = Self::seed_conn(&mut state, &self.config).await?.send(&request).await?;
            Self::absorb_metadata(&mut state, &response);
            response
        };

        let brokers = Brokers(
            response
                .brokers
                .iter()
                .map(|b| Broker {
                    id: b.node_id.0,
                    rack: b.rack.as_ref().map(|r| r.as_str().to_string()),
                })
                .collect(),
        );

        let mut topics_meta = Vec::new();
        for topic in &response.topics {
            let Some(name) = topic.name.as_ref() else {
                continue;
            };
            if topic.error_code == UNKNOWN_TOPIC_OR_PARTITION {
                continue;
            }
            check_error(
                topic.error_code,
                None,
                &format!("failed to fetch metadata for topic {:?}", name.as_str()),
            )?;

            let mut partitions = topic.partitions.clone();
            partitions.sort_by_key(|p| p.partition_index);
            let assignments: PartitionAssignments = partitions
                .iter()
                .map(|p| p.replica_nodes.iter().map(|id| id.0).collect())
                .collect();
            topics_meta.push(TopicMetadata {
                name: name.as_str().to_string(),
                internal: topic.is_internal,
                assignments,
            });
        }
        Ok((brokers, topics_meta))
    }

    /// Described configs of a topic; used by the exporter.
    pub async fn describe_topic_configs(&self, name: &str) -> Result<ConfigEntries> {
        self.describe_configs(RESOURCE_TYPE_TOPIC, name).await
    }

    /// Every literal ACL on the cluster, grouped by resource. Used by the
    /// exporter.
    pub async fn describe_all_resource_acls(
        &self,
    ) -> Result<Vec<(String, String, Vec<AclEntry>)>> {
        let request = DescribeAclsRequest::default()
            .with_resource_type_filter(ACL_FILTER_ANY)
            .with_resource_name_filter(None)
            .with_pattern_type_filter(ACL_PATTERN_LITERAL)
            .with_principal_filter(None)
            .with_host_filter(None)
            .with_operation(ACL_FILTER_ANY)
            .with_permission_type(ACL_FILTER_ANY);

        let response = {
            let mut state = self.state.lock().await;
            Self::seed_conn(&mut state, &self.config).await?.send(&request).await?
        };
        check_error(
            response.error_code,
            response.error_message.as_ref().map(|m| m.as_str()),
            "failed to describe acls",
        )?;

        let mut resources = Vec::new();
        for resource in &response.resources {
            let mut entries: Vec<AclEntry> = resource
                .acls
                .iter()
                .map(|a| AclEntry {
                    principal: a.principal.as_str().to_string(),
                    host: a.host.as_str().to_string(),
                    operation: acl_operation_name(a.operation).to_string(),
                    permission_type: acl_permission_name(a.permission_type).to_string(),
                })
                .collect();
            entries.sort();
            resources.push((
                acl_resource_type_name(resource.resource_type).to_string(),
                resource.resource_name.as_str().to_string(),
                entries,
            ));
        }
        resources.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        Ok(resources)
    }
}

#[async_trait]
impl AdminOps for Service {
    async fn try_request_topic(
        &self,
        name: &str,
    ) -> Result<(Option<TopicDefinition>, ConfigEntries, Brokers)> {
        let (brokers, topics) = self.request_metadata(Some(&[name.to_string()])).await?;
        let Some(topic) = topics.into_iter().find(|t| t.name == name) else {
            return Ok((None, ConfigEntries::default(), brokers));
        };

        let configs = self.describe_topic_configs(name).await?;
        let remote =
            TopicDefinition::from_cluster(name, &topic.assignments, &brokers, configs.to_map());
        Ok((Some(remote), configs, brokers))
    }

    async fn create_topic(
        &self,
        def: &TopicDefinition,
        assignments: &PartitionAssignments,
        dry_run: bool,
    ) -> Result<()> {
        let configs: Vec<CreateableTopicConfig> = def
            .spec
            .configs
            .iter()
            .filter_map(|(key, value)| {
                value.as_ref().map(|v| {
                    CreateableTopicConfig::default()
                        .with_name(str_bytes(key))
                        .with_value(Some(str_bytes(v)))
                })
            })
            .collect();

        let name = &def.resource.metadata.name;
        let mut topic = CreatableTopic::default()
            .with_name(topic_name(name))
            .with_configs(configs);
        if assignments.is_empty() {
            topic = topic
                .with_num_partitions(def.spec.partitions)
                .with_replication_factor(def.spec.replication_factor as i16);
        } else {
            // Kafka requires counts of -1 when explicit assignments are given.
            topic = topic
                .with_num_partitions(-1)
                .with_replication_factor(-1)
                .with_assignments(
                    assignments
                        .iter()
                        .enumerate()
                        .map(|(p, replicas)| {
                            CreatableReplicaAssignment::default()
                                .with_partition_index(p as i32)
                                .with_broker_ids(replicas.iter().map(|id| BrokerId(*id)).collect())
                        })
                        .collect(),
                );
        }
        let request = CreateTopicsRequest::default()
            .with_topics(vec![topic])
            .with_timeout_ms(self.timeout_ms())
            .with_validate_only(dry_run);

        let mut attempts = 0;
        loop {
            let response = {
                let mut state = self.state.lock().await;
                let conn = Self::controller_conn(&mut state, &self.config).await?;
                conn.send(&request).await?
            };
            let result = response.topics.first().ok_or_else(|| {
                KdeclError::protocol("CreateTopics response contained no results")
            })?;
            if result.error_code == NOT_CONTROLLER && attempts < CONTROLLER_RETRIES {
                attempts += 1;
                self.invalidate_controller().await;
                tokio::time::sleep(CONTROLLER_RETRY_DELAY).await;
                continue;
            }
            return check_error(
                result.error_code,
                result.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to create topic {name:?}"),
            );
        }
    }

    async fn alter_topic_configs(
        &self,
        name: &str,
        configs: &ConfigsMap,
        ops: &ConfigOperations,
        dry_run: bool,
    ) -> Result<()> {
        self.alter_configs(RESOURCE_TYPE_TOPIC, name, configs, ops, dry_run)
            .await
    }

    async fn create_partitions(
        &self,
        name: &str,
        total: i32,
        new_assignments: &[Vec<i32>],
        dry_run: bool,
    ) -> Result<()> {
        let assignments = if new_assignments.is_empty() {
            None
        } else {
            Some(
                new_assignments
                    .iter()
                    .map(|replicas| {
                        CreatePartitionsAssignment::default()
                            .with_broker_ids(replicas.iter().map(|id| BrokerId(*id)).collect())
                    })
                    .collect(),
            )
        };
        let request = CreatePartitionsRequest::default()
            .with_topics(vec![CreatePartitionsTopic::default()
                .with_name(topic_name(name))
                .with_count(total)
                .with_assignments(assignments)])
            .with_timeout_ms(self.timeout_ms())
            .with_validate_only(dry_run);

        let mut attempts = 0;
        loop {
            let response = {
                let mut state = self.state.lock().await;
                let conn = Self::controller_conn(&mut state, &self.config).await?;
                conn.send(&request).await?
            };
            let result = response.results.first().ok_or_else(|| {
                KdeclError::protocol("CreatePartitions response contained no results")
            })?;
            if result.error_code == NOT_CONTROLLER && attempts < CONTROLLER_RETRIES {
                attempts += 1;
                self.invalidate_controller().await;
                tokio::time::sleep(CONTROLLER_RETRY_DELAY).await;
                continue;
            }
            return check_error(
                result.error_code,
                result.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to create partitions for topic {name:?}"),
            );
        }
    }

    async fn alter_partition_assignments(
        &self,
        name: &str,
        assignments: &PartitionAssignments,
    ) -> Result<()> {
        let partitions: Vec<ReassignablePartition> = assignments
            .iter()
            .enumerate()
            .map(|(p, replicas)| {
                ReassignablePartition::default()
                    .with_partition_index(p as i32)
                    .with_replicas(Some(replicas.iter().map(|id| BrokerId(*id)).collect()))
            })
            .collect();
        let request = AlterPartitionReassignmentsRequest::default()
            .with_timeout_ms(self.timeout_ms())
            .with_topics(vec![ReassignableTopic::default()
                .with_name(topic_name(name))
                .with_partitions(partitions)]);

        let mut attempts = 0;
        loop {
            let response = {
                let mut state = self.state.lock().await;
                let conn = Self::controller_conn(&mut state, &self.config).await?;
                conn.send(&request).await?
            };
            if response.error_code == NOT_CONTROLLER && attempts < CONTROLLER_RETRIES {
                attempts += 1;
                self.invalidate_controller().await;
                tokio::time::sleep(CONTROLLER_RETRY_DELAY).await;
                continue;
            }
            check_error(
                response.error_code,
                response.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to alter partition assignments for topic {name:?}"),
            )?;
            for topic in &response.responses {
                for partition in &topic.partitions {
                    check_error(
                        partition.error_code,
                        partition.error_message.as_ref().map(|m| m.as_str()),
                        &format!(
                            "failed to reassign partition {} of topic {name:?}",
                            partition.partition_index
                        ),
                    )?;
                }
            }
            return Ok(());
        }
    }

    async fn list_partition_reassignments(
        &self,
        name: &str,
        partitions: &[i32],
    ) -> Result<PartitionReassignments> {
        let request = ListPartitionReassignmentsRequest::default()
            .with_timeout_ms(self.timeout_ms())
            .with_topics(Some(vec![ListPartitionReassignmentsTopics::default()
                .with_name(topic_name(name))
                .with_partition_indexes(partitions.to_vec())]));

        let mut attempts = 0;
        loop {
            let response = {
                let mut state = self.state.lock().await;
                let conn = Self::controller_conn(&mut state, &self.config).await?;
                conn.send(&request).await?
            };
            if response.error_code == NOT_CONTROLLER && attempts < CONTROLLER_RETRIES {
                attempts += 1;
                self.invalidate_controller().await;
                tokio::time::sleep(CONTROLLER_RETRY_DELAY).await;
                continue;
            }
            check_error(
                response.error_code,
                response.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to list partition reassignments for topic {name:?}"),
            )?;

            let mut reassignments: PartitionReassignments = response
                .topics
                .iter()
                .flat_map(|t| &t.partitions)
                .map(|p| PartitionReassignment {
                    partition: p.partition_index,
                    replicas: p.replicas.iter().map(|id| id.0).collect(),
                    adding_replicas: p.adding_replicas.iter().map(|id| id.0).collect(),
                    removing_replicas: p.removing_replicas.iter().map(|id| id.0).collect(),
                })
                .collect();
            reassignments.sort_by_key(|r| r.partition);
            return Ok(reassignments);
        }
    }

    async fn alter_configs_incremental(&self) -> Result<bool> {
        match self.config.alter_configs_method {
            AlterConfigsMethod::Incremental => Ok(true),
            AlterConfigsMethod::NonIncremental => Ok(false),
            AlterConfigsMethod::Auto => {
                let mut state = self.state.lock().await;
                let conn = Self::seed_conn(&mut state, &self.config).await?;
                Ok(conn.supports(ApiKey::IncrementalAlterConfigsKey))
            }
        }
    }

    async fn describe_brokers(&self) -> Result<Brokers> {
        let (brokers, _) = self.request_metadata(Some(&[])).await?;
        Ok(brokers)
    }

    async fn describe_broker_configs(&self, broker_id: Option<i32>) -> Result<ConfigEntries> {
        let name = broker_id.map(|id| id.to_string()).unwrap_or_default();
        self.describe_configs(RESOURCE_TYPE_BROKER, &name).await
    }

    async fn alter_broker_configs(
        &self,
        broker_id: Option<i32>,
        configs: &ConfigsMap,
        ops: &ConfigOperations,
        dry_run: bool,
    ) -> Result<()> {
        let name = broker_id.map(|id| id.to_string()).unwrap_or_default();
        self.alter_configs(RESOURCE_TYPE_BROKER, &name, configs, ops, dry_run)
            .await
    }

    async fn describe_resource_acls(
        &self,
        resource_type: &str,
        name: &str,
    ) -> Result<Vec<AclEntry>> {
        let request = DescribeAclsRequest::default()
            .with_resource_type_filter(acl_resource_type_code(resource_type)?)
            .with_resource_name_filter(Some(str_bytes(name)))
            .with_pattern_type_filter(ACL_PATTERN_LITERAL)
            .with_principal_filter(None)
            .with_host_filter(None)
            .with_operation(ACL_FILTER_ANY)
            .with_permission_type(ACL_FILTER_ANY);

        let response = {
            let mut state = self.state.lock().await;
            Self::seed_conn(&mut state, &self.config).await?.send(&request).await?
        };
        check_error(
            response.error_code,
            response.error_message.as_ref().map(|m| m.as_str()),
            &format!("failed to describe acls for {name:?}"),
        )?;

        let mut entries: Vec<AclEntry> = response
            .resources
            .iter()
            .filter(|r| r.resource_name.as_str() == name)
            .flat_map(|r| &r.acls)
            .map(|a| AclEntry {
                principal: a.principal.as_str().to_string(),
                host: a.host.as_str().to_string(),
                operation: acl_operation_name(a.operation).to_string(),
                permission_type: acl_permission_name(a.permission_type).to_string(),
            })
            .collect();
        entries.sort();
        entries.dedup();
        Ok(entries)
    }

    async fn create_resource_acls(
        &self,
        resource_type: &str,
        name: &str,
        entries: &[AclEntry],
    ) -> Result<()> {
        let creations: Vec<AclCreation> = entries
            .iter()
            .map(|e| {
                Ok(AclCreation::default()
                    .with_resource_type(acl_resource_type_code(resource_type)?)
                    .with_resource_name(str_bytes(name))
                    .with_resource_pattern_type(ACL_PATTERN_LITERAL)
                    .with_principal(str_bytes(&e.principal))
                    .with_host(str_bytes(&e.host))
                    .with_operation(acl_operation_code(&e.operation)?)
                    .with_permission_type(acl_permission_code(&e.permission_type)?))
            })
            .collect::<Result<_>>()?;
        let request = CreateAclsRequest::default().with_creations(creations);

        let response = {
            let mut state = self.state.lock().await;
            Self::seed_conn(&mut state, &self.config).await?.send(&request).await?
        };
        for result in &response.results {
            check_error(
                result.error_code,
                result.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to create acls for {name:?}"),
            )?;
        }
        Ok(())
    }

    async fn delete_resource_acls(
        &self,
        resource_type: &str,
        name: &str,
        entries: &[AclEntry],
    ) -> Result<()> {
        let filters: Vec<DeleteAclsFilter> = entries
            .iter()
            .map(|e| {
                Ok(DeleteAclsFilter::default()
                    .with_resource_type_filter(acl_resource_type_code(resource_type)?)
                    .with_resource_name_filter(Some(str_bytes(name)))
                    .with_pattern_type_filter(ACL_PATTERN_LITERAL)
                    .with_principal_filter(Some(str_bytes(&e.principal)))
                    .with_host_filter(Some(str_bytes(&e.host)))
                    .with_operation(acl_operation_code(&e.operation)?)
                    .with_permission_type(acl_permission_code(&e.permission_type)?))
            })
            .collect::<Result<_>>()?;
        let request = DeleteAclsRequest::default().with_filters(filters);

        let response = {
            let mut state = self.state.lock().await;
            Self::seed_conn(&mut state, &self.config).await?.send(&request).await?
        };
        for result in &response.filter_results {
            check_error(
                result.error_code,
                result.error_message.as_ref().map(|m| m.as_str()),
                &format!("failed to delete acls for {name:?}"),
            )?;
        }
        Ok(())
    }
}

fn str_bytes(value: &str) -> StrBytes {
    StrBytes::from_string(value.to_string())
}

fn topic_name(name: &str) -> TopicName {
    TopicName::from(str_bytes(name))
}

fn check_error(code: i16, message: Option<&str>, context: &str) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    let detail = message
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| error_code_name(code).to_string());
    Err(KdeclError::protocol(format!("{context}: {detail} (error code {code})")))
}

fn error_code_name(code: i16) -> &'static str {
    match code {
        3 => "unknown topic or partition",
        29 => "topic authorization failed",
        31 => "cluster authorization failed",
        35 => "unsupported version",
        36 => "topic already exists",
        37 => "invalid number of partitions",
        38 => "invalid replication factor",
        39 => "invalid replica assignment",
        40 => "invalid config",
        41 => "not the controller",
        42 => "invalid request",
        44 => "policy violation",
        85 => "no reassignment in progress",
        _ => "request failed",
    }
}

fn acl_resource_type_code(name: &str) -> Result<i8> {
    match name {
        "topic" => Ok(2),
        "group" => Ok(3),
        "cluster" => Ok(4),
        "transactional_id" => Ok(5),
        "delegation_token" => Ok(6),
        _ => Err(KdeclError::protocol(format!("unknown acl resource type {name:?}"))),
    }
}

fn acl_resource_type_name(code: i8) -> &'static str {
    match code {
        2 => "topic",
        3 => "group",
        4 => "cluster",
        5 => "transactional_id",
        6 => "delegation_token",
        _ => "unknown",
    }
}

fn acl_operation_code(name: &str) -> Result<i8> {
    match name {
        "ALL" => Ok(2),
        "READ" => Ok(3),
        "WRITE" => Ok(4),
        "CREATE" => Ok(5),
        "DELETE" => Ok(6),
        "ALTER" => Ok(7),
        "DESCRIBE" => Ok(8),
        "CLUSTER_ACTION" => Ok(9),
        "DESCRIBE_CONFIGS" => Ok(10),
        "ALTER_CONFIGS" => Ok(11),
        "IDEMPOTENT_WRITE" => Ok(12),
        _ => Err(KdeclError::protocol(format!("unknown acl operation {name:?}"))),
    }
}

fn acl_operation_name(code: i8) -> &'static str {
    match code {
        2 => "ALL",
        3 => "READ",
        4 => "WRITE",
        5 => "CREATE",
        6 => "DELETE",
        7 => "ALTER",
        8 => "DESCRIBE",
        9 => "CLUSTER_ACTION",
        10 => "DESCRIBE_CONFIGS",
        11 => "ALTER_CONFIGS",
        12 => "IDEMPOTENT_WRITE",
        _ => "UNKNOWN",
    }
}

fn acl_permission_code(name: &str) -> Result<i8> {
    match name {
        "DENY" => Ok(2),
        "ALLOW" => Ok(3),
        _ => Err(KdeclError::protocol(format!("unknown acl permission type {name:?}"))),
    }
}

fn acl_permission_name(code: i8) -> &'static str {
    match code {
        2 => "DENY",
        3 => "ALLOW",
        _ => "UNKNOWN",
    }
}
