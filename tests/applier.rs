//! Topic applier state machine tests against an in-memory cluster fake.

use std::sync::Mutex;

use async_trait::async_trait;

use kdecl::apply::controller::{ApplyController, ApplyControllerOptions};
use kdecl::apply::topic::TopicApplier;
use kdecl::apply::{ApplierOptions, ApplyResult};
use kdecl::def::acl::AclEntry;
use kdecl::def::topic::PartitionAssignments;
use kdecl::def::{ConfigsMap, TopicDefinition};
use kdecl::docparse::DefinitionFormat;
use kdecl::error::Result;
use kdecl::kafka::{AdminOps, ConfigOp, ConfigOperations};
use kdecl::meta::{
    Broker, Brokers, ConfigEntries, ConfigEntry, ConfigSource, PartitionReassignment,
    PartitionReassignments,
};

#[derive(Default)]
struct FakeTopic {
    name: String,
    assignments: PartitionAssignments,
    configs: Vec<ConfigEntry>,
}

#[derive(Default)]
struct FakeState {
    topic: Option<FakeTopic>,
    reassignments: PartitionReassignments,
    /// When set, altering assignments leaves a reassignment in flight.
    reassignment_sticks: bool,
    calls: Vec<&'static str>,
}

struct FakeAdmin {
    brokers: Brokers,
    incremental: bool,
    state: Mutex<FakeState>,
}

impl FakeAdmin {
    fn new(brokers: Brokers) -> Self {
        FakeAdmin {
            brokers,
            incremental: true,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn with_topic(self, name: &str, assignments: PartitionAssignments, configs: Vec<ConfigEntry>) -> Self {
        self.state.lock().unwrap().topic = Some(FakeTopic {
            name: name.to_string(),
            assignments,
            configs,
        });
        self
    }

    fn non_incremental(mut self) -> Self {
        self.incremental = false;
        self
    }

    fn with_inflight_reassignment(self) -> Self {
        self.state.lock().unwrap().reassignments = vec![PartitionReassignment {
            partition: 0,
            replicas: vec![1, 2],
            adding_replicas: vec![2],
            removing_replicas: vec![1],
        }];
        self
    }

    fn sticky_reassignments(self) -> Self {
        self.state.lock().unwrap().reassignment_sticks = true;
        self
    }

    fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    fn topic_assignments(&self) -> PartitionAssignments {
        self.state
            .lock()
            .unwrap()
            .topic
            .as_ref()
            .map(|t| t.assignments.clone())
            .unwrap_or_default()
    }

    fn topic_config(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .topic
            .as_ref()
            .and_then(|t| t.configs.iter().find(|c| c.name == key))
            .and_then(|c| c.value.clone())
    }

    fn dynamic_entry(key: &str, value: &str) -> ConfigEntry {
        ConfigEntry {
            name: key.to_string(),
            value: Some(value.to_string()),
            source: ConfigSource::DynamicTopicConfig,
            read_only: false,
            sensitive: false,
        }
    }
}

#[async_trait]
impl AdminOps for FakeAdmin {
    async fn try_request_topic(
        &self,
        name: &str,
    ) -> Result<(Option<TopicDefinition>, ConfigEntries, Brokers)> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("fetch");
        let Some(topic) = state.topic.as_ref().filter(|t| t.name == name) else {
            return Ok((None, ConfigEntries::default(), self.brokers.clone()));
        };
        let configs = ConfigEntries(topic.configs.clone());
        let def = TopicDefinition::from_cluster(name, &topic.assignments, &self.brokers, configs.to_map());
        Ok((Some(def), configs, self.brokers.clone()))
    }

    async fn create_topic(
        &self,
        def: &TopicDefinition,
        assignments: &PartitionAssignments,
        dry_run: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_topic");
        if dry_run {
            return Ok(());
        }
        let assignments = if assignments.is_empty() {
            let ids = self.brokers.ids();
            (0..def.spec.partitions as usize)
                .map(|p| {
                    (0..def.spec.replication_factor as usize)
                        .map(|r| ids[(p + r) % ids.len()])
                        .collect()
                })
                .collect()
        } else {
            assignments.clone()
        };
        let configs = def
            .spec
            .configs
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| FakeAdmin::dynamic_entry(k, v)))
            .collect();
        state.topic = Some(FakeTopic {
            name: def.resource.metadata.name.clone(),
            assignments,
            configs,
        });
        Ok(())
    }

    async fn alter_topic_configs(
        &self,
        _name: &str,
        configs: &ConfigsMap,
        ops: &ConfigOperations,
        dry_run: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("alter_configs");
        if dry_run {
            return Ok(());
        }
        let Some(topic) = state.topic.as_mut() else {
            return Ok(());
        };
        if self.incremental {
            for op in &ops.0 {
                topic.configs.retain(|c| c.name != op.key);
                if op.op == ConfigOp::Set {
                    if let Some(value) = &op.value {
                        topic.configs.push(FakeAdmin::dynamic_entry(&op.key, value));
                    }
                }
            }
        } else {
            // Legacy alter replaces the whole dynamic set.
            topic.configs = configs
                .iter()
                .filter_map(|(k, v)| v.as_ref().map(|v| FakeAdmin::dynamic_entry(k, v)))
                .collect();
        }
        Ok(())
    }

    async fn create_partitions(
        &self,
        _name: &str,
        total: i32,
        new_assignments: &[Vec<i32>],
        dry_run: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_partitions");
        if dry_run {
            return Ok(());
        }
        if let Some(topic) = state.topic.as_mut() {
            topic.assignments.extend_from_slice(new_assignments);
            assert_eq!(topic.assignments.len() as i32, total);
        }
        Ok(())
    }

    async fn alter_partition_assignments(
        &self,
        _name: &str,
        assignments: &PartitionAssignments,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("alter_assignments");
        if state.reassignment_sticks {
            state.reassignments = vec![PartitionReassignment {
                partition: 0,
                replicas: assignments[0].clone(),
                adding_replicas: assignments[0].clone(),
                removing_replicas: vec![],
            }];
        }
        if let Some(topic) = state.topic.as_mut() {
            topic.assignments = assignments.clone();
        }
        Ok(())
    }

    async fn list_partition_reassignments(
        &self,
        _name: &str,
        _partitions: &[i32],
    ) -> Result<PartitionReassignments> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_reassignments");
        Ok(state.reassignments.clone())
    }

    async fn alter_configs_incremental(&self) -> Result<bool> {
        Ok(self.incremental)
    }

    async fn describe_brokers(&self) -> Result<Brokers> {
        Ok(self.brokers.clone())
    }

    async fn describe_broker_configs(&self, _broker_id: Option<i32>) -> Result<ConfigEntries> {
        Ok(ConfigEntries::default())
    }

    async fn alter_broker_configs(
        &self,
        _broker_id: Option<i32>,
        _configs: &ConfigsMap,
        _ops: &ConfigOperations,
        _dry_run: bool,
    ) -> Result<()> {
        Ok(())
    }

    async fn describe_resource_acls(&self, _resource_type: &str, _name: &str) -> Result<Vec<AclEntry>> {
        Ok(Vec::new())
    }

    async fn create_resource_acls(
        &self,
        _resource_type: &str,
        _name: &str,
        _entries: &[AclEntry],
    ) -> Result<()> {
        Ok(())
    }

    async fn delete_resource_acls(
        &self,
        _resource_type: &str,
        _name: &str,
        _entries: &[AclEntry],
    ) -> Result<()> {
        Ok(())
    }
}

fn rack_brokers() -> Brokers {
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

async fn run_applier(srv: &FakeAdmin, doc: &str, dry_run: bool, timeout: u64) -> ApplyResult {
    let opts = ApplierOptions {
        definition_format: DefinitionFormat::Yaml,
        dry_run,
        reass_await_timeout: timeout,
    };
    TopicApplier::new(srv, doc, opts).execute().await
}

#[tokio::test]
async fn create_with_rack_awareness() {
    let srv = FakeAdmin::new(rack_brokers());
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: t1
spec:
  partitions: 2
  replicationFactor: 2
  rackAssignments:
    - [rack-a, rack-b]
    - [rack-b, rack-a]
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    assert_eq!(result.err, None);
    assert!(result.applied);
    assert!(result.diff.lines().all(|l| l.starts_with('+')));
    assert_eq!(srv.topic_assignments(), vec![vec![1, 3], vec![3, 2]]);
}

#[tokio::test]
async fn config_only_change() {
    let srv = FakeAdmin::new(rack_brokers()).with_topic(
        "orders",
        vec![vec![1]],
        vec![FakeAdmin::dynamic_entry("retention.ms", "86400000")],
    );
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 1
  replicationFactor: 1
  configs:
    retention.ms: "604800000"
  deleteMissingConfigs: false
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    assert_eq!(result.err, None);
    assert!(result.applied);
    assert!(result
        .diff
        .lines()
        .any(|l| l.starts_with('-') && l.contains("\"retention.ms\": \"86400000\"")));
    assert!(result
        .diff
        .lines()
        .any(|l| l.starts_with('+') && l.contains("\"retention.ms\": \"604800000\"")));

    let calls = srv.calls();
    assert!(calls.contains(&"alter_configs"));
    assert!(!calls.contains(&"create_partitions"));
    assert!(!calls.contains(&"alter_assignments"));
    assert_eq!(srv.topic_config("retention.ms").as_deref(), Some("604800000"));
}

#[tokio::test]
async fn decreasing_partitions_is_refused() {
    let srv = FakeAdmin::new(rack_brokers()).with_topic(
        "orders",
        vec![vec![1], vec![2], vec![3], vec![1], vec![2], vec![3]],
        vec![],
    );
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 3
  replicationFactor: 1
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    let err = result.err.expect("expected an error");
    assert!(err.contains("decreasing the number of partitions is not supported"));
    assert!(!result.applied);
    assert_eq!(srv.calls(), vec!["fetch"]);
}

#[tokio::test]
async fn non_incremental_missing_config_is_a_noop_without_delete_flag() {
    let srv = FakeAdmin::new(rack_brokers()).non_incremental().with_topic(
        "orders",
        vec![vec![1]],
        vec![
            FakeAdmin::dynamic_entry("retention.ms", "1000"),
            FakeAdmin::dynamic_entry("cleanup.policy", "compact"),
        ],
    );
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 1
  replicationFactor: 1
  configs:
    retention.ms: "1000"
  deleteMissingConfigs: false
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    assert_eq!(result.err, None);
    assert!(!result.applied);
    assert_eq!(result.diff, "");
    assert!(!srv.calls().contains(&"alter_configs"));
    assert_eq!(srv.topic_config("cleanup.policy").as_deref(), Some("compact"));
}

#[tokio::test]
async fn non_incremental_delete_applies_with_flag() {
    let srv = FakeAdmin::new(rack_brokers()).non_incremental().with_topic(
        "orders",
        vec![vec![1]],
        vec![
            FakeAdmin::dynamic_entry("retention.ms", "1000"),
            FakeAdmin::dynamic_entry("cleanup.policy", "compact"),
        ],
    );
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 1
  replicationFactor: 1
  configs:
    retention.ms: "1000"
  deleteMissingConfigs: true
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    assert_eq!(result.err, None);
    assert!(result.applied);
    assert!(result
        .diff
        .lines()
        .any(|l| l.starts_with('-') && l.contains("\"cleanup.policy\"")));
    assert_eq!(srv.topic_config("cleanup.policy"), None);
    assert_eq!(srv.topic_config("retention.ms").as_deref(), Some("1000"));
}

#[tokio::test]
async fn non_incremental_implicit_delete_is_refused() {
    let srv = FakeAdmin::new(rack_brokers()).non_incremental().with_topic(
        "orders",
        vec![vec![1]],
        vec![
            FakeAdmin::dynamic_entry("retention.ms", "1000"),
            FakeAdmin::dynamic_entry("cleanup.policy", "compact"),
        ],
    );
    // Changing one key while omitting another would implicitly delete the
    // omitted key under the legacy protocol.
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 1
  replicationFactor: 1
  configs:
    retention.ms: "2000"
  deleteMissingConfigs: false
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    let err = result.err.expect("expected an error");
    assert!(err.contains("deletion of missing configs is not enabled"));
    assert_eq!(srv.topic_config("cleanup.policy").as_deref(), Some("compact"));
}

#[tokio::test]
async fn reassignment_in_progress_fails_dry_run() {
    let srv = FakeAdmin::new(rack_brokers())
        .with_topic("orders", vec![vec![1]], vec![])
        .with_inflight_reassignment();
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 1
  replicationFactor: 1
  assignments:
    - [2]
"#;

    let result = run_applier(&srv, doc, true, 0).await;
    let err = result.err.expect("expected an error");
    assert!(err.contains("a partition reassignment is in progress for the topic"));
    assert!(!result.applied);
}

#[tokio::test(start_paused = true)]
async fn await_timeout_returns_success_with_snapshot() {
    let srv = FakeAdmin::new(rack_brokers())
        .with_topic("orders", vec![vec![1]], vec![])
        .sticky_reassignments();
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 1
  replicationFactor: 1
  assignments:
    - [2]
"#;

    let result = run_applier(&srv, doc, false, 5).await;
    assert_eq!(result.err, None);
    assert!(result.applied);
    let data = result.data.expect("expected result data");
    let snapshot = data["partitionReassignments"].as_array().expect("snapshot");
    assert!(!snapshot.is_empty());
}

#[tokio::test]
async fn partition_growth_creates_only_new_partitions() {
    let srv = FakeAdmin::new(rack_brokers()).with_topic("orders", vec![vec![1], vec![2]], vec![]);
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 4
  replicationFactor: 1
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    assert_eq!(result.err, None);
    assert!(result.applied);
    // New partitions stripe from the rotating offset: [3], then [1].
    assert_eq!(
        srv.topic_assignments(),
        vec![vec![1], vec![2], vec![3], vec![1]]
    );
    assert!(!srv.calls().contains(&"alter_assignments"));
}

#[tokio::test]
async fn replication_factor_growth_reassigns() {
    let srv = FakeAdmin::new(rack_brokers()).with_topic("orders", vec![vec![1], vec![2]], vec![]);
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: orders
spec:
  partitions: 2
  replicationFactor: 2
"#;

    let result = run_applier(&srv, doc, false, 0).await;
    assert_eq!(result.err, None);
    assert!(result.applied);
    assert!(srv.calls().contains(&"alter_assignments"));
    let assignments = srv.topic_assignments();
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0][0], 1);
    assert_eq!(assignments[1][0], 2);
    assert!(assignments.iter().all(|row| row.len() == 2));
}

#[tokio::test]
async fn controller_expands_globs_and_rejects_empty_matches() {
    let srv = FakeAdmin::new(rack_brokers());
    let dir = std::env::temp_dir().join(format!("kdecl-applier-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("t1.yml"),
        "apiVersion: v1\nkind: topic\nmetadata:\n  name: t1\nspec:\n  partitions: 1\n  replicationFactor: 1\n",
    )
    .unwrap();

    let pattern = dir.join("*.yml").to_string_lossy().into_owned();
    let controller = ApplyController::new(&srv, vec![pattern], ApplyControllerOptions::default());
    controller.execute().await.unwrap();
    assert!(srv.calls().contains(&"create_topic"));

    let no_match = dir.join("*.json").to_string_lossy().into_owned();
    let controller = ApplyController::new(&srv, vec![no_match], ApplyControllerOptions::default());
    let err = controller.execute().await.unwrap_err();
    assert!(err.to_string().contains("no definition files found"));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn reapplying_a_definition_is_idempotent() {
    let srv = FakeAdmin::new(rack_brokers());
    let doc = r#"
apiVersion: v1
kind: topic
metadata:
  name: t1
spec:
  partitions: 2
  replicationFactor: 2
  configs:
    retention.ms: "604800000"
  rackAssignments:
    - [rack-a, rack-b]
    - [rack-b, rack-a]
"#;

    let first = run_applier(&srv, doc, false, 0).await;
    assert_eq!(first.err, None);
    assert!(first.applied);

    let second = run_applier(&srv, doc, false, 0).await;
    assert_eq!(second.err, None);
    assert!(!second.applied);
    assert_eq!(second.diff, "");
}
