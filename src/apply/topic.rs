//! Topic applier
//!
//! The state machine reconciling one topic definition:
//! parse → validate → fetch → validate with metadata → plan → diff →
//! execute → await. Execution order matters: configs are altered before
//! partitions are created before assignments are altered, because each later
//! operation depends on the earlier one having settled.

use std::time::Duration;

use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::apply::{parse_doc, render_diff, ApplierOptions, ApplyResult};
use crate::assignments::{add_partitions, alter_replication_factor, sync_rack_assignments};
use crate::def::topic::PartitionAssignments;
use crate::def::TopicDefinition;
use crate::diff::json_diff;
use crate::error::{KdeclError, Result};
use crate::kafka::{new_config_ops, AdminOps, ConfigOperations};
use crate::meta::{Brokers, ConfigEntries, ConfigSource, PartitionReassignments};

const REASSIGNMENT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The operation plan for one topic apply.
#[derive(Debug, Default)]
struct TopicOps {
    create: bool,
    create_assignments: PartitionAssignments,
    config: ConfigOperations,
    /// Full target matrix when the partition count grows.
    partitions: PartitionAssignments,
    assignments: PartitionAssignments,
}

impl TopicOps {
    fn pending(&self) -> bool {
        self.create
            || !self.config.is_empty()
            || !self.partitions.is_empty()
            || !self.assignments.is_empty()
    }
}

/// An applier handling the apply operation for a topic definition.
pub struct TopicApplier<'a, S: AdminOps> {
    srv: &'a S,
    def_doc: &'a str,
    opts: ApplierOptions,

    local_def: TopicDefinition,
    remote_def: Option<TopicDefinition>,
    remote_configs: ConfigEntries,
    brokers: Brokers,
    ops: TopicOps,

    res: ApplyResult,
    reassignments: PartitionReassignments,
}

impl<'a, S: AdminOps> TopicApplier<'a, S> {
    pub fn new(srv: &'a S, def_doc: &'a str, opts: ApplierOptions) -> Self {
        TopicApplier {
            srv,
            def_doc,
            opts,
            local_def: TopicDefinition::default(),
            remote_def: None,
            remote_configs: ConfigEntries::default(),
            brokers: Brokers::default(),
            ops: TopicOps::default(),
            res: ApplyResult::default(),
            reassignments: Vec::new(),
        }
    }

    /// Execute the applier. Errors are folded into the result.
    pub async fn execute(mut self) -> ApplyResult {
        match self.apply().await {
            Ok(()) => {
                if self.ops.pending() && !self.opts.dry_run {
                    self.res.applied = true;
                }
            }
            Err(e) => {
                error!("{e}");
                self.res.err = Some(e.to_string());
            }
        }
        self.res.data = Some(json!({ "partitionReassignments": self.reassignments }));
        self.res
    }

    async fn apply(&mut self) -> Result<()> {
        self.create_local()?;

        debug!("validating topic definition");
        self.local_def.validate()?;

        self.try_fetch_remote().await?;

        debug!("validating topic definition using cluster metadata");
        self.local_def.validate_with_metadata(&self.brokers)?;

        self.build_ops().await?;
        self.update_apply_result()?;

        let name = self.local_def.resource.metadata.name.clone();
        if self.ops.pending() {
            self.display_pending_ops();
            self.execute_ops().await?;

            if !self.ops.assignments.is_empty() && !self.opts.dry_run {
                self.fetch_partition_reassignments(false).await?;
                if !self.reassignments.is_empty() {
                    if self.opts.reass_await_timeout > 0 {
                        self.await_reassignments().await?;
                    } else {
                        self.display_partition_reassignments();
                    }
                }
            }
            info!(dry_run = self.opts.dry_run, "completed apply for topic {name:?}");
        } else {
            info!("no changes to apply for topic {name:?}");
        }

        Ok(())
    }

    fn create_local(&mut self) -> Result<()> {
        self.local_def = parse_doc(self.def_doc, self.opts.definition_format)?;
        self.res.local_def = Some(serde_json::to_value(&self.local_def)?);
        Ok(())
    }

    async fn try_fetch_remote(&mut self) -> Result<()> {
        let name = &self.local_def.resource.metadata.name;
        info!("checking if topic {name:?} exists...");
        let (remote_def, remote_configs, brokers) = self.srv.try_request_topic(name).await?;
        self.ops.create = remote_def.is_none();
        if self.ops.create {
            debug!("topic {name:?} does not exist");
        }
        self.remote_def = remote_def;
        self.remote_configs = remote_configs;
        self.brokers = brokers;
        Ok(())
    }

    async fn build_ops(&mut self) -> Result<()> {
        if self.ops.create {
            self.build_create_op();
        } else {
            self.build_config_ops().await?;
            self.build_partitions_op()?;
            self.build_assignments_op()?;
        }
        Ok(())
    }

    fn build_create_op(&mut self) {
        if let Some(racks) = &self.local_def.spec.rack_assignments {
            let unassigned = vec![Vec::new(); racks.len()];
            self.ops.create_assignments =
                sync_rack_assignments(&unassigned, racks, &self.brokers.by_rack());
        } else if let Some(assignments) = &self.local_def.spec.assignments {
            self.ops.create_assignments = assignments.clone();
        }
    }

    async fn build_config_ops(&mut self) -> Result<()> {
        let name = &self.local_def.resource.metadata.name;
        debug!("comparing local and remote definition configs for topic {name:?}");
        let remote = self.remote()?;
        self.ops.config = new_config_ops(
            &self.local_def.spec.configs,
            &remote.spec.configs,
            &self.remote_configs,
            self.local_def.spec.delete_missing_configs,
            ConfigSource::DynamicTopicConfig,
        );
        Ok(())
    }

    fn build_partitions_op(&mut self) -> Result<()> {
        let remote = self.remote()?;
        if self.local_def.spec.partitions < remote.spec.partitions {
            return Err(KdeclError::precondition(
                "decreasing the number of partitions is not supported",
            ));
        }
        if self.local_def.spec.partitions > remote.spec.partitions {
            debug!(
                "the number of partitions will be increased from {} to {}",
                remote.spec.partitions, self.local_def.spec.partitions
            );
            let current = remote.spec.assignments.clone().unwrap_or_default();
            self.ops.partitions = add_partitions(
                &current,
                self.local_def.spec.partitions as usize,
                &self.brokers.ids(),
            );
        }
        Ok(())
    }

    fn build_assignments_op(&mut self) -> Result<()> {
        let remote = self.remote()?;
        let remote_assignments = remote.spec.assignments.clone().unwrap_or_default();
        // The working matrix includes partitions that are about to be added.
        let extended = if self.ops.partitions.is_empty() {
            remote_assignments.clone()
        } else {
            self.ops.partitions.clone()
        };

        if let Some(local_assignments) = &self.local_def.spec.assignments {
            if *local_assignments != remote_assignments {
                debug!("partition assignments have changed and will be updated");
                self.ops.assignments = local_assignments.clone();
            }
        } else if let Some(racks) = &self.local_def.spec.rack_assignments {
            let synced = sync_rack_assignments(&extended, racks, &self.brokers.by_rack());
            if synced != remote_assignments {
                debug!("partition assignments are out of sync with defined racks and will be updated");
                self.ops.assignments = synced;
            }
        } else if self.local_def.spec.replication_factor != remote.spec.replication_factor {
            debug!("replication factor has changed and will be updated");
            self.ops.assignments = alter_replication_factor(
                &extended,
                self.local_def.spec.replication_factor as usize,
                &self.brokers.ids(),
            );
        }
        Ok(())
    }

    /// Update the apply result with the normalized remote definition and the
    /// human readable diff, and check that diff and plan agree.
    fn update_apply_result(&mut self) -> Result<()> {
        let remote_copy = match &self.remote_def {
            None => None,
            Some(remote) => {
                let mut copy = remote.clone();

                // Optional sections the local definition does not use are
                // not part of the comparison.
                if !self.local_def.spec.has_assignments() {
                    copy.spec.assignments = None;
                }
                if !self.local_def.spec.has_rack_assignments() {
                    copy.spec.rack_assignments = None;
                }

                // Keep only configs that are locally declared or part of the
                // plan; the plan can contain deletions that belong in the
                // diff.
                let local_configs = &self.local_def.spec.configs;
                let ops = &self.ops.config;
                copy.spec
                    .configs
                    .retain(|key, _| local_configs.contains_key(key) || ops.contains_key(key));

                // A locally-null key with no planned op is already satisfied;
                // mirror the null so both sides compare equal.
                for (key, value) in local_configs {
                    if value.is_none() && !ops.contains_key(key) {
                        copy.spec.configs.insert(key.clone(), None);
                    }
                }

                // Local-only properties with no remote state.
                copy.spec.delete_missing_configs = self.local_def.spec.delete_missing_configs;
                Some(copy)
            }
        };

        let diff = json_diff(remote_copy.as_ref(), &self.local_def)?;
        let diff_exists = !diff.is_empty();
        if diff_exists != self.ops.pending() {
            return Err(KdeclError::Invariant(format!(
                "existence of diff was {diff_exists}, but expected {}",
                self.ops.pending()
            )));
        }

        if let Some(copy) = &remote_copy {
            self.res.remote_def = Some(serde_json::to_value(copy)?);
        }
        self.res.diff = diff;
        Ok(())
    }

    fn display_pending_ops(&self) {
        let name = &self.local_def.resource.metadata.name;
        if self.ops.create {
            info!("topic {name:?} does not exist and will be created");
        }
        info!("topic {name:?} diff (remote -> local):");
        print!("{}", render_diff(&self.res.diff));
    }

    async fn execute_ops(&mut self) -> Result<()> {
        if self.ops.create {
            self.create_topic().await?;
        }
        if !self.ops.config.is_empty() {
            self.update_configs().await?;
        }
        if !self.ops.partitions.is_empty() {
            self.update_partitions().await?;
        }
        if !self.ops.assignments.is_empty() {
            self.update_assignments().await?;
        }
        Ok(())
    }

    async fn create_topic(&mut self) -> Result<()> {
        let name = self.local_def.resource.metadata.name.clone();
        info!(dry_run = self.opts.dry_run, "creating topic {name:?}...");
        self.srv
            .create_topic(&self.local_def, &self.ops.create_assignments, self.opts.dry_run)
            .await?;
        info!(dry_run = self.opts.dry_run, "created topic {name:?}");
        Ok(())
    }

    async fn update_configs(&mut self) -> Result<()> {
        let incremental = self.srv.alter_configs_incremental().await?;
        if !incremental && !self.local_def.spec.delete_missing_configs {
            // Non-incremental alter replaces the entire dynamic config set;
            // refuse to run it while the cluster holds explicitly-set keys
            // the definition does not declare.
            let undeclared = self.remote_configs.0.iter().any(|e| {
                e.source == ConfigSource::DynamicTopicConfig
                    && !self.local_def.spec.configs.contains_key(&e.name)
            });
            if undeclared {
                return Err(KdeclError::precondition(
                    "cannot apply configs because deletion of missing configs is not enabled",
                ));
            }
        }

        let name = self.local_def.resource.metadata.name.clone();
        info!(dry_run = self.opts.dry_run, "altering configs...");
        self.srv
            .alter_topic_configs(
                &name,
                &self.local_def.spec.configs,
                &self.ops.config,
                self.opts.dry_run,
            )
            .await?;
        info!(dry_run = self.opts.dry_run, "altered configs for topic {name:?}");
        Ok(())
    }

    async fn update_partitions(&mut self) -> Result<()> {
        let name = self.local_def.resource.metadata.name.clone();
        let remote_partitions = self.remote()?.spec.partitions as usize;
        info!(dry_run = self.opts.dry_run, "creating partitions...");
        self.srv
            .create_partitions(
                &name,
                self.local_def.spec.partitions,
                &self.ops.partitions[remote_partitions..],
                self.opts.dry_run,
            )
            .await?;
        info!(dry_run = self.opts.dry_run, "created partitions for topic {name:?}");
        Ok(())
    }

    async fn update_assignments(&mut self) -> Result<()> {
        let name = self.local_def.resource.metadata.name.clone();
        if self.opts.dry_run {
            // AlterPartitionAssignments has no validate-only mode, so the
            // dry-run checks for in-progress reassignments and fails the way
            // the real request would.
            self.fetch_partition_reassignments(false).await?;
            if !self.reassignments.is_empty() {
                return Err(KdeclError::precondition(format!(
                    "a partition reassignment is in progress for the topic {name:?}"
                )));
            }
            info!("skipped altering partition assignments (dry-run not available)");
        } else {
            info!("altering partition assignments...");
            self.srv
                .alter_partition_assignments(&name, &self.ops.assignments)
                .await?;
            info!("altered partition assignments for topic {name:?}");
        }
        Ok(())
    }

    async fn fetch_partition_reassignments(&mut self, suppress_log: bool) -> Result<()> {
        let name = self.local_def.resource.metadata.name.clone();
        if !suppress_log {
            debug!("fetching in-progress partition reassignments for topic {name:?}");
        }
        let partitions: Vec<i32> = (0..self.local_def.spec.partitions).collect();
        self.reassignments = self.srv.list_partition_reassignments(&name, &partitions).await?;
        Ok(())
    }

    fn display_partition_reassignments(&self) {
        let name = &self.local_def.resource.metadata.name;
        info!("in-progress partition reassignments for topic {name:?}:");
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Partition", "Replicas", "Adding Replicas", "Removing Replicas"]);
        for r in &self.reassignments {
            table.add_row(vec![
                r.partition.to_string(),
                format!("{:?}", r.replicas),
                format!("{:?}", r.adding_replicas),
                format!("{:?}", r.removing_replicas),
            ]);
        }
        println!("{table}");
    }

    /// Poll until in-flight reassignments complete or the deadline passes.
    /// Hitting the deadline is not an error; the snapshot stays in the
    /// result so callers can keep polling on their own.
    async fn await_reassignments(&mut self) -> Result<()> {
        let timeout = self.opts.reass_await_timeout;
        info!("awaiting completion of partition reassignments (timeout: {timeout} seconds)...");
        let deadline = Instant::now() + Duration::from_secs(timeout);

        let mut remaining = 0usize;
        loop {
            self.fetch_partition_reassignments(true).await?;
            if self.reassignments.is_empty() {
                info!("partition reassignments completed");
                return Ok(());
            }
            if self.reassignments.len() != remaining {
                self.display_partition_reassignments();
            }
            remaining = self.reassignments.len();

            if Instant::now() + REASSIGNMENT_POLL_INTERVAL > deadline {
                tokio::time::sleep_until(deadline).await;
                info!(
                    "awaiting completion of partition reassignments timed out after {timeout} seconds"
                );
                return Ok(());
            }
            tokio::time::sleep(REASSIGNMENT_POLL_INTERVAL).await;
        }
    }

    fn remote(&self) -> Result<&TopicDefinition> {
        self.remote_def.as_ref().ok_or_else(|| {
            KdeclError::Invariant("remote definition accessed before fetch".to_string())
        })
    }
}
