//! Broker applier
//!
//! Reconciles the dynamic configuration of a single broker. A reduced case
//! of the topic applier: config operations only, same diff normalization and
//! plan/diff consistency check.

use tracing::{debug, error, info};

use crate::apply::{parse_doc, render_diff, ApplierOptions, ApplyResult};
use crate::def::BrokerDefinition;
use crate::diff::json_diff;
use crate::error::{KdeclError, Result};
use crate::kafka::{new_config_ops, AdminOps, ConfigOperations};
use crate::meta::{ConfigEntries, ConfigSource};

pub struct BrokerApplier<'a, S: AdminOps> {
    srv: &'a S,
    def_doc: &'a str,
    opts: ApplierOptions,

    local_def: BrokerDefinition,
    remote_def: Option<BrokerDefinition>,
    remote_configs: ConfigEntries,
    ops: ConfigOperations,

    res: ApplyResult,
}

impl<'a, S: AdminOps> BrokerApplier<'a, S> {
    pub fn new(srv: &'a S, def_doc: &'a str, opts: ApplierOptions) -> Self {
        BrokerApplier {
            srv,
            def_doc,
            opts,
            local_def: BrokerDefinition::default(),
            remote_def: None,
            remote_configs: ConfigEntries::default(),
            ops: ConfigOperations::default(),
            res: ApplyResult::default(),
        }
    }

    pub async fn execute(mut self) -> ApplyResult {
        match self.apply().await {
            Ok(()) => {
                if !self.ops.is_empty() && !self.opts.dry_run {
                    self.res.applied = true;
                }
            }
            Err(e) => {
                error!("{e}");
                self.res.err = Some(e.to_string());
            }
        }
        self.res
    }

    async fn apply(&mut self) -> Result<()> {
        self.local_def = parse_doc(self.def_doc, self.opts.definition_format)?;
        self.res.local_def = Some(serde_json::to_value(&self.local_def)?);

        debug!("validating broker definition");
        self.local_def.validate()?;
        let id = self.local_def.broker_id()?;
        let name = self.local_def.resource.metadata.name.clone();

        info!("fetching broker configuration...");
        let brokers = self.srv.describe_brokers().await?;
        self.local_def.validate_with_metadata(&brokers)?;
        self.remote_configs = self.srv.describe_broker_configs(Some(id)).await?;
        self.remote_def = Some(BrokerDefinition::new(&name, self.remote_configs.to_map()));

        self.build_ops()?;
        self.update_apply_result()?;

        if !self.ops.is_empty() {
            info!("broker {name:?} diff (remote -> local):");
            print!("{}", render_diff(&self.res.diff));
            self.update_configs(id).await?;
            info!(dry_run = self.opts.dry_run, "completed apply for broker {name:?}");
        } else {
            info!("no changes to apply for broker {name:?}");
        }
        Ok(())
    }

    fn build_ops(&mut self) -> Result<()> {
        let remote = self.remote()?;
        self.ops = new_config_ops(
            &self.local_def.spec.configs,
            &remote.spec.configs,
            &self.remote_configs,
            self.local_def.spec.delete_undefined_configs,
            ConfigSource::DynamicBrokerConfig,
        );
        Ok(())
    }

    fn update_apply_result(&mut self) -> Result<()> {
        let remote_copy = match &self.remote_def {
            None => None,
            Some(remote) => {
                let mut copy = remote.clone();
                let local_configs = &self.local_def.spec.configs;
                let ops = &self.ops;
                copy.spec
                    .configs
                    .retain(|key, _| local_configs.contains_key(key) || ops.contains_key(key));
                for (key, value) in local_configs {
                    if value.is_none() && !ops.contains_key(key) {
                        copy.spec.configs.insert(key.clone(), None);
                    }
                }
                copy.spec.delete_undefined_configs = self.local_def.spec.delete_undefined_configs;
                Some(copy)
            }
        };

        let diff = json_diff(remote_copy.as_ref(), &self.local_def)?;
        let diff_exists = !diff.is_empty();
        if diff_exists != !self.ops.is_empty() {
            return Err(KdeclError::Invariant(format!(
                "existence of diff was {diff_exists}, but expected {}",
                !self.ops.is_empty()
            )));
        }

        if let Some(copy) = &remote_copy {
            self.res.remote_def = Some(serde_json::to_value(copy)?);
        }
        self.res.diff = diff;
        Ok(())
    }

    async fn update_configs(&mut self, id: i32) -> Result<()> {
        let incremental = self.srv.alter_configs_incremental().await?;
        if !incremental && !self.local_def.spec.delete_undefined_configs {
            let undeclared = self.remote_configs.0.iter().any(|e| {
                e.source == ConfigSource::DynamicBrokerConfig
                    && !self.local_def.spec.configs.contains_key(&e.name)
            });
            if undeclared {
                return Err(KdeclError::precondition(
                    "cannot apply configs because deletion of undefined configs is not enabled",
                ));
            }
        }

        info!(dry_run = self.opts.dry_run, "altering configs...");
        self.srv
            .alter_broker_configs(
                Some(id),
                &self.local_def.spec.configs,
                &self.ops,
                self.opts.dry_run,
            )
            .await
    }

    fn remote(&self) -> Result<&BrokerDefinition> {
        self.remote_def.as_ref().ok_or_else(|| {
            KdeclError::Invariant("remote definition accessed before fetch".to_string())
        })
    }
}
