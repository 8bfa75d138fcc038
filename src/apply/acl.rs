//! ACL applier
//!
//! Synchronizes the ACL rules of one resource. Entry groups are multiplied
//! out into concrete rules; both sides are canonicalized to sorted singleton
//! groups so the textual diff and the operation plan agree. The ACL protocol
//! has no validate-only mode, so a dry run plans without executing.

use tracing::{debug, error, info};

use crate::apply::{parse_doc, render_diff, ApplierOptions, ApplyResult};
use crate::def::acl::{canonical_entry_groups, expand_entry_groups, AclEntry};
use crate::def::AclDefinition;
use crate::diff::json_diff;
use crate::error::{KdeclError, Result};
use crate::kafka::AdminOps;

pub struct AclApplier<'a, S: AdminOps> {
    srv: &'a S,
    def_doc: &'a str,
    opts: ApplierOptions,

    local_def: AclDefinition,
    remote_entries: Vec<AclEntry>,
    additions: Vec<AclEntry>,
    deletions: Vec<AclEntry>,

    res: ApplyResult,
}

impl<'a, S: AdminOps> AclApplier<'a, S> {
    pub fn new(srv: &'a S, def_doc: &'a str, opts: ApplierOptions) -> Self {
        AclApplier {
            srv,
            def_doc,
            opts,
            local_def: AclDefinition::default(),
            remote_entries: Vec::new(),
            additions: Vec::new(),
            deletions: Vec::new(),
            res: ApplyResult::default(),
        }
    }

    pub async fn execute(mut self) -> ApplyResult {
        match self.apply().await {
            Ok(()) => {
                let pending = !self.additions.is_empty() || !self.deletions.is_empty();
                if pending && !self.opts.dry_run {
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

        debug!("validating acl definition");
        self.local_def.validate()?;

        // Canonical form: one sorted singleton group per concrete rule.
        let local_entries = expand_entry_groups(&self.local_def.spec.acls);
        self.local_def.spec.acls = canonical_entry_groups(&local_entries);
        self.res.local_def = Some(serde_json::to_value(&self.local_def)?);

        let name = self.local_def.resource.metadata.name.clone();
        let resource_type = self.local_def.resource_type().to_string();

        info!("fetching acls for {resource_type} {name:?}...");
        self.remote_entries = self
            .srv
            .describe_resource_acls(&resource_type, &name)
            .await?;

        self.additions = local_entries
            .iter()
            .filter(|e| !self.remote_entries.contains(e))
            .cloned()
            .collect();
        if self.local_def.spec.delete_undefined_acls {
            self.deletions = self
                .remote_entries
                .iter()
                .filter(|e| !local_entries.contains(e))
                .cloned()
                .collect();
        }

        self.update_apply_result(&local_entries)?;

        let pending = !self.additions.is_empty() || !self.deletions.is_empty();
        if pending {
            info!("acl {name:?} diff (remote -> local):");
            print!("{}", render_diff(&self.res.diff));

            if self.opts.dry_run {
                info!("skipped applying acls (dry-run)");
            } else {
                if !self.additions.is_empty() {
                    info!("creating {} acl(s)...", self.additions.len());
                    self.srv
                        .create_resource_acls(&resource_type, &name, &self.additions)
                        .await?;
                }
                if !self.deletions.is_empty() {
                    info!("deleting {} undefined acl(s)...", self.deletions.len());
                    self.srv
                        .delete_resource_acls(&resource_type, &name, &self.deletions)
                        .await?;
                }
            }
            info!(dry_run = self.opts.dry_run, "completed apply for acl {name:?}");
        } else {
            info!("no changes to apply for acl {name:?}");
        }
        Ok(())
    }

    fn update_apply_result(&mut self, local_entries: &[AclEntry]) -> Result<()> {
        // The normalized remote keeps entries that are locally declared, plus
        // the ones the plan will delete; undeclared entries that are being
        // preserved stay out of the comparison.
        let kept: Vec<AclEntry> = if self.local_def.spec.delete_undefined_acls {
            self.remote_entries.clone()
        } else {
            self.remote_entries
                .iter()
                .filter(|e| local_entries.contains(e))
                .cloned()
                .collect()
        };

        let mut remote_copy = AclDefinition::new(
            &self.local_def.resource.metadata.name,
            self.local_def.resource_type(),
            canonical_entry_groups(&kept),
        );
        remote_copy.spec.delete_undefined_acls = self.local_def.spec.delete_undefined_acls;

        let diff = json_diff(Some(&remote_copy), &self.local_def)?;
        let diff_exists = !diff.is_empty();
        let pending = !self.additions.is_empty() || !self.deletions.is_empty();
        if diff_exists != pending {
            return Err(KdeclError::Invariant(format!(
                "existence of diff was {diff_exists}, but expected {pending}"
            )));
        }

        self.res.remote_def = Some(serde_json::to_value(&remote_copy)?);
        self.res.diff = diff;
        Ok(())
    }
}
