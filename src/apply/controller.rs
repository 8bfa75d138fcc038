//! Apply controller
//!
//! Iterates definition documents from files or stdin, peeks the envelope of
//! each to dispatch to the matching applier, and aggregates the results.
//! File arguments are glob patterns, expanded per argument in sorted order.
//! Documents apply in input order; there is no cross-document parallelism.

use tracing::info;

use crate::apply::acl::AclApplier;
use crate::apply::broker::BrokerApplier;
use crate::apply::brokers::BrokersApplier;
use crate::apply::topic::TopicApplier;
use crate::apply::{parse_doc, ApplierOptions, ApplyResult, ApplyResults};
use crate::def::ResourceDefinition;
use crate::docparse::{self, DefinitionFormat};
use crate::error::{KdeclError, Result};
use crate::kafka::AdminOps;

/// Options for an apply invocation.
#[derive(Debug, Clone, Default)]
pub struct ApplyControllerOptions {
    pub definition_format: DefinitionFormat,
    pub dry_run: bool,
    pub reass_await_timeout: u64,
    pub continue_on_error: bool,
    pub exit_code: bool,
    pub json_output: bool,
}

pub struct ApplyController<'a, S: AdminOps> {
    srv: &'a S,
    args: Vec<String>,
    opts: ApplyControllerOptions,
}

impl<'a, S: AdminOps> ApplyController<'a, S> {
    pub fn new(srv: &'a S, args: Vec<String>, opts: ApplyControllerOptions) -> Self {
        ApplyController { srv, args, opts }
    }

    pub async fn execute(&self) -> Result<()> {
        let mut results = ApplyResults::default();

        if self.args.first().map(String::as_str) == Some("-") {
            info!("reading definition(s) from stdin");
            let docs = docparse::from_stdin(self.opts.definition_format)?;
            self.apply_docs(&docs, &mut results).await;
        } else {
            if self.args.is_empty() {
                return Err(KdeclError::Config("no definition files given".into()));
            }
            'files: for arg in &self.args {
                let mut match_count = 0usize;
                let matches = glob::glob(arg).map_err(|e| {
                    KdeclError::Config(format!("invalid file pattern {arg:?}: {e}"))
                })?;
                for entry in matches {
                    let path = entry.map_err(|e| KdeclError::Io(e.into_error()))?;
                    match_count += 1;

                    info!("reading definition(s) from file {path:?}");
                    let docs = docparse::from_file(&path, self.opts.definition_format)?;
                    self.apply_docs(&docs, &mut results).await;
                    if results.contains_err() && !self.opts.continue_on_error {
                        break 'files;
                    }
                }

                if match_count == 0 {
                    return Err(KdeclError::Config("no definition files found".into()));
                }
            }
        }

        if self.opts.json_output {
            println!("{}", results.to_json()?);
        }

        if results.contains_err() {
            return Err(KdeclError::precondition("apply completed with errors"));
        }
        if self.opts.exit_code && results.contains_unapplied_changes() {
            return Err(KdeclError::precondition("unapplied changes exist"));
        }
        Ok(())
    }

    async fn apply_docs(&self, docs: &[String], results: &mut ApplyResults) {
        for doc in docs {
            let result = self.apply_doc(doc).await;
            let failed = result.err.is_some();
            results.push(result);
            if failed && !self.opts.continue_on_error {
                return;
            }
        }
    }

    async fn apply_doc(&self, doc: &str) -> ApplyResult {
        let applier_opts = ApplierOptions {
            definition_format: self.opts.definition_format,
            dry_run: self.opts.dry_run,
            reass_await_timeout: self.opts.reass_await_timeout,
        };

        let envelope: ResourceDefinition =
            match parse_doc(doc, self.opts.definition_format).and_then(|def: ResourceDefinition| {
                def.validate()?;
                Ok(def)
            }) {
                Ok(def) => def,
                Err(e) => {
                    return ApplyResult {
                        err: Some(e.to_string()),
                        ..ApplyResult::default()
                    }
                }
            };

        match envelope.kind.as_str() {
            "topic" => TopicApplier::new(self.srv, doc, applier_opts).execute().await,
            "broker" => BrokerApplier::new(self.srv, doc, applier_opts).execute().await,
            "brokers" => BrokersApplier::new(self.srv, doc, applier_opts).execute().await,
            "acl" => AclApplier::new(self.srv, doc, applier_opts).execute().await,
            kind => ApplyResult {
                err: Some(format!("unsupported resource kind {kind:?}")),
                ..ApplyResult::default()
            },
        }
    }
}
