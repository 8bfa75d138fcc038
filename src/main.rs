//! kdecl - Declarative resource management for Apache Kafka clusters

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use kdecl::apply::controller::{ApplyController, ApplyControllerOptions};
use kdecl::config::ClientConfig;
use kdecl::docparse::DefinitionFormat;
use kdecl::export::acl::AclExporter;
use kdecl::export::broker::BrokerExporter;
use kdecl::export::brokers::BrokersExporter;
use kdecl::export::topic::TopicExporter;
use kdecl::export::{AssignmentsFormat, ExporterOptions, ExportResults};
use kdecl::kafka::Service;
use kdecl::Result;

/// Declarative resource management for Apache Kafka clusters
#[derive(Parser, Debug)]
#[command(name = "kdecl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative resource management for Apache Kafka clusters")]
struct Cli {
    /// Path to the client config file
    #[arg(long, global = true, env = "KDECL_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Client config override, e.g. -X seedBrokers=broker:9092
    #[arg(short = 'X', long = "config-opt", global = true, value_name = "KEY=VALUE")]
    config_opts: Vec<String>,

    /// Definition document format
    #[arg(long, global = true, value_enum, default_value = "yaml")]
    format: DefinitionFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply definition documents to the cluster
    Apply {
        /// Definition files, or "-" to read from stdin
        #[arg(required = true)]
        files: Vec<String>,

        /// Plan and diff without executing any change
        #[arg(long)]
        dry_run: bool,

        /// Seconds to await in-progress partition reassignments (0 disables)
        #[arg(long, default_value_t = 0)]
        reass_await_timeout: u64,

        /// Keep applying remaining documents after an error
        #[arg(long)]
        continue_on_error: bool,

        /// Exit with code 1 when unapplied changes exist
        #[arg(long)]
        exit_code: bool,

        /// Print apply results as JSON
        #[arg(long)]
        json_output: bool,
    },
    /// Export cluster resources as definition documents
    Export {
        /// Resource kind: topic, broker, brokers or acl
        #[arg(value_parser = ["topic", "broker", "brokers", "acl"])]
        kind: String,

        /// Regex matching resource names to export
        #[arg(long = "match", default_value = ".*")]
        match_regex: String,

        /// Regex matching resource names to exclude
        #[arg(long, default_value = ".^")]
        exclude_regex: String,

        /// Include internal topics
        #[arg(long)]
        include_internal: bool,

        /// Replica placement form for topic definitions
        #[arg(long, value_enum, default_value = "none")]
        assignments: AssignmentsFormat,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config_path.as_deref(), &cli.config_opts)?;
    let service = Service::new(config);

    match cli.command {
        Commands::Apply {
            files,
            dry_run,
            reass_await_timeout,
            continue_on_error,
            exit_code,
            json_output,
        } => {
            let opts = ApplyControllerOptions {
                definition_format: cli.format,
                dry_run,
                reass_await_timeout,
                continue_on_error,
                exit_code,
                json_output,
            };
            ApplyController::new(&service, files, opts).execute().await
        }
        Commands::Export {
            kind,
            match_regex,
            exclude_regex,
            include_internal,
            assignments,
        } => {
            let opts = ExporterOptions {
                match_regex,
                exclude_regex,
                include_internal,
                assignments,
            };
            let results = match kind.as_str() {
                "topic" => TopicExporter::new(&service, opts).execute().await?,
                "broker" => BrokerExporter::new(&service).execute().await?,
                "brokers" => BrokersExporter::new(&service).execute().await?,
                _ => AclExporter::new(&service, opts).execute().await?,
            };
            print_export(&results, cli.format)
        }
    }
}

fn print_export(results: &ExportResults, format: DefinitionFormat) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }
    match format {
        DefinitionFormat::Yaml => print!("{}", results.to_yaml()?),
        DefinitionFormat::Json => println!("{}", results.to_json()?),
    }
    Ok(())
}
