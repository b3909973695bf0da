//! Assay CLI - inspect datasources, their assets and batches

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use assay_connectors::{default_registry, Datasource, DatasourceConfig};
use assay_core::{BatchRequest, PartitionDefinition, PartitionRequest};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_DATASOURCE_NAME: &str = "datasource";

#[derive(Parser)]
#[command(name = "assay")]
#[command(about = "Inspect data connectors and resolve batch requests")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the datasource JSON document
    #[arg(short, long, global = true, env = "ASSAY_CONFIG", default_value = "datasource.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh every connector and print its self-check report
    SelfCheck {
        /// Only check this data connector
        #[arg(long)]
        connector: Option<String>,
    },

    /// List data asset names per connector
    Assets,

    /// Resolve a batch request and print the matching batch definitions
    ListBatches {
        #[arg(long)]
        connector: String,

        #[arg(long)]
        asset: String,

        /// Partition identifier filter, repeatable
        #[arg(short, long = "partition", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        partitions: Vec<(String, String)>,

        /// Pick one batch by position in sort order (negative counts from the end)
        #[arg(long, allow_hyphen_values = true)]
        index: Option<i64>,

        /// Keep at most this many batches
        #[arg(long)]
        limit: Option<usize>,

        /// Load each batch through the execution engine and report row counts
        #[arg(long)]
        load: bool,
    },

    /// List references no partitioner matched
    Unmatched {
        #[arg(long)]
        connector: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let datasource = load_datasource(&cli.config)?;

    match cli.command {
        Commands::SelfCheck { connector } => self_check(&datasource, connector.as_deref()).await?,
        Commands::Assets => list_assets(&datasource).await?,
        Commands::ListBatches {
            connector,
            asset,
            partitions,
            index,
            limit,
            load,
        } => {
            let request = BatchRequest::for_asset(datasource.name(), connector, asset)
                .with_partition_request(PartitionRequest {
                    partition_identifiers: partitions.into_iter().collect::<PartitionDefinition>(),
                    index,
                    limit,
                });
            list_batches(&datasource, &request, load).await?;
        }
        Commands::Unmatched { connector } => list_unmatched(&datasource, &connector).await?,
    }

    Ok(())
}

fn load_datasource(path: &Path) -> Result<Datasource> {
    info!("Loading datasource from {:?}", path);
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read datasource document {:?}", path))?;
    let document: Value = serde_json::from_str(&content)
        .with_context(|| format!("{:?} is not valid JSON", path))?;
    let config: DatasourceConfig = serde_json::from_value(document.clone())
        .with_context(|| format!("invalid datasource document {:?}", path))?;
    let name = config
        .name
        .unwrap_or_else(|| DEFAULT_DATASOURCE_NAME.to_string());

    let datasource = Datasource::from_config(&name, &document, &default_registry())?;
    Ok(datasource)
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

async fn self_check(datasource: &Datasource, only: Option<&str>) -> Result<()> {
    let names: Vec<String> = match only {
        Some(name) => vec![name.to_string()],
        None => datasource
            .data_connector_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    };

    for name in names {
        let report = datasource.data_connector(&name)?.self_check().await?;
        println!("=== {} ===", name);
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn list_assets(datasource: &Datasource) -> Result<()> {
    for (connector, assets) in datasource.get_available_data_asset_names().await? {
        println!("{}:", connector);
        for asset in assets {
            println!("  {}", asset);
        }
    }
    Ok(())
}

async fn list_batches(datasource: &Datasource, request: &BatchRequest, load: bool) -> Result<()> {
    if load {
        let batches = datasource.get_batch_list_from_batch_request(request).await?;
        for batch in &batches {
            println!(
                "{}  rows={}  loaded_at={}",
                batch.batch_definition,
                batch.data.num_rows(),
                batch.batch_markers.load_time.to_rfc3339()
            );
        }
        println!("\n{} batch(es)", batches.len());
        return Ok(());
    }

    let connector_name = request
        .data_connector_name
        .as_deref()
        .context("batch request has no data connector")?;
    let definitions = datasource
        .data_connector(connector_name)?
        .get_batch_definition_list_from_batch_request(request)
        .await?;
    for definition in &definitions {
        println!("{}", definition);
    }
    println!("\n{} batch definition(s)", definitions.len());
    Ok(())
}

async fn list_unmatched(datasource: &Datasource, connector: &str) -> Result<()> {
    let connector = datasource.data_connector(connector)?;
    connector.refresh_data_references_cache().await?;
    let unmatched = connector.get_unmatched_data_references()?;
    for reference in &unmatched {
        println!("{}", reference);
    }
    println!("\n{} unmatched reference(s)", unmatched.len());
    Ok(())
}
