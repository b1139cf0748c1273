use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use pds_catalog::{Catalog, CatalogConfig, ParameterPolicy};
use pds_sketch::{Cardinal, Filter};
use pds_utils::time::time_format;
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Debug, Parser)]
#[clap(about, version, author)]
struct Config {
    /// JSON config file; flags below override its fields.
    #[clap(long)]
    pub config: Option<PathBuf>,

    #[clap(long)]
    pub database: Option<PathBuf>,

    /// Remote engine URL, e.g. redis://127.0.0.1:6379
    #[clap(long)]
    pub remote_url: Option<String>,

    /// Catalog a filter re-declared with other tuning instead of rejecting it.
    #[clap(long)]
    pub warn_on_conflict: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Declare a filter, or fetch it if already cataloged.
    CreateFilter(FilterArgs),
    /// Add values to a cataloged filter.
    FilterAdd {
        #[clap(flatten)]
        filter: FilterArgs,
        #[clap(required = true)]
        values: Vec<String>,
    },
    /// Test a value against a cataloged filter.
    FilterExists {
        #[clap(flatten)]
        filter: FilterArgs,
        value: String,
    },
    /// Declare a counter, or fetch it if already cataloged.
    CreateCardinal(CardinalArgs),
    /// Add values to a cataloged counter.
    CardinalAdd {
        #[clap(flatten)]
        cardinal: CardinalArgs,
        #[clap(required = true)]
        values: Vec<String>,
    },
    /// Print the distinct-count estimate of a cataloged counter.
    CardinalEstimate(CardinalArgs),
}

impl Command {
    fn variant(&self) -> &str {
        match self {
            Command::CreateFilter(args)
            | Command::FilterAdd { filter: args, .. }
            | Command::FilterExists { filter: args, .. } => &args.filter_type,
            Command::CreateCardinal(args)
            | Command::CardinalAdd { cardinal: args, .. }
            | Command::CardinalEstimate(args) => &args.cardinal_type,
        }
    }
}

#[derive(Clone, Debug, Args)]
struct FilterArgs {
    /// EMBEDDED_FILTER or REMOTE_FILTER
    #[clap(long = "type")]
    pub filter_type: String,
    #[clap(long)]
    pub key: String,
    #[clap(long)]
    pub capacity: u64,
    #[clap(long)]
    pub error_rate: f64,
}

#[derive(Clone, Debug, Args)]
struct CardinalArgs {
    /// EMBEDDED_COUNTER or REMOTE_COUNTER
    #[clap(long = "type")]
    pub cardinal_type: String,
    #[clap(long)]
    pub key: String,
}

impl Config {
    fn catalog_config(&self) -> anyhow::Result<CatalogConfig> {
        let mut config = match &self.config {
            Some(path) => CatalogConfig::from_file(path)?,
            None => CatalogConfig::default(),
        };
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
        if let Some(url) = &self.remote_url {
            config.remote_url = Some(url.clone());
        }
        if self.warn_on_conflict {
            config.parameter_policy = ParameterPolicy::Warn;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // logs go to stderr, stdout carries the JSON result
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Config::parse();
    let config = cli.catalog_config()?;
    debug!(?config, "loaded config");
    config.require_engine(cli.command.variant())?;

    let catalog = Catalog::open(&config).await?;
    let output = run(&catalog, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

async fn run(catalog: &Catalog, command: Command) -> anyhow::Result<Value> {
    let output = match command {
        Command::CreateFilter(args) => {
            let filter = catalog
                .create_filter(&args.filter_type, &args.key, args.capacity, args.error_rate)
                .await?;
            filter_json(catalog, filter.as_ref()).await?
        }
        Command::FilterAdd { filter: args, values } => {
            let filter = open_filter(catalog, &args).await?;
            let mut added = 0;
            for value in &values {
                if filter.add(value.as_bytes()).await {
                    added += 1;
                }
            }
            persist_filter(catalog, &filter).await?;
            json!({ "key": args.key, "values": values.len(), "added": added })
        }
        Command::FilterExists { filter: args, value } => {
            let filter = open_filter(catalog, &args).await?;
            let exists = filter.exists(value.as_bytes()).await;
            json!({ "key": args.key, "value": value, "exists": exists })
        }
        Command::CreateCardinal(args) => {
            let cardinal = catalog
                .create_cardinal(&args.cardinal_type, &args.key)
                .await?;
            cardinal_json(cardinal.as_ref()).await
        }
        Command::CardinalAdd { cardinal: args, values } => {
            let cardinal = catalog
                .get_cardinal(&args.cardinal_type, &args.key)
                .await?;
            for value in &values {
                cardinal.add(value.as_bytes()).await;
            }
            persist_cardinal(catalog, &cardinal).await?;
            cardinal_json(cardinal.as_ref()).await
        }
        Command::CardinalEstimate(args) => {
            let cardinal = catalog
                .get_cardinal(&args.cardinal_type, &args.key)
                .await?;
            cardinal_json(cardinal.as_ref()).await
        }
    };
    Ok(output)
}

async fn open_filter(catalog: &Catalog, args: &FilterArgs) -> anyhow::Result<Arc<dyn Filter>> {
    let filter = catalog
        .get_filter(&args.filter_type, &args.key, args.capacity, args.error_rate)
        .await?;
    Ok(filter)
}

/// Remote sketches live in the engine; only embedded ones need a snapshot.
async fn persist_filter(catalog: &Catalog, filter: &Arc<dyn Filter>) -> anyhow::Result<()> {
    if filter.physical_key().is_none() {
        catalog.save_filter(filter.as_ref()).await?;
        info!(key = %filter.descriptor().key, "persisted filter snapshot");
    }
    Ok(())
}

async fn persist_cardinal(catalog: &Catalog, cardinal: &Arc<dyn Cardinal>) -> anyhow::Result<()> {
    if cardinal.physical_key().is_none() {
        catalog.save_cardinal(cardinal.as_ref()).await?;
        info!(key = %cardinal.descriptor().key, "persisted cardinal snapshot");
    }
    Ok(())
}

async fn filter_json(catalog: &Catalog, filter: &dyn Filter) -> anyhow::Result<Value> {
    let d = filter.descriptor();
    let record = catalog.repository().get_filter(&d.identity()).await?;
    Ok(json!({
        "type": d.filter_type.as_str(),
        "key": d.key,
        "max_cardinality": d.max_cardinality,
        "max_fp": d.max_fp,
        "hash_func_num": d.hash_func_num,
        "hash_func_type": d.hash_func_type,
        "physical_key": filter.physical_key(),
        "created_at": record.created_at.map(time_format),
    }))
}

async fn cardinal_json(cardinal: &dyn Cardinal) -> Value {
    let d = cardinal.descriptor();
    json!({
        "type": d.cardinal_type.as_str(),
        "key": d.key,
        "physical_key": cardinal.physical_key(),
        "estimate": cardinal.estimate().await,
    })
}
