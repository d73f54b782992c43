//! CLI entry point for the fleetgraph-discover fleet discovery run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, EnvFilter};

use fleetgraph_graph::{GraphClient, GraphConfig, GraphStore, MemoryStore};

use fleetgraph_discover::config::{settings, DiscoverConfig};
use fleetgraph_discover::executor::SshExecutor;
use fleetgraph_discover::inventory::load_inventory;
use fleetgraph_discover::locks::IdentityLocks;
use fleetgraph_discover::plugins::{DirectoryPluginSource, PluginSource};
use fleetgraph_discover::reconcile::Reconciler;
use fleetgraph_discover::runner::FleetRunner;

#[derive(Parser)]
#[command(name = "fleetgraph-discover")]
#[command(about = "Discover servers over SSH and sync them into the fleet graph")]
struct Cli {
    /// Discovery list, one `vm_name,ip,dns_name` per line.
    #[arg(long)]
    inventory: Option<String>,

    /// Directory of plugin descriptors.
    #[arg(long)]
    plugins: Option<String>,

    /// Also write logs to `<base>_<YYYYDDDHHMMSS>.log`.
    #[arg(long)]
    log_file: Option<String>,

    /// Maximum servers discovered at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Reconcile against an in-memory graph and only log planned changes.
    #[arg(long)]
    dry_run: bool,

    /// Config file prefix (default: fleetgraph).
    #[arg(short, long, default_value = "fleetgraph")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let mut discover_config = DiscoverConfig::load(&cli.config)?;
    if let Some(inventory) = cli.inventory {
        discover_config.inventory = inventory;
    }
    if let Some(plugins) = cli.plugins {
        discover_config.plugin_dir = plugins;
    }
    if let Some(concurrency) = cli.concurrency {
        discover_config.max_concurrent_servers = concurrency;
    }

    let store: Arc<dyn GraphStore> = if cli.dry_run {
        tracing::info!("Dry run: changes are planned against an empty in-memory graph");
        Arc::new(MemoryStore::new())
    } else {
        let graph_config = load_graph_config(&cli.config);
        Arc::new(GraphClient::connect(&graph_config).await?)
    };

    let plugins = DirectoryPluginSource::new(&discover_config.plugin_dir).load()?;
    let servers = load_inventory(Path::new(&discover_config.inventory)).await?;

    let reconciler = Reconciler::new(
        store,
        Arc::new(IdentityLocks::new()),
        discover_config.field_delimiter,
    );
    let runner = FleetRunner::new(
        Arc::new(SshExecutor::new(&discover_config)),
        Arc::new(reconciler),
        plugins,
        discover_config.subject_class.as_str(),
        discover_config.max_concurrent_servers,
    );

    let summary = runner.run(servers).await?;
    tracing::info!(summary = %serde_json::to_string(&summary)?, "Run summary");

    Ok(())
}

/// JSON logs to stdout, and to a timestamped file when asked.
fn init_tracing(log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match log_file {
        Some(base) => {
            let path = format!("{base}_{}.log", chrono::Local::now().format("%Y%j%H%M%S"));
            let file = std::fs::File::create(&path)?;
            BoxMakeWriter::new(std::io::stdout.and(Arc::new(file)))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    fmt().with_env_filter(filter).with_writer(writer).json().init();
    Ok(())
}

fn load_graph_config(file_prefix: &str) -> GraphConfig {
    let defaults = GraphConfig::default();
    match settings(file_prefix) {
        Ok(c) => GraphConfig {
            uri: c.get_string("neo4j.uri").unwrap_or(defaults.uri),
            user: c.get_string("neo4j.user").unwrap_or(defaults.user),
            password: c.get_string("neo4j.password").unwrap_or(defaults.password),
            max_connections: c
                .get::<u32>("neo4j.max_connections")
                .unwrap_or(defaults.max_connections),
            fetch_size: c
                .get::<usize>("neo4j.fetch_size")
                .unwrap_or(defaults.fetch_size),
            query_timeout: c
                .get::<u64>("neo4j.query_timeout_secs")
                .map(Duration::from_secs)
                .unwrap_or(defaults.query_timeout),
        },
        Err(_) => defaults,
    }
}
