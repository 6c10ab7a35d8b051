use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pluginsite::backend::{memory, Mapping, MemoryBackend, SearchBackend};
use pluginsite::config::{Config, Overrides};
use pluginsite::lifecycle::{IndexManager, RebuildJob};
use pluginsite::scheduler::Scheduler;
use pluginsite::search::SearchService;
use pluginsite::snapshot::SnapshotLoader;
use pluginsite::source::Sources;
use pluginsite::{CatalogBuilder, CatalogSnapshot, Fingerprints, Lookups, SearchOptions, SortBy};

/// Plugin catalog generator and search index maintainer
#[derive(Parser, Debug)]
#[command(name = "pluginsite")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every source and write a catalog snapshot
    Generate {
        /// Snapshot file to write
        #[arg(short, long, value_name = "FILE", default_value = "plugins.json.gz")]
        output: PathBuf,

        /// Read statistics from a local checkout
        #[arg(long, value_name = "PATH")]
        stats_path: Option<PathBuf>,
    },

    /// Keep the search index in sync with the published snapshot
    Serve {
        /// Snapshot URL or path
        #[arg(long, value_name = "URL")]
        data_file: Option<String>,

        /// Seconds between rebuild attempts
        #[arg(long, value_name = "SECS")]
        rebuild_interval: Option<u64>,
    },

    /// Search a snapshot file and print one page of results as JSON
    Search {
        /// Snapshot file to search
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,

        /// Free-text query
        #[arg(short, long)]
        query: Option<String>,

        /// relevance, name, title, installed, updated, trend or first_release
        #[arg(long, default_value = "relevance")]
        sort: SortBy,

        /// Comma-separated category ids
        #[arg(long)]
        categories: Option<String>,

        /// Comma-separated labels
        #[arg(long)]
        labels: Option<String>,

        /// Comma-separated maintainer ids or names
        #[arg(long)]
        maintainers: Option<String>,

        /// Exact required core version
        #[arg(long)]
        core: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: u32,

        #[arg(long, default_value_t = 1)]
        page: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so search output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let overrides = match &args.command {
        Command::Generate { stats_path, .. } => Overrides {
            stats_path: stats_path.clone(),
            ..Overrides::default()
        },
        Command::Serve {
            data_file,
            rebuild_interval,
        } => Overrides {
            data_file: data_file.clone(),
            rebuild_interval_secs: *rebuild_interval,
            ..Overrides::default()
        },
        Command::Search { .. } => Overrides::default(),
    };
    let config = Config::load(args.config.as_ref(), &overrides)?;

    match args.command {
        Command::Generate { output, .. } => generate(&config, output).await,
        Command::Serve { .. } => serve(&config).await,
        Command::Search {
            snapshot,
            query,
            sort,
            categories,
            labels,
            maintainers,
            core,
            limit,
            page,
        } => {
            let options = SearchOptions {
                query,
                sort_by: sort,
                categories: SearchOptions::split_list(categories.as_deref()),
                labels: SearchOptions::split_list(labels.as_deref()),
                maintainers: SearchOptions::split_list(maintainers.as_deref()),
                core,
                limit,
                page,
            };
            search(&config, snapshot, options).await
        }
    }
}

async fn generate(config: &Config, output: PathBuf) -> anyhow::Result<()> {
    let client = config.http.client()?;
    let sources = Sources::from_config(config, client).await?;
    let builder = CatalogBuilder::new(Lookups::bundled()?, config.scm.clone());
    let fingerprints = Fingerprints::new(Mapping::bundled()?.fingerprint(), memory::ENGINE_VERSION);

    let snapshot = builder.generate(&sources, &fingerprints).await?;
    snapshot.write_to(&output).await?;
    info!(
        "Generated {} plugins into {}",
        snapshot.plugins().len(),
        output.display()
    );
    Ok(())
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let backend: Arc<dyn SearchBackend> = Arc::new(MemoryBackend::new());
    let manager = Arc::new(IndexManager::from_config(
        backend,
        Mapping::bundled()?,
        &config.index,
    ));
    let loader = SnapshotLoader::new(config.http.client()?, &config.data_file);
    let job = Arc::new(RebuildJob::new(loader, manager.clone()));
    let scheduler = Arc::new(Scheduler::new(job, config.index.rebuild_interval()));

    info!("Serving snapshot from {}", config.data_file);
    let cancel = CancellationToken::new();
    let handle = scheduler.spawn(cancel.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();
    handle.await?;

    let status = manager.status().await?;
    info!(generation = ?status.generation, "Stopped");
    Ok(())
}

async fn search(config: &Config, snapshot: PathBuf, options: SearchOptions) -> anyhow::Result<()> {
    let snapshot = CatalogSnapshot::read_from(&snapshot).await?;
    let backend = Arc::new(MemoryBackend::new());
    let alias = &config.index.alias;

    // The snapshot is indexed as-is, whatever build generated it
    let manager = IndexManager::new(backend.clone(), Mapping::bundled()?, alias);
    let generation = manager.rebuild(&snapshot).await?;
    manager.publish(&generation).await?;

    let service = SearchService::new(backend, alias, Lookups::bundled()?);
    let result = service.search(&options).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
