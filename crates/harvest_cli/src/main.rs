use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use harvest_core::{recent_runs, Harness, Store};
use harvest_postgres::PostgresStore;
use harvest_reddit::{RedditClient, RedditCredentials, SavedPostsCollector};
use harvest_sqlite::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{HarvestConfig, StoreKind};

#[derive(Parser)]
#[command(
    name = "harvest",
    version,
    about = "Run data collectors and track every run in a database"
)]
struct Cli {
    /// Config file (default: ./harvest.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Backend holding the run-tracking tables (overrides `store` in the config file)
    #[arg(long, global = true, value_enum)]
    store: Option<StoreKind>,

    /// SQLite database file (overrides `[sqlite] path`)
    #[arg(long, global = true, value_name = "PATH")]
    sqlite_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store newly saved Reddit posts, recording the run
    Reddit(RedditArgs),
    /// List recent runs, newest first
    Runs(RunsArgs),
}

#[derive(Parser)]
struct RedditArgs {
    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct RunsArgs {
    /// Number of runs to show
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Print the runs as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(cli: &Cli) -> anyhow::Result<HarvestConfig> {
    let config = HarvestConfig::load(cli.config.as_deref())?
        .apply_cli(cli.store, cli.sqlite_path.clone())
        .apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn open_store(config: &HarvestConfig) -> anyhow::Result<Box<dyn Store>> {
    let store: Box<dyn Store> = match config.store {
        StoreKind::Postgres => Box::new(PostgresStore::new(config.postgres.clone())?),
        StoreKind::Sqlite => Box::new(
            SqliteStore::open(&config.sqlite.path)
                .with_context(|| format!("open {}", config.sqlite.path.display()))?,
        ),
    };
    tracing::debug!(store = store.store_name(), "store selected");
    Ok(store)
}

fn run_reddit(args: RedditArgs, config: &HarvestConfig) -> anyhow::Result<()> {
    let credentials = RedditCredentials::from_env().context("reddit credentials")?;
    let client = RedditClient::new(credentials, config.reddit.clone())?;
    let store = open_store(config)?;
    let harness = Harness::new(store.as_ref(), config.tables.clone())?;

    let report = harness
        .run(&mut SavedPostsCollector::new(client))
        .context("run tracking failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render::report(&report));
    }
    Ok(())
}

fn run_runs(args: RunsArgs, config: &HarvestConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let summaries = recent_runs(store.as_ref(), &config.tables, args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print!("{}", render::runs(&summaries));
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Reddit(args) => run_reddit(args, &config),
        Commands::Runs(args) => run_runs(args, &config),
    };

    if let Err(err) = result {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
