//! # blip CLI
//!
//! Keeps a dataset in step with its upstream sources and answers
//! filter/sort queries over it.
//!
//! ## Usage
//!
//! ```bash
//! blip --config ./config/blip.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `blip init` | Create the SQLite database and run schema migrations |
//! | `blip refresh` | Run the updater job once (exit code reports the outcome) |
//! | `blip query` | Filter and sort stored records |
//! | `blip filters [attr]` | Show the filter vocabulary or one attribute's values |
//! | `blip runs` | Show recent refresh runs |
//! | `blip serve` | Start the HTTP query API |
//! | `blip schedule` | Run the built-in refresh scheduler |
//!
//! ## Exit codes
//!
//! `0` success (including partial runs), `1` configuration or other error,
//! `2` upstream fetch failure, `3` store write failure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use blip::config::{self, Config};
use blip::error::RefreshError;
use blip::filters;
use blip::migrate;
use blip::query::{QueryRequest, QueryService, SortRequest};
use blip::refresh;
use blip::scheduler;
use blip::server;
use blip::store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "blip",
    about = "Scheduled dataset refresh with a filter/sort query API",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/blip.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run the updater job once.
    ///
    /// Fetches every configured source, transforms the items and writes
    /// them to the store in one transaction.
    Refresh {
        /// Replay a saved upstream snapshot (JSON array) instead of the
        /// configured sources.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Fetch and transform only; report counts without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Query stored records.
    Query {
        /// Filter as `attribute=value`. Repeat to add values (OR within an
        /// attribute, AND across attributes).
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Attribute to sort by.
        #[arg(long)]
        sort: Option<String>,

        /// Sort direction: asc or desc.
        #[arg(long, requires = "sort")]
        order: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        offset: Option<usize>,
    },

    /// Show the filter vocabulary, or the legal values of one attribute.
    Filters { attribute: Option<String> },

    /// Show recent refresh runs.
    Runs {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Start the HTTP query API on `[server].bind`.
    Serve,

    /// Run the refresh scheduler until interrupted.
    Schedule,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => {
            Ok((k.trim().to_string(), v.trim().to_string()))
        }
        _ => Err(format!("expected attribute=value, got '{}'", s)),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<RefreshError>()
                .map(RefreshError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Refresh { snapshot, dry_run } => {
            refresh::run_refresh_cmd(&cfg, snapshot, dry_run).await?;
        }
        Commands::Query {
            filters,
            sort,
            order,
            limit,
            offset,
        } => {
            let mut request = QueryRequest {
                limit,
                offset,
                ..QueryRequest::default()
            };
            for (attribute, value) in filters {
                request.filters.entry(attribute).or_default().push(value);
            }
            request.sort = sort.map(|attribute| SortRequest {
                attribute,
                direction: order,
            });
            run_query(&cfg, &request).await?;
        }
        Commands::Filters { attribute } => {
            let service = open_service(&cfg).await?;
            filters::run_filters_cmd(&service, attribute.as_deref()).await?;
        }
        Commands::Runs { limit } => {
            refresh::list_runs(&cfg, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Schedule => {
            scheduler::run_scheduler(cfg).await?;
        }
    }

    Ok(())
}

async fn open_service(cfg: &Config) -> anyhow::Result<QueryService> {
    let store = SqliteStore::open(cfg).await?;
    Ok(QueryService::new(Arc::new(store), cfg.schema.clone(), &cfg.query))
}

async fn run_query(cfg: &Config, request: &QueryRequest) -> anyhow::Result<()> {
    let service = open_service(cfg).await?;
    let response = service.query(request).await?;

    if response.records.is_empty() {
        println!("No records found.");
        return Ok(());
    }

    for record in &response.records {
        println!("{}", record.id);
        for (name, value) in &record.attributes {
            let text = value.to_string();
            let shown: String = text.chars().take(100).collect();
            if shown.len() < text.len() {
                println!("    {}: {}...", name, shown);
            } else {
                println!("    {}: {}", name, shown);
            }
        }
        println!("    last_updated: {}", record.last_updated.to_rfc3339());
    }
    println!(
        "{} of {} matching records",
        response.records.len(),
        response.total
    );
    Ok(())
}
