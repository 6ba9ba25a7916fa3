//! FoodFest precache worker host.
//!
//! Drives the worker lifecycle against a local cache database.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the site from a local build and take over
//! foodfest-sw --site ./public update
//!
//! # Or install now and activate later
//! foodfest-sw --site ./public install
//! foodfest-sw activate
//!
//! # Ask the worker for a page (served from cache when precached)
//! foodfest-sw fetch ./index.html
//!
//! # Show buckets in the cache database
//! foodfest-sw buckets
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use foodfest_common::{init_logging, LogConfig, LogFormat};
use foodfest_sw::ResponseSource;
use tracing::error;

mod shell;

use shell::{Shell, ShellConfig};

#[derive(Parser)]
#[command(name = "foodfest-sw")]
#[command(version, about = "Precache and serve the FoodFest site offline")]
struct Cli {
    /// JSON precache configuration (prefix, version, scope, manifest)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Serve from this build directory instead of over HTTP
    #[arg(long, global = true)]
    site: Option<PathBuf>,

    /// Log output: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty", value_parser = parse_log_format)]
    log_format: LogFormat,

    /// Tracing filter directives, overriding RUST_LOG and -v
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache every manifest asset into the current bucket
    Install,

    /// Activate a worker installed by an earlier run
    Activate,

    /// Install, then activate and delete stale buckets
    Update,

    /// Run fetch interception for a path or URL
    Fetch {
        /// Path relative to the scope (./events.html) or a full URL
        target: String,
    },

    /// List buckets in the cache database
    Buckets,

    /// Print the effective configuration
    Config,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: foodfest_common::FoodFestError| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format);
    if let Some(ref filter) = cli.log_filter {
        log_config = log_config.with_filter(filter.as_str());
    }
    if let Err(e) = init_logging(log_config) {
        eprintln!("{e}");
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ShellConfig::resolve(cli.config.as_deref(), cli.db, cli.site)
        .context("loading configuration")?;

    let open = |config| Shell::open(config).context("opening cache database");

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Install => {
            let shell = open(config)?;
            let report = shell.install().await.context("install failed")?;
            println!(
                "Installed {} ({} assets, {} bytes)",
                report.cache_name, report.assets, report.bytes
            );
        }

        Commands::Activate => {
            let shell = open(config)?;
            let deleted = shell.activate().await.context("activation failed")?;
            println!("Active {}", shell.config().precache.cache_name());
            for name in deleted {
                println!("  deleted {name}");
            }
        }

        Commands::Update => {
            let shell = open(config)?;
            let (report, deleted) = shell.update().await.context("update failed")?;
            println!(
                "Active {} ({} assets, {} bytes)",
                report.cache_name, report.assets, report.bytes
            );
            for name in deleted {
                println!("  deleted {name}");
            }
        }

        Commands::Fetch { target } => {
            let shell = open(config)?;
            let outcome = shell
                .fetch(&target)
                .await
                .with_context(|| format!("fetch {target} failed"))?;
            let source = match outcome.source {
                ResponseSource::Cache => "cache",
                ResponseSource::Network => "network",
            };
            println!("{} {}", outcome.response.status, outcome.response.url);
            println!("  source:       {source}");
            println!(
                "  content-type: {}",
                outcome.response.content_type().unwrap_or("-")
            );
            println!("  bytes:        {}", outcome.response.body.len());
        }

        Commands::Buckets => {
            let shell = open(config)?;
            let current = shell.config().precache.cache_name();
            let buckets = shell.buckets().await?;
            if buckets.is_empty() {
                println!("No buckets");
            }
            for bucket in buckets {
                let marker = if bucket.name == current { "*" } else { " " };
                let created = bucket
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{marker} {:<32} {:>5} entries  {created}",
                    bucket.name, bucket.entries
                );
            }
        }
    }

    Ok(())
}
