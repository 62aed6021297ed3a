use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opds_aggregator::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "opds-aggregator",
    version,
    about = "OPDS gateway that merges upstream catalogs into one proxied catalog",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./config.toml or the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the aggregated catalog
    Serve,

    /// Crawl sources once and print what was found
    Crawl {
        /// Source slug (all sources when omitted)
        slug: Option<String>,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Serve => {
            config.validate().context("Invalid configuration")?;
            tracing::info!(sources = config.feeds.len(), "Starting serve command");
            commands::serve(config).await?;
        }

        Commands::Crawl { slug } => {
            config.validate().context("Invalid configuration")?;
            tracing::info!(slug = ?slug, "Starting crawl command");
            commands::crawl(config, slug).await?;
        }

        Commands::CheckConfig => {
            commands::check_config(&config)?;
        }
    }

    Ok(())
}

/// Load the explicit file, else the first default file, else the environment alone
fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path.map(PathBuf::from).or_else(Config::find) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(Config::from_env()),
    }
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("opds_aggregator=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("{level},hyper=warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
