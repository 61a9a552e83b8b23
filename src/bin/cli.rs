//! Gerrit crawler CLI
//!
//! Local execution entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gerrit_crawler::{
    error::Result,
    models::{Config, StoreConfig, StoreKind},
    pipeline,
    utils::CancelToken,
};

/// Gerrit change crawler
#[derive(Parser, Debug)]
#[command(
    name = "gerrit-crawler",
    version,
    about = "Crawl Gerrit code reviews into local stores"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl changes matching the configured query
    Crawl {
        /// Override the change search query
        #[arg(short, long)]
        query: Option<String>,

        /// Maximum number of pages to fetch
        #[arg(short, long)]
        pages: Option<usize>,

        /// Changes per page
        #[arg(long)]
        page_size: Option<usize>,

        /// Concurrent diff downloads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Additionally write changes as JSON lines to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Download diffs of every patch set, not only the latest
        #[arg(long)]
        all_revisions: bool,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging; `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Peek at the logging level; `load_or_default` reports errors once logging is up.
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        Config::load(&cli.config)
            .map(|config| config.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    };
    init_logging(&level);

    let mut config = Config::load_or_default(&cli.config);

    match cli.command {
        Command::Crawl {
            query,
            pages,
            page_size,
            workers,
            output,
            all_revisions,
        } => {
            if let Some(query) = query {
                config.crawl.query = query;
            }
            if let Some(pages) = pages {
                config.crawl.max_pages = pages;
            }
            if let Some(page_size) = page_size {
                config.crawl.page_size = page_size;
            }
            if let Some(workers) = workers {
                config.crawl.workers = workers;
            }
            if all_revisions {
                config.crawl.last_revision_only = false;
            }
            if let Some(path) = output {
                config.stores.push(StoreConfig {
                    kind: StoreKind::JsonFile { path },
                    clear_before: false,
                    skip_existing: false,
                });
            }

            let cancel = CancelToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, finishing the current change...");
                    on_signal.cancel();
                }
            });

            let stats = pipeline::run_crawler(&config, cancel).await?;
            if stats.cancelled {
                log::warn!("Crawl cancelled.");
            } else {
                log::info!("Crawl complete!");
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK ({} stores)", config.stores.len());
        }
    }

    log::info!("Done!");

    Ok(())
}
