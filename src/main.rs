//! # Catalog Watch CLI (`cwatch`)
//!
//! ## Usage
//!
//! ```bash
//! cwatch --config ./config/catalog-watch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cwatch init` | Create the SQLite database and run schema migrations |
//! | `cwatch run` | Poll the listing and process detail pages until Ctrl-C |
//! | `cwatch poll` | Run one listing cycle |
//! | `cwatch tick` | Process at most one due item |
//! | `cwatch probe` | Print the entries parsed from one listing page |
//! | `cwatch inspect <url>` | Print extracted text and verdict for a detail page |
//! | `cwatch stats` | Show item counts per status |
//! | `cwatch report` | Send an activity report for the last N days |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use catalog_watch::{config, inspect, logging, migrate, pipeline, stats};

/// Catalog Watch CLI: discover new catalog items and notify on matches.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/catalog-watch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cwatch",
    about = "Catalog Watch: discover new catalog items and notify once per match",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog-watch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the items and notifications
    /// tables. Safe to run repeatedly.
    Init,

    /// Run the listing poller and the detail worker until interrupted.
    Run,

    /// Run a single listing cycle and exit.
    Poll,

    /// Process at most one due item and exit.
    Tick,

    /// Fetch one listing page and print the parsed entries. Writes nothing.
    Probe {
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: u32,
    },

    /// Fetch a detail page and print the extracted text and verdict.
    /// Writes nothing and sends no notification.
    Inspect {
        /// Detail page URL.
        url: String,

        /// Title used for the keyword title fallback.
        #[arg(long)]
        title: Option<String>,
    },

    /// Show item counts per status and queue state.
    Stats,

    /// Print the activity report and send it through the configured sink.
    Report {
        /// Window in days. Defaults to `notify.report_interval_days`.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run => {
            pipeline::run_watch(&cfg).await?;
        }
        Commands::Poll => {
            pipeline::run_poll(&cfg).await?;
        }
        Commands::Tick => {
            pipeline::run_tick(&cfg).await?;
        }
        Commands::Probe { page } => {
            inspect::run_probe(&cfg, page).await?;
        }
        Commands::Inspect { url, title } => {
            inspect::run_inspect(&cfg, &url, title.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Report { days } => {
            pipeline::run_report(&cfg, days).await?;
        }
    }

    Ok(())
}
