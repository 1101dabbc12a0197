//! # Ride Report CLI (`ridereport`)
//!
//! Generates the daily ride report and emails it.
//!
//! ## Usage
//!
//! ```bash
//! ridereport --config ./config/ridereport.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ridereport init` | Create the SQLite database and run schema migrations |
//! | `ridereport run` | Generate and deliver one report now |
//! | `ridereport preview` | Render a report without sending it |
//! | `ridereport schedule` | Run daily at `[schedule].fire_at` until interrupted |
//! | `ridereport history` | Show recent run outcomes |
//!
//! ## Examples
//!
//! ```bash
//! # Report on a specific day
//! ridereport run --date 2024-03-04 --config ./config/ridereport.toml
//!
//! # Inspect the HTML before enabling the schedule
//! ridereport preview --output ./data/preview.html
//! ```
//!
//! `run` exits with status 1 unless the report was delivered.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ride_report::{config, history, migrate, pipeline};

/// Daily ride report: summarize yesterday's rides and email them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ridereport.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ridereport",
    about = "Daily ride report generator and mailer",
    version,
    long_about = "Reads the previous local day's rides from SQLite, renders an HTML summary \
    and emails it to a fixed recipient, retrying transient failures with bounded backoff."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ridereport.toml`.
    #[arg(long, global = true, default_value = "./config/ridereport.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (riders, bikes, rides, readings, report_runs). Safe to run
    /// repeatedly.
    Init,

    /// Generate and deliver one report now.
    ///
    /// Reports on the previous local day, or on `--date` when given.
    Run {
        /// Day to report on (YYYY-MM-DD), in the configured timezone.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print the run result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Render a report without sending it.
    Preview {
        /// Day to report on (YYYY-MM-DD), in the configured timezone.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Write the HTML here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fire a run every day at `[schedule].fire_at` until interrupted.
    Schedule,

    /// Show recent run outcomes, newest first.
    History {
        /// Maximum number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Schedule => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run { date, json } => {
            let result = pipeline::run_report(&cfg, date, json).await?;
            if !result.is_delivered() {
                std::process::exit(1);
            }
        }
        Commands::Preview { date, output } => {
            pipeline::run_preview(&cfg, date, output.as_deref()).await?;
        }
        Commands::Schedule => {
            pipeline::run_schedule(&cfg).await?;
        }
        Commands::History { limit, json } => {
            history::run_history(&cfg, limit, json).await?;
        }
    }

    Ok(())
}
