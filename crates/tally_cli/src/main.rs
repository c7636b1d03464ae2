//! Tally CLI - command-line interface for the forge activity reporter.

mod commands;
mod config;
mod progress;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::discover::OutputFormat;

#[derive(Parser)]
#[command(name = "tally")]
#[command(version)]
#[command(about = "Per-user activity stats across code forges")]
#[command(
    long_about = "Tally counts per-user contribution activity (issues, pull requests, commits, \
comments) across multiple code forges (GitHub, GitLab, Pagure) over a time \
window, and renders the totals as a Markdown report."
)]
#[command(after_long_help = r#"EXAMPLES
    Write the report for the configured window:
        $ tally report

    Report on one calendar year, GitHub only:
        $ tally report --year 2024 --forge github

    Find the repositories the tracked users touched:
        $ tally discover

    Check a config file without talking to any forge:
        $ tally validate -c ./tally.toml

CONFIGURATION
    Tally reads configuration from:
      1. ~/.config/tally/config.toml (or $XDG_CONFIG_HOME/tally/config.toml)
      2. ./tally.toml in the current directory
      3. Environment variables (TALLY_* prefix, e.g., TALLY_YEAR)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    TALLY_CONFIG              Config file path (same as --config)
    TALLY_YEAR                Report year (same as the `year` config key)

    Forge tokens are referenced from the config file as "$VAR" or "${VAR}",
    e.g. token = "$GITHUB_TOKEN".
"#)]
struct Cli {
    /// Config file path (replaces the default lookup)
    #[arg(short = 'c', long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate activity and write the Markdown report
    Report {
        /// Only query the named forge(s)
        #[arg(short = 'f', long = "forge")]
        forges: Vec<String>,
        /// Report on this calendar year instead of the configured window
        #[arg(long)]
        year: Option<i32>,
        /// Report file path (default: configured output, else report-<year>.md)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Find repositories the tracked users touched in the window
    Discover {
        /// Only query the named forge(s)
        #[arg(short = 'f', long = "forge")]
        forges: Vec<String>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
    /// Load and validate the configuration, print a summary
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing for non-TTY mode (structured logging)
    // Only initialize if not connected to a TTY
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("tally=info,tally_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Report {
            ref forges,
            year,
            ref output,
        } => {
            let config = config::load(config_path)?;
            commands::report::handle_report(&config, forges, year, output.clone()).await?;
        }
        Commands::Discover { ref forges, format } => {
            let config = config::load(config_path)?;
            commands::discover::handle_discover(&config, forges, format).await?;
        }
        Commands::Validate => {
            commands::validate::handle_validate(config_path)?;
        }
    }

    Ok(())
}
