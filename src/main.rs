use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use draftsmith::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "draftsmith")]
#[command(version, about = "Multi-vendor cover letter workflow client")]
pub struct Cli {
    /// Path to draftsmith.toml (defaults to the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides config and environment)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Comma-separated vendor list (overrides config and environment)
    #[arg(long, global = true)]
    pub vendors: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a cover letter for a job posting
    Run {
        /// Text file with the job posting
        #[arg(short, long)]
        job: PathBuf,

        /// Bulk-approve READY cards instead of prompting per vendor
        #[arg(long)]
        yes: bool,
    },
    /// List the configured vendors
    Vendors,
    /// Show correction records between two text files
    Diff {
        original: PathBuf,
        edited: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let dir = std::env::current_dir().context("Failed to get current directory")?;
            Config::discover(&dir)?
        }
    };
    config.apply_env();
    config.apply_cli(cli.base_url.clone(), cli.vendors.clone());
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Run { job, yes } => cmd::cmd_run(config, job, *yes).await?,
        Commands::Vendors => cmd::cmd_vendors(&config)?,
        Commands::Diff { original, edited } => cmd::cmd_diff(original, edited)?,
    }
    Ok(())
}
