use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Waypoint self-service operator tool")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "WAYPOINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Delete expired login flows (one bounded sweep; run from a scheduler)
    SweepFlows(SweepArgs),
    /// Validate a configuration file
    CheckConfig,
}

#[derive(clap::Args)]
pub struct SweepArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "WAYPOINT_DATABASE_URL")]
    pub database_url: String,

    /// Maximum rows deleted by this run (overrides config)
    #[arg(long)]
    pub limit: Option<u64>,

    /// Maximum rows deleted per pass (overrides config)
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Only delete flows that expired at least this long ago, e.g. "10m" (overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub grace: Option<Duration>,

    /// Abort the sweep after this long, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Apply schema migrations before sweeping
    #[arg(long)]
    pub migrate: bool,
}
