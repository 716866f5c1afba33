mod cli;
mod commands;
mod observability;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use waypoint_auth::SelfServiceConfig;

use cli::{Cli, Commands, OutputFormat};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {e:#}", "✗".red());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SelfServiceConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SelfServiceConfig::default(),
    };
    observability::init_tracing_with_level(&config.logging.level);

    match &cli.command {
        Commands::SweepFlows(args) => {
            config.validate().context("invalid configuration")?;
            let report = commands::sweep_flows(&config, args).await?;
            print_report(&report, cli.format, "Expiry sweep finished");
        }
        Commands::CheckConfig => {
            if cli.config.is_none() {
                anyhow::bail!("--config is required for check-config");
            }
            let summary = commands::check_config(&config)?;
            print_report(&summary, cli.format, "Configuration is valid");
        }
    }

    Ok(())
}

fn print_report(value: &Value, format: OutputFormat, headline: &str) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Text => {
            println!("{} {}", "✓".green(), headline);
            if let Value::Object(fields) = value {
                for (key, field) in fields {
                    println!("  {}: {}", key.cyan(), field);
                }
            }
        }
    }
}
