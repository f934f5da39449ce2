//! fanline - Publish CSV-imported records to Kafka through a fan-out pool
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────────┐    ┌─────────┐
//! │ CSV file │───▶│ importer │───▶│ executor      │───▶│  Kafka  │
//! └──────────┘    └──────────┘    │ (N workers)   │    │  topic  │
//!                                 │  ├ exports    │    └─────────┘
//!                                 │  └ publishers │
//!                                 └───────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! # Publish users.csv with the defaults (localhost:9092, topic "users")
//! fanline
//!
//! # Use a config file and a different input
//! fanline -c fanline.yaml --input people.csv
//!
//! # Exercise the whole pipeline against an in-memory broker
//! fanline --dry-run -v
//!
//! # Validate configuration
//! fanline -c fanline.yaml validate
//! ```

mod import;
mod orchestrator;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fanline_core::FanlineConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fanline")]
#[command(version, about = "Publish CSV records to Kafka through a fan-out worker pool")]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV input file, overrides `input.path`
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Publish to an in-memory broker instead of Kafka
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import, export and publish (default)
    Run,
    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FanlineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FanlineConfig::default(),
    };
    if let Some(input) = cli.input {
        config.input.path = input;
    }
    if cli.dry_run {
        config.broker.dry_run = true;
    }
    config.ensure_valid().context("Invalid configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = orchestrator::run(config, cli.verbose).await?;
            if !summary.success() {
                anyhow::bail!(
                    "{} of {} task(s) failed",
                    summary.failed_tasks(),
                    summary.expected_tasks
                );
            }
            Ok(())
        }
        Commands::Validate => validate_config(&config),
    }
}

fn validate_config(config: &FanlineConfig) -> Result<()> {
    println!("✓ Configuration valid!\n");

    println!("Broker:");
    println!("  Bootstrap servers:");
    for server in &config.broker.bootstrap_servers {
        println!("    - {}", server);
    }
    println!("  Topic: {}", config.broker.topic);
    println!("  Partition: {}", config.broker.partition);
    println!("  Local queue limit: {}", config.broker.max_queued_messages);
    println!(
        "  Mode: {}",
        if config.broker.dry_run {
            "dry run (in-memory)"
        } else {
            "kafka"
        }
    );
    println!();

    println!("Pipeline:");
    println!("  Workers: {}", config.pipeline.workers);
    println!("  Batch size: {}", config.pipeline.batch_size);
    println!("  Submit concurrency: {}", config.pipeline.submit_concurrency);
    println!("  Delivery buffer: {}", config.pipeline.delivery_buffer);
    let formats: Vec<&str> = config.pipeline.formats.iter().map(|f| f.as_str()).collect();
    println!("  Formats: {}", formats.join(", "));
    println!();

    println!("Input:");
    println!("  Path: {}", config.input.path.display());
    println!("  Delimiter: '{}'", config.input.delimiter);
    println!("  Header row: {}", config.input.has_header);
    println!();

    println!("Exports:");
    match &config.export.json_path {
        Some(path) => println!("  JSON: {}", path.display()),
        None => println!("  JSON: disabled"),
    }
    match &config.export.avro_path {
        Some(path) => println!("  Avro: {}", path.display()),
        None => println!("  Avro: disabled"),
    }

    Ok(())
}
