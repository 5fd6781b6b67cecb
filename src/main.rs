//! Bounded wallet - spending account with hard caps, cooldown and timelocked withdrawal
//!
//! # WARNING
//! - `simulate` runs against an in-memory chain; nothing is sent to a cluster.
//! - Limits are enforced per account: fund only what the caps are meant to expose.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

// Use the library crate
use bounded_wallet::cli::commands;
use bounded_wallet::config::Config;

/// Bounded wallet - capped spending account
#[derive(Parser)]
#[command(name = "bwallet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "wallet.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,

    /// Show persisted counters, allowance, cooldown and withdrawal status
    Status,

    /// Check whether a call would be allowed and what it would spend
    Classify {
        /// Program or recipient address
        #[arg(long)]
        target: String,

        /// Lamports attached to the call
        #[arg(long, default_value_t = 0)]
        value: u64,

        /// Instruction data, base64
        #[arg(long)]
        data: Option<String>,

        /// Instruction accounts, comma separated
        #[arg(long, value_delimiter = ',')]
        accounts: Vec<String>,
    },

    /// Replay a JSON scenario against an in-memory chain
    Simulate {
        /// Scenario file
        scenario: String,

        /// Persist the final ledger state to the configured path
        #[arg(long)]
        save: bool,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("bounded_wallet=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json_logs)?;

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded from {}", cli.config);

    // Execute command
    let result = match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Status => commands::status(&config).await,
        Commands::Classify {
            target,
            value,
            data,
            accounts,
        } => commands::classify(&config, &target, value, data.as_deref(), &accounts),
        Commands::Simulate { scenario, save } => {
            commands::simulate(&config, &scenario, save).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
