//! # Checkup Relay Configuration Tool
//!
//! Loads relay configuration the same way the library does (optional TOML file,
//! then `CHECKUP_RELAY_*` environment overrides), validates it and prints the result.
//! Exits non-zero when the configuration is invalid.

use anyhow::Context;
use checkup_relay::config::{RelayConfig, ENV_PREFIX};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "checkup-relay-config")]
#[command(about = "Validate and inspect checkup relay configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration (default)
    Validate,

    /// Print the effective configuration as JSON
    Show,

    /// Print the built-in defaults as JSON
    Defaults,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    // Ignore failure; a subscriber may already be installed
    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Err(e) = run(&cli) {
        error!("❌ {e:#}");
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match cli.command.as_ref().unwrap_or(&Commands::Validate) {
        Commands::Validate => {
            let config = load(cli)?;
            info!(provider = %config.provider.name, "Configuration valid");
            println!("✅ Configuration valid (env prefix {ENV_PREFIX})");
            Ok(())
        }
        Commands::Show => {
            let config = load(cli)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Defaults => {
            println!("{}", serde_json::to_string_pretty(&RelayConfig::default())?);
            Ok(())
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let source = cli
        .config
        .as_ref()
        .map_or_else(|| "environment".to_string(), |p| p.display().to_string());
    RelayConfig::load(cli.config.as_deref())
        .with_context(|| format!("failed to load configuration from {source}"))
}
