//! Matview CLI - materialized views over Kafka, bootstrapped from a metadata catalog.

use anyhow::Result;
use clap::{Parser, Subcommand};
use matview_core::config::{LogFormat, LogLevel};
use matview_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Every fatal bootstrap or runtime error exits with 1.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Graceful completion or shutdown
    Success = 0,
    /// Fatal configuration, I/O or runtime error
    Failure = 1,
}

impl ExitCode {
    /// Log the error category, then map it to an exit code.
    fn from_error(error: &anyhow::Error) -> Self {
        let category = error
            .downcast_ref::<matview_core::Error>()
            .map(|e| e.category().as_str())
            .unwrap_or("runtime_fatal");
        tracing::error!(category, error = %error, "Command failed");
        ExitCode::Failure
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "matview")]
#[command(about = "Catalog-bootstrapped materialized views over Kafka", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap and run the materialization pipeline
    Run {
        /// Override the catalog server URI
        #[arg(long)]
        catalog_uri: Option<String>,

        /// Override the metalake
        #[arg(long)]
        metalake: Option<String>,
    },

    /// Show status and health
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config file when it parses
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format.clone())
        .unwrap_or_default();
    let log_level = monitoring.map(|m| m.log_level).unwrap_or_default();

    init_logging(cli.verbose, &log_level, &log_format);

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => ExitCode::from_error(&e),
    }
}

fn init_logging(verbose: u8, level: &LogLevel, format: &LogFormat) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new(level.as_directive()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            catalog_uri,
            metalake,
        } => {
            let config = load_config(&cli.config)?;
            commands::run::run(config, catalog_uri, metalake).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
            println!("  reference data: {}", config.reference_data.resolved_path()?);
            println!("  topics: {}", config.topics().join(", "));
        }
    }

    Ok(())
}

/// Read the config file and apply environment overrides.
///
/// Validation runs later so CLI flags can still fill in missing values.
fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    let content = std::fs::read_to_string(&path)?;
    let mut config: Config = toml::from_str(&content)?;
    config.apply_env_overrides()?;
    Ok(config)
}
