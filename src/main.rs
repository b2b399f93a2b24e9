//! Zero-Trust Guard
//!
//! Command-line front end for the security middleware.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                 SECURITY MIDDLEWARE                 │
//!                      │                                                     │
//!     Operation        │  ┌───────────┐   ┌──────────┐   ┌──────────────┐   │
//!     ─────────────────┼─▶│  threat   │──▶│ security │──▶│    crypto    │   │
//!                      │  │ validator │   │ rate/conc│   │ encrypt write│   │
//!                      │  └───────────┘   └──────────┘   └──────┬───────┘   │
//!                      │                                        ▼           │
//!     Result           │  ┌───────────┐                  ┌──────────────┐   │
//!     ◀────────────────┼──│  crypto   │◀─────────────────│  resilience  │◀──┼──── Storage
//!                      │  │ decrypt   │                  │circuit breaker│  │     dependency
//!                      │  └───────────┘                  └──────────────┘   │
//!                      │                                                     │
//!                      │  config · observability · lifecycle (Registry)     │
//!                      └────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use zero_trust_guard::config::{load_config, GuardConfig};
use zero_trust_guard::lifecycle::signals;
use zero_trust_guard::observability::{logging, metrics};
use zero_trust_guard::threat::ZeroTrustValidator;
use zero_trust_guard::Registry;

#[derive(Parser)]
#[command(name = "guard")]
#[command(about = "Zero-trust validation and resilience middleware", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a JSON payload (or raw text) and print the verdict
    Validate {
        /// Configuration file; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Payload to validate
        payload: String,
    },
    /// Load and validate a configuration file
    CheckConfig {
        path: PathBuf,
    },
    /// Run the guard with maintenance and hot reload until a shutdown signal
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config, payload } => validate(config.as_deref(), &payload),
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Run { config } => run(&config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn validate(config: Option<&Path>, payload: &str) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    let validator = ZeroTrustValidator::from_config(&config.validation)?;

    let verdict = match serde_json::from_str::<Value>(payload) {
        Ok(value) => validator.validate(&value),
        Err(_) => validator.validate_text(payload),
    };
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    if verdict.is_allowed(&config.threat_policy) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn check_config(path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    println!(
        "Configuration OK: {} custom patterns, max_concurrent={}, key_rotation_days={}",
        config.validation.custom_patterns.len(),
        config.concurrency.max_concurrent,
        config.encryption.key_rotation_days
    );
    Ok(ExitCode::SUCCESS)
}

async fn run(path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        "zero-trust-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut registry = Registry::builder(config).start()?;
    let _watcher = match registry.watch(path) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload unavailable");
            None
        }
    };

    signals::wait_for_signal().await;
    registry.teardown().await;

    tracing::info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}
