//! db-facade - Main entry point.
//!
//! Initializes the database access facade from a properties file, flags or
//! environment, runs one statement and prints the result set as JSON.

use clap::Parser;
use db_facade::config::{Command, Config};
use db_facade::{Database, FacadeError, ResultSet};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only the result set.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config) -> Result<ResultSet, FacadeError> {
    let properties = config.database_properties()?;

    let db = Database::new();
    db.initialize(&properties).await?;

    match &config.command {
        Command::Select { sql } => db.query_select(sql).await,
        Command::Update { sql, transaction } => db.query_update(sql, *transaction).await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting db-facade v{}", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(rows) => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Statement failed");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Suggestion: {}", suggestion);
            }
            std::process::exit(1);
        }
    }
}
