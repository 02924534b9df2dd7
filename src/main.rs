// Geosync - Geospatial layer mirror synchroniser
// Copyright (c) 2025 Geosync Contributors
// Licensed under the MIT License

use clap::Parser;
use geosync::cli::{commands, Cli};
use geosync::config::load_settings;
use geosync::core::artifacts::LOG_DIR;
use geosync::domain::DatasetName;
use geosync::logging::init_logging;
use std::process;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Usage errors exit with code 2 here, before any I/O
    let cli = Cli::parse();

    let settings = match load_settings(&cli.settings) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(e.exit_code());
        }
    };

    let dataset = match DatasetName::new(&cli.name) {
        Ok(dataset) => dataset,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.application.log_level.clone());
    let log_dir = settings
        .application
        .data_directory
        .join(dataset.as_str())
        .join(LOG_DIR);
    let guard = match init_logging(&log_level, &settings.logging, Some(&log_dir)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(5);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "geosync - geospatial layer mirror synchroniser"
    );

    let exit_code = match commands::execute(&cli, &settings, dataset).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            eprintln!("Error: {e}");
            5
        }
    };

    // flush the file log before exiting
    drop(guard);
    process::exit(exit_code);
}
