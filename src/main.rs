// file: src/main.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-234567hijklm

//! TMOS Image Sync - Main entry point

use chrono::Local;
use clap::Parser;
use std::process::ExitCode;
use tmos_image_sync::{
    cli::{commands::*, Cli, Commands},
    config::ConfigLoader,
    logging::{logger, with_async_operation_span},
    Result,
};
use tokio::signal;
use tracing::{debug, error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(env_file) = &cli.env_file {
        if let Err(e) = loader.load_env_file(env_file) {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    }

    // Initialize logging
    if let Err(e) = logger::init_logger(cli.verbose, cli.quiet, loader.get("LOG_LEVEL")) {
        eprintln!("{}", e);
        return ExitCode::from(1);
    }

    let start = Local::now();
    debug!("process start time: {}", start.format("%A, %B %d, %Y %I:%M:%S"));

    // Set up signal handling for graceful shutdown
    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        warn!("Received Ctrl+C, initiating graceful shutdown...");
    };

    let name = cli.command.name();
    let command_future = with_async_operation_span(name, || run_command(cli.command, &loader));

    // Run command with signal handling
    let code = tokio::select! {
        result = command_future => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{} failed: {}", name, e);
                ExitCode::from(1)
            }
        },
        _ = shutdown_signal => {
            warn!("Application interrupted by user");
            ExitCode::from(130)
        }
    };

    let end = Local::now();
    debug!("process end time: {}", end.format("%A, %B %d, %Y %I:%M:%S"));
    debug!(
        "process duration: {:.2} seconds",
        (end - start).num_milliseconds() as f64 / 1000.0
    );
    code
}

async fn run_command(command: Commands, loader: &ConfigLoader) -> Result<()> {
    match command {
        Commands::Patch => patch_command(loader).await,
        Commands::CosSync => cos_sync_command(loader).await,
        Commands::VpcSync => vpc_sync_command(loader).await,
        Commands::VpcImport => vpc_import_command(loader).await,
        Commands::VpcImager => vpc_imager_command(loader).await,
        Commands::GlanceSync => glance_sync_command(loader).await,
        Commands::Inventory => inventory_command(loader).await,
        Commands::Cidata => cidata_command(loader).await,
        Commands::Monitor => monitor_command(loader).await,
        Commands::ListImages { json } => list_images_command(loader, json).await,
        Commands::CheckPrereqs => check_prerequisites_command().await,
    }
}
