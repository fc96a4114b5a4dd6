//! miniovol plugin daemon entry point

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use miniovol::config::Config;
use miniovol::driver::{Driver, DriverSettings};
use miniovol::mount::CommandMountExecutor;
use miniovol::plugin;
use miniovol::provision::ConfigProvisioner;
use miniovol::store::s3::S3Connector;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: miniovol [config.yaml]");
    eprintln!();
    eprintln!("miniovol - Docker volume plugin for S3-compatible object storage");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file (defaults are used if omitted)");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  miniovol /etc/miniovol/config.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 || args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        print_usage();
        std::process::exit(1);
    }

    // Load configuration
    let config_path = args.get(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("miniovol starting");
    match &config_path {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file given, using defaults"),
    }

    let driver = Arc::new(Driver::new(
        DriverSettings::from_config(&config),
        Arc::new(S3Connector),
        ConfigProvisioner::new(&config.minfs.config_path),
        Arc::new(CommandMountExecutor::new(
            &config.minfs.mount_command,
            &config.minfs.unmount_command,
        )),
    ));

    // Set up signal handling for graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    })?;

    let socket_path = &config.plugin.socket_path;
    let listener = match plugin::bind(socket_path) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to listen on {:?}: {}", socket_path, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {:?}", socket_path);

    plugin::serve(listener, driver.clone(), shutdown_rx).await;

    info!("Shutting down");
    let unmounted = driver.unmount_all().await;
    info!("{} volume(s) unmounted", unmounted);

    if let Err(e) = std::fs::remove_file(socket_path) {
        error!("Failed to remove socket {:?}: {}", socket_path, e);
    }

    info!("Exiting");
    Ok(())
}
