// Module declarations for the application's core components
pub mod config;        // Configuration management
pub mod coordinator;   // Ingestion orchestrator and statistics
pub mod eagle;         // Eagle device protocol: decode, parse, convert
pub mod influx;        // InfluxDB integration
pub mod options;       // Command line options parsing
pub mod prelude;       // Common imports and types
pub mod rate_limiter;  // Sliding-window admission control
pub mod security;      // Security monitor and event log
pub mod server;        // HTTP routes and handlers
pub mod store;         // Time-series store abstraction
pub mod utils;         // Utility functions

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::coordinator::Coordinator;
use crate::influx::Influx;
use crate::security::SecurityMonitor;
use crate::server::AppState;
use crate::store::Store;
use std::sync::Arc;

/// Main application entry point
///
/// Builds the store client, security monitor and coordinator, then runs the
/// HTTP server until the shutdown signal fires.
pub async fn app(shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    info!("eagle-bridge {} starting", CARGO_PKG_VERSION);

    let store: Arc<dyn Store> = Arc::new(Influx::new(config.influx())?);
    let security = Arc::new(SecurityMonitor::new(config.security()));
    let coordinator = Arc::new(Coordinator::new(config.clone(), store, security));

    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        config,
    });

    server::serve(state, shutdown_rx).await?;

    coordinator.stats.lock().unwrap().print_summary();
    info!("Shutdown complete");

    Ok(())
}

fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        error!("Failed to initialize logging: {}", e);
    }
}

/// Application entry point
///
/// Parses options, loads configuration, installs the Ctrl+C handler and runs
/// the main application loop.
pub async fn run() -> Result<()> {
    let options = Options::new();

    let config = ConfigWrapper::new(options.config_file).unwrap_or_else(|err| {
        eprintln!("Failed to load config: {:?}", err);
        std::process::exit(255);
    });

    init_logging(&config.loglevel());

    info!("Starting eagle-bridge {}", CARGO_PKG_VERSION);
    config.log_summary();

    // Create a channel for shutdown signaling
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        if let Err(e) = shutdown_tx_clone.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    app(shutdown_rx, config).await
}
