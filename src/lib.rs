// Module declarations for the application's core components
pub mod address;       // GroupAddress and parsing
pub mod channels;      // Inter-component communication channels
pub mod connection;    // Event socket and command pool transport
pub mod coordinator;   // Main application coordinator
pub mod correlator;    // Relative-level request/reply correlation
pub mod discovery;     // Home-Assistant-style MQTT discovery
pub mod error;         // Error handling and types
pub mod level;         // 0-255 <-> percent level conversion
pub mod mqtt;          // MQTT client and messaging
pub mod options;       // Command line options parsing
pub mod prelude;       // Common imports and types
pub mod protocol;      // Line/command/topic parsing and encoding
pub mod publisher;     // C-Gate line -> MQTT publish mapping
pub mod queue;         // Throttled outbound command queue
pub mod router;        // MQTT -> command routing
pub mod settings;      // Configuration management
pub mod stats;         // Bridge-wide counters

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use std::error::Error;

/// Main application entry point
///
/// Loads settings, wires logging, and runs the coordinator until a
/// shutdown signal arrives on `shutdown_rx`.
pub async fn app(
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    options: Options,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    // Initialize logging with default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
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
        .init();

    info!("Starting cgateweb {} with config file: {}", CARGO_PKG_VERSION, options.config_file);

    // Load and validate settings
    let settings = SettingsWrapper::new(options.config_file).unwrap_or_else(|err| {
        error!("Failed to load settings: {:?}", err);
        std::process::exit(255);
    });

    // Update log level based on settings
    if let Err(e) = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.loglevel()))
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
        .try_init() {
        error!("Failed to update log level: {}", e);
    }

    // Construct and start every long-running component in dependency order
    info!("Initializing components...");
    let mut coordinator = coordinator::Coordinator::new(settings);
    coordinator.start().await?;

    // Wait for shutdown signal
    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    // Execute shutdown sequence
    info!("Shutdown signal received, stopping components...");
    coordinator.stop().await;

    info!("Application shutdown complete");
    Ok(())
}

/// Application entry point
///
/// Parses CLI options, wires ctrl_c into the shutdown broadcast, and runs
/// the application to completion.
pub async fn run() -> Result<()> {
    let options = Options::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    // Set up signal handlers for graceful shutdown
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    // An optional bounded runtime, mostly useful for tests/CI: shut down on
    // our own after `--time` seconds instead of waiting for ctrl_c/SIGTERM.
    if let Some(secs) = options.runtime {
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
            let _ = shutdown_tx.send(());
        });
    }

    // Run the main application
    app(shutdown_rx, options).await.map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}
