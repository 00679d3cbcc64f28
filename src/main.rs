//! Main entry point for the Pickup Hub service
//!
//! This is the production entry point that initializes and runs the
//! complete pickup service with proper error handling, logging, and
//! graceful shutdown.

use anyhow::Result;
use clap::Parser;
use pickup_hub::config::{AppConfig, QueueConfig};
use pickup_hub::game::{GameOrchestrator, InMemoryGameStore};
use pickup_hub::notify::AmqpPushChannel;
use pickup_hub::players::{InMemoryPlayerDirectory, StaticSkillProvider};
use pickup_hub::queue::{QueueEngine, QueueService};
use pickup_hub::servers::{RconConnector, ServerPool, TelemetryListener};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Pickup Hub - Matchmaking and game-server orchestration for pickup games
#[derive(Parser)]
#[command(
    name = "pickup-hub",
    version,
    about = "A matchmaking and game-server orchestration service for pickup games",
    long_about = "Pickup Hub runs the per-class matchmaking queue, balances completed rosters \
                 into even teams, configures game servers over their control protocol and \
                 follows each match through its forwarded log telemetry."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Queue preset override
    #[arg(
        short,
        long,
        value_name = "PRESET",
        help = "Override queue preset (sixes, bball)"
    )]
    queue_preset: Option<String>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig, queue_config: &QueueConfig) {
    info!("Pickup Hub");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Queue preset: {}", config.service.queue_preset);
    info!(
        "   Slots: {} across {} classes",
        queue_config.slot_count(),
        queue_config.classes.len()
    );
    info!("   AMQP: {}:{}", config.amqp.host, config.amqp.port);
    info!("   Telemetry: {}", config.telemetry.bind_address);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(preset) = &args.queue_preset {
        config.service.queue_preset = preset.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let queue_config = QueueConfig::preset(&config.service.queue_preset)?;
    queue_config.validate()?;

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config, &queue_config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config, &queue_config);

    info!("Initializing service components...");
    let push = Arc::new(AmqpPushChannel::connect(&config.amqp).await?);
    let directory = Arc::new(InMemoryPlayerDirectory::new());
    let skills = Arc::new(StaticSkillProvider::new());
    let store = Arc::new(InMemoryGameStore::new());

    let connector = Arc::new(RconConnector::new());
    let pool = ServerPool::new(connector.clone(), config.control_timeout());
    let health_task = pool.spawn_health_sweep(config.health_sweep_interval());

    let (listener, telemetry_events) =
        TelemetryListener::bind(&config.telemetry.bind_address, pool.clone()).await?;
    let listener_task = tokio::spawn(listener.run());

    let orchestrator = GameOrchestrator::new(
        store,
        pool,
        directory.clone(),
        skills,
        push.clone(),
        connector,
        queue_config.clone(),
        config.orchestrator.clone(),
        config.control_timeout(),
        config.telemetry.public_address.clone(),
        config.voice.clone(),
    );

    let telemetry_task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.run_telemetry(telemetry_events).await;
        })
    };

    let queue = QueueService::new(
        QueueEngine::new(queue_config),
        directory,
        Arc::new(orchestrator),
        push,
    );
    info!(
        "Queue is up in state '{}' on {}",
        queue.state().await,
        queue.current_map().await
    );

    info!("Pickup Hub is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    // Wait for shutdown signal
    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();
    listener_task.abort();
    telemetry_task.abort();

    // Give in-flight pushes and control sessions a moment to finish
    let shutdown_future = sleep(Duration::from_millis(100));
    match tokio::time::timeout(config.shutdown_timeout(), shutdown_future).await {
        Ok(()) => {
            info!("Graceful shutdown completed successfully");
        }
        Err(_) => {
            warn!("Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("Pickup Hub stopped");
    Ok(())
}
