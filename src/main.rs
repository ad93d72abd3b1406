//! Main entry point for the referral exchange service
//!
//! Initializes logging and configuration, runs the exchange over AMQP, and
//! shuts down gracefully on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use referral_exchange::config::AppConfig;
use referral_exchange::service::{AppState, HealthCheck, HealthContext, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Referral Exchange - FIFO referral-for-referral matching service
#[derive(Parser)]
#[command(
    name = "referral-exchange",
    version,
    about = "A referral-for-referral exchange with FIFO matching and rematch avoidance",
    long_about = "Referral Exchange keeps a persistent FIFO queue of participants, each with a \
                 referral link, and hands every waiting participant someone else's link to act \
                 on. Completed referrals move the participant to the back of the queue and are \
                 remembered so the same pairing is never assigned twice."
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

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health/metrics server port")]
    health_port: Option<u16>,

    /// State file override
    #[arg(long, value_name = "FILE", help = "Override the JSON state file")]
    data_file: Option<PathBuf>,

    /// Keep state in memory only
    #[arg(long, help = "Keep queue state in memory only (lost on exit)")]
    ephemeral: bool,

    /// Run without a broker
    #[arg(
        long,
        help = "Do not connect to AMQP; notifications are logged instead of published"
    )]
    no_broker: bool,

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

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig, use_broker: bool) -> Result<()> {
    info!("Performing health check...");

    let app_state = AppState::new(config, use_broker).await?;
    let context = app_state.health_context();
    context
        .is_running
        .store(true, std::sync::atomic::Ordering::SeqCst);

    match HealthCheck::check(&context).await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                println!(
                    "  {}: {}{}",
                    check.name,
                    check.status,
                    check
                        .message
                        .as_ref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
            }
            println!("  Participants: {}", health.stats.total_participants);
            println!("  Waiting: {}", health.stats.waiting);
            println!("  Assigned: {}", health.stats.assigned);
            println!("  Completed pairings: {}", health.stats.completed_pairings);

            if health.status == HealthStatus::Unhealthy {
                std::process::exit(1);
            } else {
                std::process::exit(0);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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

/// Run periodic health checks
async fn health_check_task(context: Arc<HealthContext>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while context.is_running() {
        interval.tick().await;

        match HealthCheck::check(&context).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} participants, {} waiting, {} completed pairings",
                    health.status,
                    health.stats.total_participants,
                    health.stats.waiting,
                    health.stats.completed_pairings
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig, use_broker: bool) {
    info!("🚀 Referral Exchange Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    if use_broker {
        info!("   AMQP: {}", config.amqp.url);
        info!("   Event queue: {}", config.amqp.event_queue);
    } else {
        info!("   AMQP: disabled");
    }
    if config.store.ephemeral {
        info!("   Store: in-memory");
    } else {
        info!("   Store: {}", config.store.data_file.display());
    }
    info!(
        "   Policies: scope={:?}, rematch={:?}",
        config.queue.assignment_scope, config.queue.rematch_policy
    );
    info!("   Admins: {}", config.service.admin_ids.len());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
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

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(data_file) = &args.data_file {
        config.store.data_file = data_file.clone();
    }

    if args.ephemeral {
        config.store.ephemeral = true;
    }

    referral_exchange::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // CLI args can override environment/config file
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let use_broker = !args.no_broker;

    if args.health_check {
        return perform_health_check(config, use_broker).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config, use_broker);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config, use_broker);

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone(), use_broker).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = {
        let context = app_state.health_context();
        tokio::spawn(async move {
            health_check_task(context).await;
        })
    };

    info!("✅ Referral Exchange Service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => {
            info!("✅ Graceful shutdown completed successfully");
        }
        Ok(Err(e)) => {
            error!("Shutdown failed: {}", e);
        }
        Err(_) => {
            warn!("⚠️  Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("🛑 Referral Exchange Service stopped");
    Ok(())
}
