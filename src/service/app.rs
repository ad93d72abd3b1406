//! Main application state and service coordination
//!
//! This module contains the production AppState that coordinates the queue
//! engine, AMQP transport, metrics server and background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::EventConsumer;
use crate::amqp::publisher::{AmqpNotifier, LoggingNotifier, Notifier, PublisherConfig};
use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::queue::QueueManager;
use crate::service::dispatcher::EventDispatcher;
use crate::service::health::HealthContext;
use crate::store::{InMemoryBackend, JsonFileBackend, StateBackend};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Queue engine and the dispatcher in front of it
    manager: Arc<QueueManager>,
    dispatcher: Arc<EventDispatcher>,

    /// AMQP connection; `None` when running without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Components the health probes inspect
    health_context: Arc<HealthContext>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// AMQP consumer for inbound events
    event_consumer: Option<EventConsumer>,

    /// Service status
    is_running: Arc<AtomicBool>,
}

impl AppState {
    /// Initialize the application with all dependencies. With `use_broker`
    /// false, notifications are only logged and no events are consumed.
    pub async fn new(config: AppConfig, use_broker: bool) -> Result<Self, ServiceError> {
        info!("Initializing referral exchange service");
        info!(
            "Configuration: service={}, amqp_url={}, store={}",
            config.service.name,
            config.amqp.url,
            if config.store.ephemeral {
                "memory".to_string()
            } else {
                config.store.data_file.display().to_string()
            }
        );

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let manager = Self::initialize_queue_engine(&config)?;

        let amqp_connection = if use_broker {
            Some(Self::initialize_amqp(&config).await?)
        } else {
            warn!("Running without a broker - notifications will only be logged");
            None
        };

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let notifier = Self::initialize_notifier(&config, amqp_connection.as_deref()).await?;

        let dispatcher = Arc::new(EventDispatcher::new(
            manager.clone(),
            notifier,
            config.admin_set(),
            metrics_collector.clone(),
        ));

        let is_running = Arc::new(AtomicBool::new(false));
        let health_context = Arc::new(HealthContext::new(
            config.service.name.clone(),
            manager.clone(),
            amqp_connection.clone(),
            is_running.clone(),
        ));

        let metrics_service =
            Self::initialize_metrics(&config, metrics_collector, health_context.clone());

        Ok(Self {
            config,
            manager,
            dispatcher,
            amqp_connection,
            metrics_service,
            health_context,
            background_tasks: Vec::new(),
            event_consumer: None,
            is_running,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting referral exchange service");

        self.is_running.store(true, Ordering::SeqCst);

        // Start metrics service first
        self.start_metrics_service().await?;

        if self.amqp_connection.is_some() {
            self.start_amqp_consumption().await?;
        }

        // Participants left waiting by a previous run get a chance right away
        match self.dispatcher.drive_assignment().await {
            Ok(Some(assignment)) => info!(
                "Startup assignment pass assigned '{}' to '{}'",
                assignment.participant_id, assignment.target_id
            ),
            Ok(None) => debug!("Startup assignment pass found nothing to assign"),
            Err(e) => warn!("Startup assignment pass failed: {}", e),
        }

        self.start_background_tasks();

        info!("✅ Referral exchange service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of referral exchange service");

        self.is_running.store(false, Ordering::SeqCst);

        if let Some(consumer) = self.event_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP event consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        let manager = self.manager.clone();
        let final_stats = tokio::task::spawn_blocking(move || manager.stats())
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Final stats task failed: {}", e),
            })?
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;

        info!("Final queue statistics: {:?}", final_stats);
        info!("✅ Referral exchange service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn manager(&self) -> Arc<QueueManager> {
        self.manager.clone()
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn health_context(&self) -> Arc<HealthContext> {
        self.health_context.clone()
    }

    /// Open the configured state backend and build the manager over it
    fn initialize_queue_engine(config: &AppConfig) -> Result<Arc<QueueManager>, ServiceError> {
        let backend: Arc<dyn StateBackend> = if config.store.ephemeral {
            warn!("Ephemeral store - queue state will not survive a restart");
            Arc::new(InMemoryBackend::new())
        } else {
            info!(
                "Opening state file {} (fsync: {})",
                config.store.data_file.display(),
                config.store.fsync
            );
            Arc::new(
                JsonFileBackend::open(config.store.data_file.clone(), config.store.fsync).map_err(
                    |e| ServiceError::Initialization {
                        message: format!("Failed to open state store: {}", e),
                    },
                )?,
            )
        };

        let manager = QueueManager::with_config(backend, config.queue_config());
        let stats = manager.stats().map_err(|e| ServiceError::Initialization {
            message: format!("Failed to load queue state: {}", e),
        })?;
        info!(
            "Queue engine ready on {} - {} participants ({} waiting, {} assigned), {} completed pairings",
            manager.backend_description(),
            stats.total_participants,
            stats.waiting,
            stats.assigned,
            stats.completed_pairings
        );

        Ok(Arc::new(manager))
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_app_config(config).map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn initialize_notifier(
        config: &AppConfig,
        amqp_connection: Option<&AmqpConnection>,
    ) -> Result<Arc<dyn Notifier>, ServiceError> {
        let Some(connection) = amqp_connection else {
            return Ok(Arc::new(LoggingNotifier));
        };

        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to open AMQP channel: {}", e),
                })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.notification_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };

        let notifier = AmqpNotifier::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize notifier: {}", e),
            })?;

        Ok(Arc::new(notifier))
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        health_context: Arc<HealthContext>,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_context(health_context),
        );

        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    /// Start metrics service
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Start AMQP event consumption
    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = self.amqp_connection.clone() else {
            return Ok(());
        };
        let queue_name = self.config.amqp.event_queue.clone();

        info!("Opening AMQP channel for event consumption...");
        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open consumer channel: {}", e),
                })?;

        info!("Declaring queue: '{}'...", queue_name);
        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();

        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        let consumer = EventConsumer::new(self.dispatcher.clone(), channel);
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming events: {}", e),
            })?;

        self.event_consumer = Some(consumer);

        info!(
            "AMQP event consumption started successfully on queue: '{}'",
            queue_name
        );
        Ok(())
    }

    /// Start background maintenance tasks
    fn start_background_tasks(&mut self) {
        info!("Starting background maintenance tasks...");

        // Gauges follow the committed state
        let stats_task = {
            let manager = self.manager.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                info!("Queue metrics update task started");

                while is_running.load(Ordering::SeqCst) {
                    interval.tick().await;

                    let manager = manager.clone();
                    match tokio::task::spawn_blocking(move || manager.stats()).await {
                        Ok(Ok(stats)) => {
                            debug!(
                                "Updating metrics - participants: {}, waiting: {}, pairings: {}",
                                stats.total_participants, stats.waiting, stats.completed_pairings
                            );
                            metrics_collector.update_from_queue_stats(&stats);
                            metrics_collector.update_component_health("queue_store", true);
                        }
                        Ok(Err(e)) => {
                            warn!("Failed to load queue stats for metrics update: {}", e);
                            metrics_collector.update_component_health("queue_store", false);
                        }
                        Err(e) => warn!("Queue stats task failed: {}", e),
                    }
                }

                info!("Queue metrics update task stopped");
            })
        };

        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let amqp_connection = self.amqp_connection.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();
                info!("Health metrics task started");

                while is_running.load(Ordering::SeqCst) {
                    interval.tick().await;

                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    let amqp_healthy = amqp_connection
                        .as_ref()
                        .map(|c| c.is_alive())
                        .unwrap_or(false);
                    metrics_collector.update_component_health("amqp", amqp_healthy);
                    // 2 = healthy, 1 = degraded
                    metrics_collector.update_health_status(if amqp_healthy { 2 } else { 1 });

                    debug!(
                        "Updated service health metrics - uptime: {}s, amqp: {}",
                        uptime_seconds, amqp_healthy
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(stats_task);
        self.background_tasks.push(health_metrics_task);

        info!("2 background maintenance tasks started successfully");
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();

        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InboundEvent;

    fn ephemeral_config(port: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.store.ephemeral = true;
        config.service.health_port = port;
        config
    }

    #[tokio::test]
    async fn test_app_state_without_broker() {
        let mut app = AppState::new(ephemeral_config(18931), false).await.unwrap();
        assert!(!app.is_running());

        app.start().await.unwrap();
        assert!(app.is_running());

        let dispatcher = app.dispatcher();
        dispatcher
            .dispatch(InboundEvent::Join {
                participant_id: "a".to_string(),
                referral_link: "https://x.test/a".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(app.manager().stats().unwrap().total_participants, 1);

        app.shutdown().await.unwrap();
        assert!(!app.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = ephemeral_config(18932);
        config.queue.max_link_length = 1;

        let result = AppState::new(config, false).await;
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_file_store_is_opened() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ephemeral_config(18933);
        config.store.ephemeral = false;
        config.store.data_file = dir.path().join("state.json");

        let app = AppState::new(config, false).await.unwrap();
        app.manager()
            .join_queue("a", "https://x.test/a")
            .unwrap();
        assert!(dir.path().join("state.json").exists());
    }
}
