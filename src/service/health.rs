//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the referral exchange
//! service, including readiness and liveness probes.

use crate::amqp::connection::AmqpConnection;
use crate::queue::QueueManager;
use crate::types::QueueStats;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Everything the health probes look at
pub struct HealthContext {
    pub service_name: String,
    pub manager: Arc<QueueManager>,
    /// `None` when running without a broker (dry run)
    pub amqp: Option<Arc<AmqpConnection>>,
    pub is_running: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl HealthContext {
    pub fn new(
        service_name: impl Into<String>,
        manager: Arc<QueueManager>,
        amqp: Option<Arc<AmqpConnection>>,
        is_running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            manager,
            amqp,
            is_running,
            started_at: Instant::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Load queue stats off the async runtime
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let manager = self.manager.clone();
        let stats = tokio::task::spawn_blocking(move || manager.stats()).await??;
        Ok(stats)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub total_participants: usize,
    pub waiting: usize,
    pub assigned: usize,
    pub completed_pairings: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(context);
        if service_check.status != HealthStatus::Healthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(service_check);

        let (store_check, queue_stats) = Self::check_queue_store(context).await;
        Self::fold_status(&mut overall_status, &store_check.status);
        checks.push(store_check);

        let amqp_check = Self::check_amqp_health(context);
        Self::fold_status(&mut overall_status, &amqp_check.status);
        checks.push(amqp_check);

        let queue_stats = queue_stats.unwrap_or_default();
        let stats = ServiceStats {
            total_participants: queue_stats.total_participants,
            waiting: queue_stats.waiting,
            assigned: queue_stats.assigned,
            completed_pairings: queue_stats.completed_pairings,
            uptime_seconds: context.started_at.elapsed().as_secs(),
        };

        Ok(HealthCheck {
            status: overall_status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    fn fold_status(overall: &mut HealthStatus, component: &HealthStatus) {
        match component {
            HealthStatus::Unhealthy => *overall = HealthStatus::Unhealthy,
            HealthStatus::Degraded if *overall == HealthStatus::Healthy => {
                *overall = HealthStatus::Degraded
            }
            _ => {}
        }
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> Result<HealthStatus> {
        if context.is_running() {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle events
    pub async fn readiness_check(context: &HealthContext) -> Result<HealthStatus> {
        if !context.is_running() {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_queue_store(context).await.0.status)
    }

    fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if context.is_running() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The store is healthy if the committed state can be loaded
    async fn check_queue_store(context: &HealthContext) -> (ComponentCheck, Option<QueueStats>) {
        let start = Instant::now();

        let (status, message, stats) = match context.queue_stats().await {
            Ok(stats) => (HealthStatus::Healthy, None, Some(stats)),
            Err(e) => {
                error!("Queue store check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Cannot load queue state: {}", e)),
                    None,
                )
            }
        };

        let check = ComponentCheck {
            name: "queue_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, stats)
    }

    fn check_amqp_health(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &context.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => {
                debug!("No AMQP connection configured");
                (
                    HealthStatus::Degraded,
                    Some("Running without a broker".to_string()),
                )
            }
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
