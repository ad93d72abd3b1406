//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the referral exchange service
//! using Prometheus metrics.

use crate::types::QueueStats;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the referral exchange
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue engine metrics
    queue_metrics: QueueMetrics,

    /// Outbound notification metrics
    notification_metrics: NotificationMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue engine metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Participants by status
    pub participants: IntGaugeVec,

    /// Completed pairings recorded in the ledger
    pub completed_pairings: IntGauge,

    /// Inbound events by type and outcome
    pub events_total: IntCounterVec,

    /// Assignments handed out
    pub assignments_total: IntCounter,

    /// Referrals confirmed
    pub completions_total: IntCounter,

    /// Participants removed
    pub removals_total: IntCounter,

    /// Assignment passes that found nobody to assign
    pub idle_assignment_passes_total: IntCounter,
}

/// Outbound notification metrics
#[derive(Clone)]
pub struct NotificationMetrics {
    /// Notifications by kind and delivery status
    pub notifications_total: IntCounterVec,

    /// Broadcasts sent by admins
    pub broadcasts_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// End-to-end event processing time
    pub event_processing_duration: Histogram,

    /// Queue manager operation durations
    pub queue_operation_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let notification_metrics = NotificationMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            notification_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get notification metrics
    pub fn notifications(&self) -> &NotificationMetrics {
        &self.notification_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from the queue manager's stats
    pub fn update_from_queue_stats(&self, stats: &QueueStats) {
        self.queue_metrics
            .participants
            .with_label_values(&["waiting"])
            .set(stats.waiting as i64);

        self.queue_metrics
            .participants
            .with_label_values(&["assigned"])
            .set(stats.assigned as i64);

        self.queue_metrics
            .participants
            .with_label_values(&["total"])
            .set(stats.total_participants as i64);

        self.queue_metrics
            .completed_pairings
            .set(stats.completed_pairings as i64);
    }

    /// Record an inbound event and its outcome label
    pub fn record_event(&self, event: &str, outcome: &str, duration: Duration) {
        self.queue_metrics
            .events_total
            .with_label_values(&[event, outcome])
            .inc();

        self.performance_metrics
            .event_processing_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_assignment(&self) {
        self.queue_metrics.assignments_total.inc();
    }

    pub fn record_idle_assignment_pass(&self) {
        self.queue_metrics.idle_assignment_passes_total.inc();
    }

    pub fn record_completion(&self) {
        self.queue_metrics.completions_total.inc();
    }

    pub fn record_removal(&self) {
        self.queue_metrics.removals_total.inc();
    }

    /// Record a notification delivery attempt
    pub fn record_notification(&self, kind: &str, delivered: bool) {
        let status = if delivered { "delivered" } else { "failed" };
        self.notification_metrics
            .notifications_total
            .with_label_values(&[kind, status])
            .inc();
    }

    pub fn record_broadcast(&self) {
        self.notification_metrics.broadcasts_total.inc();
    }

    /// Record queue manager operation duration
    pub fn record_queue_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .queue_operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new(
            "referral_exchange_uptime_seconds",
            "Service uptime in seconds",
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "referral_exchange_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("referral_exchange_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "referral_exchange_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "referral_exchange_component_health",
                "Component health status",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let participants = IntGaugeVec::new(
            Opts::new(
                "referral_exchange_participants",
                "Participants in the exchange by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(participants.clone()))?;

        let completed_pairings = IntGauge::new(
            "referral_exchange_completed_pairings",
            "Pairings recorded in the history ledger",
        )?;
        registry.register(Box::new(completed_pairings.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new(
                "referral_exchange_events_total",
                "Inbound events by type and outcome",
            ),
            &["event", "outcome"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let assignments_total = IntCounter::new(
            "referral_exchange_assignments_total",
            "Referral assignments handed out",
        )?;
        registry.register(Box::new(assignments_total.clone()))?;

        let completions_total = IntCounter::new(
            "referral_exchange_completions_total",
            "Referrals confirmed as completed",
        )?;
        registry.register(Box::new(completions_total.clone()))?;

        let removals_total = IntCounter::new(
            "referral_exchange_removals_total",
            "Participants removed from the exchange",
        )?;
        registry.register(Box::new(removals_total.clone()))?;

        let idle_assignment_passes_total = IntCounter::new(
            "referral_exchange_idle_assignment_passes_total",
            "Assignment passes that found no eligible pairing",
        )?;
        registry.register(Box::new(idle_assignment_passes_total.clone()))?;

        Ok(Self {
            participants,
            completed_pairings,
            events_total,
            assignments_total,
            completions_total,
            removals_total,
            idle_assignment_passes_total,
        })
    }
}

impl NotificationMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let notifications_total = IntCounterVec::new(
            Opts::new(
                "referral_exchange_notifications_total",
                "Outbound notifications by kind and delivery status",
            ),
            &["kind", "status"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        let broadcasts_total = IntCounter::new(
            "referral_exchange_broadcasts_total",
            "Admin broadcasts sent",
        )?;
        registry.register(Box::new(broadcasts_total.clone()))?;

        Ok(Self {
            notifications_total,
            broadcasts_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let event_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "referral_exchange_event_processing_duration_seconds",
                "Inbound event processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        let queue_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "referral_exchange_queue_operation_duration_seconds",
                "Queue manager operation duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["operation"],
        )?;
        registry.register(Box::new(queue_operation_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "referral_exchange_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            event_processing_duration,
            queue_operation_duration,
            amqp_operation_duration,
        })
    }
}
