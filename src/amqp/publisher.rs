//! Outbound notifications to participants

use crate::amqp::messages::{MessageEnvelope, MessageUtils};
use crate::error::{ExchangeError, Result};
use crate::types::{Notification, ParticipantId};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Capability the exchange uses to push text to a participant.
/// Delivery is fire-and-forget from the queue engine's point of view.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Configuration for notification publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: crate::amqp::messages::NOTIFICATION_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based notifier publishing to a topic exchange
pub struct AmqpNotifier {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpNotifier {
    /// Create a new notifier and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let notifier = Self { channel, config };
        notifier.setup_exchange().await?;
        Ok(notifier)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            ExchangeError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare notification exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared notification exchange '{}'", self.config.exchange);
        Ok(())
    }

    /// Publish with retry and exponential backoff
    async fn publish_with_retry(&self, envelope: &MessageEnvelope<Notification>) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    debug!(
                        "Published notification {} to '{}' via {}",
                        envelope.correlation_id, envelope.payload.recipient, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish notification {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for notification {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<Notification>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| ExchangeError::AmqpConnectionFailed {
                message: format!("Failed to publish notification: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for AmqpNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let routing_key = MessageUtils::get_routing_key(&notification).to_string();
        let envelope = MessageEnvelope::new(notification, routing_key);
        self.publish_with_retry(&envelope).await
    }
}

/// Notifier that only logs, used when running without a broker
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            "[dry-run] {} -> '{}': {}",
            notification.kind_label(),
            notification.recipient,
            notification.text
        );
        Ok(())
    }
}

/// Mock notifier for testing: records every notification and can be told
/// to fail for specific recipients
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: std::sync::Mutex<Vec<Notification>>,
    failing_recipients: std::sync::Mutex<Vec<ParticipantId>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `recipient` fail
    pub fn fail_for(&self, recipient: &str) {
        if let Ok(mut failing) = self.failing_recipients.lock() {
            failing.push(recipient.to_string());
        }
    }

    /// Everything delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Notifications delivered to one recipient
    pub fn sent_to(&self, recipient: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == recipient)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let failing = self
            .failing_recipients
            .lock()
            .map(|failing| failing.contains(&notification.recipient))
            .unwrap_or(false);
        if failing {
            return Err(ExchangeError::InternalError {
                message: format!("delivery to {} failed", notification.recipient),
            }
            .into());
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
        Ok(())
    }
}
