//! AMQP consumer for inbound participant events
//!
//! Deliveries are decoded into [`InboundEvent`]s and handed to an
//! [`EventHandler`]. Every delivery is acknowledged once processing finishes,
//! including undecodable ones, so a poison message cannot block the queue.

use crate::amqp::messages::MessageUtils;
use crate::error::{ExchangeError, Result};
use crate::types::InboundEvent;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling inbound events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a decoded participant event
    async fn handle_event(&self, event: InboundEvent) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: ExchangeError, message_data: &[u8]);
}

/// Consumer for the inbound event queue
pub struct EventConsumer {
    handler: Arc<dyn EventHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl EventConsumer {
    /// Create a new event consumer
    pub fn new(handler: Arc<dyn EventHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("referral-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .manual_ack(true)
            .finish();

        self.channel
            .basic_consume(DeliveryConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| ExchangeError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming events from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            ExchangeError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming events");
        Ok(())
    }
}

/// Internal consumer implementation
struct DeliveryConsumer {
    handler: Arc<dyn EventHandler>,
}

impl DeliveryConsumer {
    fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { handler }
    }

    /// Decode and dispatch one delivery
    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let event = MessageUtils::deserialize_event(content)?;

        debug!(
            "Event parsed - type: {}, from: '{}'",
            event.kind(),
            event.reply_to()
        );

        self.handler.handle_event(event).await
    }
}

#[async_trait]
impl AsyncConsumer for DeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();

        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = std::time::Instant::now();

        match self.process_message(&content).await {
            Ok(_) => {
                debug!(
                    "Message processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                let error = match e.downcast::<ExchangeError>() {
                    Ok(exchange_error) => exchange_error,
                    Err(other) => ExchangeError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Mock event handler for testing
pub struct MockEventHandler {
    pub received_events: Arc<tokio::sync::Mutex<Vec<InboundEvent>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEventHandler {
    pub fn new() -> Self {
        Self {
            received_events: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl EventHandler for MockEventHandler {
    async fn handle_event(&self, event: InboundEvent) -> Result<()> {
        self.received_events.lock().await.push(event);
        Ok(())
    }

    async fn handle_error(&self, error: ExchangeError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_is_decoded_and_forwarded() {
        let handler = Arc::new(MockEventHandler::new());
        let consumer = DeliveryConsumer::new(handler.clone());

        consumer
            .process_message(br#"{"type":"CompleteReferral","participant_id":"9"}"#)
            .await
            .unwrap();

        let received = handler.received_events.lock().await;
        assert_eq!(
            received.as_slice(),
            &[InboundEvent::CompleteReferral {
                participant_id: "9".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_undecodable_delivery_is_an_invalid_event() {
        let handler = Arc::new(MockEventHandler::new());
        let consumer = DeliveryConsumer::new(handler.clone());

        let err = consumer.process_message(b"{").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExchangeError>(),
            Some(ExchangeError::InvalidEvent { .. })
        ));
        assert!(handler.received_events.lock().await.is_empty());
    }
}
