//! AMQP message definitions and serialization

use crate::error::{ExchangeError, Result};
use crate::types::{InboundEvent, Notification, NotificationKind};
use serde_json;

/// Default AMQP names
pub const EVENT_QUEUE: &str = "referral.events";
pub const NOTIFICATION_EXCHANGE: &str = "referral.notifications";

/// Routing keys for notifications
pub const REPLY_ROUTING_KEY: &str = "notification.reply";
pub const ASSIGNMENT_ROUTING_KEY: &str = "notification.assignment";
pub const BROADCAST_ROUTING_KEY: &str = "notification.broadcast";

/// Longest free-text broadcast accepted from the transport
pub const MAX_BROADCAST_LENGTH: usize = 4096;

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: crate::utils::generate_correlation_id(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ExchangeError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ExchangeError::InvalidEvent {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize an inbound event to bytes
    pub fn serialize_event(event: &InboundEvent) -> Result<Vec<u8>> {
        Self::validate_event(event)?;
        serde_json::to_vec(event).map_err(|e| {
            ExchangeError::InternalError {
                message: format!("Failed to serialize event: {}", e),
            }
            .into()
        })
    }

    /// Deserialize an inbound event from bytes
    pub fn deserialize_event(bytes: &[u8]) -> Result<InboundEvent> {
        let event: InboundEvent =
            serde_json::from_slice(bytes).map_err(|e| ExchangeError::InvalidEvent {
                reason: format!("Failed to deserialize event: {}", e),
            })?;

        Self::validate_event(&event)?;
        Ok(event)
    }

    /// Structural checks on an inbound event. Link syntax is the queue
    /// engine's concern and is not checked here.
    pub fn validate_event(event: &InboundEvent) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(ExchangeError::InvalidEvent {
                reason: reason.to_string(),
            }
            .into())
        };

        match event {
            InboundEvent::Join { participant_id, .. }
            | InboundEvent::CompleteReferral { participant_id }
            | InboundEvent::QueryInfo { participant_id } => {
                if participant_id.trim().is_empty() {
                    return invalid("Participant ID cannot be empty");
                }
            }
            InboundEvent::Leave {
                participant_id,
                requested_by,
            } => {
                if participant_id.trim().is_empty() || requested_by.trim().is_empty() {
                    return invalid("Participant ID cannot be empty");
                }
            }
            InboundEvent::QueryQueue { requested_by, limit } => {
                if requested_by.trim().is_empty() {
                    return invalid("Requester ID cannot be empty");
                }
                if *limit == Some(0) {
                    return invalid("Queue limit must be greater than 0");
                }
            }
            InboundEvent::QueryStats { requested_by } => {
                if requested_by.trim().is_empty() {
                    return invalid("Requester ID cannot be empty");
                }
            }
            InboundEvent::Broadcast { requested_by, text } => {
                if requested_by.trim().is_empty() {
                    return invalid("Requester ID cannot be empty");
                }
                if text.trim().is_empty() {
                    return invalid("Broadcast text cannot be empty");
                }
                if text.len() > MAX_BROADCAST_LENGTH {
                    return invalid("Broadcast text is too long");
                }
            }
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            ExchangeError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for a notification
    pub fn get_routing_key(notification: &Notification) -> &'static str {
        match notification.kind {
            NotificationKind::Reply => REPLY_ROUTING_KEY,
            NotificationKind::Assignment { .. } => ASSIGNMENT_ROUTING_KEY,
            NotificationKind::Broadcast => BROADCAST_ROUTING_KEY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Assignment;

    fn create_test_join_event() -> InboundEvent {
        InboundEvent::Join {
            participant_id: "1001".to_string(),
            referral_link: "https://x.test/r/1001".to_string(),
        }
    }

    #[test]
    fn test_message_envelope_creation() {
        let envelope = MessageEnvelope::new(create_test_join_event(), "events.join".to_string());

        assert_eq!(envelope.routing_key, "events.join");
        assert!(!envelope.correlation_id.is_empty());
    }

    #[test]
    fn test_event_validation() {
        assert!(MessageUtils::validate_event(&create_test_join_event()).is_ok());

        let empty_id = InboundEvent::CompleteReferral {
            participant_id: "  ".to_string(),
        };
        assert!(MessageUtils::validate_event(&empty_id).is_err());

        let zero_limit = InboundEvent::QueryQueue {
            requested_by: "1".to_string(),
            limit: Some(0),
        };
        assert!(MessageUtils::validate_event(&zero_limit).is_err());

        let empty_broadcast = InboundEvent::Broadcast {
            requested_by: "1".to_string(),
            text: "".to_string(),
        };
        assert!(MessageUtils::validate_event(&empty_broadcast).is_err());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(MessageUtils::deserialize_event(b"not json").is_err());
        assert!(MessageUtils::deserialize_event(br#"{"type":"Teleport"}"#).is_err());
        assert!(
            MessageUtils::deserialize_event(br#"{"type":"QueryInfo","participant_id":""}"#)
                .is_err()
        );
    }

    #[test]
    fn test_query_queue_limit_is_optional() {
        let event =
            MessageUtils::deserialize_event(br#"{"type":"QueryQueue","requested_by":"7"}"#)
                .unwrap();
        assert_eq!(
            event,
            InboundEvent::QueryQueue {
                requested_by: "7".to_string(),
                limit: None
            }
        );
    }

    #[test]
    fn test_routing_key_generation() {
        let reply = Notification::reply("1".to_string(), "hi");
        assert_eq!(MessageUtils::get_routing_key(&reply), REPLY_ROUTING_KEY);

        let assignment = Notification::assignment(&Assignment {
            participant_id: "1".to_string(),
            target_id: "2".to_string(),
            target_link: "https://x.test/2".to_string(),
        });
        assert_eq!(
            MessageUtils::get_routing_key(&assignment),
            ASSIGNMENT_ROUTING_KEY
        );

        let broadcast = Notification::broadcast("1".to_string(), "news");
        assert_eq!(
            MessageUtils::get_routing_key(&broadcast),
            BROADCAST_ROUTING_KEY
        );
    }
}
