//! AMQP transport for the referral exchange
//!
//! This module handles the broker connection, consumption of inbound
//! participant events, and publishing of outbound notifications.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{EventConsumer, EventHandler};
pub use messages::*;
pub use publisher::{AmqpNotifier, LoggingNotifier, MockNotifier, Notifier, PublisherConfig};
