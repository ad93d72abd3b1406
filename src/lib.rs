//! Referral Exchange - referral-for-referral matching service
//!
//! This crate keeps a persistent FIFO queue of participants, assigns each
//! waiting participant another participant's referral link, and records
//! completed pairings so they are never assigned again. Events arrive and
//! notifications leave over AMQP.

pub mod amqp;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{ExchangeError, QueueError, QueueResult, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::Notifier;
pub use queue::{AssignmentScope, QueueConfig, QueueManager, RematchPolicy};
pub use service::EventDispatcher;
pub use store::{InMemoryBackend, JsonFileBackend, StateBackend};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
