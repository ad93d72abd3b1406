//! Referral queue engine
//!
//! The manager enforces FIFO fairness and rematch avoidance on top of the
//! persisted store; `format` renders query results for participants.

pub mod format;
pub mod manager;

pub use manager::{
    AssignmentScope, CompletedReferral, JoinedQueue, QueueConfig, QueueManager, RematchPolicy,
};
