//! Error types for the referral exchange
//!
//! Queue operations return typed [`QueueError`] outcomes so callers can map
//! every business-rule rejection to a reply. Service plumbing (AMQP, config,
//! HTTP) uses anyhow with [`ExchangeError`] for the specific failure cases.

use crate::types::ParticipantId;

/// Result type alias for service-level code
pub type Result<T> = anyhow::Result<T>;

/// Result type alias for queue engine operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Outcomes of queue engine operations that are not a success
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Participant already in queue: {participant_id}")]
    AlreadyInQueue { participant_id: ParticipantId },

    #[error("Referral link already registered: {link}")]
    DuplicateLink { link: String },

    #[error("Invalid referral link: {reason}")]
    InvalidLink { reason: String },

    #[error("Participant not found: {participant_id}")]
    NotFound { participant_id: ParticipantId },

    #[error("Participant is not waiting: {participant_id}")]
    NotWaiting { participant_id: ParticipantId },

    #[error("Participant has no pending assignment: {participant_id}")]
    NotAssigned { participant_id: ParticipantId },

    #[error("No eligible referral target for participant: {participant_id}")]
    NoEligibleTarget { participant_id: ParticipantId },

    #[error("Participant {participant_id} is not allowed to {action}")]
    Unauthorized {
        participant_id: ParticipantId,
        action: String,
    },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl QueueError {
    /// Build a storage error from anything printable
    pub fn storage(message: impl std::fmt::Display) -> Self {
        QueueError::Storage {
            message: message.to_string(),
        }
    }

    /// True for expected business-rule outcomes, false for storage failures
    pub fn is_business_outcome(&self) -> bool {
        !matches!(self, QueueError::Storage { .. })
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::AlreadyInQueue { .. } => "already_in_queue",
            QueueError::DuplicateLink { .. } => "duplicate_link",
            QueueError::InvalidLink { .. } => "invalid_link",
            QueueError::NotFound { .. } => "not_found",
            QueueError::NotWaiting { .. } => "not_waiting",
            QueueError::NotAssigned { .. } => "not_assigned",
            QueueError::NoEligibleTarget { .. } => "no_eligible_target",
            QueueError::Unauthorized { .. } => "unauthorized",
            QueueError::Storage { .. } => "storage",
        }
    }

    /// One-line message suitable for sending back to the participant
    pub fn user_message(&self) -> String {
        match self {
            QueueError::AlreadyInQueue { .. } => "You are already in the queue.".to_string(),
            QueueError::DuplicateLink { .. } => {
                "This referral link is already registered.".to_string()
            }
            QueueError::InvalidLink { reason } => {
                format!("That doesn't look like a valid referral link: {}.", reason)
            }
            QueueError::NotFound { participant_id } => {
                format!("User {} is not in the queue.", participant_id)
            }
            QueueError::NotWaiting { .. } => {
                "You already have a referral assigned. Complete it first.".to_string()
            }
            QueueError::NotAssigned { .. } => {
                "You don't have a pending referral to complete.".to_string()
            }
            QueueError::NoEligibleTarget { .. } => {
                "No one is available for you right now. You stay in the queue.".to_string()
            }
            QueueError::Unauthorized { .. } => {
                "You are not allowed to use this command.".to_string()
            }
            QueueError::Storage { .. } => {
                "Something went wrong on our side. Please try again.".to_string()
            }
        }
    }
}

/// Service-level errors outside the queue engine
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid inbound event: {reason}")]
    InvalidEvent { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_is_not_business_outcome() {
        assert!(!QueueError::storage("disk full").is_business_outcome());
        assert!(QueueError::NotAssigned {
            participant_id: "a".to_string()
        }
        .is_business_outcome());
    }

    #[test]
    fn test_user_messages_are_single_line() {
        let errors = vec![
            QueueError::AlreadyInQueue {
                participant_id: "a".to_string(),
            },
            QueueError::DuplicateLink {
                link: "https://x.test/r".to_string(),
            },
            QueueError::InvalidLink {
                reason: "missing scheme".to_string(),
            },
            QueueError::NotFound {
                participant_id: "a".to_string(),
            },
            QueueError::NotWaiting {
                participant_id: "a".to_string(),
            },
            QueueError::NotAssigned {
                participant_id: "a".to_string(),
            },
            QueueError::NoEligibleTarget {
                participant_id: "a".to_string(),
            },
            QueueError::Unauthorized {
                participant_id: "a".to_string(),
                action: "broadcast".to_string(),
            },
            QueueError::storage("io"),
        ];

        for error in errors {
            let message = error.user_message();
            assert!(!message.is_empty());
            assert!(!message.contains('\n'), "{} spans lines", error.kind());
        }
    }
}
