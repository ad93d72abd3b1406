//! Common types used throughout the referral exchange

use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable external identifier of a participant (e.g. a chat user id)
pub type ParticipantId = String;

/// Participant state in the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    /// Eligible for a new assignment
    Waiting,
    /// Has an outstanding referral to act on
    Assigned,
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantStatus::Waiting => write!(f, "waiting"),
            ParticipantStatus::Assigned => write!(f, "assigned"),
        }
    }
}

/// A participant record as held by the participant store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub referral_link: String,
    pub status: ParticipantStatus,
    /// Set if and only if `status` is `Assigned`
    pub assigned_to: Option<ParticipantId>,
    pub completed_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    /// Create a new waiting participant
    pub fn new(id: ParticipantId, referral_link: String) -> Self {
        let now = current_timestamp();
        Self {
            id,
            referral_link,
            status: ParticipantStatus::Waiting,
            assigned_to: None,
            completed_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == ParticipantStatus::Waiting
    }
}

/// A completed pairing: `referrer_id` acted on `referee_id`'s link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    pub referrer_id: ParticipantId,
    pub referee_id: ParticipantId,
    pub completed_at: DateTime<Utc>,
}

/// One row of the persisted queue order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub sequence: u64,
    pub participant_id: ParticipantId,
    pub enqueued_at: DateTime<Utc>,
}

/// Result of a successful assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub participant_id: ParticipantId,
    pub target_id: ParticipantId,
    pub target_link: String,
}

/// Aggregate counts for the stats query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_participants: usize,
    pub waiting: usize,
    pub assigned: usize,
    pub completed_pairings: usize,
}

/// Snapshot of a single participant for the info query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub participant: Participant,
    /// 1-indexed queue position
    pub position: Option<usize>,
}

/// One line of the queue listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueListing {
    pub position: usize,
    pub participant_id: ParticipantId,
    pub status: ParticipantStatus,
    pub completed_count: u64,
}

/// Inbound events handed to the exchange by the transport layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    Join {
        participant_id: ParticipantId,
        referral_link: String,
    },
    CompleteReferral {
        participant_id: ParticipantId,
    },
    /// Self-removal when `requested_by` equals `participant_id`, admin removal otherwise
    Leave {
        participant_id: ParticipantId,
        requested_by: ParticipantId,
    },
    QueryInfo {
        participant_id: ParticipantId,
    },
    QueryQueue {
        requested_by: ParticipantId,
        #[serde(default)]
        limit: Option<usize>,
    },
    QueryStats {
        requested_by: ParticipantId,
    },
    Broadcast {
        requested_by: ParticipantId,
        text: String,
    },
}

impl InboundEvent {
    /// Participant that should receive the reply to this event
    pub fn reply_to(&self) -> &ParticipantId {
        match self {
            InboundEvent::Join { participant_id, .. }
            | InboundEvent::CompleteReferral { participant_id }
            | InboundEvent::QueryInfo { participant_id } => participant_id,
            InboundEvent::Leave { requested_by, .. }
            | InboundEvent::QueryQueue { requested_by, .. }
            | InboundEvent::QueryStats { requested_by }
            | InboundEvent::Broadcast { requested_by, .. } => requested_by,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Join { .. } => "join",
            InboundEvent::CompleteReferral { .. } => "complete",
            InboundEvent::Leave { .. } => "leave",
            InboundEvent::QueryInfo { .. } => "query_info",
            InboundEvent::QueryQueue { .. } => "query_queue",
            InboundEvent::QueryStats { .. } => "query_stats",
            InboundEvent::Broadcast { .. } => "broadcast",
        }
    }
}

/// What an outbound notification carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    /// Reply to an inbound event
    Reply,
    /// A new referral assignment
    Assignment {
        target_id: ParticipantId,
        target_link: String,
    },
    /// Admin broadcast
    Broadcast,
}

/// Message pushed to a participant through the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: ParticipantId,
    pub text: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn reply(recipient: ParticipantId, text: impl Into<String>) -> Self {
        Self {
            recipient,
            text: text.into(),
            kind: NotificationKind::Reply,
            timestamp: current_timestamp(),
        }
    }

    pub fn assignment(assignment: &Assignment) -> Self {
        Self {
            recipient: assignment.participant_id.clone(),
            text: format!(
                "You've been matched! Please use this referral link:\n{}\nSend /done once you have completed it.",
                assignment.target_link
            ),
            kind: NotificationKind::Assignment {
                target_id: assignment.target_id.clone(),
                target_link: assignment.target_link.clone(),
            },
            timestamp: current_timestamp(),
        }
    }

    pub fn broadcast(recipient: ParticipantId, text: impl Into<String>) -> Self {
        Self {
            recipient,
            text: text.into(),
            kind: NotificationKind::Broadcast,
            timestamp: current_timestamp(),
        }
    }

    /// Short label used for routing keys and metrics
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            NotificationKind::Reply => "reply",
            NotificationKind::Assignment { .. } => "assignment",
            NotificationKind::Broadcast => "broadcast",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_event_wire_format() {
        let json = r#"{"type":"Join","participant_id":"42","referral_link":"https://x.test/r/42"}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            InboundEvent::Join {
                participant_id: "42".to_string(),
                referral_link: "https://x.test/r/42".to_string(),
            }
        );
        assert_eq!(event.reply_to(), "42");
        assert_eq!(event.kind(), "join");
    }

    #[test]
    fn test_query_queue_limit_is_optional() {
        let json = r#"{"type":"QueryQueue","requested_by":"admin"}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            InboundEvent::QueryQueue {
                requested_by: "admin".to_string(),
                limit: None,
            }
        );
    }

    #[test]
    fn test_assignment_notification_carries_link() {
        let assignment = Assignment {
            participant_id: "a".to_string(),
            target_id: "b".to_string(),
            target_link: "https://x.test/r/b".to_string(),
        };
        let notification = Notification::assignment(&assignment);

        assert_eq!(notification.recipient, "a");
        assert!(notification.text.contains("https://x.test/r/b"));
        assert_eq!(notification.kind_label(), "assignment");

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["kind"], "assignment");
        assert_eq!(json["target_id"], "b");
    }
}
