//! Human-readable rendering of query results

use crate::types::{ParticipantInfo, ParticipantStatus, QueueListing, QueueStats};

pub const EMPTY_QUEUE_TEXT: &str = "Queue is empty.";

/// Multi-line status block for a single participant
pub fn format_participant_info(info: &ParticipantInfo) -> String {
    let participant = &info.participant;

    let status = match (participant.status, &participant.assigned_to) {
        (ParticipantStatus::Assigned, Some(target)) => format!("Assigned (refer user {})", target),
        (ParticipantStatus::Assigned, None) => "Assigned".to_string(),
        (ParticipantStatus::Waiting, _) => "Waiting for assignment".to_string(),
    };

    let position = info
        .position
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Not in queue".to_string());

    format!(
        "User Info for {}\nStatus: {}\nQueue position: {}\nReferrals completed: {}\nJoined: {}",
        participant.id,
        status,
        position,
        participant.completed_count,
        participant.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Two lines per queued participant, head first
pub fn format_queue_listing(listing: &[QueueListing]) -> String {
    if listing.is_empty() {
        return EMPTY_QUEUE_TEXT.to_string();
    }

    listing
        .iter()
        .map(|entry| {
            format!(
                "{}. User {} ({})\n   Referrals completed: {}",
                entry.position, entry.participant_id, entry.status, entry.completed_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_stats(stats: &QueueStats) -> String {
    format!(
        "Queue Status\nTotal users: {}\nWaiting: {}\nAssigned: {}\nCompleted pairings: {}",
        stats.total_participants, stats.waiting, stats.assigned, stats.completed_pairings
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Participant;

    #[test]
    fn test_empty_queue() {
        assert_eq!(format_queue_listing(&[]), "Queue is empty.");
    }

    #[test]
    fn test_queue_listing_lines() {
        let listing = vec![
            QueueListing {
                position: 1,
                participant_id: "b".to_string(),
                status: ParticipantStatus::Assigned,
                completed_count: 0,
            },
            QueueListing {
                position: 2,
                participant_id: "a".to_string(),
                status: ParticipantStatus::Waiting,
                completed_count: 3,
            },
        ];

        assert_eq!(
            format_queue_listing(&listing),
            "1. User b (assigned)\n   Referrals completed: 0\n2. User a (waiting)\n   Referrals completed: 3"
        );
    }

    #[test]
    fn test_participant_info_shows_target() {
        let mut participant = Participant::new("a".to_string(), "https://x.test/a".to_string());
        participant.status = ParticipantStatus::Assigned;
        participant.assigned_to = Some("b".to_string());
        participant.completed_count = 2;

        let text = format_participant_info(&ParticipantInfo {
            participant,
            position: Some(4),
        });

        assert!(text.starts_with("User Info for a\n"));
        assert!(text.contains("Status: Assigned (refer user b)"));
        assert!(text.contains("Queue position: 4"));
        assert!(text.contains("Referrals completed: 2"));
        assert!(text.contains("Joined: "));
    }

    #[test]
    fn test_participant_info_without_position() {
        let participant = Participant::new("a".to_string(), "https://x.test/a".to_string());
        let text = format_participant_info(&ParticipantInfo {
            participant,
            position: None,
        });

        assert!(text.contains("Status: Waiting for assignment"));
        assert!(text.contains("Queue position: Not in queue"));
    }

    #[test]
    fn test_stats() {
        let stats = QueueStats {
            total_participants: 3,
            waiting: 2,
            assigned: 1,
            completed_pairings: 5,
        };
        assert_eq!(
            format_stats(&stats),
            "Queue Status\nTotal users: 3\nWaiting: 2\nAssigned: 1\nCompleted pairings: 5"
        );
    }
}
