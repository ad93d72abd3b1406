//! Queue order tracker
//!
//! The authoritative FIFO order of participants. Every entry carries a
//! monotonic sequence number; order is derived from the sequence, so a
//! persisted queue reloads in exactly the same order.

use crate::types::{ParticipantId, QueueEntry};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PersistedQueue", into = "PersistedQueue")]
pub struct QueueOrder {
    by_sequence: BTreeMap<u64, (ParticipantId, DateTime<Utc>)>,
    sequence_of: HashMap<ParticipantId, u64>,
    next_sequence: u64,
}

/// On-disk shape of the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedQueue {
    next_sequence: u64,
    entries: Vec<QueueEntry>,
}

impl QueueOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Returns false if the id was already queued.
    pub fn enqueue(&mut self, id: &str) -> bool {
        if self.sequence_of.contains_key(id) {
            return false;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_sequence
            .insert(sequence, (id.to_string(), current_timestamp()));
        self.sequence_of.insert(id.to_string(), sequence);
        true
    }

    /// Remove from wherever the id sits. Returns false if absent.
    pub fn dequeue(&mut self, id: &str) -> bool {
        match self.sequence_of.remove(id) {
            Some(sequence) => {
                self.by_sequence.remove(&sequence);
                true
            }
            None => false,
        }
    }

    /// 1-indexed position, or `None` if not queued
    pub fn position_of(&self, id: &str) -> Option<usize> {
        let sequence = self.sequence_of.get(id)?;
        Some(self.by_sequence.range(..*sequence).count() + 1)
    }

    /// Move to the tail. Returns false if absent.
    pub fn move_to_tail(&mut self, id: &str) -> bool {
        self.dequeue(id) && self.enqueue(id)
    }

    /// Ids queued strictly after `id`, in order
    pub fn after(&self, id: &str) -> impl Iterator<Item = &ParticipantId> {
        let start = self
            .sequence_of
            .get(id)
            .map(|sequence| sequence + 1)
            .unwrap_or(u64::MAX);
        self.by_sequence.range(start..).map(|(_, (id, _))| id)
    }

    /// Ids from head to tail
    pub fn iter(&self) -> impl Iterator<Item = &ParticipantId> {
        self.by_sequence.values().map(|(id, _)| id)
    }

    /// The full ordered sequence
    pub fn snapshot(&self) -> Vec<ParticipantId> {
        self.iter().cloned().collect()
    }

    /// The full ordered sequence with sequence numbers and timestamps
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.by_sequence
            .iter()
            .map(|(sequence, (id, enqueued_at))| QueueEntry {
                sequence: *sequence,
                participant_id: id.clone(),
                enqueued_at: *enqueued_at,
            })
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sequence_of.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sequence.is_empty()
    }
}

impl TryFrom<PersistedQueue> for QueueOrder {
    type Error = String;

    fn try_from(persisted: PersistedQueue) -> Result<Self, Self::Error> {
        let mut queue = QueueOrder {
            next_sequence: persisted.next_sequence,
            ..Default::default()
        };

        for entry in persisted.entries {
            if entry.sequence >= persisted.next_sequence {
                return Err(format!(
                    "queue entry {} has sequence {} at or beyond next sequence {}",
                    entry.participant_id, entry.sequence, persisted.next_sequence
                ));
            }
            if queue.sequence_of.contains_key(&entry.participant_id) {
                return Err(format!(
                    "participant {} appears twice in queue order",
                    entry.participant_id
                ));
            }
            if queue.by_sequence.contains_key(&entry.sequence) {
                return Err(format!("duplicate queue sequence {}", entry.sequence));
            }

            queue
                .sequence_of
                .insert(entry.participant_id.clone(), entry.sequence);
            queue
                .by_sequence
                .insert(entry.sequence, (entry.participant_id, entry.enqueued_at));
        }

        Ok(queue)
    }
}

impl From<QueueOrder> for PersistedQueue {
    fn from(queue: QueueOrder) -> Self {
        PersistedQueue {
            next_sequence: queue.next_sequence,
            entries: queue.entries(),
        }
    }
}
