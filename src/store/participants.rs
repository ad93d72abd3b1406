//! Participant store
//!
//! Typed table of participants keyed by id, with a secondary index that
//! enforces global uniqueness of referral links.

use crate::error::{QueueError, QueueResult};
use crate::types::{Participant, ParticipantId, ParticipantStatus};
use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Table of participants with a unique index on `referral_link`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Participant>", into = "Vec<Participant>")]
pub struct ParticipantTable {
    rows: BTreeMap<ParticipantId, Participant>,
    links: HashMap<String, ParticipantId>,
}

impl ParticipantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new waiting participant.
    ///
    /// Fails with `AlreadyInQueue` if the id exists and `DuplicateLink` if the
    /// link is registered to anyone.
    pub fn create(&mut self, id: &str, link: &str) -> QueueResult<&Participant> {
        if self.rows.contains_key(id) {
            return Err(QueueError::AlreadyInQueue {
                participant_id: id.to_string(),
            });
        }
        if self.links.contains_key(link) {
            return Err(QueueError::DuplicateLink {
                link: link.to_string(),
            });
        }

        self.links.insert(link.to_string(), id.to_string());
        let participant = Participant::new(id.to_string(), link.to_string());
        Ok(&*self.rows.entry(id.to_string()).or_insert(participant))
    }

    pub fn get(&self, id: &str) -> QueueResult<&Participant> {
        self.rows.get(id).ok_or_else(|| QueueError::NotFound {
            participant_id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    pub fn link_exists(&self, link: &str) -> bool {
        self.links.contains_key(link)
    }

    /// Set status and assignment together so `assigned_to` can never
    /// disagree with `status`.
    pub fn set_status(
        &mut self,
        id: &str,
        status: ParticipantStatus,
        assigned_to: Option<ParticipantId>,
    ) -> QueueResult<()> {
        match (status, &assigned_to) {
            (ParticipantStatus::Assigned, None) => {
                return Err(QueueError::storage(format!(
                    "refusing to mark {} assigned without a target",
                    id
                )))
            }
            (ParticipantStatus::Waiting, Some(target)) => {
                return Err(QueueError::storage(format!(
                    "refusing to keep target {} on waiting participant {}",
                    target, id
                )))
            }
            _ => {}
        }

        let participant = self.get_mut(id)?;
        participant.status = status;
        participant.assigned_to = assigned_to;
        participant.updated_at = current_timestamp();
        Ok(())
    }

    pub fn increment_completed(&mut self, id: &str) -> QueueResult<u64> {
        let participant = self.get_mut(id)?;
        participant.completed_count += 1;
        participant.updated_at = current_timestamp();
        Ok(participant.completed_count)
    }

    pub fn delete(&mut self, id: &str) -> QueueResult<Participant> {
        let participant = self.rows.remove(id).ok_or_else(|| QueueError::NotFound {
            participant_id: id.to_string(),
        })?;
        self.links.remove(&participant.referral_link);
        Ok(participant)
    }

    /// All participants ordered by id
    pub fn list_all(&self) -> Vec<&Participant> {
        self.rows.values().collect()
    }

    /// Participants with the given status, oldest first
    pub fn list_by_status(&self, status: ParticipantStatus) -> Vec<&Participant> {
        let mut matching: Vec<&Participant> =
            self.rows.values().filter(|p| p.status == status).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching
    }

    pub fn count_by_status(&self, status: ParticipantStatus) -> usize {
        self.rows.values().filter(|p| p.status == status).count()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.rows.keys()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn get_mut(&mut self, id: &str) -> QueueResult<&mut Participant> {
        self.rows.get_mut(id).ok_or_else(|| QueueError::NotFound {
            participant_id: id.to_string(),
        })
    }
}

impl TryFrom<Vec<Participant>> for ParticipantTable {
    type Error = String;

    fn try_from(participants: Vec<Participant>) -> Result<Self, Self::Error> {
        let mut table = ParticipantTable::new();

        for participant in participants {
            let consistent = match participant.status {
                ParticipantStatus::Waiting => participant.assigned_to.is_none(),
                ParticipantStatus::Assigned => participant.assigned_to.is_some(),
            };
            if !consistent {
                return Err(format!(
                    "participant {} has status {} but assigned_to {:?}",
                    participant.id, participant.status, participant.assigned_to
                ));
            }
            if table.rows.contains_key(&participant.id) {
                return Err(format!("duplicate participant id {}", participant.id));
            }
            if let Some(owner) = table.links.get(&participant.referral_link) {
                return Err(format!(
                    "referral link {} registered to both {} and {}",
                    participant.referral_link, owner, participant.id
                ));
            }

            table
                .links
                .insert(participant.referral_link.clone(), participant.id.clone());
            table.rows.insert(participant.id.clone(), participant);
        }

        Ok(table)
    }
}

impl From<ParticipantTable> for Vec<Participant> {
    fn from(table: ParticipantTable) -> Self {
        table.rows.into_values().collect()
    }
}
