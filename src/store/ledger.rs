//! Pairing history ledger
//!
//! Append-only record of completed pairings. Used only to filter candidates
//! during assignment.

use crate::types::{PairingRecord, ParticipantId};
use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<PairingRecord>", into = "Vec<PairingRecord>")]
pub struct PairingLedger {
    records: Vec<PairingRecord>,
    pairs: HashSet<(ParticipantId, ParticipantId)>,
}

impl PairingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pairing. Records are never mutated or removed.
    pub fn record(&mut self, referrer_id: &str, referee_id: &str) -> &PairingRecord {
        self.pairs
            .insert((referrer_id.to_string(), referee_id.to_string()));
        self.records.push(PairingRecord {
            referrer_id: referrer_id.to_string(),
            referee_id: referee_id.to_string(),
            completed_at: current_timestamp(),
        });
        &self.records[self.records.len() - 1]
    }

    /// Whether `referrer_id` has already acted on `referee_id`'s link.
    /// Directional: the reverse pairing is not considered.
    pub fn has_paired(&self, referrer_id: &str, referee_id: &str) -> bool {
        self.pairs
            .contains(&(referrer_id.to_string(), referee_id.to_string()))
    }

    /// Pairings made by one referrer, oldest first
    pub fn pairings_by(&self, referrer_id: &str) -> Vec<&PairingRecord> {
        self.records
            .iter()
            .filter(|record| record.referrer_id == referrer_id)
            .collect()
    }

    pub fn records(&self) -> &[PairingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<PairingRecord>> for PairingLedger {
    fn from(records: Vec<PairingRecord>) -> Self {
        let pairs = records
            .iter()
            .map(|r| (r.referrer_id.clone(), r.referee_id.clone()))
            .collect();
        Self { records, pairs }
    }
}

impl From<PairingLedger> for Vec<PairingRecord> {
    fn from(ledger: PairingLedger) -> Self {
        ledger.records
    }
}
