//! Exchange state snapshot
//!
//! Bundles the participant table, pairing ledger and queue order into the
//! single unit that backends load and commit atomically.

use crate::store::ledger::PairingLedger;
use crate::store::participants::ParticipantTable;
use crate::store::queue_order::QueueOrder;
use crate::types::ParticipantStatus;
use serde::{Deserialize, Serialize};

/// Current on-disk format version
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeState {
    pub version: u32,
    pub participants: ParticipantTable,
    pub history: PairingLedger,
    pub queue: QueueOrder,
}

impl Default for ExchangeState {
    fn default() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            participants: ParticipantTable::new(),
            history: PairingLedger::new(),
            queue: QueueOrder::new(),
        }
    }
}

impl ExchangeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check cross-table invariants: every participant is queued exactly
    /// once and every queue entry names a participant.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != STATE_FORMAT_VERSION {
            return Err(format!(
                "unsupported state version {} (expected {})",
                self.version, STATE_FORMAT_VERSION
            ));
        }

        for id in self.participants.ids() {
            if !self.queue.contains(id) {
                return Err(format!("participant {} is missing from queue order", id));
            }
        }

        for id in self.queue.iter() {
            if !self.participants.contains(id) {
                return Err(format!("queue order references unknown participant {}", id));
            }
        }

        Ok(())
    }

    pub fn waiting_count(&self) -> usize {
        self.participants.count_by_status(ParticipantStatus::Waiting)
    }

    pub fn assigned_count(&self) -> usize {
        self.participants.count_by_status(ParticipantStatus::Assigned)
    }
}
