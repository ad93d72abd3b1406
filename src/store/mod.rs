//! Persistent state for the referral exchange
//!
//! This module holds the three tables the queue engine works on (participants,
//! pairing history, queue order) and the backends that persist them as one
//! atomic unit.

pub mod backend;
pub mod ledger;
pub mod participants;
pub mod queue_order;
pub mod state;

// Re-export commonly used types
pub use backend::{InMemoryBackend, JsonFileBackend, StateBackend};
pub use ledger::PairingLedger;
pub use participants::ParticipantTable;
pub use queue_order::QueueOrder;
pub use state::ExchangeState;
