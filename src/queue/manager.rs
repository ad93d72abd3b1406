//! Queue manager: the join / assign / complete / remove protocol
//!
//! Every operation runs inside one critical section: the committed state is
//! loaded fresh from the backend, the operation is applied to that working
//! copy, and the copy is committed as a whole. Business-rule rejections and
//! storage failures both leave the committed state untouched.

use crate::error::{QueueError, QueueResult};
use crate::store::backend::StateBackend;
use crate::store::state::ExchangeState;
use crate::types::{
    Assignment, Participant, ParticipantId, ParticipantInfo, ParticipantStatus, QueueListing,
    QueueStats,
};
use crate::utils::{validate_referral_link, DEFAULT_MAX_LINK_LENGTH};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Which waiting participants the assignment driver tries in one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentScope {
    /// Only the first waiting participant in queue order; stop if it has no target
    #[default]
    FirstWaiting,
    /// Walk all waiting participants in queue order until one can be assigned
    AllWaiting,
}

/// Which pairing history excludes a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RematchPolicy {
    /// Skip candidates the participant has already acted on
    #[default]
    Directional,
    /// Also skip candidates that have already acted on the participant
    Symmetric,
}

/// Queue engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_link_length: usize,
    pub assignment_scope: AssignmentScope,
    pub rematch_policy: RematchPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_link_length: DEFAULT_MAX_LINK_LENGTH,
            assignment_scope: AssignmentScope::default(),
            rematch_policy: RematchPolicy::default(),
        }
    }
}

/// Outcome of a successful join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedQueue {
    pub participant: Participant,
    /// 1-indexed queue position at commit time
    pub position: usize,
}

/// Outcome of a successful completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedReferral {
    pub participant_id: ParticipantId,
    pub target_id: ParticipantId,
    pub completed_count: u64,
    /// New 1-indexed queue position (always the tail)
    pub position: usize,
}

enum Outcome<T> {
    Commit(T),
    Discard(T),
}

/// The main queue manager
pub struct QueueManager {
    backend: Arc<dyn StateBackend>,
    config: QueueConfig,
    critical_section: Mutex<()>,
}

impl QueueManager {
    /// Create a new queue manager with default settings
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self::with_config(backend, QueueConfig::default())
    }

    /// Create a queue manager with custom settings
    pub fn with_config(backend: Arc<dyn StateBackend>, config: QueueConfig) -> Self {
        info!(
            "Queue manager using backend {} - scope: {:?}, rematch policy: {:?}",
            backend.describe(),
            config.assignment_scope,
            config.rematch_policy
        );

        Self {
            backend,
            config,
            critical_section: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Description of the backing store
    pub fn backend_description(&self) -> String {
        self.backend.describe()
    }

    /// Register a participant and append it to the tail of the queue
    pub fn join_queue(&self, participant_id: &str, referral_link: &str) -> QueueResult<JoinedQueue> {
        let link = validate_referral_link(referral_link, self.config.max_link_length)?;

        let joined = self.transact("join", |state| {
            let participant = state.participants.create(participant_id, &link)?.clone();
            state.queue.enqueue(participant_id);
            let position = state.queue.len();
            Ok(Outcome::Commit(JoinedQueue {
                participant,
                position,
            }))
        })?;

        info!(
            "Participant '{}' joined the queue at position {} with link {}",
            participant_id, joined.position, joined.participant.referral_link
        );
        Ok(joined)
    }

    /// Assign the next eligible target to a waiting participant
    pub fn assign_referral(&self, participant_id: &str) -> QueueResult<Assignment> {
        let rematch_policy = self.config.rematch_policy;
        let assignment = self.transact("assign", |state| {
            assign_in(state, participant_id, rematch_policy).map(Outcome::Commit)
        })?;

        info!(
            "Assigned participant '{}' to act on '{}'",
            assignment.participant_id, assignment.target_id
        );
        Ok(assignment)
    }

    /// Confirm an outstanding assignment: record the pairing, count it and
    /// move the participant to the back of the queue
    pub fn complete_referral(&self, participant_id: &str) -> QueueResult<CompletedReferral> {
        let completed = self.transact("complete", |state| {
            complete_in(state, participant_id).map(Outcome::Commit)
        })?;

        info!(
            "Participant '{}' completed referral for '{}' (total: {}), requeued at position {}",
            completed.participant_id,
            completed.target_id,
            completed.completed_count,
            completed.position
        );
        Ok(completed)
    }

    /// Delete a participant from the store and the queue order, whatever its status
    pub fn remove_participant(&self, participant_id: &str) -> QueueResult<Participant> {
        let removed = self.transact("remove", |state| {
            let removed = state.participants.delete(participant_id)?;
            state.queue.dequeue(participant_id);
            Ok(Outcome::Commit(removed))
        })?;

        info!(
            "Removed participant '{}' (status was {})",
            participant_id, removed.status
        );
        Ok(removed)
    }

    /// Try to hand out the next assignment, scanning the queue head to tail
    /// for waiting participants according to the configured scope
    pub fn get_next_assignment(&self) -> QueueResult<Option<Assignment>> {
        let scope = self.config.assignment_scope;
        let rematch_policy = self.config.rematch_policy;

        let assignment = self.transact("next_assignment", |state| {
            let waiting: Vec<ParticipantId> = state
                .queue
                .iter()
                .filter(|id| {
                    state
                        .participants
                        .get(id)
                        .map(Participant::is_waiting)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            for participant_id in waiting {
                match assign_in(state, &participant_id, rematch_policy) {
                    Ok(assignment) => return Ok(Outcome::Commit(Some(assignment))),
                    Err(QueueError::NoEligibleTarget { .. }) => {
                        debug!("No eligible target for waiting participant '{}'", participant_id);
                        if scope == AssignmentScope::FirstWaiting {
                            break;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            Ok(Outcome::Discard(None))
        })?;

        match &assignment {
            Some(assignment) => info!(
                "Next assignment: '{}' -> '{}'",
                assignment.participant_id, assignment.target_id
            ),
            None => debug!("No assignment possible in this pass"),
        }

        Ok(assignment)
    }

    /// Participant record plus its queue position
    pub fn participant_info(&self, participant_id: &str) -> QueueResult<ParticipantInfo> {
        self.read(|state| {
            let participant = state.participants.get(participant_id)?.clone();
            Ok(ParticipantInfo {
                participant,
                position: state.queue.position_of(participant_id),
            })
        })
    }

    /// 1-indexed queue position, `None` if the participant is not queued
    pub fn queue_position(&self, participant_id: &str) -> QueueResult<Option<usize>> {
        self.read(|state| Ok(state.queue.position_of(participant_id)))
    }

    /// Queue in order with status and completion counts
    pub fn queue_listing(&self, limit: Option<usize>) -> QueueResult<Vec<QueueListing>> {
        self.read(|state| {
            let limit = limit.unwrap_or(usize::MAX);
            let mut listing = Vec::new();

            for (index, id) in state.queue.iter().take(limit).enumerate() {
                let participant = state.participants.get(id)?;
                listing.push(QueueListing {
                    position: index + 1,
                    participant_id: id.clone(),
                    status: participant.status,
                    completed_count: participant.completed_count,
                });
            }

            Ok(listing)
        })
    }

    /// The full queue order
    pub fn queue_snapshot(&self) -> QueueResult<Vec<ParticipantId>> {
        self.read(|state| Ok(state.queue.snapshot()))
    }

    /// Aggregate counts
    pub fn stats(&self) -> QueueResult<QueueStats> {
        self.read(|state| {
            Ok(QueueStats {
                total_participants: state.participants.len(),
                waiting: state.waiting_count(),
                assigned: state.assigned_count(),
                completed_pairings: state.history.len(),
            })
        })
    }

    /// Every known participant id
    pub fn participant_ids(&self) -> QueueResult<Vec<ParticipantId>> {
        self.read(|state| Ok(state.participants.ids().cloned().collect()))
    }

    /// Whether `referrer_id` has already acted on `referee_id`'s link
    pub fn has_paired(&self, referrer_id: &str, referee_id: &str) -> QueueResult<bool> {
        self.read(|state| Ok(state.history.has_paired(referrer_id, referee_id)))
    }

    fn transact<T>(
        &self,
        operation: &str,
        apply: impl FnOnce(&mut ExchangeState) -> QueueResult<Outcome<T>>,
    ) -> QueueResult<T> {
        let start = Instant::now();
        let _guard = self
            .critical_section
            .lock()
            .map_err(|_| QueueError::storage("Failed to acquire queue lock"))?;

        let mut state = self.backend.load().inspect_err(|e| {
            error!("Failed to load state for {}: {}", operation, e);
        })?;

        let value = match apply(&mut state) {
            Ok(Outcome::Commit(value)) => {
                self.backend.commit(&state).inspect_err(|e| {
                    error!("Failed to commit {}: {}", operation, e);
                })?;
                value
            }
            Ok(Outcome::Discard(value)) => value,
            Err(e) => {
                if e.is_business_outcome() {
                    warn!("{} rejected: {}", operation, e);
                } else {
                    error!("{} failed: {}", operation, e);
                }
                return Err(e);
            }
        };

        debug!(
            "{} completed in {:.2}ms",
            operation,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(value)
    }

    fn read<T>(&self, query: impl FnOnce(&ExchangeState) -> QueueResult<T>) -> QueueResult<T> {
        let _guard = self
            .critical_section
            .lock()
            .map_err(|_| QueueError::storage("Failed to acquire queue lock"))?;

        let state = self.backend.load()?;
        query(&state)
    }
}

/// Scan strictly forward from the participant's position and assign the
/// first candidate not excluded by pairing history. The target is left as is.
fn assign_in(
    state: &mut ExchangeState,
    participant_id: &str,
    rematch_policy: RematchPolicy,
) -> QueueResult<Assignment> {
    let participant = state.participants.get(participant_id)?;
    if participant.status != ParticipantStatus::Waiting {
        return Err(QueueError::NotWaiting {
            participant_id: participant_id.to_string(),
        });
    }
    if !state.queue.contains(participant_id) {
        return Err(QueueError::storage(format!(
            "participant {} is missing from queue order",
            participant_id
        )));
    }

    let history = &state.history;
    let target_id = state
        .queue
        .after(participant_id)
        .find(|candidate| {
            let excluded = history.has_paired(participant_id, candidate)
                || (rematch_policy == RematchPolicy::Symmetric
                    && history.has_paired(candidate, participant_id));
            if excluded {
                debug!(
                    "Skipping candidate '{}' for '{}': already paired",
                    candidate, participant_id
                );
            }
            !excluded
        })
        .cloned()
        .ok_or_else(|| QueueError::NoEligibleTarget {
            participant_id: participant_id.to_string(),
        })?;

    let target_link = state.participants.get(&target_id)?.referral_link.clone();
    state.participants.set_status(
        participant_id,
        ParticipantStatus::Assigned,
        Some(target_id.clone()),
    )?;

    Ok(Assignment {
        participant_id: participant_id.to_string(),
        target_id,
        target_link,
    })
}

fn complete_in(state: &mut ExchangeState, participant_id: &str) -> QueueResult<CompletedReferral> {
    let participant = state.participants.get(participant_id)?;
    let target_id = match (participant.status, &participant.assigned_to) {
        (ParticipantStatus::Assigned, Some(target_id)) => target_id.clone(),
        _ => {
            return Err(QueueError::NotAssigned {
                participant_id: participant_id.to_string(),
            })
        }
    };

    state.history.record(participant_id, &target_id);
    let completed_count = state.participants.increment_completed(participant_id)?;
    state
        .participants
        .set_status(participant_id, ParticipantStatus::Waiting, None)?;

    if !state.queue.move_to_tail(participant_id) {
        return Err(QueueError::storage(format!(
            "participant {} is missing from queue order",
            participant_id
        )));
    }
    let position = state.queue.len();

    Ok(CompletedReferral {
        participant_id: participant_id.to_string(),
        target_id,
        completed_count,
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::InMemoryBackend;

    fn link(id: &str) -> String {
        format!("https://x.test/{}", id)
    }

    fn create_test_manager(ids: &[&str]) -> QueueManager {
        create_test_manager_with_config(ids, QueueConfig::default())
    }

    fn create_test_manager_with_config(ids: &[&str], config: QueueConfig) -> QueueManager {
        let manager = QueueManager::with_config(Arc::new(InMemoryBackend::new()), config);
        for id in ids {
            manager.join_queue(id, &link(id)).unwrap();
        }
        manager
    }

    /// Backend that fails every commit after the first `allowed` ones
    struct FlakyBackend {
        inner: InMemoryBackend,
        allowed: Mutex<usize>,
    }

    impl StateBackend for FlakyBackend {
        fn load(&self) -> QueueResult<ExchangeState> {
            self.inner.load()
        }

        fn commit(&self, state: &ExchangeState) -> QueueResult<()> {
            let mut allowed = self.allowed.lock().unwrap();
            if *allowed == 0 {
                return Err(QueueError::storage("disk full"));
            }
            *allowed -= 1;
            self.inner.commit(state)
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    #[test]
    fn test_join_rejects_duplicates() {
        let manager = create_test_manager(&["a"]);

        assert_eq!(
            manager.join_queue("a", &link("other")).unwrap_err(),
            QueueError::AlreadyInQueue {
                participant_id: "a".to_string()
            }
        );
        assert_eq!(
            manager.join_queue("b", &link("a")).unwrap_err(),
            QueueError::DuplicateLink { link: link("a") }
        );
        assert!(matches!(
            manager.join_queue("c", "not a link").unwrap_err(),
            QueueError::InvalidLink { .. }
        ));
        assert_eq!(manager.queue_snapshot().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_join_reports_committed_position() {
        let manager = create_test_manager(&[]);
        for (expected, id) in ["a", "b", "c"].into_iter().enumerate() {
            let joined = manager.join_queue(id, &link(id)).unwrap();
            assert_eq!(joined.position, expected + 1);
            assert_eq!(joined.participant.id, id);
        }

        manager.remove_participant("a").unwrap();
        let joined = manager.join_queue("d", &link("d")).unwrap();
        assert_eq!(joined.position, 3);
        assert_eq!(manager.queue_position("d").unwrap(), Some(3));
    }

    #[test]
    fn test_join_trims_link() {
        let manager = create_test_manager(&[]);
        let joined = manager.join_queue("a", "  https://x.test/a  ").unwrap();
        assert_eq!(joined.participant.referral_link, "https://x.test/a");

        assert!(matches!(
            manager.join_queue("b", "https://x.test/a"),
            Err(QueueError::DuplicateLink { .. })
        ));
    }

    #[test]
    fn test_assign_picks_next_in_queue() {
        let manager = create_test_manager(&["a", "b", "c"]);

        let assignment = manager.assign_referral("a").unwrap();
        assert_eq!(assignment.target_id, "b");
        assert_eq!(assignment.target_link, link("b"));

        let info = manager.participant_info("a").unwrap();
        assert_eq!(info.participant.status, ParticipantStatus::Assigned);
        assert_eq!(info.participant.assigned_to.as_deref(), Some("b"));

        // Target is untouched
        let target = manager.participant_info("b").unwrap();
        assert_eq!(target.participant.status, ParticipantStatus::Waiting);
        assert_eq!(target.position, Some(2));
    }

    #[test]
    fn test_assign_skips_previous_pairing() {
        let manager = create_test_manager(&["a", "b", "c"]);
        {
            let backend = &manager.backend;
            let mut state = backend.load().unwrap();
            state.history.record("a", "b");
            backend.commit(&state).unwrap();
        }

        let assignment = manager.assign_referral("a").unwrap();
        assert_eq!(assignment.target_id, "c");
        assert_eq!(assignment.target_link, link("c"));
    }

    #[test]
    fn test_assign_exhaustion_leaves_participant_waiting() {
        let manager = create_test_manager(&["a", "b"]);
        {
            let mut state = manager.backend.load().unwrap();
            state.history.record("a", "b");
            manager.backend.commit(&state).unwrap();
        }

        assert_eq!(
            manager.assign_referral("a").unwrap_err(),
            QueueError::NoEligibleTarget {
                participant_id: "a".to_string()
            }
        );
        let info = manager.participant_info("a").unwrap();
        assert_eq!(info.participant.status, ParticipantStatus::Waiting);
        assert_eq!(info.participant.assigned_to, None);
    }

    #[test]
    fn test_assign_last_in_queue_has_no_target() {
        let manager = create_test_manager(&["a", "b"]);
        assert!(matches!(
            manager.assign_referral("b"),
            Err(QueueError::NoEligibleTarget { .. })
        ));
    }

    #[test]
    fn test_assign_requires_waiting() {
        let manager = create_test_manager(&["a", "b", "c"]);
        manager.assign_referral("a").unwrap();

        assert!(matches!(
            manager.assign_referral("a"),
            Err(QueueError::NotWaiting { .. })
        ));
        assert!(matches!(
            manager.assign_referral("z"),
            Err(QueueError::NotFound { .. })
        ));
    }

    #[test]
    fn test_many_participants_may_target_the_same_link() {
        let manager = create_test_manager(&["a", "b", "c"]);
        {
            let mut state = manager.backend.load().unwrap();
            state.history.record("a", "b");
            manager.backend.commit(&state).unwrap();
        }

        assert_eq!(manager.assign_referral("a").unwrap().target_id, "c");
        assert_eq!(manager.assign_referral("b").unwrap().target_id, "c");
    }

    #[test]
    fn test_symmetric_rematch_policy() {
        let config = QueueConfig {
            rematch_policy: RematchPolicy::Symmetric,
            ..Default::default()
        };
        let manager = create_test_manager_with_config(&["a", "b", "c"], config);
        {
            let mut state = manager.backend.load().unwrap();
            state.history.record("b", "a");
            manager.backend.commit(&state).unwrap();
        }

        assert_eq!(manager.assign_referral("a").unwrap().target_id, "c");
    }

    #[test]
    fn test_complete_requeues_and_records() {
        let manager = create_test_manager(&["a", "b", "c"]);
        manager.assign_referral("a").unwrap();

        let completed = manager.complete_referral("a").unwrap();
        assert_eq!(completed.target_id, "b");
        assert_eq!(completed.completed_count, 1);
        assert_eq!(completed.position, 3);

        assert_eq!(manager.queue_snapshot().unwrap(), vec!["b", "c", "a"]);
        assert!(manager.has_paired("a", "b").unwrap());
        assert!(!manager.has_paired("b", "a").unwrap());

        let info = manager.participant_info("a").unwrap();
        assert_eq!(info.participant.status, ParticipantStatus::Waiting);
        assert_eq!(info.participant.assigned_to, None);
        assert_eq!(info.participant.completed_count, 1);
        assert_eq!(info.position, Some(3));
    }

    #[test]
    fn test_complete_requires_assignment() {
        let manager = create_test_manager(&["a", "b"]);

        assert_eq!(
            manager.complete_referral("a").unwrap_err(),
            QueueError::NotAssigned {
                participant_id: "a".to_string()
            }
        );
        assert!(matches!(
            manager.complete_referral("z"),
            Err(QueueError::NotFound { .. })
        ));
        assert_eq!(manager.stats().unwrap().completed_pairings, 0);
    }

    #[test]
    fn test_remove_assigned_participant() {
        let manager = create_test_manager(&["a", "b", "c"]);
        manager.assign_referral("b").unwrap();

        let removed = manager.remove_participant("b").unwrap();
        assert_eq!(removed.status, ParticipantStatus::Assigned);

        assert_eq!(manager.queue_snapshot().unwrap(), vec!["a", "c"]);
        assert!(matches!(
            manager.participant_info("b"),
            Err(QueueError::NotFound { .. })
        ));
        assert!(matches!(
            manager.remove_participant("b"),
            Err(QueueError::NotFound { .. })
        ));

        // Link is free again and the id may rejoin at the tail
        manager.join_queue("b", &link("b")).unwrap();
        assert_eq!(manager.queue_snapshot().unwrap(), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_end_to_end_rotation() {
        let manager = create_test_manager(&["a", "b", "c"]);

        assert_eq!(manager.assign_referral("a").unwrap().target_link, link("b"));
        manager.complete_referral("a").unwrap();
        assert_eq!(manager.queue_snapshot().unwrap(), vec!["b", "c", "a"]);

        assert_eq!(manager.assign_referral("b").unwrap().target_link, link("c"));
        manager.complete_referral("b").unwrap();
        assert_eq!(manager.queue_snapshot().unwrap(), vec!["c", "a", "b"]);

        assert_eq!(manager.assign_referral("c").unwrap().target_link, link("a"));
    }

    #[test]
    fn test_next_assignment_first_waiting_only() {
        let manager = create_test_manager(&["a", "b", "c"]);
        {
            let mut state = manager.backend.load().unwrap();
            state.history.record("a", "b");
            state.history.record("a", "c");
            manager.backend.commit(&state).unwrap();
        }

        // "a" heads the queue but has no target; the driver does not move on to "b"
        assert_eq!(manager.get_next_assignment().unwrap(), None);
        assert_eq!(manager.stats().unwrap().assigned, 0);
    }

    #[test]
    fn test_next_assignment_all_waiting_scope() {
        let config = QueueConfig {
            assignment_scope: AssignmentScope::AllWaiting,
            ..Default::default()
        };
        let manager = create_test_manager_with_config(&["a", "b", "c"], config);
        {
            let mut state = manager.backend.load().unwrap();
            state.history.record("a", "b");
            state.history.record("a", "c");
            manager.backend.commit(&state).unwrap();
        }

        let assignment = manager.get_next_assignment().unwrap().unwrap();
        assert_eq!(assignment.participant_id, "b");
        assert_eq!(assignment.target_id, "c");
    }

    #[test]
    fn test_next_assignment_skips_assigned_head() {
        let manager = create_test_manager(&["a", "b", "c"]);

        let first = manager.get_next_assignment().unwrap().unwrap();
        assert_eq!((first.participant_id.as_str(), first.target_id.as_str()), ("a", "b"));

        let second = manager.get_next_assignment().unwrap().unwrap();
        assert_eq!((second.participant_id.as_str(), second.target_id.as_str()), ("b", "c"));

        // "c" is last and has nobody after it
        assert_eq!(manager.get_next_assignment().unwrap(), None);
    }

    #[test]
    fn test_next_assignment_on_empty_queue() {
        let manager = create_test_manager(&[]);
        assert_eq!(manager.get_next_assignment().unwrap(), None);
    }

    #[test]
    fn test_queue_listing_and_stats() {
        let manager = create_test_manager(&["a", "b", "c"]);
        manager.assign_referral("a").unwrap();
        manager.complete_referral("a").unwrap();
        manager.assign_referral("b").unwrap();

        let listing = manager.queue_listing(None).unwrap();
        let ids: Vec<_> = listing.iter().map(|l| l.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(listing[0].status, ParticipantStatus::Assigned);
        assert_eq!(listing[2].completed_count, 1);
        assert_eq!(manager.queue_listing(Some(2)).unwrap().len(), 2);

        let stats = manager.stats().unwrap();
        assert_eq!(
            stats,
            QueueStats {
                total_participants: 3,
                waiting: 2,
                assigned: 1,
                completed_pairings: 1,
            }
        );
        assert_eq!(manager.queue_position("a").unwrap(), Some(3));
        assert_eq!(manager.participant_ids().unwrap().len(), 3);
    }

    #[test]
    fn test_failed_commit_leaves_state_unchanged() {
        let backend = Arc::new(FlakyBackend {
            inner: InMemoryBackend::new(),
            allowed: Mutex::new(4),
        });
        let manager = QueueManager::new(backend.clone());

        manager.join_queue("a", &link("a")).unwrap();
        manager.join_queue("b", &link("b")).unwrap();
        manager.join_queue("c", &link("c")).unwrap();
        manager.assign_referral("a").unwrap();
        let before = backend.load().unwrap();

        let err = manager.complete_referral("a").unwrap_err();
        assert!(matches!(err, QueueError::Storage { .. }));

        let after = backend.load().unwrap();
        assert_eq!(before, after);
        assert!(!after.history.has_paired("a", "b"));
        assert_eq!(after.queue.snapshot(), vec!["a", "b", "c"]);
        assert_eq!(
            after.participants.get("a").unwrap().status,
            ParticipantStatus::Assigned
        );
    }

    #[test]
    fn test_reads_and_idle_passes_never_commit() {
        let lonely = create_test_manager(&["a"]);
        let state = lonely.backend.load().unwrap();

        let mut backend = crate::store::backend::MockStateBackend::new();
        backend
            .expect_load()
            .returning(move || Ok(state.clone()));
        backend.expect_commit().never();
        backend
            .expect_describe()
            .returning(|| "mock".to_string());

        let manager = QueueManager::new(Arc::new(backend));
        assert_eq!(manager.get_next_assignment().unwrap(), None);
        assert_eq!(manager.queue_snapshot().unwrap(), vec!["a"]);
        assert_eq!(manager.stats().unwrap().waiting, 1);
        assert!(matches!(
            manager.assign_referral("a"),
            Err(QueueError::NoEligibleTarget { .. })
        ));
    }

    #[test]
    fn test_concurrent_assignments_never_double_assign() {
        let ids: Vec<String> = (0..20).map(|i| format!("p{:02}", i)).collect();
        let manager = Arc::new(create_test_manager(
            &ids.iter().map(String::as_str).collect::<Vec<_>>(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    let mut made = Vec::new();
                    while let Ok(Some(assignment)) = manager.get_next_assignment() {
                        made.push(assignment.participant_id);
                    }
                    made
                })
            })
            .collect();

        let mut assigned: Vec<String> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        assigned.sort();
        let before_dedup = assigned.len();
        assigned.dedup();

        assert_eq!(before_dedup, assigned.len());
        // Everyone but the tail has someone after them
        assert_eq!(assigned.len(), 19);
        assert_eq!(manager.stats().unwrap().assigned, 19);
    }
}
