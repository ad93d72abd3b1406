//! Test fixtures and builders for integration testing

#![allow(dead_code)]

use referral_exchange::amqp::publisher::MockNotifier;
use referral_exchange::metrics::MetricsCollector;
use referral_exchange::queue::{QueueConfig, QueueManager};
use referral_exchange::service::EventDispatcher;
use referral_exchange::store::{InMemoryBackend, JsonFileBackend, StateBackend};
use referral_exchange::types::{InboundEvent, NotificationKind};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

pub const ADMIN: &str = "admin";

/// A dispatcher wired to a recording notifier
pub struct TestExchange {
    pub dispatcher: Arc<EventDispatcher>,
    pub manager: Arc<QueueManager>,
    pub notifier: Arc<MockNotifier>,
}

impl TestExchange {
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new()), QueueConfig::default())
    }

    pub fn on_file(path: &Path) -> Self {
        let backend = JsonFileBackend::open(path, true).unwrap();
        Self::with_backend(Arc::new(backend), QueueConfig::default())
    }

    pub fn with_backend(backend: Arc<dyn StateBackend>, config: QueueConfig) -> Self {
        let manager = Arc::new(QueueManager::with_config(backend, config));
        let notifier = Arc::new(MockNotifier::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            manager.clone(),
            notifier.clone(),
            HashSet::from([ADMIN.to_string()]),
            Arc::new(MetricsCollector::new().unwrap()),
        ));

        Self {
            dispatcher,
            manager,
            notifier,
        }
    }

    /// Dispatch and return the reply text
    pub async fn send(&self, event: InboundEvent) -> String {
        self.dispatcher.dispatch(event).await.unwrap().reply
    }

    /// Target id of the most recent assignment notification sent to `id`
    pub fn last_assignment_for(&self, id: &str) -> Option<String> {
        self.notifier
            .sent_to(id)
            .into_iter()
            .rev()
            .find_map(|n| match n.kind {
                NotificationKind::Assignment { target_id, .. } => Some(target_id),
                _ => None,
            })
    }

    pub fn assignment_count(&self) -> usize {
        self.notifier
            .sent()
            .iter()
            .filter(|n| matches!(n.kind, NotificationKind::Assignment { .. }))
            .count()
    }
}

pub fn link_for(id: &str) -> String {
    format!("https://referral.test/r/{}", id)
}

pub fn join(id: &str) -> InboundEvent {
    InboundEvent::Join {
        participant_id: id.to_string(),
        referral_link: link_for(id),
    }
}

pub fn complete(id: &str) -> InboundEvent {
    InboundEvent::CompleteReferral {
        participant_id: id.to_string(),
    }
}

pub fn leave(id: &str) -> InboundEvent {
    InboundEvent::Leave {
        participant_id: id.to_string(),
        requested_by: id.to_string(),
    }
}

pub fn info(id: &str) -> InboundEvent {
    InboundEvent::QueryInfo {
        participant_id: id.to_string(),
    }
}

pub fn stats() -> InboundEvent {
    InboundEvent::QueryStats {
        requested_by: ADMIN.to_string(),
    }
}

/// Participant ids `p0..pN`
pub fn participant_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("p{}", i)).collect()
}
