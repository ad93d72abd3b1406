//! Event dispatcher
//!
//! Maps inbound participant events onto queue manager operations, replies to
//! the sender, and runs one assignment pass after every successful mutation.
//! Manager calls are blocking (they hit the state file) and run on the
//! blocking pool.

use crate::amqp::handlers::EventHandler;
use crate::amqp::publisher::Notifier;
use crate::error::{ExchangeError, QueueError, QueueResult, Result};
use crate::metrics::MetricsCollector;
use crate::queue::format::{format_participant_info, format_queue_listing, format_stats};
use crate::queue::QueueManager;
use crate::types::{Assignment, InboundEvent, Notification, ParticipantId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Text sent back to the sender
    pub reply: String,
    /// `"ok"` or the error kind
    pub outcome: &'static str,
    /// Assignment made by the follow-up pass, if any
    pub assignment: Option<Assignment>,
}

pub struct EventDispatcher {
    manager: Arc<QueueManager>,
    notifier: Arc<dyn Notifier>,
    admin_ids: HashSet<ParticipantId>,
    metrics: Arc<MetricsCollector>,
}

impl EventDispatcher {
    pub fn new(
        manager: Arc<QueueManager>,
        notifier: Arc<dyn Notifier>,
        admin_ids: HashSet<ParticipantId>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            manager,
            notifier,
            admin_ids,
            metrics,
        }
    }

    pub fn manager(&self) -> Arc<QueueManager> {
        self.manager.clone()
    }

    pub fn is_admin(&self, participant_id: &str) -> bool {
        self.admin_ids.contains(participant_id)
    }

    /// Handle one inbound event end to end
    pub async fn dispatch(&self, event: InboundEvent) -> Result<DispatchOutcome> {
        let timer = self.metrics.start_timer();
        let kind = event.kind();
        let recipient = event.reply_to().clone();

        debug!("Dispatching {} from '{}'", kind, recipient);

        let (result, mutating) = match event {
            InboundEvent::Join {
                participant_id,
                referral_link,
            } => (self.join(participant_id, referral_link).await?, true),
            InboundEvent::CompleteReferral { participant_id } => {
                (self.complete(participant_id).await?, true)
            }
            InboundEvent::Leave {
                participant_id,
                requested_by,
            } => (self.leave(participant_id, requested_by).await?, true),
            InboundEvent::QueryInfo { participant_id } => {
                (self.query_info(participant_id).await?, false)
            }
            InboundEvent::QueryQueue {
                requested_by,
                limit,
            } => (self.query_queue(requested_by, limit).await?, false),
            InboundEvent::QueryStats { requested_by } => {
                (self.query_stats(requested_by).await?, false)
            }
            InboundEvent::Broadcast { requested_by, text } => {
                (self.broadcast(requested_by, text).await?, false)
            }
        };

        let succeeded = result.is_ok();
        let (reply, outcome) = match result {
            Ok(reply) => (reply, "ok"),
            Err(e) => {
                if e.is_business_outcome() {
                    info!("{} from '{}' rejected: {}", kind, recipient, e);
                } else {
                    error!("{} from '{}' failed: {}", kind, recipient, e);
                }
                (e.user_message(), e.kind())
            }
        };

        self.deliver(Notification::reply(recipient, reply.clone()))
            .await;

        let assignment = if mutating && succeeded {
            self.drive_assignment().await?
        } else {
            None
        };

        self.metrics.record_event(kind, outcome, timer.stop());

        Ok(DispatchOutcome {
            reply,
            outcome,
            assignment,
        })
    }

    /// One `get_next_assignment` pass; the assignee is notified with the link
    pub async fn drive_assignment(&self) -> Result<Option<Assignment>> {
        match self
            .run("next_assignment", |manager| manager.get_next_assignment())
            .await?
        {
            Ok(Some(assignment)) => {
                self.metrics.record_assignment();
                self.deliver(Notification::assignment(&assignment)).await;
                Ok(Some(assignment))
            }
            Ok(None) => {
                self.metrics.record_idle_assignment_pass();
                Ok(None)
            }
            Err(e) => {
                error!("Assignment pass failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn join(&self, participant_id: ParticipantId, link: String) -> Result<QueueResult<String>> {
        let result = self
            .run("join", move |manager| manager.join_queue(&participant_id, &link))
            .await?;

        Ok(result.map(|joined| {
            format!(
                "Your referral link has been added! You are in the queue at position {}.",
                joined.position
            )
        }))
    }

    async fn complete(&self, participant_id: ParticipantId) -> Result<QueueResult<String>> {
        let result = self
            .run("complete", move |manager| {
                manager.complete_referral(&participant_id)
            })
            .await?;

        Ok(result.map(|completed| {
            self.metrics.record_completion();
            format!(
                "Referral completed! You've been added back to the queue at position {}.",
                completed.position
            )
        }))
    }

    async fn leave(
        &self,
        participant_id: ParticipantId,
        requested_by: ParticipantId,
    ) -> Result<QueueResult<String>> {
        let self_removal = participant_id == requested_by;
        if !self_removal {
            if let Err(e) = self.authorize(&requested_by, "remove") {
                return Ok(Err(e));
            }
        }

        let removed_id = participant_id.clone();
        if let Err(e) = self
            .run("remove", move |manager| {
                manager.remove_participant(&removed_id)
            })
            .await?
        {
            return Ok(Err(e));
        }
        self.metrics.record_removal();

        if self_removal {
            Ok(Ok("You have left the queue.".to_string()))
        } else {
            self.deliver(Notification::reply(
                participant_id.clone(),
                "You have been removed from the queue by an admin.",
            ))
            .await;
            Ok(Ok(format!(
                "User {} has been removed from the queue.",
                participant_id
            )))
        }
    }

    async fn query_info(&self, participant_id: ParticipantId) -> Result<QueueResult<String>> {
        let result = self
            .run("info", move |manager| {
                manager.participant_info(&participant_id)
            })
            .await?;

        Ok(result.map(|info| format_participant_info(&info)))
    }

    async fn query_queue(
        &self,
        requested_by: ParticipantId,
        limit: Option<usize>,
    ) -> Result<QueueResult<String>> {
        if let Err(e) = self.authorize(&requested_by, "view the queue") {
            return Ok(Err(e));
        }

        let result = self
            .run("queue_listing", move |manager| manager.queue_listing(limit))
            .await?;

        Ok(result.map(|listing| format_queue_listing(&listing)))
    }

    async fn query_stats(&self, requested_by: ParticipantId) -> Result<QueueResult<String>> {
        if let Err(e) = self.authorize(&requested_by, "view stats") {
            return Ok(Err(e));
        }

        let result = self.run("stats", |manager| manager.stats()).await?;

        Ok(result.map(|stats| {
            self.metrics.update_from_queue_stats(&stats);
            format_stats(&stats)
        }))
    }

    /// Send `text` to every known participant. Per-recipient failures are
    /// logged and counted only.
    async fn broadcast(
        &self,
        requested_by: ParticipantId,
        text: String,
    ) -> Result<QueueResult<String>> {
        if let Err(e) = self.authorize(&requested_by, "broadcast") {
            return Ok(Err(e));
        }

        let recipients = match self
            .run("participant_ids", |manager| manager.participant_ids())
            .await?
        {
            Ok(recipients) => recipients,
            Err(e) => return Ok(Err(e)),
        };

        let total = recipients.len();
        let mut delivered = 0;
        for recipient in recipients {
            if self
                .deliver(Notification::broadcast(recipient, text.clone()))
                .await
            {
                delivered += 1;
            }
        }

        self.metrics.record_broadcast();
        info!(
            "Broadcast from '{}' delivered to {} of {} participants",
            requested_by, delivered, total
        );

        Ok(Ok(format!(
            "Broadcast delivered to {} of {} participants.",
            delivered, total
        )))
    }

    fn authorize(&self, requested_by: &str, action: &str) -> QueueResult<()> {
        if self.is_admin(requested_by) {
            Ok(())
        } else {
            Err(QueueError::Unauthorized {
                participant_id: requested_by.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Fire-and-forget delivery; returns whether it went through
    async fn deliver(&self, notification: Notification) -> bool {
        let kind = notification.kind_label();
        let recipient = notification.recipient.clone();
        let timer = self.metrics.start_timer();

        let delivered = match self.notifier.notify(notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to deliver {} to '{}': {}", kind, recipient, e);
                false
            }
        };

        self.metrics
            .record_amqp_operation("publish", delivered, timer.stop());
        self.metrics.record_notification(kind, delivered);
        delivered
    }

    /// Run a manager operation on the blocking pool
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<QueueResult<T>>
    where
        F: FnOnce(&QueueManager) -> QueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.manager.clone();
        let timer = self.metrics.start_timer();

        let result = tokio::task::spawn_blocking(move || f(&manager))
            .await
            .map_err(|e| ExchangeError::InternalError {
                message: format!("{} task failed: {}", operation, e),
            })?;

        self.metrics.record_queue_operation(operation, timer.stop());
        Ok(result)
    }
}

#[async_trait]
impl EventHandler for EventDispatcher {
    async fn handle_event(&self, event: InboundEvent) -> Result<()> {
        let outcome = self.dispatch(event).await?;
        debug!("Event handled with outcome {}", outcome.outcome);
        Ok(())
    }

    async fn handle_error(&self, error: ExchangeError, message_data: &[u8]) {
        warn!(
            "Dropping undeliverable event - error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }

        self.metrics.record_event("invalid", "invalid_event", Default::default());
    }
}
