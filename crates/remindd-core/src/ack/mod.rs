//! Acknowledgment tracker.
//!
//! Synchronous request handler for acknowledgment events arriving from an
//! external source. The acknowledged flag on the delivery is the source of
//! truth: once written it is never rolled back, and a later side-effect
//! failure is reported as a partial result instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result, ValidationError};
use crate::events::{EventSink, InteractionEvent};
use crate::model::{AckAction, AckMethod, Delivery, Reminder, ReminderStatus};
use crate::recurrence;
use crate::store::ReminderStore;

/// One acknowledgment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    pub delivery_id: String,
    pub actor: String,
    pub action: AckAction,
    pub method: AckMethod,
    /// Free-form context carried into the audit stream.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Outcome of a processed acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResult {
    pub delivery_id: String,
    pub reminder_id: String,
    pub action: AckAction,
    pub acknowledged_at: DateTime<Utc>,
    /// Set by the `escalate` action: the caller should run a manual
    /// escalation for this delivery out of band.
    pub escalation_requested: bool,
    /// Populated when the acknowledgment was recorded but the action's side
    /// effect failed.
    pub side_effect_error: Option<String>,
}

/// The acknowledgment tracker service.
pub struct AcknowledgmentTracker {
    store: Arc<dyn ReminderStore>,
    events: Arc<dyn EventSink>,
}

impl AcknowledgmentTracker {
    pub fn new(store: Arc<dyn ReminderStore>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    /// Process one acknowledgment against `now`.
    pub fn process(&self, request: AckRequest, now: DateTime<Utc>) -> Result<AckResult> {
        if let AckAction::Snooze { minutes } = request.action {
            if minutes <= 0 {
                return Err(ValidationError::invalid(
                    "minutes",
                    "snooze duration must be positive",
                )
                .into());
            }
        }

        let mut delivery =
            self.store
                .get_delivery(&request.delivery_id)?
                .ok_or_else(|| EngineError::NotFound {
                    kind: "delivery",
                    id: request.delivery_id.clone(),
                })?;
        let mut reminder =
            self.store
                .get_reminder(&delivery.reminder_id)?
                .ok_or_else(|| EngineError::NotFound {
                    kind: "reminder",
                    id: delivery.reminder_id.clone(),
                })?;

        if request.actor != delivery.recipient && request.actor != reminder.owner {
            return Err(EngineError::Unauthorized {
                actor: request.actor,
                delivery_id: delivery.id,
            });
        }

        if delivery.acknowledged {
            return Err(EngineError::AlreadyAcknowledged {
                delivery_id: delivery.id,
            });
        }

        // The durable acknowledgment write. Everything after this point is
        // best-effort and never unwinds it.
        delivery.acknowledged = true;
        delivery.acknowledged_at = Some(now);
        delivery.ack_method = Some(request.method);
        self.store.update_delivery(&delivery)?;

        self.events.emit(InteractionEvent::Acknowledged {
            reminder_id: reminder.id.clone(),
            delivery_id: delivery.id.clone(),
            actor: request.actor.clone(),
            action: request.action.clone(),
            method: request.method,
            at: now,
        });

        let mut result = AckResult {
            delivery_id: delivery.id.clone(),
            reminder_id: reminder.id.clone(),
            action: request.action.clone(),
            acknowledged_at: now,
            escalation_requested: false,
            side_effect_error: None,
        };

        match self.apply_side_effect(&mut reminder, &delivery, &request, now) {
            Ok(escalation_requested) => result.escalation_requested = escalation_requested,
            Err(e) => {
                warn!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "acknowledgment side effect failed; acknowledgment stands"
                );
                result.side_effect_error = Some(e);
            }
        }
        Ok(result)
    }

    /// Apply the action side effect and, with stop-on-acknowledgment, halt
    /// the escalation chain. Returns whether a manual escalation run was
    /// requested. Errors are reported as strings for the partial result.
    fn apply_side_effect(
        &self,
        reminder: &mut Reminder,
        delivery: &Delivery,
        request: &AckRequest,
        now: DateTime<Utc>,
    ) -> std::result::Result<bool, String> {
        let mut escalation_requested = false;
        let mut event = None;

        match &request.action {
            AckAction::Complete => {
                reminder.status = ReminderStatus::Completed;
                reminder.next_due_at = None;
                event = Some(InteractionEvent::Completed {
                    reminder_id: reminder.id.clone(),
                    actor: request.actor.clone(),
                    at: now,
                });
            }
            AckAction::Dismiss => {
                reminder.status = ReminderStatus::Cancelled;
                reminder.next_due_at = None;
                event = Some(InteractionEvent::Cancelled {
                    reminder_id: reminder.id.clone(),
                    actor: request.actor.clone(),
                    at: now,
                });
            }
            AckAction::Snooze { minutes } => {
                if reminder.status != ReminderStatus::Active {
                    return Err(format!(
                        "cannot snooze a {} reminder",
                        reminder.status.as_str()
                    ));
                }
                // One-time deferral; the schedule itself is untouched and
                // normal recurrence resumes after the deferred delivery.
                let until = recurrence::snooze_until(now, *minutes);
                reminder.next_due_at = Some(until);
                event = Some(InteractionEvent::Snoozed {
                    reminder_id: reminder.id.clone(),
                    delivery_id: delivery.id.clone(),
                    actor: request.actor.clone(),
                    until,
                    at: now,
                });
            }
            AckAction::Escalate => escalation_requested = true,
            AckAction::React => {}
        }

        if reminder.escalation.stop_on_acknowledgment {
            // Halt the chain this delivery belongs to. Acknowledging an
            // escalation delivery halts the original's chain.
            let anchor = delivery
                .original_delivery_id
                .clone()
                .unwrap_or_else(|| delivery.id.clone());
            reminder.escalation.halted = true;
            reminder.escalation.anchor_delivery_id = Some(anchor);
        }

        reminder.updated_at = Utc::now();
        self.store
            .update_reminder(reminder)
            .map_err(|e| e.to_string())?;
        if let Some(event) = event {
            self.events.emit(event);
        }
        Ok(escalation_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::model::{DeliveryStatus, EscalationPolicy, ScheduleSpec};
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn make_reminder(stop_on_ack: bool) -> Reminder {
        let now = Utc::now();
        Reminder {
            id: "r1".to_string(),
            owner: "owner-1".to_string(),
            recipient: "user-1".to_string(),
            title: "Standup".to_string(),
            body: String::new(),
            schedule: ScheduleSpec::daily("09:00"),
            timezone: "UTC".to_string(),
            status: ReminderStatus::Active,
            escalation: EscalationPolicy {
                enabled: true,
                stop_on_acknowledgment: stop_on_ack,
                ..Default::default()
            },
            next_due_at: Some(now + Duration::days(1)),
            last_delivered_at: Some(now),
            occurrence_count: 1,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn seed(store: &MemoryStore, reminder: &Reminder) -> Delivery {
        let now = Utc::now();
        let mut delivery = Delivery::sending(reminder, now);
        delivery.status = DeliveryStatus::Delivered;
        delivery.delivered_at = Some(now);
        store.create_reminder(reminder).unwrap();
        store.create_delivery(&delivery).unwrap();
        delivery
    }

    fn tracker(store: Arc<MemoryStore>) -> (AcknowledgmentTracker, Arc<MemoryEventSink>) {
        let events = Arc::new(MemoryEventSink::new());
        (
            AcknowledgmentTracker::new(store, Arc::clone(&events) as Arc<dyn EventSink>),
            events,
        )
    }

    fn request(delivery_id: &str, actor: &str, action: AckAction) -> AckRequest {
        AckRequest {
            delivery_id: delivery_id.to_string(),
            actor: actor.to_string(),
            action,
            method: AckMethod::Web,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn unknown_delivery_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let (tracker, _) = tracker(store);
        let err = tracker
            .process(request("ghost", "user-1", AckAction::React), Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn stranger_is_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let delivery = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));

        let err = tracker
            .process(request(&delivery.id, "intruder", AckAction::React), Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));
        assert!(!store.get_delivery(&delivery.id).unwrap().unwrap().acknowledged);
    }

    #[test]
    fn recipient_and_owner_may_acknowledge() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let d1 = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));
        tracker
            .process(request(&d1.id, "user-1", AckAction::React), Utc::now())
            .unwrap();

        let mut d2 = Delivery::sending(&reminder, Utc::now());
        d2.status = DeliveryStatus::Delivered;
        store.create_delivery(&d2).unwrap();
        tracker
            .process(request(&d2.id, "owner-1", AckAction::React), Utc::now())
            .unwrap();
    }

    #[test]
    fn re_acknowledging_is_rejected_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let delivery = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));

        tracker
            .process(request(&delivery.id, "user-1", AckAction::React), Utc::now())
            .unwrap();
        let first = store.get_delivery(&delivery.id).unwrap().unwrap();

        let err = tracker
            .process(
                request(&delivery.id, "user-1", AckAction::Complete),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyAcknowledged { .. }));

        let second = store.get_delivery(&delivery.id).unwrap().unwrap();
        assert_eq!(first.acknowledged_at, second.acknowledged_at);
        // The rejected complete left the reminder untouched.
        assert_eq!(
            store.get_reminder("r1").unwrap().unwrap().status,
            ReminderStatus::Active
        );
    }

    #[test]
    fn complete_finishes_the_reminder() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let delivery = seed(&store, &reminder);
        let (tracker, events) = tracker(Arc::clone(&store));

        let result = tracker
            .process(
                request(&delivery.id, "user-1", AckAction::Complete),
                Utc::now(),
            )
            .unwrap();
        assert!(result.side_effect_error.is_none());

        let reminder = store.get_reminder("r1").unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Completed);
        assert!(reminder.next_due_at.is_none());
        let kinds: Vec<bool> = events
            .snapshot()
            .iter()
            .map(|e| matches!(e, InteractionEvent::Completed { .. }))
            .collect();
        assert!(kinds.contains(&true));
    }

    #[test]
    fn dismiss_cancels_the_reminder() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let delivery = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));

        tracker
            .process(
                request(&delivery.id, "user-1", AckAction::Dismiss),
                Utc::now(),
            )
            .unwrap();
        let reminder = store.get_reminder("r1").unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Cancelled);
        assert!(reminder.next_due_at.is_none());
    }

    #[test]
    fn snooze_defers_without_touching_the_schedule() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let delivery = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));

        let now = Utc::now();
        tracker
            .process(
                request(&delivery.id, "user-1", AckAction::Snooze { minutes: 30 }),
                now,
            )
            .unwrap();

        let loaded = store.get_reminder("r1").unwrap().unwrap();
        assert_eq!(loaded.status, ReminderStatus::Active);
        assert_eq!(loaded.next_due_at, Some(now + Duration::minutes(30)));
        // The recurrence spec survives for the occurrences after the
        // deferred one.
        assert_eq!(loaded.schedule.time_of_day.as_deref(), Some("09:00"));
    }

    #[test]
    fn snooze_requires_positive_minutes() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let delivery = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));

        let err = tracker
            .process(
                request(&delivery.id, "user-1", AckAction::Snooze { minutes: 0 }),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        // Rejected synchronously: the delivery is untouched.
        assert!(!store.get_delivery(&delivery.id).unwrap().unwrap().acknowledged);
    }

    #[test]
    fn snooze_on_inactive_reminder_is_a_partial_result() {
        let store = Arc::new(MemoryStore::new());
        let mut reminder = make_reminder(false);
        reminder.status = ReminderStatus::Paused;
        reminder.next_due_at = None;
        let delivery = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));

        let result = tracker
            .process(
                request(&delivery.id, "user-1", AckAction::Snooze { minutes: 30 }),
                Utc::now(),
            )
            .unwrap();
        // The acknowledgment stands even though the side effect failed.
        assert!(result.side_effect_error.is_some());
        assert!(store.get_delivery(&delivery.id).unwrap().unwrap().acknowledged);
    }

    #[test]
    fn escalate_requests_manual_run() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(false);
        let delivery = seed(&store, &reminder);
        let (tracker, _) = tracker(Arc::clone(&store));

        let result = tracker
            .process(
                request(&delivery.id, "user-1", AckAction::Escalate),
                Utc::now(),
            )
            .unwrap();
        assert!(result.escalation_requested);
    }

    #[test]
    fn stop_on_acknowledgment_halts_the_chain() {
        let store = Arc::new(MemoryStore::new());
        let reminder = make_reminder(true);
        let original = seed(&store, &reminder);

        // Acknowledge the escalation delivery, not the original.
        let mut escalation = Delivery::escalation(&reminder, &original, 1, "user-2", Utc::now());
        escalation.status = DeliveryStatus::Delivered;
        store.create_delivery(&escalation).unwrap();

        let (tracker, _) = tracker(Arc::clone(&store));
        tracker
            .process(request(&escalation.id, "user-2", AckAction::React), Utc::now())
            .unwrap();

        let loaded = store.get_reminder("r1").unwrap().unwrap();
        assert!(loaded.escalation.halted);
        // The halt anchors to the original delivery's chain.
        assert_eq!(
            loaded.escalation.anchor_delivery_id.as_deref(),
            Some(original.id.as_str())
        );
    }
}
