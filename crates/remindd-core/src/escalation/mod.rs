//! Escalation engine.
//!
//! Runs on its own cadence, independent of the delivery scheduler. For each
//! delivered-but-unacknowledged delivery it walks the reminder's level
//! table: the smallest level above the chain's current level whose delay
//! has elapsed since delivery is executed -- unless it requires manual
//! confirmation, in which case nothing happens automatically.
//!
//! Idempotency is claim-first: the new current level is durably written
//! before any target is notified, so a later check never re-executes a
//! level, regardless of partial per-target failure.

pub mod resolver;

pub use resolver::{DirectResolver, DirectoryResolver, TargetResolver};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result, ValidationError};
use crate::events::{EventSink, InteractionEvent};
use crate::model::{Delivery, DeliveryStatus, EscalationLevel, Reminder, ReminderStatus};
use crate::notify::Notifier;
use crate::store::ReminderStore;

/// Statistics for one escalation check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationStats {
    pub checked: usize,
    pub escalated: usize,
    pub skipped: usize,
    pub failures: usize,
}

/// The escalation engine service. Constructed with injected store,
/// notifier, resolver, and event sink.
pub struct EscalationEngine {
    store: Arc<dyn ReminderStore>,
    notifier: Arc<dyn Notifier>,
    resolver: Arc<dyn TargetResolver>,
    events: Arc<dyn EventSink>,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        notifier: Arc<dyn Notifier>,
        resolver: Arc<dyn TargetResolver>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            notifier,
            resolver,
            events,
        }
    }

    /// Run one escalation check against `now`.
    pub async fn run_check(&self, now: DateTime<Utc>) -> Result<EscalationStats> {
        let mut stats = EscalationStats::default();
        for delivery in self.store.unacknowledged_deliveries()? {
            stats.checked += 1;
            match self.check_delivery(&delivery, now, false).await {
                Ok(Some(_level)) => stats.escalated += 1,
                Ok(None) => stats.skipped += 1,
                // One failing record never aborts the rest of the check.
                Err(e) => {
                    stats.failures += 1;
                    warn!(delivery_id = %delivery.id, error = %e, "escalation check failed");
                }
            }
        }
        debug!(
            checked = stats.checked,
            escalated = stats.escalated,
            "escalation check finished"
        );
        Ok(stats)
    }

    /// Execute the next level for one delivery immediately, ignoring its
    /// delay and confirmation gate. This is the out-of-band manual run
    /// requested through the `escalate` acknowledgment action.
    ///
    /// Returns the executed level, or `None` when the chain has nowhere
    /// left to go.
    pub async fn escalate_now(
        &self,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let delivery = self
            .store
            .get_delivery(delivery_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "delivery",
                id: delivery_id.to_string(),
            })?;
        if delivery.is_escalation {
            return Err(ValidationError::invalid(
                "delivery_id",
                "escalation deliveries cannot anchor a chain; use the original delivery",
            )
            .into());
        }
        self.check_delivery(&delivery, now, true).await
    }

    async fn check_delivery(
        &self,
        delivery: &Delivery,
        now: DateTime<Utc>,
        manual: bool,
    ) -> Result<Option<u32>> {
        let Some(mut reminder) = self.store.get_reminder(&delivery.reminder_id)? else {
            // Orphaned delivery; nothing to escalate against.
            return Ok(None);
        };
        if !reminder.escalation.enabled || reminder.escalation.levels.is_empty() {
            return Ok(None);
        }
        // A dismissed or broken reminder is no longer anyone's work.
        if matches!(
            reminder.status,
            ReminderStatus::Cancelled | ReminderStatus::Failed
        ) {
            return Ok(None);
        }

        // Chain state describing an older delivery restarts at level zero
        // for this one.
        if reminder.escalation.anchor_delivery_id.as_deref() != Some(delivery.id.as_str()) {
            reminder.escalation.anchor_to(&delivery.id);
        }
        if reminder.escalation.halted {
            return Ok(None);
        }

        // Re-read the delivery: an acknowledgment may have landed since the
        // work queue was collected.
        let Some(fresh) = self.store.get_delivery(&delivery.id)? else {
            return Ok(None);
        };
        if reminder.escalation.stop_on_acknowledgment && fresh.acknowledged {
            return Ok(None);
        }

        let delivered_at = fresh.delivered_at.unwrap_or(fresh.created_at);
        let Some(level) = next_eligible_level(&reminder, delivered_at, now, manual) else {
            return Ok(None);
        };
        if !manual && level.requires_confirmation {
            debug!(
                delivery_id = %fresh.id,
                level = level.level,
                "level requires confirmation; waiting for manual trigger"
            );
            return Ok(None);
        }
        let level = level.clone();
        self.execute_level(&mut reminder, &fresh, &level, now).await
    }

    async fn execute_level(
        &self,
        reminder: &mut Reminder,
        original: &Delivery,
        level: &EscalationLevel,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        // Durable claim before any notification: a partial per-target
        // failure must not cause this level to run again.
        reminder.escalation.current_level = level.level;
        reminder.escalation.last_escalated_at = Some(now);
        reminder.escalation.anchor_delivery_id = Some(original.id.clone());
        reminder.updated_at = Utc::now();
        self.store.update_reminder(reminder)?;

        let mut resolved = Vec::with_capacity(level.targets.len());
        for target in &level.targets {
            match self.resolver.resolve(target) {
                Some(recipient) => resolved.push(recipient),
                None => {
                    warn!(
                        reminder_id = %reminder.id,
                        level = level.level,
                        target = ?target,
                        "escalation target did not resolve"
                    );
                }
            }
        }
        if resolved.is_empty() {
            warn!(
                reminder_id = %reminder.id,
                level = level.level,
                "no escalation target resolved; level consumed without notification"
            );
            return Ok(Some(level.level));
        }

        let results = self
            .notifier
            .send_escalation(reminder, original, level.level, &resolved)
            .await;
        for (target, outcome) in results {
            let mut escalation = Delivery::escalation(reminder, original, level.level, &target, now);
            escalation.attempt_count = 1;
            if outcome.is_delivered() {
                escalation.status = DeliveryStatus::Delivered;
                escalation.delivered_at = Some(now);
            } else {
                escalation.status = DeliveryStatus::Failed;
                warn!(
                    reminder_id = %reminder.id,
                    target = %target,
                    level = level.level,
                    "escalation notification failed"
                );
            }
            if let Err(e) = self.store.create_delivery(&escalation) {
                warn!(target = %target, error = %e, "failed to persist escalation delivery");
            }
        }

        self.events.emit(InteractionEvent::Escalated {
            reminder_id: reminder.id.clone(),
            original_delivery_id: original.id.clone(),
            level: level.level,
            targets: resolved,
            at: now,
        });
        Ok(Some(level.level))
    }
}

/// The smallest level above the chain's current level that is within
/// `max_level` and -- unless `manual` -- whose delay since delivery has
/// elapsed.
fn next_eligible_level<'a>(
    reminder: &'a Reminder,
    delivered_at: DateTime<Utc>,
    now: DateTime<Utc>,
    manual: bool,
) -> Option<&'a EscalationLevel> {
    let policy = &reminder.escalation;
    policy
        .levels
        .iter()
        .filter(|l| l.level > policy.current_level && l.level <= policy.max_level)
        .filter(|l| manual || delivered_at + Duration::minutes(l.delay_minutes) <= now)
        .min_by_key(|l| l.level)
}
