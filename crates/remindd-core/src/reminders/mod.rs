//! Reminder lifecycle operations.
//!
//! Create, edit, pause, resume, cancel, delete -- with schedule validation
//! at the door and the initial due instant computed by the recurrence
//! calculator. Every operation emits its interaction event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, ValidationError};
use crate::events::{EventSink, InteractionEvent};
use crate::model::{EscalationPolicy, Reminder, ReminderStatus, ScheduleSpec, ScheduleType};
use crate::recurrence::{self, parse_hhmm};
use crate::store::ReminderStore;

/// Input for creating a reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReminder {
    pub owner: String,
    pub recipient: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub schedule: ScheduleSpec,
    /// IANA timezone; falls back to the service default when absent.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub escalation: EscalationPolicy,
}

/// Partial update for an existing reminder. Absent fields are unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderEdit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub escalation: Option<EscalationPolicy>,
}

/// Lifecycle service over the store.
pub struct ReminderService {
    store: Arc<dyn ReminderStore>,
    events: Arc<dyn EventSink>,
    default_timezone: String,
}

impl ReminderService {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        events: Arc<dyn EventSink>,
        default_timezone: impl Into<String>,
    ) -> Self {
        Self {
            store,
            events,
            default_timezone: default_timezone.into(),
        }
    }

    /// Create and activate a reminder. A schedule that yields no next
    /// occurrence at creation time (already past, exhausted, or `custom`)
    /// parks the reminder as `expired` instead of leaving a dead active
    /// record.
    pub fn create(&self, new: NewReminder, now: DateTime<Utc>) -> Result<Reminder> {
        validate_spec(&new.schedule)?;
        let timezone = new
            .timezone
            .unwrap_or_else(|| self.default_timezone.clone());
        let tz = timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ValidationError::InvalidTimezone(timezone.clone()))?;

        let next_due_at = recurrence::next_due(&new.schedule, tz, now, None, 0);
        let status = if next_due_at.is_some() {
            ReminderStatus::Active
        } else {
            ReminderStatus::Expired
        };

        let reminder = Reminder {
            id: uuid::Uuid::new_v4().to_string(),
            owner: new.owner.clone(),
            recipient: new.recipient,
            title: new.title,
            body: new.body,
            schedule: new.schedule,
            timezone,
            status,
            escalation: new.escalation,
            next_due_at,
            last_delivered_at: None,
            occurrence_count: 0,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.create_reminder(&reminder)?;
        self.events.emit(InteractionEvent::Created {
            reminder_id: reminder.id.clone(),
            actor: new.owner,
            next_due_at: reminder.next_due_at,
            at: now,
        });
        Ok(reminder)
    }

    /// Apply a partial edit. Schedule or timezone changes recompute the due
    /// instant for active reminders.
    pub fn edit(
        &self,
        id: &str,
        edit: ReminderEdit,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        let mut reminder = self.load(id)?;
        let reschedule = edit.schedule.is_some() || edit.timezone.is_some();

        if let Some(title) = edit.title {
            reminder.title = title;
        }
        if let Some(body) = edit.body {
            reminder.body = body;
        }
        if let Some(schedule) = edit.schedule {
            validate_spec(&schedule)?;
            reminder.schedule = schedule;
        }
        if let Some(timezone) = edit.timezone {
            timezone
                .parse::<chrono_tz::Tz>()
                .map_err(|_| ValidationError::InvalidTimezone(timezone.clone()))?;
            reminder.timezone = timezone;
        }
        if let Some(escalation) = edit.escalation {
            // Edits replace the configuration but never resurrect a chain.
            let halted = reminder.escalation.halted;
            let anchor = reminder.escalation.anchor_delivery_id.clone();
            let current = reminder.escalation.current_level;
            reminder.escalation = escalation;
            reminder.escalation.halted = halted;
            reminder.escalation.anchor_delivery_id = anchor;
            reminder.escalation.current_level = current;
        }

        if reschedule && reminder.status == ReminderStatus::Active {
            let tz = reminder.tz()?;
            reminder.next_due_at = recurrence::next_due(
                &reminder.schedule,
                tz,
                now,
                reminder.last_delivered_at,
                reminder.occurrence_count,
            );
            if reminder.next_due_at.is_none() {
                reminder.status = ReminderStatus::Completed;
            }
        }

        reminder.updated_at = now;
        self.store.update_reminder(&reminder)?;
        self.events.emit(InteractionEvent::Edited {
            reminder_id: reminder.id.clone(),
            actor: actor.to_string(),
            at: now,
        });
        Ok(reminder)
    }

    /// Pause an active reminder: it drops out of due queries entirely.
    pub fn pause(&self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<Reminder> {
        let mut reminder = self.load(id)?;
        if reminder.status != ReminderStatus::Active {
            return Err(self.transition_error(&reminder, "pause"));
        }
        reminder.status = ReminderStatus::Paused;
        reminder.next_due_at = None;
        reminder.updated_at = now;
        self.store.update_reminder(&reminder)?;
        self.events.emit(InteractionEvent::Paused {
            reminder_id: reminder.id.clone(),
            actor: actor.to_string(),
            at: now,
        });
        Ok(reminder)
    }

    /// Resume a paused reminder, recomputing its due instant. A schedule
    /// that ran out while paused completes instead.
    pub fn resume(&self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<Reminder> {
        let mut reminder = self.load(id)?;
        if reminder.status != ReminderStatus::Paused {
            return Err(self.transition_error(&reminder, "resume"));
        }
        let tz = reminder.tz()?;
        reminder.next_due_at = recurrence::next_due(
            &reminder.schedule,
            tz,
            now,
            reminder.last_delivered_at,
            reminder.occurrence_count,
        );
        reminder.status = if reminder.next_due_at.is_some() {
            ReminderStatus::Active
        } else {
            ReminderStatus::Completed
        };
        reminder.updated_at = now;
        self.store.update_reminder(&reminder)?;
        self.events.emit(InteractionEvent::Resumed {
            reminder_id: reminder.id.clone(),
            actor: actor.to_string(),
            next_due_at: reminder.next_due_at,
            at: now,
        });
        Ok(reminder)
    }

    /// Cancel a reminder. Removing it from future firing does not touch an
    /// attempt already in flight.
    pub fn cancel(&self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<Reminder> {
        let mut reminder = self.load(id)?;
        if reminder.status.is_terminal() {
            return Err(self.transition_error(&reminder, "cancel"));
        }
        reminder.status = ReminderStatus::Cancelled;
        reminder.next_due_at = None;
        reminder.updated_at = now;
        self.store.update_reminder(&reminder)?;
        self.events.emit(InteractionEvent::Cancelled {
            reminder_id: reminder.id.clone(),
            actor: actor.to_string(),
            at: now,
        });
        Ok(reminder)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.load(id)?;
        self.store.delete_reminder(id)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Reminder> {
        self.load(id)
    }

    pub fn list_for_owner(&self, owner: &str) -> Result<Vec<Reminder>> {
        Ok(self.store.reminders_for_owner(owner)?)
    }

    fn load(&self, id: &str) -> Result<Reminder> {
        self.store
            .get_reminder(id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "reminder",
                id: id.to_string(),
            })
    }

    fn transition_error(&self, reminder: &Reminder, operation: &'static str) -> EngineError {
        ValidationError::InvalidTransition {
            id: reminder.id.clone(),
            status: reminder.status.as_str().to_string(),
            operation,
        }
        .into()
    }
}

/// Validate a schedule spec at the creation/edit boundary.
pub fn validate_spec(spec: &ScheduleSpec) -> Result<(), ValidationError> {
    if let Some(time) = spec.time_of_day.as_deref() {
        if parse_hhmm(time).is_none() {
            return Err(ValidationError::invalid(
                "time_of_day",
                format!("'{time}' is not HH:mm"),
            ));
        }
    }
    match spec.schedule_type {
        ScheduleType::Once => {
            // A once schedule without a start date would never fire.
            if spec.start_date.is_none() {
                return Err(ValidationError::MissingField("start_date"));
            }
        }
        ScheduleType::Daily => require_time(spec)?,
        ScheduleType::Weekly => {
            require_time(spec)?;
            if spec.weekdays.is_empty() {
                return Err(ValidationError::MissingField("weekdays"));
            }
            if spec.weekdays.iter().any(|d| *d > 6) {
                return Err(ValidationError::invalid(
                    "weekdays",
                    "weekdays are 0 (Monday) through 6 (Sunday)",
                ));
            }
        }
        ScheduleType::Monthly => {
            require_time(spec)?;
            match spec.day_of_month {
                Some(1..=31) => {}
                Some(other) => {
                    return Err(ValidationError::invalid(
                        "day_of_month",
                        format!("{other} is outside 1..=31"),
                    ))
                }
                None => return Err(ValidationError::MissingField("day_of_month")),
            }
        }
        ScheduleType::Yearly => {
            require_time(spec)?;
            if spec.start_date.is_none() {
                return Err(ValidationError::MissingField("start_date"));
            }
        }
        ScheduleType::Interval => match spec.interval_days {
            Some(n) if n >= 1 => {}
            Some(_) => {
                return Err(ValidationError::invalid(
                    "interval_days",
                    "interval must be at least one day",
                ))
            }
            None => return Err(ValidationError::MissingField("interval_days")),
        },
        ScheduleType::Custom => {}
    }
    if let (Some(start), Some(end)) = (spec.start_date, spec.end_date) {
        if end < start {
            return Err(ValidationError::invalid(
                "end_date",
                "end date precedes start date",
            ));
        }
    }
    if spec.max_occurrences == Some(0) {
        return Err(ValidationError::invalid(
            "max_occurrences",
            "must be at least 1",
        ));
    }
    Ok(())
}

fn require_time(spec: &ScheduleSpec) -> Result<(), ValidationError> {
    if spec.time_of_day.is_none() {
        return Err(ValidationError::MissingField("time_of_day"));
    }
    Ok(())
}
