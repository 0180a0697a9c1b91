//! Domain types for reminders, schedules, deliveries, and escalation.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How a reminder repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Interval,
    /// Cron-style expressions are carried but never evaluated.
    Custom,
}

/// Structured description of how/when a reminder repeats.
///
/// Dates are calendar dates in the reminder's timezone; `time_of_day` is an
/// "HH:mm" wall-clock string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub schedule_type: ScheduleType,
    /// "HH:mm", interpreted in the reminder's timezone.
    #[serde(default)]
    pub time_of_day: Option<String>,
    /// 0 = Monday ... 6 = Sunday. Used by `weekly`.
    #[serde(default)]
    pub weekdays: Vec<u8>,
    /// Used by `monthly`. Days past the end of a month clamp to its last day.
    #[serde(default)]
    pub day_of_month: Option<u32>,
    /// Used by `interval`.
    #[serde(default)]
    pub interval_days: Option<u32>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub max_occurrences: Option<u32>,
    #[serde(default)]
    pub excluded_dates: Vec<NaiveDate>,
    /// Raw expression for `custom` schedules. Never evaluated.
    #[serde(default)]
    pub expression: Option<String>,
}

impl ScheduleSpec {
    /// A one-shot schedule firing on `date` at `time` ("HH:mm").
    pub fn once(date: NaiveDate, time: &str) -> Self {
        Self {
            schedule_type: ScheduleType::Once,
            time_of_day: Some(time.to_string()),
            start_date: Some(date),
            ..Self::empty(ScheduleType::Once)
        }
    }

    /// A daily schedule at `time` ("HH:mm").
    pub fn daily(time: &str) -> Self {
        Self {
            schedule_type: ScheduleType::Daily,
            time_of_day: Some(time.to_string()),
            ..Self::empty(ScheduleType::Daily)
        }
    }

    /// A weekly schedule on `weekdays` (0 = Monday ... 6 = Sunday) at `time`.
    pub fn weekly(weekdays: Vec<u8>, time: &str) -> Self {
        Self {
            schedule_type: ScheduleType::Weekly,
            time_of_day: Some(time.to_string()),
            weekdays,
            ..Self::empty(ScheduleType::Weekly)
        }
    }

    /// A monthly schedule on `day_of_month` at `time`.
    pub fn monthly(day_of_month: u32, time: &str) -> Self {
        Self {
            schedule_type: ScheduleType::Monthly,
            time_of_day: Some(time.to_string()),
            day_of_month: Some(day_of_month),
            ..Self::empty(ScheduleType::Monthly)
        }
    }

    fn empty(schedule_type: ScheduleType) -> Self {
        Self {
            schedule_type,
            time_of_day: None,
            weekdays: Vec::new(),
            day_of_month: None,
            interval_days: None,
            start_date: None,
            end_date: None,
            max_occurrences: None,
            excluded_dates: Vec::new(),
            expression: None,
        }
    }
}

/// Reminder lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Expired,
    Failed,
    Cancelled,
}

impl ReminderStatus {
    /// Terminal states admit no further scheduling or escalation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReminderStatus::Completed
                | ReminderStatus::Expired
                | ReminderStatus::Failed
                | ReminderStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Draft => "draft",
            ReminderStatus::Active => "active",
            ReminderStatus::Paused => "paused",
            ReminderStatus::Completed => "completed",
            ReminderStatus::Expired => "expired",
            ReminderStatus::Failed => "failed",
            ReminderStatus::Cancelled => "cancelled",
        }
    }
}

/// Who an escalation level notifies.
///
/// Only `user` targets resolve out of the box; the other kinds need a
/// directory-backed resolver and report not-found otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationTarget {
    User { id: String },
    Manager { of: String },
    TeamLead { team: String },
    Executive { org: String },
}

/// One step in the escalation chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub level: u32,
    /// Minutes after the original delivery before this level becomes eligible.
    pub delay_minutes: i64,
    pub targets: Vec<EscalationTarget>,
    /// Levels requiring confirmation are never executed automatically.
    #[serde(default)]
    pub requires_confirmation: bool,
}

/// Escalation configuration plus the chain state for the current delivery.
///
/// `current_level` is monotonic within a chain and bounded by `max_level`.
/// `anchor_delivery_id` names the original delivery the state describes; a
/// new successful delivery re-anchors the chain at level zero.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EscalationPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub levels: Vec<EscalationLevel>,
    #[serde(default)]
    pub max_level: u32,
    #[serde(default)]
    pub stop_on_acknowledgment: bool,
    #[serde(default)]
    pub current_level: u32,
    #[serde(default)]
    pub last_escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub halted: bool,
    #[serde(default)]
    pub anchor_delivery_id: Option<String>,
}

impl EscalationPolicy {
    /// Reset the chain state for a freshly delivered occurrence.
    pub fn anchor_to(&mut self, delivery_id: &str) {
        self.current_level = 0;
        self.last_escalated_at = None;
        self.halted = false;
        self.anchor_delivery_id = Some(delivery_id.to_string());
    }
}

/// A scheduled notification to a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub owner: String,
    pub recipient: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub schedule: ScheduleSpec,
    /// IANA timezone name, e.g. "Europe/Berlin".
    pub timezone: String,
    pub status: ReminderStatus,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    /// Set only by the recurrence calculator. Absent unless status is active.
    #[serde(default)]
    pub next_due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub occurrence_count: u32,
    /// Failed cycles since the last successful delivery. Promotes the
    /// reminder to `failed` past the configured ceiling.
    #[serde(default)]
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// Parse the configured IANA timezone.
    pub fn tz(&self) -> Result<Tz, ValidationError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ValidationError::InvalidTimezone(self.timezone.clone()))
    }
}

/// Delivery attempt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Delivered,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    /// Pending and sending deliveries count against the one-open-delivery
    /// invariant.
    pub fn is_open(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Sending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        }
    }
}

/// How an acknowledgment reached the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMethod {
    Web,
    Email,
    Chat,
    Api,
}

/// What the acknowledging actor asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AckAction {
    /// Mark the reminder done; no further occurrences.
    Complete,
    /// Cancel the reminder entirely.
    Dismiss,
    /// Defer the next fire once; the recurrence resumes afterwards.
    Snooze { minutes: i64 },
    /// Request an out-of-band manual escalation run.
    Escalate,
    /// Acknowledge receipt with no further state change.
    React,
}

/// A record of one notification sent (or attempted) to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub reminder_id: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
    /// One-way false -> true.
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ack_method: Option<AckMethod>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub is_escalation: bool,
    #[serde(default)]
    pub escalation_level: Option<u32>,
    /// Back-reference to the delivery that triggered the escalation.
    /// Present only on escalation deliveries.
    #[serde(default)]
    pub original_delivery_id: Option<String>,
}

impl Delivery {
    /// A freshly claimed delivery for a due reminder.
    pub fn sending(reminder: &Reminder, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reminder_id: reminder.id.clone(),
            recipient: reminder.recipient.clone(),
            created_at: now,
            delivered_at: None,
            status: DeliveryStatus::Sending,
            acknowledged: false,
            acknowledged_at: None,
            ack_method: None,
            attempt_count: 0,
            is_escalation: false,
            escalation_level: None,
            original_delivery_id: None,
        }
    }

    /// An escalation delivery to one resolved target, tagged with the level
    /// and the original delivery it chases.
    pub fn escalation(
        reminder: &Reminder,
        original: &Delivery,
        level: u32,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reminder_id: reminder.id.clone(),
            recipient: recipient.to_string(),
            created_at: now,
            delivered_at: None,
            status: DeliveryStatus::Sending,
            acknowledged: false,
            acknowledged_at: None,
            ack_method: None,
            attempt_count: 0,
            is_escalation: true,
            escalation_level: Some(level),
            original_delivery_id: Some(original.id.clone()),
        }
    }
}
