//! # Remindd Core Library
//!
//! This library provides the core logic for remindd, a reminder delivery
//! engine: time-scheduled notifications to identified recipients, automatic
//! re-scheduling of recurring reminders, and escalation to secondary
//! recipients when a delivery goes unacknowledged.
//!
//! ## Architecture
//!
//! - **Recurrence Calculator**: A pure function from a schedule spec, a
//!   timezone, and a reference instant to the next due instant
//! - **Scheduler Loop**: Single-flight polling cycle delivering due
//!   reminders with bounded concurrency and cycle-scoped retry
//! - **Escalation Engine**: Walks per-delivery escalation chains on its own
//!   cadence, claim-first for idempotency
//! - **Acknowledgment Tracker**: Idempotent acknowledgment handling with
//!   action side effects
//! - **Storage**: SQLite and in-memory stores behind one contract
//!
//! ## Key Components
//!
//! - [`DeliveryScheduler`]: The polling delivery cycle
//! - [`EscalationEngine`]: Escalation chain progression
//! - [`AcknowledgmentTracker`]: Acknowledgment entry point
//! - [`ReminderService`]: Reminder lifecycle operations
//! - [`EngineRunner`]: Ties the periodic tasks together

pub mod ack;
pub mod config;
pub mod error;
pub mod escalation;
pub mod events;
pub mod model;
pub mod notify;
pub mod recurrence;
pub mod reminders;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use ack::{AckRequest, AckResult, AcknowledgmentTracker};
pub use config::EngineConfig;
pub use error::{EngineError, Result, StoreError, ValidationError};
pub use escalation::{DirectResolver, DirectoryResolver, EscalationEngine, TargetResolver};
pub use events::{EventSink, InteractionEvent, LogEventSink, MemoryEventSink};
pub use model::{
    AckAction, AckMethod, Delivery, DeliveryStatus, EscalationLevel, EscalationPolicy,
    EscalationTarget, Reminder, ReminderStatus, ScheduleSpec, ScheduleType,
};
pub use notify::{LogNotifier, Notifier, NotifyOutcome, WebhookNotifier};
pub use reminders::{NewReminder, ReminderEdit, ReminderService};
pub use runner::EngineRunner;
pub use scheduler::{CycleStats, DeliveryScheduler, HealthReport, HealthStatus};
pub use store::{MemoryStore, ReminderStore, SqliteStore};
