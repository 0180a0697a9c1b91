//! Reminder and delivery persistence.
//!
//! The engine talks to storage through the [`ReminderStore`] contract.
//! Per-record writes are atomic including any derived indexes; callers never
//! assume cross-record (reminder + delivery) transactions and recover from
//! partial completion by idempotent re-derivation on the next cycle.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{Delivery, Reminder};

/// Storage contract consumed by the scheduler, escalation engine, and
/// acknowledgment tracker.
pub trait ReminderStore: Send + Sync {
    fn create_reminder(&self, reminder: &Reminder) -> Result<(), StoreError>;
    fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, StoreError>;
    fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError>;
    fn delete_reminder(&self, id: &str) -> Result<(), StoreError>;

    /// Active reminders with `next_due_at` at or before `cutoff`, ordered by
    /// due time.
    fn due_reminders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError>;
    fn reminders_for_owner(&self, owner: &str) -> Result<Vec<Reminder>, StoreError>;
    fn reminders_for_recipient(&self, recipient: &str) -> Result<Vec<Reminder>, StoreError>;

    fn create_delivery(&self, delivery: &Delivery) -> Result<(), StoreError>;
    fn get_delivery(&self, id: &str) -> Result<Option<Delivery>, StoreError>;
    fn update_delivery(&self, delivery: &Delivery) -> Result<(), StoreError>;
    fn deliveries_for_reminder(&self, reminder_id: &str) -> Result<Vec<Delivery>, StoreError>;

    /// The pending/sending non-escalation delivery for a reminder, if any.
    /// At most one may exist at a time.
    fn open_delivery(&self, reminder_id: &str) -> Result<Option<Delivery>, StoreError>;

    /// Delivered, unacknowledged, non-escalation deliveries -- the
    /// escalation engine's work queue.
    fn unacknowledged_deliveries(&self) -> Result<Vec<Delivery>, StoreError>;
}

/// Returns `~/.config/remindd[-dev]/` based on REMINDD_ENV.
///
/// Set REMINDD_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("REMINDD_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("remindd-dev")
    } else {
        base_dir.join("remindd")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
