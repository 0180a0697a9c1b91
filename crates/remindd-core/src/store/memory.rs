//! In-memory store for tests and embedded use.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{Delivery, Reminder, ReminderStatus};
use crate::store::ReminderStore;

/// Mutex-guarded map store. Every method takes the lock once, so each
/// record write is atomic with respect to concurrent readers.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    reminders: HashMap<String, Reminder>,
    deliveries: HashMap<String, Delivery>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::QueryFailed("store mutex poisoned".to_string()))
    }
}

impl ReminderStore for MemoryStore {
    fn create_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .reminders
            .insert(reminder.id.clone(), reminder.clone());
        Ok(())
    }

    fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, StoreError> {
        Ok(self.lock()?.reminders.get(id).cloned())
    }

    fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.reminders.contains_key(&reminder.id) {
            return Err(StoreError::QueryFailed(format!(
                "reminder {} does not exist",
                reminder.id
            )));
        }
        inner
            .reminders
            .insert(reminder.id.clone(), reminder.clone());
        Ok(())
    }

    fn delete_reminder(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.reminders.remove(id);
        inner.deliveries.retain(|_, d| d.reminder_id != id);
        Ok(())
    }

    fn due_reminders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let inner = self.lock()?;
        let mut due: Vec<Reminder> = inner
            .reminders
            .values()
            .filter(|r| r.status == ReminderStatus::Active)
            .filter(|r| matches!(r.next_due_at, Some(at) if at <= cutoff))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_due_at);
        Ok(due)
    }

    fn reminders_for_owner(&self, owner: &str) -> Result<Vec<Reminder>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<Reminder> = inner
            .reminders
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    fn reminders_for_recipient(&self, recipient: &str) -> Result<Vec<Reminder>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<Reminder> = inner
            .reminders
            .values()
            .filter(|r| r.recipient == recipient)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    fn create_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .deliveries
            .insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    fn get_delivery(&self, id: &str) -> Result<Option<Delivery>, StoreError> {
        Ok(self.lock()?.deliveries.get(id).cloned())
    }

    fn update_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.deliveries.contains_key(&delivery.id) {
            return Err(StoreError::QueryFailed(format!(
                "delivery {} does not exist",
                delivery.id
            )));
        }
        inner
            .deliveries
            .insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    fn deliveries_for_reminder(&self, reminder_id: &str) -> Result<Vec<Delivery>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|d| d.reminder_id == reminder_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    fn open_delivery(&self, reminder_id: &str) -> Result<Option<Delivery>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .deliveries
            .values()
            .find(|d| d.reminder_id == reminder_id && !d.is_escalation && d.status.is_open())
            .cloned())
    }

    fn unacknowledged_deliveries(&self) -> Result<Vec<Delivery>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|d| {
                d.status == crate::model::DeliveryStatus::Delivered
                    && !d.acknowledged
                    && !d.is_escalation
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}
