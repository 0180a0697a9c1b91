//! SQLite-backed reminder store.
//!
//! Reminders and deliveries are rows with the nested schedule/escalation
//! documents kept as JSON columns. Secondary indexes cover the status +
//! due-time, owner, recipient, and per-reminder delivery lookups; each write
//! is a single statement, so the record and its indexes move atomically.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::StoreError;
use crate::model::{
    AckMethod, Delivery, DeliveryStatus, EscalationPolicy, Reminder, ReminderStatus, ScheduleSpec,
};
use crate::store::{data_dir, ReminderStore};

/// SQLite store. The connection sits behind a mutex so the store can be
/// shared across the scheduler, escalation engine, and tracker.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the store at `~/.config/remindd/remindd.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("remindd.db"))
    }

    /// Open the store at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (tests, throwaway runs).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.lock()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS reminders (
                    id                   TEXT PRIMARY KEY,
                    owner                TEXT NOT NULL,
                    recipient            TEXT NOT NULL,
                    title                TEXT NOT NULL,
                    body                 TEXT NOT NULL DEFAULT '',
                    schedule             TEXT NOT NULL,
                    timezone             TEXT NOT NULL,
                    status               TEXT NOT NULL,
                    escalation           TEXT NOT NULL,
                    next_due_at          TEXT,
                    last_delivered_at    TEXT,
                    occurrence_count     INTEGER NOT NULL DEFAULT 0,
                    consecutive_failures INTEGER NOT NULL DEFAULT 0,
                    created_at           TEXT NOT NULL,
                    updated_at           TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS deliveries (
                    id                   TEXT PRIMARY KEY,
                    reminder_id          TEXT NOT NULL,
                    recipient            TEXT NOT NULL,
                    created_at           TEXT NOT NULL,
                    delivered_at         TEXT,
                    status               TEXT NOT NULL,
                    acknowledged         INTEGER NOT NULL DEFAULT 0,
                    acknowledged_at      TEXT,
                    ack_method           TEXT,
                    attempt_count        INTEGER NOT NULL DEFAULT 0,
                    is_escalation        INTEGER NOT NULL DEFAULT 0,
                    escalation_level     INTEGER,
                    original_delivery_id TEXT
                );

                -- Indexes for the query surface of ReminderStore
                CREATE INDEX IF NOT EXISTS idx_reminders_status_due
                    ON reminders(status, next_due_at);
                CREATE INDEX IF NOT EXISTS idx_reminders_owner ON reminders(owner);
                CREATE INDEX IF NOT EXISTS idx_reminders_recipient ON reminders(recipient);
                CREATE INDEX IF NOT EXISTS idx_deliveries_reminder
                    ON deliveries(reminder_id);
                CREATE INDEX IF NOT EXISTS idx_deliveries_chase
                    ON deliveries(status, acknowledged, is_escalation);",
            )
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::QueryFailed("connection mutex poisoned".to_string()))
    }
}

const REMINDER_COLS: &str = "id, owner, recipient, title, body, schedule, timezone, status, \
     escalation, next_due_at, last_delivered_at, occurrence_count, consecutive_failures, \
     created_at, updated_at";

const DELIVERY_COLS: &str = "id, reminder_id, recipient, created_at, delivered_at, status, \
     acknowledged, acknowledged_at, ack_method, attempt_count, is_escalation, escalation_level, \
     original_delivery_id";

impl ReminderStore for SqliteStore {
    fn create_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        let schedule = serde_json::to_string(&reminder.schedule)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let escalation = serde_json::to_string(&reminder.escalation)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        self.lock()?.execute(
            "INSERT INTO reminders (id, owner, recipient, title, body, schedule, timezone, \
             status, escalation, next_due_at, last_delivered_at, occurrence_count, \
             consecutive_failures, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                reminder.id,
                reminder.owner,
                reminder.recipient,
                reminder.title,
                reminder.body,
                schedule,
                reminder.timezone,
                reminder.status.as_str(),
                escalation,
                reminder.next_due_at.map(|t| t.to_rfc3339()),
                reminder.last_delivered_at.map(|t| t.to_rfc3339()),
                reminder.occurrence_count,
                reminder.consecutive_failures,
                reminder.created_at.to_rfc3339(),
                reminder.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLS} FROM reminders WHERE id = ?1"
        ))?;
        match stmt.query_row(params![id], reminder_from_row) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        let schedule = serde_json::to_string(&reminder.schedule)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let escalation = serde_json::to_string(&reminder.escalation)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let changed = self.lock()?.execute(
            "UPDATE reminders SET owner = ?2, recipient = ?3, title = ?4, body = ?5, \
             schedule = ?6, timezone = ?7, status = ?8, escalation = ?9, next_due_at = ?10, \
             last_delivered_at = ?11, occurrence_count = ?12, consecutive_failures = ?13, \
             updated_at = ?14
             WHERE id = ?1",
            params![
                reminder.id,
                reminder.owner,
                reminder.recipient,
                reminder.title,
                reminder.body,
                schedule,
                reminder.timezone,
                reminder.status.as_str(),
                escalation,
                reminder.next_due_at.map(|t| t.to_rfc3339()),
                reminder.last_delivered_at.map(|t| t.to_rfc3339()),
                reminder.occurrence_count,
                reminder.consecutive_failures,
                reminder.updated_at.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::QueryFailed(format!(
                "reminder {} does not exist",
                reminder.id
            )));
        }
        Ok(())
    }

    fn delete_reminder(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM deliveries WHERE reminder_id = ?1", params![id])?;
        conn.execute("DELETE FROM reminders WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn due_reminders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLS} FROM reminders
             WHERE status = 'active' AND next_due_at IS NOT NULL AND next_due_at <= ?1
             ORDER BY next_due_at"
        ))?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], reminder_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn reminders_for_owner(&self, owner: &str) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLS} FROM reminders WHERE owner = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![owner], reminder_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn reminders_for_recipient(&self, recipient: &str) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLS} FROM reminders WHERE recipient = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![recipient], reminder_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn create_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO deliveries (id, reminder_id, recipient, created_at, delivered_at, \
             status, acknowledged, acknowledged_at, ack_method, attempt_count, is_escalation, \
             escalation_level, original_delivery_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                delivery.id,
                delivery.reminder_id,
                delivery.recipient,
                delivery.created_at.to_rfc3339(),
                delivery.delivered_at.map(|t| t.to_rfc3339()),
                delivery.status.as_str(),
                delivery.acknowledged,
                delivery.acknowledged_at.map(|t| t.to_rfc3339()),
                delivery.ack_method.map(ack_method_str),
                delivery.attempt_count,
                delivery.is_escalation,
                delivery.escalation_level,
                delivery.original_delivery_id,
            ],
        )?;
        Ok(())
    }

    fn get_delivery(&self, id: &str) -> Result<Option<Delivery>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DELIVERY_COLS} FROM deliveries WHERE id = ?1"
        ))?;
        match stmt.query_row(params![id], delivery_from_row) {
            Ok(d) => Ok(Some(d)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        let changed = self.lock()?.execute(
            "UPDATE deliveries SET delivered_at = ?2, status = ?3, acknowledged = ?4, \
             acknowledged_at = ?5, ack_method = ?6, attempt_count = ?7
             WHERE id = ?1",
            params![
                delivery.id,
                delivery.delivered_at.map(|t| t.to_rfc3339()),
                delivery.status.as_str(),
                delivery.acknowledged,
                delivery.acknowledged_at.map(|t| t.to_rfc3339()),
                delivery.ack_method.map(ack_method_str),
                delivery.attempt_count,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::QueryFailed(format!(
                "delivery {} does not exist",
                delivery.id
            )));
        }
        Ok(())
    }

    fn deliveries_for_reminder(&self, reminder_id: &str) -> Result<Vec<Delivery>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DELIVERY_COLS} FROM deliveries WHERE reminder_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![reminder_id], delivery_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn open_delivery(&self, reminder_id: &str) -> Result<Option<Delivery>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DELIVERY_COLS} FROM deliveries
             WHERE reminder_id = ?1 AND is_escalation = 0
               AND status IN ('pending', 'sending')
             LIMIT 1"
        ))?;
        match stmt.query_row(params![reminder_id], delivery_from_row) {
            Ok(d) => Ok(Some(d)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn unacknowledged_deliveries(&self) -> Result<Vec<Delivery>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DELIVERY_COLS} FROM deliveries
             WHERE status = 'delivered' AND acknowledged = 0 AND is_escalation = 0
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], delivery_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

// ── Row decoding ─────────────────────────────────────────────────────

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_instant(s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(decode_err)
}

fn parse_opt_instant(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(parse_instant).transpose()
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let schedule: ScheduleSpec =
        serde_json::from_str(&row.get::<_, String>(5)?).map_err(decode_err)?;
    let escalation: EscalationPolicy =
        serde_json::from_str(&row.get::<_, String>(8)?).map_err(decode_err)?;
    Ok(Reminder {
        id: row.get(0)?,
        owner: row.get(1)?,
        recipient: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        schedule,
        timezone: row.get(6)?,
        status: reminder_status(&row.get::<_, String>(7)?)?,
        escalation,
        next_due_at: parse_opt_instant(row.get(9)?)?,
        last_delivered_at: parse_opt_instant(row.get(10)?)?,
        occurrence_count: row.get(11)?,
        consecutive_failures: row.get(12)?,
        created_at: parse_instant(row.get(13)?)?,
        updated_at: parse_instant(row.get(14)?)?,
    })
}

fn delivery_from_row(row: &Row<'_>) -> rusqlite::Result<Delivery> {
    Ok(Delivery {
        id: row.get(0)?,
        reminder_id: row.get(1)?,
        recipient: row.get(2)?,
        created_at: parse_instant(row.get(3)?)?,
        delivered_at: parse_opt_instant(row.get(4)?)?,
        status: delivery_status(&row.get::<_, String>(5)?)?,
        acknowledged: row.get(6)?,
        acknowledged_at: parse_opt_instant(row.get(7)?)?,
        ack_method: row
            .get::<_, Option<String>>(8)?
            .map(|s| ack_method(&s))
            .transpose()?,
        attempt_count: row.get(9)?,
        is_escalation: row.get(10)?,
        escalation_level: row.get(11)?,
        original_delivery_id: row.get(12)?,
    })
}

fn reminder_status(s: &str) -> rusqlite::Result<ReminderStatus> {
    match s {
        "draft" => Ok(ReminderStatus::Draft),
        "active" => Ok(ReminderStatus::Active),
        "paused" => Ok(ReminderStatus::Paused),
        "completed" => Ok(ReminderStatus::Completed),
        "expired" => Ok(ReminderStatus::Expired),
        "failed" => Ok(ReminderStatus::Failed),
        "cancelled" => Ok(ReminderStatus::Cancelled),
        other => Err(decode_err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown reminder status '{other}'"),
        ))),
    }
}

fn delivery_status(s: &str) -> rusqlite::Result<DeliveryStatus> {
    match s {
        "pending" => Ok(DeliveryStatus::Pending),
        "sending" => Ok(DeliveryStatus::Sending),
        "delivered" => Ok(DeliveryStatus::Delivered),
        "failed" => Ok(DeliveryStatus::Failed),
        "retrying" => Ok(DeliveryStatus::Retrying),
        other => Err(decode_err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown delivery status '{other}'"),
        ))),
    }
}

fn ack_method_str(method: AckMethod) -> &'static str {
    match method {
        AckMethod::Web => "web",
        AckMethod::Email => "email",
        AckMethod::Chat => "chat",
        AckMethod::Api => "api",
    }
}

fn ack_method(s: &str) -> rusqlite::Result<AckMethod> {
    match s {
        "web" => Ok(AckMethod::Web),
        "email" => Ok(AckMethod::Email),
        "chat" => Ok(AckMethod::Chat),
        "api" => Ok(AckMethod::Api),
        other => Err(decode_err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown ack method '{other}'"),
        ))),
    }
}
