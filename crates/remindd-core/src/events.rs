//! Interaction events.
//!
//! Every externally visible state change produces an event. An audit or
//! history collaborator consumes them through an [`EventSink`]; dashboards
//! poll the memory sink.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AckAction, AckMethod};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionEvent {
    Created {
        reminder_id: String,
        actor: String,
        next_due_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    Delivered {
        reminder_id: String,
        delivery_id: String,
        recipient: String,
        attempt_count: u32,
        at: DateTime<Utc>,
    },
    Acknowledged {
        reminder_id: String,
        delivery_id: String,
        actor: String,
        action: AckAction,
        method: AckMethod,
        at: DateTime<Utc>,
    },
    Snoozed {
        reminder_id: String,
        delivery_id: String,
        actor: String,
        until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Completed {
        reminder_id: String,
        actor: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        reminder_id: String,
        actor: String,
        at: DateTime<Utc>,
    },
    Escalated {
        reminder_id: String,
        original_delivery_id: String,
        level: u32,
        targets: Vec<String>,
        at: DateTime<Utc>,
    },
    Edited {
        reminder_id: String,
        actor: String,
        at: DateTime<Utc>,
    },
    Paused {
        reminder_id: String,
        actor: String,
        at: DateTime<Utc>,
    },
    Resumed {
        reminder_id: String,
        actor: String,
        next_due_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
}

/// Consumer side of the event stream.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: InteractionEvent);
}

/// Buffering sink; consumers drain it on their own cadence.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<InteractionEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all buffered events, leaving the sink empty.
    pub fn drain(&self) -> Vec<InteractionEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }

    /// Snapshot without draining.
    pub fn snapshot(&self) -> Vec<InteractionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: InteractionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Sink that forwards events to the tracing subscriber.
#[derive(Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: InteractionEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(event = %json, "interaction"),
            Err(e) => tracing::warn!(error = %e, "failed to encode interaction event"),
        }
    }
}
