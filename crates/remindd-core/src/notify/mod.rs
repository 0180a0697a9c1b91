//! Outbound notification contract.
//!
//! The engine reports delivery outcomes in three classes: delivered,
//! retryable failure, permanent failure. Retry policy lives in the
//! scheduler, not in notifier implementations.

pub mod webhook;

pub use webhook::WebhookNotifier;

use async_trait::async_trait;

use crate::model::{Delivery, Reminder};

/// Outcome of a single notification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The message reached the channel. `message_ref` is the transport's
    /// identifier for the sent message, when it provides one.
    Delivered { message_ref: Option<String> },
    /// Failed, but a retry may succeed (timeouts, rate limits, 5xx).
    Retryable { error: String },
    /// Failed and retrying will not help (bad recipient, rejected payload).
    Permanent { error: String },
}

impl NotifyOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, NotifyOutcome::Delivered { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyOutcome::Retryable { .. })
    }
}

/// Every outbound transport implements this trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a reminder notification to one recipient.
    async fn send(&self, reminder: &Reminder, recipient: &str) -> NotifyOutcome;

    /// Deliver an escalation notification, tagged with the level and the
    /// original delivery it chases, to each target. Returns one outcome per
    /// target; a failing target never aborts its siblings.
    async fn send_escalation(
        &self,
        reminder: &Reminder,
        original: &Delivery,
        level: u32,
        targets: &[String],
    ) -> Vec<(String, NotifyOutcome)>;
}

/// Notifier that only logs. Useful for local runs and as a stand-in
/// transport in tests.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, reminder: &Reminder, recipient: &str) -> NotifyOutcome {
        tracing::info!(
            reminder_id = %reminder.id,
            recipient = %recipient,
            title = %reminder.title,
            "reminder notification"
        );
        NotifyOutcome::Delivered { message_ref: None }
    }

    async fn send_escalation(
        &self,
        reminder: &Reminder,
        original: &Delivery,
        level: u32,
        targets: &[String],
    ) -> Vec<(String, NotifyOutcome)> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            tracing::info!(
                reminder_id = %reminder.id,
                original_delivery_id = %original.id,
                level,
                target = %target,
                "escalation notification"
            );
            results.push((
                target.clone(),
                NotifyOutcome::Delivered { message_ref: None },
            ));
        }
        results
    }
}
